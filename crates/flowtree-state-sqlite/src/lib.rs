//! SQLite flow store for Flowtree
//!
//! This crate provides a durable implementation of the `FlowStore` contract
//! defined in flowtree-core. Every node is one row of `flow_nodes`; the
//! encoded materialized path is indexed so that subtree reads are a single
//! range scan, and every batch commits inside one transaction.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use flowtree_core::CoreError;

pub mod migrations;
pub mod store;

pub use store::SqliteFlowStore;

/// Configuration for the SQLite connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://flowtree.db` or `sqlite::memory:`
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// How long a connection waits on a locked database (in milliseconds)
    pub busy_timeout_ms: u64,

    /// Whether to run migrations on startup
    pub run_migrations: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5_000,
            run_migrations: true,
        }
    }
}

impl SqliteConfig {
    /// Configuration for the given URL with default pool settings
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Whether the URL names a private in-memory database
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Open a connection pool for `config`, creating the database file if needed
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool, CoreError> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| CoreError::ConfigurationError(format!("Invalid SQLite URL: {}", e)))?
        .create_if_missing(true)
        .foreign_keys(false)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    // Every connection to :memory: is its own database, so keep exactly one alive
    let pool_options = if config.is_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections.max(1))
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| CoreError::StateStoreError(format!("Failed to connect to SQLite: {}", e)))?;
    debug!(url = %config.url, "Connected to SQLite database");

    if config.run_migrations {
        run_migrations(&pool).await?;
    }
    Ok(pool)
}

/// Apply every migration that has not been recorded yet
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), CoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS flowtree_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| CoreError::StateStoreError(format!("Failed to prepare migrations: {}", e)))?;

    for (name, sql) in migrations::generate_migrations() {
        let applied = sqlx::query("SELECT name FROM flowtree_migrations WHERE name = ?1")
            .bind(name)
            .fetch_optional(pool)
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Failed to read migrations: {}", e)))?;
        if applied.is_some() {
            continue;
        }

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| CoreError::StateStoreError(e.to_string()))?;
        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Migration {} failed: {}", name, e)))?;
        sqlx::query("INSERT INTO flowtree_migrations (name, applied_at) VALUES (?1, ?2)")
            .bind(name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::StateStoreError(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| CoreError::StateStoreError(e.to_string()))?;

        info!(migration = name, "Applied SQLite migration");
    }
    Ok(())
}
