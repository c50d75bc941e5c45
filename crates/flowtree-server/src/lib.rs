//!
//! Flowtree Server - HTTP front end of the Flowtree hierarchy engine
//!
//! This module exports all the components of the Flowtree Server.

use std::sync::Arc;

use flowtree_core::{FlowService, FlowStore};
use flowtree_state_inmemory::InMemoryFlowStore;
use flowtree_state_sqlite::{SqliteConfig, SqliteFlowStore};

/// API module
pub mod api;

/// Server module
pub mod server;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

// Re-export key types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::FlowtreeServer;

/// Run function
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    // Initialize logging
    init_logging(&config);

    let server = build_server(config).await?;
    server.run().await
}

/// Wire the store and the flow service described by `config`
pub async fn build_server(config: ServerConfig) -> ServerResult<FlowtreeServer> {
    config.validate()?;
    let store = create_store(&config).await?;
    let service = FlowService::new(store, config.core.clone());
    Ok(FlowtreeServer::new(config, service))
}

/// Initialize logging
pub fn init_logging(config: &ServerConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = if config.json_logs {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };
    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

/// Create the flow store named by `store_url`
pub async fn create_store(config: &ServerConfig) -> ServerResult<Arc<dyn FlowStore>> {
    let url = config.store_url.as_str();
    if url.starts_with("memory://") {
        tracing::info!("Using in-memory flow store");
        Ok(Arc::new(InMemoryFlowStore::new()))
    } else if url.starts_with("sqlite:") {
        tracing::info!(url, "Using SQLite flow store");
        let store = SqliteFlowStore::connect(&SqliteConfig::for_url(url)).await?;
        Ok(Arc::new(store))
    } else {
        Err(ServerError::ConfigurationError(format!(
            "Unsupported store_url '{}'",
            url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_store_by_url() {
        let mut config = ServerConfig::default();
        let store = create_store(&config).await.unwrap();
        store.ping().await.unwrap();

        config.store_url = "sqlite::memory:".to_string();
        let store = create_store(&config).await.unwrap();
        assert!(store.scan_all().await.unwrap().is_empty());

        config.store_url = "redis://cache".to_string();
        assert!(matches!(
            create_store(&config).await,
            Err(ServerError::ConfigurationError(_))
        ));
    }
}
