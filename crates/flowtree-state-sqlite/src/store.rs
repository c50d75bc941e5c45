use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use flowtree_core::{
    domain::integrity::{verify_batch, verify_reads, NodeLookup, Snapshot},
    domain::path,
    CoreError, FlowId, FlowNode, FlowStore, WriteBatch, WriteOp,
};

use crate::{connect, SqliteConfig};

const NODE_COLUMNS: &str = "data";
// SQLite caps bound parameters per statement
const IN_CHUNK: usize = 500;

/// SQLite implementation of the flow store
#[derive(Clone)]
pub struct SqliteFlowStore {
    pool: SqlitePool,
    // Serializes writers of this process; other processes rely on SQLite locking
    write_lock: Arc<Mutex<()>>,
}

impl SqliteFlowStore {
    /// Wrap an existing pool; the schema must already exist
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Connect, migrate and wrap
    pub async fn connect(config: &SqliteConfig) -> Result<Self, CoreError> {
        Ok(Self::new(connect(config).await?))
    }

    /// Private in-memory database, mainly for tests
    pub async fn in_memory() -> Result<Self, CoreError> {
        Self::connect(&SqliteConfig::default()).await
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_where(&self, clause: &str, binds: &[String]) -> Result<Vec<FlowNode>, CoreError> {
        let sql = format!("SELECT {} FROM flow_nodes {} ORDER BY path", NODE_COLUMNS, clause);
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;
        rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &SqliteRow) -> Result<FlowNode, CoreError> {
    let data: String = row
        .try_get("data")
        .map_err(|e| CoreError::SerializationError(format!("Error getting data: {}", e)))?;
    serde_json::from_str(&data)
        .map_err(|e| CoreError::SerializationError(format!("Error deserializing flow node: {}", e)))
}

/// Map a database error, treating lock contention as a retryable conflict
fn db_error(err: sqlx::Error) -> CoreError {
    if let Some(db) = err.as_database_error() {
        // SQLITE_BUSY and SQLITE_LOCKED with their extended codes
        let busy = db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false);
        if busy {
            return CoreError::ConcurrentModification(format!("database is busy: {}", db));
        }
    }
    CoreError::StateStoreError(format!("Database error: {}", err))
}

async fn fetch_in(
    conn: &mut SqliteConnection,
    column: &str,
    ids: &BTreeSet<FlowId>,
) -> Result<Vec<FlowNode>, CoreError> {
    let ids: Vec<&FlowId> = ids.iter().collect();
    let mut nodes = Vec::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM flow_nodes WHERE {} IN (",
            NODE_COLUMNS, column
        ));
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(id.0.clone());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build()
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;
        for row in &rows {
            nodes.push(decode_row(row)?);
        }
    }
    Ok(nodes)
}

/// Load every row the integrity checks of `batch` may look at
async fn load_snapshot(conn: &mut SqliteConnection, batch: &WriteBatch) -> Result<Snapshot, CoreError> {
    let mut ids: BTreeSet<FlowId> = BTreeSet::new();
    let mut parents: BTreeSet<FlowId> = BTreeSet::new();
    for guard in &batch.reads {
        ids.insert(guard.id.clone());
    }
    for write in &batch.writes {
        ids.insert(write.id().clone());
        parents.insert(write.id().clone());
        if let WriteOp::Upsert(node) = write {
            ids.extend(node.path.iter().cloned());
            ids.extend(node.parent_id.iter().cloned());
        }
    }

    let mut rows: HashMap<FlowId, FlowNode> = HashMap::new();
    for node in fetch_in(conn, "id", &ids).await? {
        rows.insert(node.id.clone(), node);
    }
    for node in fetch_in(conn, "parent_id", &parents).await? {
        rows.insert(node.id.clone(), node);
    }
    Ok(Snapshot::from_nodes(rows.into_values()))
}

async fn write_row(conn: &mut SqliteConnection, node: &FlowNode) -> Result<(), CoreError> {
    let data = serde_json::to_string(node)?;
    sqlx::query(
        "INSERT INTO flow_nodes (id, parent_id, root_id, depth, path, version, created_at, updated_at, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (id) DO UPDATE SET
             parent_id = excluded.parent_id,
             root_id = excluded.root_id,
             depth = excluded.depth,
             path = excluded.path,
             version = excluded.version,
             updated_at = excluded.updated_at,
             data = excluded.data",
    )
    .bind(&node.id.0)
    .bind(node.parent_id.as_ref().map(|p| p.0.clone()))
    .bind(&node.root_id.0)
    .bind(node.depth as i64)
    .bind(path::encode(&node.path))
    .bind(node.version as i64)
    .bind(node.created_at.to_rfc3339())
    .bind(node.updated_at.to_rfc3339())
    .bind(data)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;
    Ok(())
}

async fn delete_row(conn: &mut SqliteConnection, id: &FlowId) -> Result<u64, CoreError> {
    let result = sqlx::query("DELETE FROM flow_nodes WHERE id = ?1")
        .bind(&id.0)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    Ok(result.rows_affected())
}

async fn current_version(conn: &mut SqliteConnection, id: &FlowId) -> Result<u64, CoreError> {
    let row = sqlx::query("SELECT version FROM flow_nodes WHERE id = ?1")
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?;
    match row {
        Some(row) => {
            let version: i64 = row.try_get("version").map_err(db_error)?;
            Ok(version as u64)
        }
        None => Ok(0),
    }
}

#[async_trait]
impl FlowStore for SqliteFlowStore {
    async fn find_by_id(&self, id: &FlowId) -> Result<Option<FlowNode>, CoreError> {
        let row = sqlx::query("SELECT data FROM flow_nodes WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn put(&self, node: &FlowNode) -> Result<(), CoreError> {
        node.id.validate()?;
        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let mut row = node.clone();
        row.version = current_version(&mut *tx, &node.id).await? + 1;
        row.updated_at = Utc::now();
        write_row(&mut *tx, &row).await?;

        tx.commit().await.map_err(db_error)?;
        debug!(flow_id = %node.id, version = row.version, "Row written");
        Ok(())
    }

    async fn delete(&self, id: &FlowId) -> Result<(), CoreError> {
        let _writer = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        if delete_row(&mut *conn, id).await? > 0 {
            debug!(flow_id = %id, "Row removed");
        }
        Ok(())
    }

    async fn scan_by_path_prefix(&self, prefix: &[FlowId]) -> Result<Vec<FlowNode>, CoreError> {
        if prefix.is_empty() {
            return self.scan_all().await;
        }
        let lower = path::encode(prefix);
        let upper = path::prefix_upper_bound(&lower);
        self.fetch_where("WHERE path >= ?1 AND path < ?2", &[lower, upper])
            .await
    }

    async fn scan_roots(&self) -> Result<Vec<FlowNode>, CoreError> {
        self.fetch_where("WHERE parent_id IS NULL", &[]).await
    }

    async fn scan_all(&self) -> Result<Vec<FlowNode>, CoreError> {
        self.fetch_where("", &[]).await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), CoreError> {
        let _writer = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let snapshot = load_snapshot(&mut *tx, &batch).await?;
        verify_reads(&snapshot, &batch.reads)?;
        verify_batch(&snapshot, &batch.writes)?;

        let now = Utc::now();
        let writes = batch.writes.len();
        // Deletes first so that no intermediate state holds a stale path
        for write in &batch.writes {
            if let WriteOp::Delete(id) = write {
                delete_row(&mut *tx, id).await?;
            }
        }
        for write in batch.writes {
            if let WriteOp::Upsert(mut node) = write {
                node.version = snapshot_version(&snapshot, &node.id) + 1;
                node.updated_at = now;
                write_row(&mut *tx, &node).await?;
            }
        }

        // Dropping the transaction without commit rolls everything back
        tx.commit().await.map_err(db_error)?;
        debug!(writes, reads = batch.reads.len(), "Batch committed");
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

fn snapshot_version(snapshot: &Snapshot, id: &FlowId) -> u64 {
    snapshot.node(id).map(|node| node.version).unwrap_or(0)
}
