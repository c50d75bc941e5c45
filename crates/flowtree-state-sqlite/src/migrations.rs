/// Ordered schema migrations for the SQLite flow store
///
/// Each entry is applied once and recorded in `flowtree_migrations`.
pub fn generate_migrations() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "20240401000000_flow_nodes",
            r#"
            CREATE TABLE IF NOT EXISTS flow_nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                root_id TEXT NOT NULL,
                depth INTEGER NOT NULL,
                -- ids joined by '/' with a trailing '/'
                path TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                data TEXT NOT NULL
            );

            -- Prefix scans are range scans over this index
            CREATE UNIQUE INDEX IF NOT EXISTS idx_flow_nodes_path ON flow_nodes(path);

            CREATE INDEX IF NOT EXISTS idx_flow_nodes_parent_id ON flow_nodes(parent_id);

            CREATE INDEX IF NOT EXISTS idx_flow_nodes_root_id ON flow_nodes(root_id);
            "#,
        ),
    ]
}
