#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use qrgen_infra::database::DbManager;
use tempfile::TempDir;

/// Temporary migrated database that lives as long as the value.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("test.db");

        let manager =
            DbManager::new(&db_path, 4, Duration::from_secs(5)).expect("db manager should be created");
        manager.run_migrations().expect("migrations should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }

    /// Execute a batch of SQL statements against the database.
    pub fn execute_batch(&self, sql: &str) {
        let conn = self.manager.get_connection().expect("connection should be available");
        conn.execute_batch(sql).expect("SQL batch execution should succeed");
    }

    pub fn count(&self, sql: &str) -> i64 {
        let conn = self.manager.get_connection().expect("connection should be available");
        conn.query_row(sql, [], |row| row.get(0)).expect("count query should succeed")
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}
