//! SQLite-backed storage for the dispatch service, following the teacher's
//! `ServerDatabase` pattern: a thin manager around a lazily-opened
//! `rusqlite::Connection`, wrapped in `Arc<Mutex<_>>` by callers so the
//! repositories can share one connection across async tasks.

mod log_repo;
mod schema;
mod srv_repo;
mod task_repo;

pub use log_repo::SqliteTaskLogRepo;
pub use srv_repo::SqliteTaskCallbackSrvRepo;
pub use task_repo::SqliteTaskRepo;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

pub struct Database {
    db_path: PathBuf,
    connection: Option<Connection>,
}

impl Database {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
            }
        }
        Ok(Database {
            db_path,
            connection: None,
        })
    }

    pub fn initialize(&mut self) -> Result<()> {
        info!("initializing database at {}", self.db_path.display());
        let conn = self.get_connection()?;
        schema::create_all(conn)?;
        info!("database initialization complete");
        Ok(())
    }

    pub fn get_connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path)
                .with_context(|| format!("failed to open database: {}", self.db_path.display()))?;

            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .context("failed to enable WAL mode")?;
            conn.execute("PRAGMA foreign_keys=ON", [])
                .context("failed to enable foreign key constraints")?;
            conn.busy_timeout(std::time::Duration::from_secs(30))
                .context("failed to set busy timeout")?;

            self.connection = Some(conn);
        }
        Ok(self
            .connection
            .as_mut()
            .expect("connection must exist right after being set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn initialize_creates_tables() {
        let dir = TempDir::new().unwrap();
        let mut db = Database::new(dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        let conn = db.get_connection().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='task'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
