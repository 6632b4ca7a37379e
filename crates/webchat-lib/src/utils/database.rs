// SQLite Database Connection Management
// Thread-safe access shared by the chat store and its persistence adapter

use rusqlite::{Connection, Result as SqliteResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::schema;
use super::APP_IDENTIFIER;

/// Database file name
#[cfg(debug_assertions)]
pub const DATABASE_FILE: &str = "webchat-dev.db";

#[cfg(not(debug_assertions))]
pub const DATABASE_FILE: &str = "webchat.db";

/// Thread-safe database wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database at `path`
    /// Enables WAL mode and runs migrations
    pub fn new(path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create database directory: {}", e))?;
        }

        let conn =
            Connection::open(&path).map_err(|e| format!("Failed to open database: {}", e))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=5000;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            "#,
        )
        .map_err(|e| format!("Failed to configure database: {}", e))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a lock on the connection for executing queries
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, String> {
        self.conn
            .lock()
            .map_err(|e| format!("Failed to acquire database lock: {}", e))
    }

    fn run_migrations(&self) -> Result<(), String> {
        let conn = self.lock()?;
        schema::run_migrations(&conn)
    }

    /// Execute a function with the database connection
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> Result<T, String>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Execute a function with the database connection (raw SQLite result)
    pub fn with_connection_raw<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Connection) -> SqliteResult<T>,
    {
        let conn = self.lock()?;
        f(&conn).map_err(|e| format!("Database error: {}", e))
    }

    /// Get the current schema version
    pub fn schema_version(&self) -> Result<i32, String> {
        self.with_connection(schema::get_version)
    }
}

/// Get the default database path
pub fn get_database_path() -> Result<PathBuf, String> {
    dirs::data_dir()
        .map(|p| p.join(APP_IDENTIFIER).join(DATABASE_FILE))
        .ok_or_else(|| "Could not determine application data directory".to_string())
}

/// Open the database at `path`, or the default location when `None`
pub fn open_database(path: Option<&Path>) -> Result<Database, String> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => get_database_path()?,
    };
    Database::new(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(path.clone()).unwrap();

        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
        assert_eq!(db.schema_version().unwrap(), schema::CURRENT_VERSION);
    }

    #[test]
    fn test_wal_mode() {
        let dir = tempdir().unwrap();
        let db = open_database(Some(&dir.path().join("test.db"))).unwrap();

        let mode: String = db
            .with_connection_raw(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)))
            .unwrap();

        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_default_path_uses_app_identifier() {
        if let Ok(path) = get_database_path() {
            assert!(path.to_string_lossy().contains(APP_IDENTIFIER));
            assert!(path.ends_with(DATABASE_FILE));
        }
    }
}
