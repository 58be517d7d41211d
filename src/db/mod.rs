//! Metadata store access
//!
//! A single SQLite connection guarded by an async mutex. Model and service
//! functions take `&rusqlite::Connection`; a `rusqlite::Transaction` derefs
//! to `Connection`, so the same functions run unchanged inside or outside a
//! transaction. [`with_transaction`] begins, commits, or rolls back only the
//! transaction it opened itself.

pub mod migrate;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};

/// Shared handle to the metadata store
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the store described by the configuration
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if config.driver != "sqlite" {
            return Err(Error::Config(format!(
                "unsupported database driver: {}",
                config.driver
            )));
        }
        if let Some(parent) = config.db_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::open_file(&config.db_file)
    }

    /// Open a store backed by a file
    pub fn open_file(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self::wrap(conn))
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wrap(Connection::open_in_memory()?))
    }

    fn wrap(conn: Connection) -> Self {
        let _ = conn.pragma_update(None, "foreign_keys", "ON");
        let _ = conn.busy_timeout(std::time::Duration::from_secs(5));
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Acquire the connection for the duration of one request
    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Synchronous acquire for CLI paths and tests
    pub fn blocking_lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.blocking_lock()
    }
}

/// Run `f` inside a transaction begun here.
///
/// Commits on success, rolls back on error. Callers already inside a
/// transaction should call `f`'s body directly with their own connection
/// instead of nesting.
pub fn with_transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    let tx = conn.transaction()?;
    match f(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            let _ = tx.rollback();
            Err(err)
        }
    }
}
