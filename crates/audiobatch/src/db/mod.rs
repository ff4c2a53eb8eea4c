//! SQLite persistence for folder and notification profiles, the batch
//! config, jobs, file records and their append-only logs.
//!
//! Every repository is a set of free functions over a shared [`Database`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod delivery_repo;
pub mod error;
pub mod folder_repo;
pub mod job_repo;
pub mod log_repo;
pub mod migrations;
pub mod notification_repo;
pub mod record_repo;
pub mod settings_repo;
pub mod stats_repo;

pub use error::DatabaseError;

/// How long a statement waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection behind a mutex, shared by clones.
///
/// Workers of every running job write through the same handle, so each
/// repository call holds the lock only for its own statements.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the store at `path`, creating parent directories,
    /// and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Record store ready at {}", path.display());
        Ok(db)
    }

    /// A private store that disappears with the handle.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Commits when `f` succeeds. Dropping the transaction on error rolls
    /// it back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// `~/.audiobatch/data/audiobatch.db`, when a home directory exists.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".audiobatch").join("data").join("audiobatch.db"))
}
