//! Database Connection
//!
//! Owns the rusqlite connection to the primary `.jvp` store: WAL
//! journaling, a 5000 ms busy timeout, and explicit immediate
//! transactions driven by the command manager.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::core::CoreResult;

use super::schema::SCHEMA;

/// Busy timeout applied to every connection.
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Connection to the primary project store.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) the store at `path`, normally `<project>.jvp`.
    ///
    /// A stale `-shm` sidecar left behind by a crashed process is removed
    /// before opening; `-wal` files are preserved since they may carry
    /// committed-but-uncheckpointed transactions.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        remove_stale_shm(path);

        let conn = Connection::open(path)?;
        let db = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        db.configure()?;
        Ok(db)
    }

    /// In-memory store, used by tests throughout the engine.
    pub fn open_in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, path: None };
        db.configure()?;
        Ok(db)
    }

    fn configure(&self) -> CoreResult<()> {
        // WAL keeps readers unblocked by the single writer. In-memory
        // connections silently stay in their default journal mode.
        let _ = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()));
        self.conn
            .busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        self.conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Path of the backing file, if not in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(super) fn conn(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Opens an immediate (write-locking) transaction.
    pub fn begin_immediate(&self) -> CoreResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub fn commit(&self) -> CoreResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Rolls back the open transaction. A rollback with no transaction
    /// open is reported by SQLite; callers only invoke this on a failure
    /// path where that report is secondary.
    pub fn rollback(&self) -> CoreResult<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// True while an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

fn remove_stale_shm(db_path: &Path) {
    let shm = sidecar(db_path, "-shm");
    let wal = sidecar(db_path, "-wal");
    // Without a WAL file the shared-memory index cannot be live.
    if shm.exists() && !wal.exists() {
        if let Err(e) = std::fs::remove_file(&shm) {
            tracing::warn!(path = %shm.display(), error = %e, "Failed to remove stale -shm file");
        }
    }
}

fn sidecar(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
