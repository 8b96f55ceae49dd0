//! Persisted mirror store.
//!
//! A single local SQLite database holds the mirrored container records and
//! image-pull records. All three reconciliation components share one
//! [`MirrorStore`] handle; individual statements are serialized by the
//! connection mutex, there is no cross-record transactional locking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

mod containers;
mod images;

pub use containers::{ContainerRecord, NewContainer, OperationStatus};
pub use images::ImagePullRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS containers (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    engine_id         TEXT NOT NULL,
    name              TEXT NOT NULL,
    image             TEXT NOT NULL,
    status            TEXT NOT NULL,
    operation_status  TEXT NOT NULL DEFAULT 'success',
    last_error        TEXT,
    user_metadata     TEXT,
    need_update       INTEGER NOT NULL DEFAULT 0,
    restart_count     INTEGER NOT NULL DEFAULT 0,
    last_restart_at   INTEGER,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS image_pulls (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    name               TEXT NOT NULL,
    tag                TEXT NOT NULL,
    pulling            INTEGER NOT NULL DEFAULT 0,
    progress           TEXT,
    image_id           TEXT,
    last_error         TEXT,
    local_create_time  TEXT,
    remote_create_time TEXT,
    need_update        INTEGER NOT NULL DEFAULT 0,
    last_checked_at    INTEGER,
    UNIQUE(name, tag)
);
";

/// Shared handle to the mirror database.
#[derive(Clone)]
pub struct MirrorStore {
    conn: Arc<Mutex<Connection>>,
}

impl MirrorStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(MirrorStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("mirror store mutex poisoned");
        Ok(f(&conn)?)
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
