//! SQLite connection handling and schema.
//!
//! rusqlite is synchronous, so every call runs on the blocking pool behind a
//! timeout; callers on the async side only ever see `StorageError`. A call that
//! times out before it reaches the connection is cancelled outright; one that
//! is already running gets interrupted and its real result is reported.

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use fleetpulse_core::StorageConfig;
use rusqlite::{Connection, ErrorCode, InterruptHandle};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long an interrupted call gets to unwind before its outcome is unknown
const INTERRUPT_GRACE: Duration = Duration::from_secs(1);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    owner_user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    device_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'offline',
    updated_at INTEGER NOT NULL,
    last_seen_at INTEGER
);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    device_id TEXT,
    source TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    read_at INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS telemetry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL,
    recorded_at INTEGER NOT NULL,
    metrics TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS api_tokens (
    token_hash TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_used_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_devices_owner ON devices(owner_user_id);
CREATE INDEX IF NOT EXISTS idx_notifications_user_created
    ON notifications(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_telemetry_device_recorded
    ON telemetry(device_id, recorded_at);
CREATE INDEX IF NOT EXISTS idx_api_tokens_user ON api_tokens(user_id);
";

/// Where a single `call` is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Queued,
    Running,
    Abandoned,
    Finished,
}

/// Thread-safe handle over one SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    op_timeout: Duration,
}

impl SqliteStore {
    pub fn open(path: &Path, op_timeout: Duration) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Task(format!("create {:?}: {}", parent, e)))?;
            }
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);
        tracing::info!("Opened SQLite store at {:?}", path);
        Self::init(conn, op_timeout)
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::open(&config.db_path, Duration::from_millis(config.op_timeout_ms))
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn init(conn: Connection, op_timeout: Duration) -> Result<Self, StorageError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
            op_timeout,
        })
    }

    /// Run `f` against the connection on the blocking pool
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let state = Arc::new(Mutex::new(CallState::Queued));
        let task_state = Arc::clone(&state);
        let op_timeout = self.op_timeout;
        let mut task = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| StorageError::Lock(e.to_string()))?;
            {
                let mut state = task_state
                    .lock()
                    .map_err(|e| StorageError::Lock(e.to_string()))?;
                if *state == CallState::Abandoned {
                    return Err(StorageError::Timeout(op_timeout));
                }
                *state = CallState::Running;
            }
            let result = f(&guard);
            if let Ok(mut state) = task_state.lock() {
                *state = CallState::Finished;
            }
            result
        });

        if let Ok(joined) = tokio::time::timeout(self.op_timeout, &mut task).await {
            return joined.unwrap_or_else(|e| Err(StorageError::Task(e.to_string())));
        }

        {
            let mut state = state.lock().map_err(|e| StorageError::Lock(e.to_string()))?;
            match *state {
                CallState::Queued => {
                    *state = CallState::Abandoned;
                    tracing::warn!("Storage call abandoned after {:?}", self.op_timeout);
                    return Err(StorageError::Timeout(self.op_timeout));
                }
                // Holding the state lock keeps the call from finishing, so the
                // interrupt cannot land on the next caller's statement
                CallState::Running => self.interrupt.interrupt(),
                CallState::Abandoned | CallState::Finished => {}
            }
        }

        match tokio::time::timeout(INTERRUPT_GRACE, task).await {
            Ok(Ok(Err(StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))))
                if e.code == ErrorCode::OperationInterrupted =>
            {
                tracing::warn!("Storage call interrupted after {:?}", self.op_timeout);
                Err(StorageError::Timeout(self.op_timeout))
            }
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StorageError::Task(e.to_string())),
            Err(_) => Err(StorageError::OutcomeUnknown(self.op_timeout)),
        }
    }
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::corrupt(format!("timestamp {} out of range", micros)))
}

pub(crate) fn from_micros_opt(micros: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    micros.map(from_micros).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let tables: i64 = store
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                     AND name IN ('devices', 'notifications', 'telemetry', 'api_tokens')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let store = SqliteStore::in_memory().unwrap();
        let enabled: i64 = store
            .call(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    async fn token_rows(store: &SqliteStore) -> i64 {
        store
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM api_tokens", [], |row| row.get(0))?))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_queued_call_dropped_on_timeout() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.op_timeout = Duration::from_millis(50);

        let busy = store.conn.lock().unwrap();
        let err = store
            .call(|conn| {
                conn.execute(
                    "INSERT INTO api_tokens (token_hash, user_id, created_at) VALUES ('h1', 'u1', 0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout(_)), "{:?}", err);
        drop(busy);

        // The queued write gets the connection now and must not apply
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.op_timeout = Duration::from_secs(5);
        assert_eq!(token_rows(&store).await, 0);
    }

    #[tokio::test]
    async fn test_running_write_interrupted_on_timeout() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.op_timeout = Duration::from_millis(50);

        let err = store
            .call(|conn| {
                conn.execute(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
                     INSERT INTO api_tokens (token_hash, user_id, created_at)
                     SELECT 'h' || x, 'u1', 0 FROM n",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout(_)), "{:?}", err);

        store.op_timeout = Duration::from_secs(5);
        assert_eq!(token_rows(&store).await, 0);
    }

    #[test]
    fn test_micros_round_trip() {
        let now = Utc::now();
        assert_eq!(from_micros(to_micros(now)).unwrap().timestamp_micros(), now.timestamp_micros());
        assert!(from_micros(i64::MAX).is_err());
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fleet.sqlite");
        SqliteStore::open(&path, Duration::from_secs(1)).unwrap();
        assert!(path.exists());
    }
}
