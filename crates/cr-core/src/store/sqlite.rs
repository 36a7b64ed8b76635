//! SQLite-backed content and credential store
//!
//! One row per `(device_id, username)` pair; a write replaces the pair's row
//! and takes a fresh sequence number, so "latest" is the highest `seq` for a
//! device or a user. Queries run on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{ClipRecord, ContentStore, CredentialStore};
use crate::config::UserEntry;
use crate::error::StoreError;
use crate::time::current_time_millis;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    password TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS clip_content (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id    TEXT NOT NULL,
    username     TEXT NOT NULL,
    content      BLOB NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    UNIQUE (device_id, username)
);
CREATE INDEX IF NOT EXISTS idx_clip_content_username ON clip_content (username, seq);
";

const LATEST_BY_DEVICE: &str = "SELECT device_id, username, content, timestamp_ms
     FROM clip_content WHERE device_id = ?1 ORDER BY seq DESC LIMIT 1";

const LATEST_BY_USER: &str = "SELECT device_id, username, content, timestamp_ms
     FROM clip_content WHERE username = ?1 ORDER BY seq DESC LIMIT 1";

/// Store persisted in a SQLite database file
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        let store = Self::init(Connection::open(path)?, path.to_path_buf())?;
        tracing::info!("Opened clipboard database {:?}", path);
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add or replace accounts
    pub fn add_users(&self, users: impl IntoIterator<Item = UserEntry>) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for entry in users {
            tx.execute(
                "REPLACE INTO users (username, password) VALUES (?1, ?2)",
                params![entry.user, entry.password],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("Database task failed: {}", e)))?
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

fn latest(conn: &Connection, sql: &str, key: &str) -> Result<Option<ClipRecord>, StoreError> {
    let record = conn
        .query_row(sql, params![key], |row| {
            Ok(ClipRecord {
                device_id: row.get(0)?,
                username: row.get(1)?,
                content: Bytes::from(row.get::<_, Vec<u8>>(2)?),
                timestamp_ms: row.get::<_, i64>(3)?.max(0) as u64,
            })
        })
        .optional()?;
    Ok(record)
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn insert_clip_content(
        &self,
        device_id: &str,
        username: &str,
        content: Bytes,
    ) -> Result<(), StoreError> {
        let device_id = device_id.to_string();
        let username = username.to_string();
        let timestamp_ms = current_time_millis() as i64;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO clip_content (device_id, username, content, timestamp_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![device_id, username, &content[..], timestamp_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn clip_content_by_id(&self, device_id: &str) -> Result<Option<ClipRecord>, StoreError> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| latest(conn, LATEST_BY_DEVICE, &device_id))
            .await
    }

    async fn clip_content_by_username(
        &self,
        username: &str,
    ) -> Result<Option<ClipRecord>, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| latest(conn, LATEST_BY_USER, &username))
            .await
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn password_hash(&self, username: &str) -> Result<Option<String>, StoreError> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let password = conn
                .query_row(
                    "SELECT password FROM users WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(password)
        })
        .await
    }
}
