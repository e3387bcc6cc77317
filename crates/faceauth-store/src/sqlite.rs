//! SQLite-backed record store.
//!
//! One row per user; each pose embedding is a little-endian `f32` blob.

use crate::{codec, validate, RecordStore, SaveOutcome, StoreError};
use faceauth_core::{Embedding, UserRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS user_records (
    user_name     TEXT PRIMARY KEY NOT NULL,
    model_version TEXT,
    dimension     INTEGER NOT NULL,
    front         BLOB NOT NULL,
    left          BLOB NOT NULL,
    right         BLOB NOT NULL,
    updated_at    TEXT NOT NULL
);
";

const SELECT_BY_NAME: &str = "SELECT user_name, model_version, dimension, front, left, right
     FROM user_records WHERE user_name = ?1";

/// Row as stored, before blob decoding.
struct RawRecord {
    user_name: String,
    model_version: Option<String>,
    dimension: i64,
    blobs: [Vec<u8>; 3],
}

impl RawRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_name: row.get(0)?,
            model_version: row.get(1)?,
            dimension: row.get(2)?,
            blobs: [row.get(3)?, row.get(4)?, row.get(5)?],
        })
    }

    fn decode(self) -> Result<UserRecord, StoreError> {
        let dimension = usize::try_from(self.dimension)
            .map_err(|_| StoreError::CorruptBlob(format!("{}: negative dimension {}", self.user_name, self.dimension)))?;

        let [front, left, right] = self.blobs;
        let embedding = |blob: Vec<u8>| -> Result<Embedding, StoreError> {
            Ok(Embedding::new(codec::decode(&blob, dimension)?, self.model_version.clone()))
        };
        let (front, left, right) = (embedding(front)?, embedding(left)?, embedding(right)?);
        Ok(UserRecord::new(self.user_name, front, left, right))
    }
}

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Open or create the database, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "record store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }
}

fn select(conn: &Connection, name: &str) -> Result<Option<UserRecord>, StoreError> {
    conn.query_row(SELECT_BY_NAME, params![name], RawRecord::from_row)
        .optional()?
        .map(RawRecord::decode)
        .transpose()
}

fn insert_row(conn: &Connection, record: &UserRecord, dimension: usize) -> Result<(), StoreError> {
    let inserted = conn.execute(
        "INSERT INTO user_records (user_name, model_version, dimension, front, left, right, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_name) DO NOTHING",
        params![
            record.user_name,
            record.front.model_version,
            dimension as i64,
            codec::encode(&record.front.values),
            codec::encode(&record.left.values),
            codec::encode(&record.right.values),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    if inserted == 0 {
        return Err(StoreError::AlreadyExists(record.user_name.clone()));
    }
    Ok(())
}

fn update_row(conn: &Connection, record: &UserRecord, dimension: usize) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE user_records
         SET model_version = ?2, dimension = ?3, front = ?4, left = ?5, right = ?6, updated_at = ?7
         WHERE user_name = ?1",
        params![
            record.user_name,
            record.front.model_version,
            dimension as i64,
            codec::encode(&record.front.values),
            codec::encode(&record.left.values),
            codec::encode(&record.right.values),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound(record.user_name.clone()));
    }
    Ok(())
}

impl RecordStore for SqliteRecordStore {
    fn get_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        let conn = self.lock()?;
        select(&conn, name)
    }

    fn insert(&self, record: &UserRecord) -> Result<(), StoreError> {
        let dimension = validate(record)?;
        let conn = self.lock()?;
        insert_row(&conn, record, dimension)
    }

    fn update(&self, record: &UserRecord) -> Result<(), StoreError> {
        let dimension = validate(record)?;
        let conn = self.lock()?;
        update_row(&conn, record, dimension)
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM user_records", [])?;
        tracing::info!(removed, "record store cleared");
        Ok(removed)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM user_records", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT user_name FROM user_records ORDER BY user_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn save(&self, record: &UserRecord) -> Result<SaveOutcome, StoreError> {
        let dimension = validate(record)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM user_records WHERE user_name = ?1", params![record.user_name], |_| Ok(()))
            .optional()?
            .is_some();

        let outcome = if exists {
            update_row(&tx, record, dimension)?;
            SaveOutcome::Updated
        } else {
            insert_row(&tx, record, dimension)?;
            SaveOutcome::Inserted
        };
        tx.commit()?;

        tracing::info!(user = %record.user_name, dimension, ?outcome, "record saved");
        Ok(outcome)
    }
}
