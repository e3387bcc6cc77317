//! faceauth-store — persistence for registered users.
//!
//! One [`UserRecord`] per user name, holding front/left/right embeddings.
//! Records are inserted or replaced whole; nothing updates a single pose.

pub mod codec;
pub mod memory;
pub mod sqlite;

pub use faceauth_core::UserRecord;
pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("user already registered: {0}")]
    AlreadyExists(String),
    #[error("user not registered: {0}")]
    NotFound(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("corrupt embedding blob: {0}")]
    CorruptBlob(String),
}

/// Whether a save created a record or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
}

/// Storage for user records, keyed by user name.
///
/// Implementations must be safe for concurrent readers and must serialize
/// writes so a record is never observed with a mix of old and new poses.
pub trait RecordStore: Send + Sync {
    fn get_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Create a record. Fails with `AlreadyExists` if the name is taken.
    fn insert(&self, record: &UserRecord) -> Result<(), StoreError>;

    /// Replace all three embeddings of an existing record.
    fn update(&self, record: &UserRecord) -> Result<(), StoreError>;

    /// Remove every record, returning how many were deleted.
    fn delete_all(&self) -> Result<usize, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    fn names(&self) -> Result<Vec<String>, StoreError>;

    /// Look the name up, then insert or update accordingly.
    ///
    /// The default is not atomic across the lookup and the write; the
    /// bundled stores override it to hold one lock for both.
    fn save(&self, record: &UserRecord) -> Result<SaveOutcome, StoreError> {
        validate(record)?;
        if self.get_by_name(&record.user_name)?.is_some() {
            self.update(record)?;
            Ok(SaveOutcome::Updated)
        } else {
            self.insert(record)?;
            Ok(SaveOutcome::Inserted)
        }
    }
}

/// Reject records that could never be compared consistently.
pub fn validate(record: &UserRecord) -> Result<usize, StoreError> {
    if record.user_name.is_empty() {
        return Err(StoreError::InvalidRecord("empty user name".into()));
    }
    record.dimension().ok_or_else(|| {
        StoreError::InvalidRecord(format!(
            "{}: pose embeddings must be non-empty and equal length (front {}, left {}, right {})",
            record.user_name,
            record.front.dim(),
            record.left.dim(),
            record.right.dim()
        ))
    })?;

    let versions = [&record.front, &record.left, &record.right].map(|e| e.model_version.as_deref());
    if versions[1] != versions[0] || versions[2] != versions[0] {
        return Err(StoreError::InvalidRecord(format!(
            "{}: pose embeddings come from different model versions",
            record.user_name
        )));
    }

    Ok(record.front.dim())
}
