use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while opening the database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another feedpoll instance appears to be using this database. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface
// only as message text through sqlx's open path.
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

/// Errors returned by individual store operations.
///
/// `Duplicate` is a first-class kind so callers never have to inspect driver
/// messages to tell a uniqueness violation from a real failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write violated a UNIQUE constraint
    #[error("Duplicate key")]
    Duplicate,

    /// The referenced row does not exist
    #[error("Source {0} not found")]
    NotFound(i64),

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Duplicate,
            _ => StoreError::Database(err),
        }
    }
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate)
    }
}

// ============================================================================
// Row Types
// ============================================================================

/// Raw `sources` row; timestamps are Unix milliseconds.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub last_fetched_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SourceRow {
    pub(crate) fn into_source(self) -> Source {
        Source {
            id: self.id,
            name: self.name,
            url: self.url,
            last_fetched_at: self.last_fetched_at.map(from_millis),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

/// Raw `records` row; `id` is the hyphenated UUID text.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecordRow {
    pub id: String,
    pub source_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RecordRow {
    pub(crate) fn into_record(self) -> Result<Record, StoreError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Database(sqlx::Error::Decode(Box::new(e))))?;
        Ok(Record {
            id,
            source_id: self.source_id,
            title: self.title,
            description: self.description,
            url: self.url,
            published_at: from_millis(self.published_at),
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        })
    }
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// `None` until the source is first picked up by a cycle
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A record ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub id: Uuid,
    pub source_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted feed entry. `(source_id, url)` is unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Uuid,
    pub source_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
