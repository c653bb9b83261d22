use async_trait::async_trait;

use super::schema::Database;
use super::types::{NewRecord, Record, Source, StoreError};

/// Data access needed by the polling scheduler.
///
/// Implementations must enforce uniqueness of `(source_id, url)` atomically
/// per insert and report violations as [`StoreError::Duplicate`].
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Up to `limit` sources, least recently fetched first, ties by ID.
    async fn select_due_sources(&self, limit: usize) -> Result<Vec<Source>, StoreError>;

    /// Set the source's last-fetched time to now and return the updated source.
    async fn mark_fetched(&self, source_id: i64) -> Result<Source, StoreError>;

    /// Insert a record, failing with `Duplicate` if its key already exists.
    async fn insert_entry(&self, record: NewRecord) -> Result<Record, StoreError>;
}

#[async_trait]
impl Store for Database {
    async fn select_due_sources(&self, limit: usize) -> Result<Vec<Source>, StoreError> {
        Database::select_due_sources(self, limit).await
    }

    async fn mark_fetched(&self, source_id: i64) -> Result<Source, StoreError> {
        Database::mark_fetched(self, source_id).await
    }

    async fn insert_entry(&self, record: NewRecord) -> Result<Record, StoreError> {
        self.insert_record(&record).await
    }
}
