use super::schema::Database;
use super::types::{NewRecord, Record, RecordRow, StoreError};

const RECORD_COLUMNS: &str =
    "id, source_id, title, description, url, published_at, created_at, updated_at";

impl Database {
    // ========================================================================
    // Record Operations
    // ========================================================================

    /// Insert a record.
    ///
    /// A record whose `(source_id, url)` already exists is rejected with
    /// [`StoreError::Duplicate`] and the stored row is left untouched.
    pub async fn insert_record(&self, record: &NewRecord) -> Result<Record, StoreError> {
        let row: RecordRow = sqlx::query_as(&format!(
            "INSERT INTO records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(record.id.to_string())
        .bind(record.source_id)
        .bind(&record.title)
        .bind(&record.description)
        .bind(&record.url)
        .bind(record.published_at.timestamp_millis())
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        row.into_record()
    }

    /// All records for a source, newest publication first.
    pub async fn get_records_for_source(&self, source_id: i64) -> Result<Vec<Record>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE source_id = ? \
             ORDER BY published_at DESC, url ASC"
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    /// Total number of stored records.
    pub async fn count_records(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewRecord, StoreError};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    async fn test_db_with_source() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .insert_source("Test Feed", "https://feed.example.com/rss")
            .await
            .unwrap();
        (db, id)
    }

    fn test_record(source_id: i64, url: &str) -> NewRecord {
        let now = Utc::now();
        NewRecord {
            id: Uuid::new_v4(),
            source_id,
            title: format!("Title for {}", url),
            description: Some("Test description".to_string()),
            url: url.to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_record_roundtrips_fields() {
        let (db, source_id) = test_db_with_source().await;
        let new = test_record(source_id, "https://example.com/a");

        let stored = db.insert_record(&new).await.unwrap();
        assert_eq!(stored.id, new.id);
        assert_eq!(stored.source_id, source_id);
        assert_eq!(stored.title, new.title);
        assert_eq!(stored.description, new.description);
        assert_eq!(stored.published_at, new.published_at);

        let all = db.get_records_for_source(source_id).await.unwrap();
        assert_eq!(all, vec![stored]);
    }

    #[tokio::test]
    async fn test_duplicate_source_and_url_rejected() {
        let (db, source_id) = test_db_with_source().await;
        db.insert_record(&test_record(source_id, "https://example.com/a"))
            .await
            .unwrap();

        let mut again = test_record(source_id, "https://example.com/a");
        again.title = "Changed".to_string();
        let err = db.insert_record(&again).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate));

        // Original row untouched
        let all = db.get_records_for_source(source_id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Title for https://example.com/a");
    }

    #[tokio::test]
    async fn test_same_url_under_different_sources_allowed() {
        let (db, first) = test_db_with_source().await;
        let second = db
            .insert_source("Other", "https://other.example.com/rss")
            .await
            .unwrap();

        db.insert_record(&test_record(first, "https://example.com/shared"))
            .await
            .unwrap();
        db.insert_record(&test_record(second, "https://example.com/shared"))
            .await
            .unwrap();

        assert_eq!(db.count_records().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_description_stays_none() {
        let (db, source_id) = test_db_with_source().await;
        let mut new = test_record(source_id, "https://example.com/plain");
        new.description = None;

        let stored = db.insert_record(&new).await.unwrap();
        assert_eq!(stored.description, None);
    }

    #[tokio::test]
    async fn test_empty_description_preserved() {
        let (db, source_id) = test_db_with_source().await;
        let mut new = test_record(source_id, "https://example.com/empty");
        new.description = Some(String::new());

        let stored = db.insert_record(&new).await.unwrap();
        assert_eq!(stored.description, Some(String::new()));
    }

    #[tokio::test]
    async fn test_unknown_source_is_not_a_duplicate() {
        let (db, _) = test_db_with_source().await;
        let err = db
            .insert_record(&test_record(999, "https://example.com/orphan"))
            .await
            .unwrap_err();
        assert!(
            !err.is_duplicate(),
            "foreign key failure must not be classified as duplicate"
        );
    }
}
