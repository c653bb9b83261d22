use chrono::Utc;

use super::schema::Database;
use super::types::{Source, SourceRow, StoreError};

const SOURCE_COLUMNS: &str = "id, name, url, last_fetched_at, created_at, updated_at";

impl Database {
    // ========================================================================
    // Source Operations
    // ========================================================================

    /// Register a source, returning its ID.
    ///
    /// Registration normally happens outside this process; the method exists
    /// for seeding and tests. A second source with the same URL is rejected
    /// with [`StoreError::Duplicate`].
    pub async fn insert_source(&self, name: &str, url: &str) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO sources (name, url, created_at, updated_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Look up a single source by ID.
    pub async fn get_source(&self, source_id: i64) -> Result<Source, StoreError> {
        let row: Option<SourceRow> =
            sqlx::query_as(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?"))
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(SourceRow::into_source)
            .ok_or(StoreError::NotFound(source_id))
    }

    /// Return up to `limit` sources, least recently fetched first.
    ///
    /// Never-fetched sources sort ahead of everything else; ties are broken
    /// by ascending ID so selection is deterministic.
    pub async fn select_due_sources(&self, limit: usize) -> Result<Vec<Source>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<SourceRow> = sqlx::query_as(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources \
             ORDER BY last_fetched_at ASC NULLS FIRST, id ASC \
             LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SourceRow::into_source).collect())
    }

    /// Stamp a source as fetched now and return the updated row.
    ///
    /// `last_fetched_at` never moves backwards: if the stored value is already
    /// later than the current clock it is kept.
    pub async fn mark_fetched(&self, source_id: i64) -> Result<Source, StoreError> {
        let now = Utc::now().timestamp_millis();
        let row: Option<SourceRow> = sqlx::query_as(&format!(
            "UPDATE sources \
             SET last_fetched_at = MAX(COALESCE(last_fetched_at, 0), ?), updated_at = ? \
             WHERE id = ? \
             RETURNING {SOURCE_COLUMNS}"
        ))
        .bind(now)
        .bind(now)
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SourceRow::into_source)
            .ok_or(StoreError::NotFound(source_id))
    }
}
