use crate::storage::{Source, Store, StoreError};

/// Pick the next batch: at most `limit` sources, least recently fetched first.
pub async fn select_batch<S>(store: &S, limit: usize) -> Result<Vec<Source>, StoreError>
where
    S: Store + ?Sized,
{
    let mut batch = store.select_due_sources(limit).await?;
    batch.truncate(limit);
    Ok(batch)
}

/// Stamp `source` as fetched before any network work starts.
///
/// Done regardless of how the fetch later turns out, so a broken source
/// rotates to the back of the queue instead of hogging every batch.
pub async fn mark_fetching<S>(store: &S, source: &Source) -> Result<Source, StoreError>
where
    S: Store + ?Sized,
{
    store.mark_fetched(source.id).await
}
