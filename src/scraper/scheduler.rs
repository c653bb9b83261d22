use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{self, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::ingest::{ingest_entries, IngestReport, ParsedEntry};
use super::selector::{mark_fetching, select_batch};
use crate::feed::{FetchError, Fetcher};
use crate::storage::{Source, Store, StoreError};

/// A cycle that could not start.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Failed to select due sources: {0}")]
    Selection(#[source] StoreError),
}

/// Why one source produced no entries this cycle.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The source could not be stamped, so it was not fetched
    #[error("Failed to mark source as fetched: {0}")]
    MarkFetch(#[source] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The unit panicked or its task was torn down before finishing
    #[error("Fetch task failed: {0}")]
    Panicked(String),
}

/// Result of one fetch unit.
#[derive(Debug)]
pub struct SourceOutcome {
    pub source_id: i64,
    pub result: Result<IngestReport, UnitError>,
}

/// Everything that happened in one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<SourceOutcome>,
}

impl CycleReport {
    pub fn sources(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.sources() - self.succeeded()
    }

    /// Entry tallies summed over every successful source
    pub fn totals(&self) -> IngestReport {
        let mut totals = IngestReport::default();
        for report in self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()) {
            totals.merge(report);
        }
        totals
    }

    pub fn outcome(&self, source_id: i64) -> Option<&SourceOutcome> {
        self.outcomes.iter().find(|o| o.source_id == source_id)
    }
}

/// Fixed-interval polling loop.
///
/// Every tick selects up to `concurrency` sources, runs one task per source
/// and waits for all of them before the next tick. Ticks that fall due while
/// a batch is still running are delayed, never overlapped.
pub struct Scheduler<S: Store> {
    store: Arc<S>,
    fetcher: Fetcher,
    concurrency: usize,
    interval: Duration,
}

impl<S: Store> Scheduler<S> {
    /// Zero `concurrency` is treated as 1 and a zero `interval` as 1ms.
    pub fn new(store: Arc<S>, fetcher: Fetcher, concurrency: usize, interval: Duration) -> Self {
        Self {
            store,
            fetcher,
            concurrency: concurrency.max(1),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// The first cycle starts immediately. A cycle in flight when shutdown
    /// arrives is abandoned: its tasks are aborted between store calls, which
    /// leaves the store consistent because each write is a single statement.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            concurrency = self.concurrency,
            interval = ?self.interval,
            timeout = ?self.fetcher.timeout(),
            "Polling up to {} sources every {:?}",
            self.concurrency,
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, abandoning in-flight cycle");
                    break;
                }
                result = self.run_cycle() => log_cycle(&result),
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Run exactly one cycle: select, fan out, join.
    ///
    /// # Errors
    ///
    /// Only [`CycleError::Selection`]. Per-source failures are reported in
    /// the returned [`CycleReport`].
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let batch = select_batch(self.store.as_ref(), self.concurrency)
            .await
            .map_err(CycleError::Selection)?;

        if batch.is_empty() {
            tracing::debug!("No sources due");
            return Ok(CycleReport::default());
        }

        let mut units = JoinSet::new();
        let mut pending = HashMap::with_capacity(batch.len());
        for source in batch {
            let source_id = source.id;
            let store = Arc::clone(&self.store);
            let fetcher = self.fetcher.clone();

            let handle = units.spawn(async move {
                let result = AssertUnwindSafe(process_source(store.as_ref(), &fetcher, &source))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(UnitError::Panicked(panic_message(&*panic))));

                if let Err(e) = &result {
                    log_unit_failure(&source, e);
                }

                SourceOutcome { source_id, result }
            });
            pending.insert(handle.id(), source_id);
        }

        Ok(CycleReport {
            outcomes: join_units(units, &pending).await,
        })
    }
}

/// Wait for every unit. A task that died without producing an outcome still
/// gets one, attributed through `pending`.
async fn join_units(
    mut units: JoinSet<SourceOutcome>,
    pending: &HashMap<task::Id, i64>,
) -> Vec<SourceOutcome> {
    let mut outcomes = Vec::with_capacity(units.len());
    while let Some(joined) = units.join_next().await {
        let e = match joined {
            Ok(outcome) => {
                outcomes.push(outcome);
                continue;
            }
            Err(e) => e,
        };

        let Some(&source_id) = pending.get(&e.id()) else {
            tracing::error!(error = %e, "Unattributed fetch task did not complete");
            continue;
        };
        tracing::error!(source_id, error = %e, "Fetch task did not complete");

        let reason = if e.is_panic() {
            panic_message(&*e.into_panic())
        } else {
            e.to_string()
        };
        outcomes.push(SourceOutcome {
            source_id,
            result: Err(UnitError::Panicked(reason)),
        });
    }
    outcomes
}

/// One unit: mark, fetch, ingest.
async fn process_source<S>(
    store: &S,
    fetcher: &Fetcher,
    source: &Source,
) -> Result<IngestReport, UnitError>
where
    S: Store + ?Sized,
{
    mark_fetching(store, source)
        .await
        .map_err(UnitError::MarkFetch)?;

    let feed = fetcher.fetch(source).await?;

    let entries: Vec<ParsedEntry> = feed
        .items
        .into_iter()
        .map(|item| ParsedEntry::from_item(source.id, item))
        .collect();

    let report = ingest_entries(store, &entries).await;
    tracing::debug!(
        source_id = source.id,
        name = %source.name,
        inserted = report.inserted,
        duplicates = report.duplicates,
        skipped = report.skipped,
        "Source ingested"
    );
    Ok(report)
}

fn log_unit_failure(source: &Source, error: &UnitError) {
    let kind = match error {
        UnitError::MarkFetch(_) => "mark",
        UnitError::Fetch(e) if e.is_parse() => "parse",
        UnitError::Fetch(_) => "fetch",
        UnitError::Panicked(_) => "panic",
    };
    tracing::warn!(
        source_id = source.id,
        name = %source.name,
        url = %source.url,
        kind,
        error = %error,
        "Skipping source this cycle"
    );
}

fn log_cycle(result: &Result<CycleReport, CycleError>) {
    match result {
        Ok(report) if report.sources() == 0 => {}
        Ok(report) => {
            let totals = report.totals();
            tracing::info!(
                sources = report.sources(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                inserted = totals.inserted,
                duplicates = totals.duplicates,
                skipped = totals.skipped + totals.failed,
                "Cycle complete"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Cycle skipped, retrying next tick");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_FEED_BYTES};
    use crate::storage::{Database, NewRecord, Record};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ONE_ITEM_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
<item><title>A</title><link>https://example.com/a</link>
<pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate></item>
</channel></rss>"#;

    /// Database wrapper with switchable failures.
    struct FaultyStore {
        inner: Database,
        failing_selects: AtomicUsize,
        fail_mark_for: Option<i64>,
        panic_on_insert: AtomicBool,
    }

    impl FaultyStore {
        fn new(inner: Database) -> Self {
            Self {
                inner,
                failing_selects: AtomicUsize::new(0),
                fail_mark_for: None,
                panic_on_insert: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Store for FaultyStore {
        async fn select_due_sources(&self, limit: usize) -> Result<Vec<Source>, StoreError> {
            let remaining = self.failing_selects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_selects.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Store::select_due_sources(&self.inner, limit).await
        }

        async fn mark_fetched(&self, source_id: i64) -> Result<Source, StoreError> {
            if self.fail_mark_for == Some(source_id) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Store::mark_fetched(&self.inner, source_id).await
        }

        async fn insert_entry(&self, record: NewRecord) -> Result<Record, StoreError> {
            if self.panic_on_insert.load(Ordering::SeqCst) {
                panic!("insert exploded");
            }
            self.inner.insert_entry(record).await
        }
    }

    fn test_fetcher() -> Fetcher {
        Fetcher::with_client(
            reqwest::Client::new(),
            DEFAULT_FETCH_TIMEOUT,
            DEFAULT_MAX_FEED_BYTES,
        )
    }

    async fn mount_feed(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_selection_failure_skips_cycle_then_recovers() {
        let server = MockServer::start().await;
        mount_feed(&server, "/a", ONE_ITEM_RSS).await;

        let db = Database::open(":memory:").await.unwrap();
        db.insert_source("A", &format!("{}/a", server.uri()))
            .await
            .unwrap();

        let store = FaultyStore::new(db.clone());
        store.failing_selects.store(1, Ordering::SeqCst);
        let scheduler = Scheduler::new(Arc::new(store), test_fetcher(), 5, Duration::from_secs(60));

        let first = scheduler.run_cycle().await;
        assert!(matches!(first, Err(CycleError::Selection(_))));
        assert_eq!(db.count_records().await.unwrap(), 0);

        let second = scheduler.run_cycle().await.unwrap();
        assert_eq!(second.succeeded(), 1);
        assert_eq!(db.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_failure_skips_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ONE_ITEM_RSS))
            .expect(0)
            .mount(&server)
            .await;
        mount_feed(&server, "/ok", ONE_ITEM_RSS).await;

        let db = Database::open(":memory:").await.unwrap();
        let broken = db
            .insert_source("Broken", &format!("{}/broken", server.uri()))
            .await
            .unwrap();
        let ok = db
            .insert_source("Ok", &format!("{}/ok", server.uri()))
            .await
            .unwrap();

        let mut store = FaultyStore::new(db.clone());
        store.fail_mark_for = Some(broken);
        let scheduler = Scheduler::new(Arc::new(store), test_fetcher(), 5, Duration::from_secs(60));

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.sources(), 2);
        assert!(matches!(
            report.outcome(broken).unwrap().result,
            Err(UnitError::MarkFetch(_))
        ));
        assert!(report.outcome(ok).unwrap().result.is_ok());
        assert!(db.get_records_for_source(broken).await.unwrap().is_empty());
        assert_eq!(db.get_records_for_source(ok).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_isolated() {
        let server = MockServer::start().await;
        mount_feed(&server, "/a", ONE_ITEM_RSS).await;

        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .insert_source("A", &format!("{}/a", server.uri()))
            .await
            .unwrap();

        let store = FaultyStore::new(db.clone());
        store.panic_on_insert.store(true, Ordering::SeqCst);
        let scheduler = Scheduler::new(Arc::new(store), test_fetcher(), 5, Duration::from_secs(60));

        let report = scheduler.run_cycle().await.unwrap();
        match &report.outcome(id).unwrap().result {
            Err(UnitError::Panicked(msg)) => assert!(msg.contains("insert exploded")),
            other => panic!("Expected Panicked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_attributes_tasks_that_die() {
        let mut units = JoinSet::new();
        let mut pending = HashMap::new();

        let ok = units.spawn(async {
            SourceOutcome {
                source_id: 1,
                result: Ok(IngestReport::default()),
            }
        });
        pending.insert(ok.id(), 1);

        fn explode() -> SourceOutcome {
            panic!("task exploded")
        }
        let panicked = units.spawn(async { explode() });
        pending.insert(panicked.id(), 2);

        let aborted = units.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            SourceOutcome {
                source_id: 3,
                result: Ok(IngestReport::default()),
            }
        });
        pending.insert(aborted.id(), 3);
        aborted.abort();

        let report = CycleReport {
            outcomes: join_units(units, &pending).await,
        };
        assert_eq!(report.sources(), 3);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        match &report.outcome(2).unwrap().result {
            Err(UnitError::Panicked(msg)) => assert!(msg.contains("task exploded")),
            other => panic!("Expected Panicked, got {:?}", other),
        }
        assert!(matches!(
            report.outcome(3).unwrap().result,
            Err(UnitError::Panicked(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_report() {
        let db = Database::open(":memory:").await.unwrap();
        let scheduler = Scheduler::new(Arc::new(db), test_fetcher(), 5, Duration::from_secs(60));

        let report = scheduler.run_cycle().await.unwrap();
        assert_eq!(report.sources(), 0);
        assert_eq!(report.totals(), IngestReport::default());
    }

    #[tokio::test]
    async fn test_run_retries_after_selection_failure() {
        let server = MockServer::start().await;
        mount_feed(&server, "/a", ONE_ITEM_RSS).await;

        let db = Database::open(":memory:").await.unwrap();
        db.insert_source("A", &format!("{}/a", server.uri()))
            .await
            .unwrap();

        let store = FaultyStore::new(db.clone());
        store.failing_selects.store(2, Ordering::SeqCst);
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(store),
            test_fetcher(),
            5,
            Duration::from_millis(20),
        ));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while db.count_records().await.unwrap() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "no records ingested");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_settings_are_raised() {
        let db = Database::open(":memory:").await.unwrap();
        let scheduler = Scheduler::new(Arc::new(db), test_fetcher(), 0, Duration::ZERO);
        assert_eq!(scheduler.concurrency(), 1);
        assert!(scheduler.interval() > Duration::ZERO);
    }
}
