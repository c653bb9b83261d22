use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::feed::FeedItem;
use crate::storage::{NewRecord, Record, Store, StoreError};

/// `pubDate` layout: RFC 1123 with a numeric zone, e.g.
/// `Mon, 02 Jan 2006 15:04:05 -0700`.
pub const PUBLISHED_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

/// [`PUBLISHED_FORMAT`] after the `"Mon, "` prefix.
const DATE_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Why a `pubDate` was rejected.
#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("expected a weekday prefix such as \"Mon, \"")]
    Weekday,
    #[error(transparent)]
    Parse(#[from] chrono::ParseError),
    #[error("not in the exact layout {PUBLISHED_FORMAT:?}")]
    Layout,
}

/// One feed item tagged with the source it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub source_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub link: String,
    /// Raw publication timestamp text
    pub published: String,
}

impl ParsedEntry {
    pub fn from_item(source_id: i64, item: FeedItem) -> Self {
        Self {
            source_id,
            title: item.title,
            description: item.description,
            link: item.link,
            published: item.published,
        }
    }
}

/// Successful ingest results. Both mean the entry is now stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(Record),
    /// `(source_id, link)` was already stored
    Duplicate,
}

/// Reasons a single entry was skipped.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid publication date {raw:?}: {source}")]
    InvalidTimestamp {
        raw: String,
        source: TimestampError,
    },
    #[error("Entry has no link")]
    MissingLink,
    #[error("Insert failed: {0}")]
    Store(#[source] StoreError),
}

/// Per-source ingest tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    /// Entries rejected before reaching the store (bad date, no link)
    pub skipped: usize,
    /// Entries the store refused for a reason other than duplication
    pub failed: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Parse a `pubDate` in exactly [`PUBLISHED_FORMAT`].
///
/// The weekday must be a valid abbreviation but is not checked against the
/// date. Everything after it must survive a format round trip unchanged, so
/// two-digit years, unpadded days, `+00:00` offsets and stray spaces are all
/// rejected. Day and month names match regardless of case.
pub fn parse_published(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let weekday = raw
        .get(..5)
        .and_then(|prefix| prefix.strip_suffix(", "))
        .ok_or(TimestampError::Weekday)?;
    if !WEEKDAYS.iter().any(|day| day.eq_ignore_ascii_case(weekday)) {
        return Err(TimestampError::Weekday);
    }

    let rest = &raw[5..];
    let parsed = DateTime::parse_from_str(rest, DATE_FORMAT)?;

    let formatted = parsed.format(DATE_FORMAT).to_string();
    // chrono writes a zero offset as +0000; -0000 is equally valid input
    let (formatted, rest) = match (formatted.strip_suffix("+0000"), rest.strip_suffix("-0000")) {
        (Some(formatted), Some(rest)) => (formatted, rest),
        _ => (formatted.as_str(), rest),
    };
    if !formatted.eq_ignore_ascii_case(rest) {
        return Err(TimestampError::Layout);
    }

    Ok(parsed.with_timezone(&Utc))
}

/// Persist one entry.
///
/// A duplicate is reported as [`IngestOutcome::Duplicate`], not an error.
pub async fn ingest_entry<S>(store: &S, entry: &ParsedEntry) -> Result<IngestOutcome, IngestError>
where
    S: Store + ?Sized,
{
    let published_at =
        parse_published(&entry.published).map_err(|source| IngestError::InvalidTimestamp {
            raw: entry.published.clone(),
            source,
        })?;

    if entry.link.is_empty() {
        return Err(IngestError::MissingLink);
    }

    let now = Utc::now();
    let record = NewRecord {
        id: Uuid::new_v4(),
        source_id: entry.source_id,
        title: entry.title.clone(),
        description: entry.description.clone(),
        url: entry.link.clone(),
        published_at,
        created_at: now,
        updated_at: now,
    };

    match store.insert_entry(record).await {
        Ok(stored) => Ok(IngestOutcome::Inserted(stored)),
        Err(StoreError::Duplicate) => Ok(IngestOutcome::Duplicate),
        Err(e) => Err(IngestError::Store(e)),
    }
}

/// Persist every entry in order. A failing entry is logged and skipped; it
/// never stops the rest.
pub async fn ingest_entries<S>(store: &S, entries: &[ParsedEntry]) -> IngestReport
where
    S: Store + ?Sized,
{
    let mut report = IngestReport::default();

    for entry in entries {
        match ingest_entry(store, entry).await {
            Ok(IngestOutcome::Inserted(_)) => report.inserted += 1,
            Ok(IngestOutcome::Duplicate) => {
                tracing::trace!(source_id = entry.source_id, link = %entry.link, "Entry already stored");
                report.duplicates += 1;
            }
            Err(e @ (IngestError::InvalidTimestamp { .. } | IngestError::MissingLink)) => {
                tracing::warn!(
                    source_id = entry.source_id,
                    title = %entry.title,
                    error = %e,
                    "Skipping entry"
                );
                report.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(
                    source_id = entry.source_id,
                    link = %entry.link,
                    error = %e,
                    "Failed to store entry"
                );
                report.failed += 1;
            }
        }
    }

    report
}
