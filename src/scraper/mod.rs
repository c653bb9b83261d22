//! The polling-and-ingestion core.
//!
//! A cycle flows through three stages:
//!
//! - [`selector`] - pick the least recently fetched sources and stamp each one
//!   before it is fetched
//! - [`ingest`] - turn parsed items into records, treating duplicates as success
//! - [`scheduler`] - the fixed-interval loop that fans a batch out to one task
//!   per source and joins them before the next tick

pub mod ingest;
pub mod scheduler;
pub mod selector;

pub use ingest::{
    ingest_entries, ingest_entry, parse_published, IngestError, IngestOutcome, IngestReport,
    ParsedEntry, TimestampError, PUBLISHED_FORMAT,
};
pub use scheduler::{CycleError, CycleReport, Scheduler, SourceOutcome, UnitError};
pub use selector::{mark_fetching, select_batch};
