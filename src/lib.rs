//! Periodic RSS polling with idempotent ingestion into SQLite.
//!
//! - [`storage`] - the SQLite store and the [`storage::Store`] trait the core depends on
//! - [`feed`] - HTTP fetching and RSS parsing
//! - [`scraper`] - source selection, ingestion and the cycle scheduler
//! - [`config`] - TOML configuration

pub mod config;
pub mod feed;
pub mod scraper;
pub mod storage;
