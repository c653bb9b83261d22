//! Feed retrieval and parsing.
//!
//! - [`parser`] - RSS 2.0 parsing via `quick-xml`'s serde deserializer
//! - [`fetcher`] - single-attempt HTTP retrieval with a timeout and body size limit
//!
//! # Example
//!
//! ```ignore
//! use feedpoll::feed::{Fetcher, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_FEED_BYTES};
//!
//! let fetcher = Fetcher::new(DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_FEED_BYTES, "feedpoll")?;
//! let feed = fetcher.fetch(&source).await?;
//! ```

mod fetcher;
mod parser;

pub use fetcher::{FetchError, Fetcher, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_FEED_BYTES};
pub use parser::{parse_feed, FeedItem, ParseError, ParsedFeed};
