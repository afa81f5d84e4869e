//! Feed retrieval: HTTP fetching and RSS/Atom parsing.
//!
//! - [`parser`] - Converts feed XML into [`Entry`](crate::types::Entry) values using `feed-rs`
//! - [`fetcher`] - The [`FeedFetcher`] seam and its `reqwest` implementation
//!
//! Both are collaborators of the monitor: they report what the upstream
//! returned and leave interpretation (errors, backoff, dedup) to
//! [`FeedMonitor`](crate::monitor::FeedMonitor).

mod fetcher;
mod parser;

pub use fetcher::{FeedDocument, FeedFetcher, FetchError, HttpFetcher};
pub use parser::{parse_feed, ParseResult};
