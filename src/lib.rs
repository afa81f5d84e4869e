//! Adaptive RSS polling for classified-ads feeds.
//!
//! - [`monitor`] - Per-feed state machine that infers publication rate and
//!   retunes its own poll interval
//! - [`scheduler`] - Sequential loop that polls due monitors under a fixed
//!   inter-request delay
//! - [`feed`] - HTTP fetching and RSS/Atom parsing
//! - [`sink`] - Append-only per-feed entry logs
//! - [`config`] - TOML configuration and feed catalog
//! - [`clock`] - Real and virtual time sources

pub mod clock;
pub mod config;
pub mod feed;
pub mod monitor;
pub mod scheduler;
pub mod sink;
pub mod types;

pub use monitor::{FeedMonitor, PollError, PollOutcome};
pub use scheduler::{PassReport, Scheduler};
pub use types::{Entry, FeedId, FeedSpec};
