//! Per-feed adaptive polling.
//!
//! A [`FeedMonitor`] owns one feed's [`MonitorState`]: the dedup watermark,
//! the current poll interval, and the next deadline. Each poll ends in one of
//! three transitions:
//!
//! - **success** - entries came back; the interval is re-estimated from how
//!   densely they were published and unseen entries are returned
//! - **empty** - the feed answered with nothing; the interval doubles
//! - **error** - the fetch failed; the feed cools down without touching
//!   its interval
//!
//! # Interval estimation
//!
//! For a page sorted oldest-first, with `t_min`, `t_mid` (entry at index
//! `len / 2`) and `t_max`:
//!
//! ```text
//! span_full = t_max - t_min
//! span_half = t_max - t_mid
//! estimate  = min(span_half, span_full / 2)
//! ```
//!
//! A single-entry page has no second point, so `span_full = now - t_min` and
//! `span_half = span_full / 2`. An estimate above the current interval moves
//! it halfway toward the estimate; anything else is adopted as-is. The result
//! is clamped to `[min_interval, max_interval]`.

use crate::clock::Clock;
use crate::config::ScheduleConfig;
use crate::feed::{FeedDocument, FeedFetcher, FetchError};
use crate::types::{Entry, FeedId, FeedSpec};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

// ============================================================================
// Policy
// ============================================================================

/// Bounds and constants for the interval state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalPolicy {
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub initial_interval_secs: u64,
    pub error_cooldown_secs: u64,
    pub page_size: usize,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self::from(&ScheduleConfig::default())
    }
}

impl From<&ScheduleConfig> for IntervalPolicy {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            min_interval_secs: config.min_interval_secs,
            max_interval_secs: config.max_interval_secs,
            initial_interval_secs: config.initial_interval_secs,
            error_cooldown_secs: config.error_cooldown_secs,
            page_size: config.page_size,
        }
    }
}

impl IntervalPolicy {
    fn clamp(&self, secs: f64) -> u64 {
        // `as` truncates toward zero; the clamp keeps it in range first
        secs.clamp(self.min_interval_secs as f64, self.max_interval_secs as f64) as u64
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Why a poll produced no usable page. Every variant is transient: the
/// monitor cools down and tries again.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Upstream refused us, most likely rate limiting.
    #[error("Upstream responded 403 Forbidden")]
    Forbidden,
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Feed document is malformed")]
    Malformed,
}

/// A usable page: dated entries plus the count of undated items dropped
/// while parsing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entries: Vec<Entry>,
    pub skipped: usize,
}

impl Page {
    /// Items the upstream actually served, dated or not.
    pub fn served(&self) -> usize {
        self.entries.len() + self.skipped
    }
}

fn classify(doc: FeedDocument) -> Result<Page, PollError> {
    match doc.status {
        403 => Err(PollError::Forbidden),
        200..=299 if doc.malformed => Err(PollError::Malformed),
        200..=299 => Ok(Page {
            entries: doc.entries,
            skipped: doc.skipped,
        }),
        status => Err(PollError::HttpStatus(status)),
    }
}

// ============================================================================
// Estimation
// ============================================================================

/// Publication-density estimate for one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub span_full_secs: f64,
    pub span_half_secs: f64,
    pub interval_secs: f64,
}

/// Estimate the interval from a non-empty page sorted oldest-first.
///
/// Returns `None` for an empty page.
pub fn estimate_interval(sorted: &[Entry], now: DateTime<Utc>) -> Option<Estimate> {
    let t_min = sorted.first()?.published;
    let t_max = sorted.last()?.published;
    let t_mid = sorted[sorted.len() / 2].published;

    let (span_full_secs, span_half_secs) = if sorted.len() == 1 {
        let full = secs_between(t_min, now).max(0.0);
        (full, full / 2.0)
    } else {
        (secs_between(t_min, t_max), secs_between(t_mid, t_max))
    };

    Some(Estimate {
        span_full_secs,
        span_half_secs,
        interval_secs: span_half_secs.min(span_full_secs / 2.0),
    })
}

/// Apply an estimate to the current interval: smoothed growth, instant shrink.
pub fn retune(current_secs: u64, estimate_secs: f64, policy: &IntervalPolicy) -> u64 {
    let current = current_secs as f64;
    let next = if estimate_secs > current {
        current + 0.5 * (estimate_secs - current)
    } else {
        estimate_secs
    };
    policy.clamp(next)
}

fn secs_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// `now + secs`, saturating at the latest representable instant.
fn after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ============================================================================
// State Machine
// ============================================================================

/// Everything a monitor remembers about its feed. Memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorState {
    /// Newest publish time observed; `None` until the first non-empty page.
    pub last_seen: Option<DateTime<Utc>>,
    pub interval_secs: u64,
    pub next_deadline: DateTime<Utc>,
    /// Time of the last poll that reached the feed successfully.
    pub last_poll: DateTime<Utc>,
}

/// Result of the success transition.
#[derive(Debug, Clone)]
pub struct Accepted {
    /// Unseen entries, oldest first.
    pub entries: Vec<Entry>,
    pub estimate: Estimate,
    pub previous_interval_secs: u64,
    /// A full page whose oldest entry is newer than the previous poll:
    /// older entries likely fell off the page between polls.
    pub possible_gap: bool,
}

impl MonitorState {
    /// Fresh state, due immediately.
    pub fn new(policy: &IntervalPolicy, now: DateTime<Utc>) -> Self {
        Self {
            last_seen: None,
            interval_secs: policy.initial_interval_secs,
            next_deadline: now,
            last_poll: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_deadline
    }

    /// Fetch failed: retry after the cooldown, interval untouched.
    pub fn on_error(&mut self, policy: &IntervalPolicy, now: DateTime<Utc>) {
        self.next_deadline = after(now, policy.error_cooldown_secs);
    }

    /// Feed reachable but empty: back off by doubling.
    pub fn on_empty(&mut self, policy: &IntervalPolicy, now: DateTime<Utc>) {
        self.interval_secs = self
            .interval_secs
            .saturating_mul(2)
            .clamp(policy.min_interval_secs, policy.max_interval_secs);
        self.last_poll = now;
        self.next_deadline = after(now, self.interval_secs);
    }

    /// Page with entries, in feed order (newest first).
    ///
    /// Returns `None` when no dated entry came back; callers route that to
    /// [`MonitorState::on_empty`].
    pub fn on_success(
        &mut self,
        page: Page,
        policy: &IntervalPolicy,
        now: DateTime<Utc>,
    ) -> Option<Accepted> {
        let served = page.served();
        let mut page = page.entries;
        page.reverse();
        page.sort_by_key(|e| e.published);

        let estimate = estimate_interval(&page, now)?;
        let t_min = page.first()?.published;
        let t_max = page.last()?.published;

        let previous_interval_secs = self.interval_secs;
        self.interval_secs = retune(self.interval_secs, estimate.interval_secs, policy);

        let possible_gap = served >= policy.page_size && t_min > self.last_poll;
        self.last_poll = now;
        self.next_deadline = after(now, self.interval_secs);

        if let Some(watermark) = self.last_seen {
            page.retain(|e| e.published > watermark);
        }
        self.last_seen = Some(self.last_seen.map_or(t_max, |w| w.max(t_max)));

        Some(Accepted {
            entries: page,
            estimate,
            previous_interval_secs,
            possible_gap,
        })
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// What a call to [`FeedMonitor::poll`] did.
#[derive(Debug)]
pub enum PollOutcome {
    /// Deadline not reached; nothing was fetched.
    NotDue,
    /// New entries, oldest first. May be empty when everything was seen.
    Fetched(Vec<Entry>),
    /// The feed answered with no entries.
    Empty,
    Failed(PollError),
}

impl PollOutcome {
    /// Whether an outbound request was made.
    pub fn did_fetch(&self) -> bool {
        !matches!(self, PollOutcome::NotDue)
    }

    pub fn into_entries(self) -> Vec<Entry> {
        match self {
            PollOutcome::Fetched(entries) => entries,
            _ => Vec::new(),
        }
    }
}

/// Watches one feed and tunes how often it is polled.
#[derive(Debug)]
pub struct FeedMonitor {
    spec: FeedSpec,
    policy: IntervalPolicy,
    state: MonitorState,
}

impl FeedMonitor {
    pub fn new(spec: FeedSpec, policy: IntervalPolicy, now: DateTime<Utc>) -> Self {
        let state = MonitorState::new(&policy, now);
        Self {
            spec,
            policy,
            state,
        }
    }

    pub fn id(&self) -> &FeedId {
        &self.spec.id
    }

    pub fn spec(&self) -> &FeedSpec {
        &self.spec
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn interval_secs(&self) -> u64 {
        self.state.interval_secs
    }

    pub fn next_deadline(&self) -> DateTime<Utc> {
        self.state.next_deadline
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_due(now)
    }

    /// Fetch the feed if due and apply the resulting transition.
    pub async fn poll<F, C>(&mut self, fetcher: &F, clock: &C) -> PollOutcome
    where
        F: FeedFetcher + ?Sized,
        C: Clock + ?Sized,
    {
        if !self.is_due(clock.now()) {
            tracing::trace!(feed = %self.spec.id, "Not due");
            return PollOutcome::NotDue;
        }

        tracing::debug!(feed = %self.spec.id, url = %self.spec.url, "Polling feed");
        let fetched = fetcher
            .fetch(&self.spec.url, self.spec.label.as_deref())
            .await;
        let now = clock.now();

        let page = match fetched.map_err(PollError::from).and_then(classify) {
            Ok(page) => page,
            Err(e) => {
                self.state.on_error(&self.policy, now);
                tracing::warn!(
                    feed = %self.spec.id,
                    error = %e,
                    cooldown_secs = self.policy.error_cooldown_secs,
                    "Fetch failed, cooling down"
                );
                return PollOutcome::Failed(e);
            }
        };

        let Some(accepted) = self.state.on_success(page, &self.policy, now) else {
            self.state.on_empty(&self.policy, now);
            tracing::warn!(
                feed = %self.spec.id,
                interval_secs = self.state.interval_secs,
                "Feed returned no entries, backing off"
            );
            return PollOutcome::Empty;
        };

        tracing::debug!(
            feed = %self.spec.id,
            span_full_secs = accepted.estimate.span_full_secs,
            span_half_secs = accepted.estimate.span_half_secs,
            estimate_secs = accepted.estimate.interval_secs,
            "Estimated publication interval"
        );
        if accepted.previous_interval_secs != self.state.interval_secs {
            tracing::info!(
                feed = %self.spec.id,
                from = accepted.previous_interval_secs,
                to = self.state.interval_secs,
                "Update interval changed"
            );
        }
        if accepted.possible_gap {
            tracing::warn!(
                feed = %self.spec.id,
                url = %self.spec.url,
                page_size = self.policy.page_size,
                "Full page newer than previous poll, entries may have been skipped"
            );
        }

        PollOutcome::Fetched(accepted.entries)
    }
}

// ============================================================================
// Tests
// ============================================================================
