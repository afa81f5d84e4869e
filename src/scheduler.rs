//! Cooperative polling loop over all feed monitors.
//!
//! One logical thread of control: monitors are visited in configuration
//! order and never polled concurrently. Each fetch is followed by a fixed
//! inter-request delay, which caps the global request rate regardless of how
//! many feeds come due at once. Between passes the loop sleeps until the
//! nearest deadline. A monitor whose deadline has passed stays due on every
//! pass until it is actually polled.
//!
//! The only suspension points are the two [`Clock::sleep`] calls; dropping
//! the future at either one is a clean shutdown.

use crate::clock::Clock;
use crate::config::ScheduleConfig;
use crate::feed::FeedFetcher;
use crate::monitor::{FeedMonitor, IntervalPolicy, PollOutcome};
use crate::sink::EntrySink;
use crate::types::FeedSpec;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Summary of one pass over the monitors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Monitors that made an outbound request.
    pub polled: usize,
    /// Of those, how many failed and went into cooldown.
    pub failed: usize,
    /// Entries handed to the sink.
    pub emitted: usize,
    pub duration: Duration,
    /// Monitors currently polling at the minimum interval.
    pub at_min_interval: usize,
    /// The pass took longer than the nominal refresh period.
    pub overrun: bool,
}

/// Drives every [`FeedMonitor`] toward freshness under a fixed request budget.
pub struct Scheduler<F, S, C> {
    monitors: Vec<FeedMonitor>,
    fetcher: F,
    sink: S,
    clock: C,
    inter_request_delay: Duration,
    refresh_period: Duration,
    min_interval_secs: u64,
}

impl<F, S, C> Scheduler<F, S, C>
where
    F: FeedFetcher,
    S: EntrySink,
    C: Clock,
{
    /// One monitor per feed, in the given order, all due immediately.
    pub fn new(
        feeds: Vec<FeedSpec>,
        config: &ScheduleConfig,
        fetcher: F,
        sink: S,
        clock: C,
    ) -> Self {
        let policy = IntervalPolicy::from(config);
        let now = clock.now();
        let monitors = feeds
            .into_iter()
            .map(|spec| FeedMonitor::new(spec, policy, now))
            .collect();

        Self {
            monitors,
            fetcher,
            sink,
            clock,
            inter_request_delay: config.inter_request_delay(),
            refresh_period: config.refresh_period(),
            min_interval_secs: config.min_interval_secs,
        }
    }

    pub fn monitors(&self) -> &[FeedMonitor] {
        &self.monitors
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Nearest deadline across all monitors.
    pub fn earliest_deadline(&self) -> Option<DateTime<Utc>> {
        self.monitors.iter().map(FeedMonitor::next_deadline).min()
    }

    /// Run forever. Cancel by dropping the future.
    pub async fn run(&mut self) {
        tracing::info!(
            feeds = self.monitors.len(),
            delay_secs = self.inter_request_delay.as_secs_f64(),
            "Starting scheduler"
        );
        loop {
            self.cycle().await;
        }
    }

    /// One pass followed by the wait for the next deadline.
    pub async fn cycle(&mut self) -> PassReport {
        let report = self.run_pass().await;
        self.wait_for_next_deadline().await;
        report
    }

    /// Visit every monitor once, polling those that are due.
    pub async fn run_pass(&mut self) -> PassReport {
        let start = self.clock.now();
        let mut report = PassReport::default();

        for monitor in &mut self.monitors {
            let outcome = monitor.poll(&self.fetcher, &self.clock).await;
            if !outcome.did_fetch() {
                continue;
            }
            report.polled += 1;
            if matches!(outcome, PollOutcome::Failed(_)) {
                report.failed += 1;
            }

            let entries = outcome.into_entries();
            match self.sink.append(monitor.id(), &entries) {
                Ok(()) => report.emitted += entries.len(),
                Err(e) => tracing::error!(
                    feed = %monitor.id(),
                    error = %e,
                    dropped = entries.len(),
                    "Failed to store entries"
                ),
            }

            self.clock.sleep(self.inter_request_delay).await;
        }

        report.duration = (self.clock.now() - start).to_std().unwrap_or_default();
        report.at_min_interval = self
            .monitors
            .iter()
            .filter(|m| m.interval_secs() <= self.min_interval_secs)
            .count();
        report.overrun = report.duration > self.refresh_period;

        tracing::info!(
            polled = report.polled,
            failed = report.failed,
            emitted = report.emitted,
            duration_secs = report.duration.as_secs_f64(),
            at_min_interval = report.at_min_interval,
            "Pass complete"
        );
        if report.overrun {
            tracing::warn!(
                duration_secs = report.duration.as_secs_f64(),
                refresh_period_secs = self.refresh_period.as_secs(),
                "Pass took longer than the refresh period, scheduler is falling behind"
            );
        }

        report
    }

    /// Sleep until the nearest deadline, or return at once if one has passed.
    pub async fn wait_for_next_deadline(&self) {
        let Some(earliest) = self.earliest_deadline() else {
            self.clock.sleep(self.refresh_period).await;
            return;
        };

        match (earliest - self.clock.now()).to_std() {
            Ok(wait) if !wait.is_zero() => {
                tracing::info!(wait_secs = wait.as_secs_f64(), "Waiting for next deadline");
                self.clock.sleep(wait).await;
            }
            _ => tracing::info!("Deadline already passed, starting next pass immediately"),
        }
    }
}
