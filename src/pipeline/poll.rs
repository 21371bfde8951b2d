//! Bounded "poll until predicate" loop.
//!
//! Workers have no way to signal the orchestrator, so completion is
//! inferred by repeatedly probing shared state. [`poll_until`] waits an
//! initial delay, probes, and retries at a fixed interval until the
//! predicate holds or the retry bound is exceeded.

use std::future::Future;
use std::time::Duration;

/// Timing parameters for [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Wait before the first probe.
    pub initial_delay: Duration,
    /// Wait between subsequent probes.
    pub interval: Duration,
    /// Probes allowed after the first one.
    pub max_retries: u32,
}

impl PollSchedule {
    /// Retries after the first poll before giving up.
    pub const WORKER_MAX_RETRIES: u32 = 10;
    /// Interval between polls once the first wait has elapsed.
    pub const WORKER_RETRY_INTERVAL: Duration = Duration::from_millis(1500);

    pub fn new(initial_delay: Duration, interval: Duration, max_retries: u32) -> Self {
        Self {
            initial_delay,
            interval,
            max_retries,
        }
    }

    /// Schedule for waiting on workers that run for `duration_secs`.
    ///
    /// The first poll happens after 1.3x the worker duration since no
    /// worker can finish earlier.
    pub fn for_worker_duration(duration_secs: u64) -> Self {
        let initial_ms = duration_secs.saturating_mul(1000).saturating_mul(13) / 10;
        Self::new(
            Duration::from_millis(initial_ms),
            Self::WORKER_RETRY_INTERVAL,
            Self::WORKER_MAX_RETRIES,
        )
    }

    /// Total number of probes before exhaustion.
    pub fn max_polls(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Result of a poll loop that did not hit a probe error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate held on the latest probe.
    Ready { value: T, polls: u32 },
    /// The retry bound was exceeded; carries the last probed value.
    Exhausted { last: T, polls: u32 },
}

impl<T> PollOutcome<T> {
    pub fn polls(&self) -> u32 {
        match self {
            PollOutcome::Ready { polls, .. } | PollOutcome::Exhausted { polls, .. } => *polls,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }
}

/// Probes until `done` holds or `schedule.max_retries` retries are spent.
///
/// Each probe's value replaces the previous one; nothing is merged
/// across rounds. A probe error aborts the loop immediately.
pub async fn poll_until<T, E, F, Fut, P>(
    schedule: &PollSchedule,
    mut probe: F,
    mut done: P,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
{
    tokio::time::sleep(schedule.initial_delay).await;

    let mut polls = 0u32;
    let mut retries = 0u32;
    loop {
        let value = probe().await?;
        polls += 1;

        if done(&value) {
            return Ok(PollOutcome::Ready { value, polls });
        }

        retries += 1;
        if retries > schedule.max_retries {
            return Ok(PollOutcome::Exhausted { last: value, polls });
        }

        tracing::debug!(polls, retries, "Predicate not met, polling again");
        tokio::time::sleep(schedule.interval).await;
    }
}
