//! Connection retry scheduling for connecting endpoints.
//!
//! One scheduler per connecting endpoint. It keeps at most one timer
//! outstanding: scheduling a retry cancels the previous unfired timer, and a
//! timer event is honoured only if it matches the outstanding one.

// ============================================================================
// Imports
// ============================================================================

use tracing::debug;

use crate::context::RetryPolicy;
use crate::identifiers::TimerId;
use crate::transport::{Transport, millis};

// ============================================================================
// RetryScheduler
// ============================================================================

/// Fixed-backoff retry timer with attempt accounting.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    /// Backoff and cap.
    policy: RetryPolicy,
    /// Outstanding timer, if any.
    timer: Option<TimerId>,
    /// Failed attempts since the last success.
    consecutive_failures: u32,
    /// Timers scheduled over the endpoint's lifetime.
    scheduled: u64,
    /// Timers that fired and were honoured.
    fired: u64,
}

impl RetryScheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            timer: None,
            consecutive_failures: 0,
            scheduled: 0,
            fired: 0,
        }
    }

    /// Returns the policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the outstanding timer.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> Option<TimerId> {
        self.timer
    }

    /// Returns failed attempts since the last success.
    #[inline]
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns how many retries were scheduled.
    #[inline]
    #[must_use]
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }

    /// Returns how many retry timers fired.
    #[inline]
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Counts one failed attempt.
    ///
    /// Returns `true` if the policy allows another attempt.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.policy.allows_retry(self.consecutive_failures)
    }

    /// Schedules the next attempt, superseding any outstanding timer.
    pub(crate) fn schedule(&mut self, transport: &mut dyn Transport) -> TimerId {
        if let Some(previous) = self.timer.take() {
            transport.cancel_timer(previous);
            debug!(timer = %previous, "Superseded outstanding retry timer");
        }

        let timer = transport.schedule_timer(self.policy.delay);
        self.timer = Some(timer);
        self.scheduled += 1;

        debug!(
            timer = %timer,
            delay_ms = millis(self.policy.delay),
            failures = self.consecutive_failures,
            "Retry scheduled"
        );

        timer
    }

    /// Consumes a fired timer.
    ///
    /// Returns `false` for a timer that was cancelled or superseded.
    pub(crate) fn on_fired(&mut self, timer: TimerId) -> bool {
        if self.timer != Some(timer) {
            debug!(timer = %timer, "Ignoring stale retry timer");
            return false;
        }

        self.timer = None;
        self.fired += 1;
        true
    }

    /// Cancels the outstanding timer, if any.
    pub(crate) fn cancel(&mut self, transport: &mut dyn Transport) {
        if let Some(timer) = self.timer.take() {
            transport.cancel_timer(timer);
            debug!(timer = %timer, "Retry timer cancelled");
        }
    }

    /// Clears the failure count after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.consecutive_failures = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
