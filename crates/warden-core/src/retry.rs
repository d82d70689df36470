//! Anti-bruteforce retry record and backoff schedule
//!
//! The enforced wait before a PIN attempt grows with the attempt count:
//!
//! - attempts 1..=N: no wait (allow typos)
//! - attempt N+1: base wait
//! - every attempt after that: double the previous wait
//!
//! A successful PIN check resets the record to attempt 1.
//!
//! The record stores the wait together with the clock reading it was
//! computed against (`snapshot_seconds`). The `dirty` flag marks a pending
//! clock rewrite; the repair rule re-anchors the snapshot to the current
//! clock without shortening the wait, so a crash or a clock change can only
//! pin or lengthen the remaining lockout.

use serde::{Deserialize, Serialize};

/// Backoff schedule mapping an attempt count to an enforced wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    /// Attempts allowed without any wait
    pub no_delay_attempts: u16,
    /// Wait (seconds) enforced on the first delayed attempt
    pub base_wait_secs: u32,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            no_delay_attempts: 3,
            base_wait_secs: 60,
        }
    }
}

impl BackoffSchedule {
    pub fn new(no_delay_attempts: u16, base_wait_secs: u32) -> Self {
        Self {
            no_delay_attempts,
            base_wait_secs,
        }
    }

    /// Wait in seconds enforced before attempt number `retry_count`.
    /// Saturates at `u32::MAX`.
    pub fn wait_for(&self, retry_count: u16) -> u32 {
        if retry_count <= self.no_delay_attempts {
            return 0;
        }
        let doublings = u32::from(retry_count - self.no_delay_attempts - 1);
        if doublings >= 32 {
            return if self.base_wait_secs == 0 { 0 } else { u32::MAX };
        }
        self.base_wait_secs
            .checked_mul(1u32 << doublings)
            .unwrap_or(u32::MAX)
    }

    /// Whether a clock rewrite must go through the dirty-flag protocol
    pub fn is_delayed(&self, retry_count: u16) -> bool {
        retry_count > self.no_delay_attempts
    }
}

/// Persistent retry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    /// Number of the next PIN attempt (1 after a success)
    pub retry_count: u16,
    /// Wait enforced after `snapshot_seconds`
    pub wait_seconds: u32,
    /// Clock reading the wait is anchored to
    pub snapshot_seconds: u32,
    /// Set while a clock rewrite is in flight
    pub dirty: bool,
}

impl Default for RetryRecord {
    fn default() -> Self {
        Self {
            retry_count: 1,
            wait_seconds: 0,
            snapshot_seconds: 0,
            dirty: false,
        }
    }
}

impl RetryRecord {
    /// Earliest clock reading at which the next attempt is allowed
    pub fn earliest_attempt(&self) -> u64 {
        u64::from(self.snapshot_seconds) + u64::from(self.wait_seconds)
    }

    /// Seconds still to wait at clock reading `now`
    pub fn remaining_wait(&self, now: u32) -> u64 {
        self.earliest_attempt().saturating_sub(u64::from(now))
    }

    /// Record a failed attempt at clock reading `now`
    pub fn record_failure(&mut self, schedule: &BackoffSchedule, now: u32) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.wait_seconds = schedule.wait_for(self.retry_count);
        self.snapshot_seconds = now;
    }

    /// Reset after a successful attempt
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// First half of a clock rewrite: fold the remaining wait (relative to
    /// the old clock) into `wait_seconds` and mark the record dirty.
    pub fn begin_clock_change(&mut self, old_now: u32) {
        self.wait_seconds = u32::try_from(self.remaining_wait(old_now)).unwrap_or(u32::MAX);
        self.snapshot_seconds = old_now;
        self.dirty = true;
    }

    /// Second half of a clock rewrite, and the boot-time repair rule:
    /// anchor the wait to `now` and clear the dirty flag.
    pub fn repair(&mut self, now: u32) {
        self.snapshot_seconds = now;
        self.dirty = false;
    }
}
