//! Retry/backoff store
//!
//! Persists the failed-PIN counter and enforces the backoff wait before
//! each PIN attempt. The record is written through [`Records`] after every
//! change, so the enforced wait survives a reboot.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use warden_core::{BackoffSchedule, RetryRecord};

use crate::config::Timings;
use crate::error::{DaemonError, Result};
use crate::platform::{Display, Rtc, Screen};
use crate::storage::Records;

pub struct RetryStore {
    records: Records,
    rtc: Arc<dyn Rtc>,
    display: Arc<dyn Display>,
    schedule: BackoffSchedule,
    clock_retry: Duration,
    resample: Duration,
}

impl RetryStore {
    pub fn new(
        records: Records,
        rtc: Arc<dyn Rtc>,
        display: Arc<dyn Display>,
        schedule: BackoffSchedule,
        timings: &Timings,
    ) -> Self {
        Self {
            records,
            rtc,
            display,
            schedule,
            clock_retry: timings.clock_retry,
            resample: timings.lockout_resample,
        }
    }

    pub fn schedule(&self) -> &BackoffSchedule {
        &self.schedule
    }

    /// Current persisted record
    pub fn load(&self) -> Result<RetryRecord> {
        self.records.read_or_default()
    }

    /// Read the clock, retrying a transient fault indefinitely
    pub async fn now(&self) -> u32 {
        loop {
            match self.rtc.now().await {
                Ok(now) => return now,
                Err(e) => {
                    warn!("Clock read failed, retrying: {}", e);
                    tokio::time::sleep(self.clock_retry).await;
                }
            }
        }
    }

    /// Seconds left before the next PIN attempt is allowed
    pub async fn lockout_remaining(&self) -> Result<u64> {
        let record = self.load()?;
        Ok(record.remaining_wait(self.now().await))
    }

    /// Block until the enforced wait of the current record has elapsed
    pub async fn check_retry_delay(&self) -> Result<()> {
        let record = self.load()?;
        loop {
            let now = self.now().await;
            let remaining = record.remaining_wait(now);
            if remaining == 0 {
                return Ok(());
            }
            debug!("PIN lockout: {}s remaining", remaining);
            self.show(Screen::PleaseWait { seconds: remaining }).await?;
            let nap = self.resample.min(Duration::from_secs(remaining));
            tokio::time::sleep(nap).await;
        }
    }

    /// Record a failed PIN attempt
    pub async fn increment_retry_count(&self) -> Result<RetryRecord> {
        let mut record = self.load()?;
        let now = self.now().await;
        record.record_failure(&self.schedule, now);
        self.records.write(&record)?;
        warn!(
            "PIN failure recorded: attempt {} next, wait {}s",
            record.retry_count, record.wait_seconds
        );
        Ok(record)
    }

    /// Reset the counter after a successful PIN check
    pub fn reset_on_success(&self) -> Result<()> {
        let mut record = self.load()?;
        record.reset();
        self.records.write(&record)
    }

    /// Boot-time repair of an interrupted clock rewrite.
    /// Returns whether a repair was needed.
    pub async fn repair_if_dirty(&self) -> Result<bool> {
        let mut record = self.load()?;
        if !record.dirty {
            return Ok(false);
        }
        let now = self.now().await;
        record.repair(now);
        self.records.write(&record)?;
        info!(
            "Repaired retry record: {}s wait re-anchored at {}",
            record.wait_seconds, now
        );
        Ok(true)
    }

    /// Rewrite the clock without shortening a running lockout
    pub async fn set_clock(&self, seconds: u32) -> Result<()> {
        let mut record = self.load()?;
        let delayed = self.schedule.is_delayed(record.retry_count);

        if delayed {
            let old_now = self.now().await;
            record.begin_clock_change(old_now);
            self.records.write(&record)?;
        }

        if let Err(e) = self.rtc.set(seconds).await {
            if delayed {
                // The clock kept its old value; re-anchor there
                let old_now = record.snapshot_seconds;
                record.repair(old_now);
                self.records.write(&record)?;
            }
            return Err(DaemonError::Clock(e.to_string()));
        }

        if delayed {
            record.repair(seconds);
            self.records.write(&record)?;
            debug!(
                "Clock rewritten under lockout: {}s wait re-anchored",
                record.wait_seconds
            );
        }
        Ok(())
    }

    async fn show(&self, screen: Screen) -> Result<()> {
        self.display
            .show(screen)
            .await
            .map_err(|e| DaemonError::Display(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBoard;
    use crate::storage::MemoryStorage;

    fn store(board: &Arc<SimBoard>) -> (RetryStore, Records) {
        let records = Records::new(Arc::new(MemoryStorage::new()));
        let store = RetryStore::new(
            records.clone(),
            board.clone(),
            board.clone(),
            BackoffSchedule::default(),
            &Timings::default(),
        );
        (store, records)
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforced_waits_for_five_failures() {
        let board = Arc::new(SimBoard::new());
        let (store, _) = store(&board);

        let mut waits = Vec::new();
        for _ in 0..5 {
            let start = tokio::time::Instant::now();
            store.check_retry_delay().await.unwrap();
            waits.push(start.elapsed().as_secs());
            store.increment_retry_count().await.unwrap();
        }
        assert_eq!(waits, vec![0, 0, 0, 60, 120]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_on_success() {
        let board = Arc::new(SimBoard::new());
        let (store, _) = store(&board);

        for _ in 0..4 {
            store.increment_retry_count().await.unwrap();
        }
        store.reset_on_success().unwrap();
        assert_eq!(store.load().unwrap(), RetryRecord::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_fault_is_retried() {
        let board = Arc::new(SimBoard::new());
        let (store, _) = store(&board);

        board.fail_clock_reads(3);
        let start = tokio::time::Instant::now();
        store.check_retry_delay().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_rewind_keeps_remaining_wait() {
        let board = Arc::new(SimBoard::new());
        board.set_clock(10_000);
        let (store, _) = store(&board);

        for _ in 0..3 {
            store.increment_retry_count().await.unwrap();
        }
        // 60s lockout anchored at 10_000; 20s of it pass
        tokio::time::sleep(Duration::from_secs(20)).await;

        store.set_clock(500).await.unwrap();
        let record = store.load().unwrap();
        assert!(!record.dirty);
        assert_eq!(record.snapshot_seconds, 500);
        assert_eq!(record.wait_seconds, 40);

        let start = tokio::time::Instant::now();
        store.check_retry_delay().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_clock_rewrite_leaves_record_clean() {
        let board = Arc::new(SimBoard::new());
        board.set_clock(10_000);
        let (store, _) = store(&board);

        for _ in 0..3 {
            store.increment_retry_count().await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(20)).await;

        board.fail_clock_writes(true);
        assert!(matches!(
            store.set_clock(500).await,
            Err(DaemonError::Clock(_))
        ));

        let record = store.load().unwrap();
        assert!(!record.dirty);
        assert_eq!(record.snapshot_seconds, 10_020);
        assert_eq!(record.wait_seconds, 40);
        assert_eq!(store.lockout_remaining().await.unwrap(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_repair_never_shortens_lockout() {
        let board = Arc::new(SimBoard::new());
        board.set_clock(1_000);
        let (store, records) = store(&board);

        // Crash after the dirty record was persisted, before the re-anchor
        let mut record = RetryRecord::default();
        record.retry_count = 5;
        record.wait_seconds = 120;
        record.snapshot_seconds = 1_000;
        record.begin_clock_change(1_000);
        records.write(&record).unwrap();
        let earliest_before = record.earliest_attempt();

        board.set_clock(2_000);
        assert!(store.repair_if_dirty().await.unwrap());

        let repaired = store.load().unwrap();
        assert!(!repaired.dirty);
        assert!(repaired.earliest_attempt() >= earliest_before);
        assert!(!store.repair_if_dirty().await.unwrap());
    }
}
