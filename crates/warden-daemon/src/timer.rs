//! Timers that raise a bit on a signal channel

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::signal::{SignalChannel, Signals};

/// A timer bound to one signal bit.
///
/// A one-shot timer raises its bit once after the delay; a periodic timer
/// raises it every period. Re-arming replaces any running schedule.
pub struct SignalTimer {
    channel: SignalChannel,
    bit: Signals,
    task: Option<JoinHandle<()>>,
}

impl SignalTimer {
    pub fn new(channel: SignalChannel, bit: Signals) -> Self {
        Self {
            channel,
            bit,
            task: None,
        }
    }

    /// Raise the bit once after `delay`
    pub fn arm_once(&mut self, delay: Duration) {
        self.stop();
        let channel = self.channel.clone();
        let bit = self.bit;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            channel.set(bit);
        }));
    }

    /// Raise the bit every `period`, first after one period
    pub fn arm_periodic(&mut self, period: Duration) {
        self.stop();
        let channel = self.channel.clone();
        let bit = self.bit;
        self.task = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                channel.set(bit);
            }
        }));
    }

    /// Stop the timer. A bit already raised stays raised.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the timer still has a pending expiry
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for SignalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::event;

    #[tokio::test(start_paused = true)]
    async fn test_one_shot() {
        let channel = SignalChannel::new();
        let mut timer = SignalTimer::new(channel.clone(), event::SESSION_EXPIRED);
        timer.arm_once(Duration::from_secs(10));
        assert!(timer.is_running());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(channel.get().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(channel.get(), event::SESSION_EXPIRED);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_and_stop() {
        let channel = SignalChannel::new();
        let mut timer = SignalTimer::new(channel.clone(), event::SEED_ADVANCE);
        timer.arm_periodic(Duration::from_secs(60));

        for _ in 0..3 {
            let fired = channel.take_any(event::SEED_ADVANCE, None).await;
            assert_eq!(fired, event::SEED_ADVANCE);
        }

        timer.stop();
        assert!(!timer.is_running());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(channel.get().is_empty());
    }
}
