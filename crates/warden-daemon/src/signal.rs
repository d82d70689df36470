//! Signal channels
//!
//! A signal channel is a shared set of flag bits. Any task may set or clear
//! any subset; a waiter blocks (optionally bounded) until one bit of a mask
//! is set, and is responsible for clearing the bits it consumed. Waiters
//! always re-check bit membership instead of trusting a wakeup.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// A set of signal bits
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Signals(u32);

impl Signals {
    pub const NONE: Signals = Signals(0);

    pub const fn bit(n: u32) -> Signals {
        Signals(1 << n)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// All bits of `other` are set
    pub const fn contains(self, other: Signals) -> bool {
        self.0 & other.0 == other.0 && !other.is_empty()
    }

    /// Any bit of `other` is set
    pub const fn intersects(self, other: Signals) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Signals) -> Signals {
        Signals(self.0 | other.0)
    }
}

impl BitOr for Signals {
    type Output = Signals;

    fn bitor(self, rhs: Signals) -> Signals {
        Signals(self.0 | rhs.0)
    }
}

impl BitOrAssign for Signals {
    fn bitor_assign(&mut self, rhs: Signals) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Signals {
    type Output = Signals;

    fn bitand(self, rhs: Signals) -> Signals {
        Signals(self.0 & rhs.0)
    }
}

impl Not for Signals {
    type Output = Signals;

    fn not(self) -> Signals {
        Signals(!self.0)
    }
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signals({:#010x})", self.0)
    }
}

/// Requests raised by the orchestrator, consumed by the keyfob task
pub mod keyfob_request {
    use super::Signals;

    pub const FIRST_DETECT: Signals = Signals::bit(0);
    pub const DETECT: Signals = Signals::bit(1);
    pub const ASSOCIATE: Signals = Signals::bit(2);
    pub const DELETE_ENTRY: Signals = Signals::bit(3);
    pub const GET_SERIAL: Signals = Signals::bit(4);
    pub const STOP_EXECUTION: Signals = Signals::bit(5);

    pub const ALL: Signals = FIRST_DETECT
        .union(DETECT)
        .union(ASSOCIATE)
        .union(DELETE_ENTRY)
        .union(GET_SERIAL)
        .union(STOP_EXECUTION);
}

/// Requests raised by the orchestrator, consumed by the PIN-entry task
pub mod pin_request {
    use super::Signals;

    pub const ENTER_PIN: Signals = Signals::bit(0);
}

/// Outcomes raised by collaborators, consumed by the orchestrator
pub mod event {
    use super::Signals;

    pub const AUTH_SUCCESS: Signals = Signals::bit(0);
    pub const AUTH_FAILURE: Signals = Signals::bit(1);
    pub const DETECT_TIMEOUT: Signals = Signals::bit(2);
    pub const ASSOCIATION_SUCCESS: Signals = Signals::bit(3);
    pub const ASSOCIATION_FAILURE: Signals = Signals::bit(4);
    pub const ENTRY_FULL: Signals = Signals::bit(5);
    pub const DELETE_SUCCESS: Signals = Signals::bit(6);
    pub const DELETE_FAILURE: Signals = Signals::bit(7);
    pub const NOT_ADMIN: Signals = Signals::bit(8);
    pub const FIRST_DETECT_SUCCESS: Signals = Signals::bit(9);
    pub const STOP_SUCCESS: Signals = Signals::bit(10);
    pub const SHORT_PRESS: Signals = Signals::bit(11);
    pub const LONG_PRESS: Signals = Signals::bit(12);
    pub const SEED_ADVANCE: Signals = Signals::bit(13);
    pub const SESSION_EXPIRED: Signals = Signals::bit(14);
    pub const MOTION: Signals = Signals::bit(15);

    pub const AUTH_OUTCOME: Signals = AUTH_SUCCESS.union(AUTH_FAILURE).union(DETECT_TIMEOUT);
    pub const BUTTONS: Signals = SHORT_PRESS.union(LONG_PRESS);
}

/// Shared flag set. Cloning yields another handle to the same bits.
#[derive(Clone)]
pub struct SignalChannel {
    tx: Arc<watch::Sender<Signals>>,
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Signals::NONE);
        Self { tx: Arc::new(tx) }
    }

    /// Set `bits`, waking every waiter
    pub fn set(&self, bits: Signals) {
        self.tx.send_modify(|s| *s |= bits);
    }

    /// Clear `bits`
    pub fn clear(&self, bits: Signals) {
        self.tx.send_modify(|s| *s = *s & !bits);
    }

    /// Current bits
    pub fn get(&self) -> Signals {
        *self.tx.borrow()
    }

    /// Read and clear the bits of `mask` that are set, without waiting
    pub fn take(&self, mask: Signals) -> Signals {
        let mut taken = Signals::NONE;
        self.tx.send_if_modified(|s| {
            taken = *s & mask;
            *s = *s & !mask;
            !taken.is_empty()
        });
        taken
    }

    /// Wait until any bit of `mask` is set, or `timeout` elapses.
    ///
    /// Returns the observed bits of `mask` (empty on timeout). The bits are
    /// left set; the caller clears what it consumes.
    pub async fn wait_any(&self, mask: Signals, timeout: Option<Duration>) -> Signals {
        let mut rx = self.tx.subscribe();
        let wait = async {
            match rx.wait_for(|s| s.intersects(mask)).await {
                Ok(bits) => *bits & mask,
                // The sender lives as long as `self`
                Err(_) => Signals::NONE,
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Signals::NONE),
            None => wait.await,
        }
    }

    /// Wait as [`wait_any`](Self::wait_any) and clear the observed bits
    pub async fn take_any(&self, mask: Signals, timeout: Option<Duration>) -> Signals {
        let observed = self.wait_any(mask, timeout).await;
        if !observed.is_empty() {
            self.clear(observed);
        }
        observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear_take() {
        let channel = SignalChannel::new();
        channel.set(event::AUTH_SUCCESS | event::SHORT_PRESS);
        assert!(channel.get().contains(event::AUTH_SUCCESS));

        channel.clear(event::AUTH_SUCCESS);
        assert!(!channel.get().intersects(event::AUTH_SUCCESS));

        assert_eq!(channel.take(event::BUTTONS), event::SHORT_PRESS);
        assert!(channel.get().is_empty());
    }

    #[test]
    fn test_contains_requires_all_bits() {
        let both = event::AUTH_SUCCESS | event::AUTH_FAILURE;
        assert!(both.contains(event::AUTH_SUCCESS));
        assert!(!event::AUTH_SUCCESS.contains(both));
        assert!(!both.contains(Signals::NONE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_empty() {
        let channel = SignalChannel::new();
        let observed = channel
            .wait_any(event::AUTH_OUTCOME, Some(Duration::from_secs(1)))
            .await;
        assert!(observed.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sees_bit_set_by_other_task() {
        let channel = SignalChannel::new();
        let setter = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            setter.set(event::DETECT_TIMEOUT | event::MOTION);
        });

        let observed = channel.take_any(event::AUTH_OUTCOME, None).await;
        assert_eq!(observed, event::DETECT_TIMEOUT);
        // Bits outside the mask are untouched
        assert_eq!(channel.get(), event::MOTION);
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_set() {
        let channel = SignalChannel::new();
        channel.set(event::LONG_PRESS);
        let observed = channel.wait_any(event::BUTTONS, Some(Duration::ZERO)).await;
        assert_eq!(observed, event::LONG_PRESS);
    }
}
