//! Authentication gates shared by several states
//!
//! The proximity handshake, the retry-gated PIN check and the combined
//! keyfob/proximity/PIN gate used by host security checks.

use tracing::{debug, info, warn};

use warden_core::{DeviceRecord, HostStatus, KeyfobSession, SecurityLevel};

use super::Orchestrator;
use crate::error::{DaemonError, Result};
use crate::pin::{verify_pin, PinStatus};
use crate::platform::Screen;
use crate::poll::poll_bounded;
use crate::signal::{event, keyfob_request, pin_request};

/// Outcome of a PIN check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Passed,
    /// Wrong PIN; the retry counter was incremented
    Failed,
    /// Entry cancelled or timed out; the retry counter is untouched
    Aborted,
    /// A lockout is running and the caller may not wait it out
    LockedOut,
}

/// What a PIN check does about a running lockout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lockout {
    Wait,
    Refuse,
}

/// Outcome of the keyfob/proximity/PIN gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Passed,
    AuthFailed,
    Timeout,
    ProximityFailed,
    NotAdmin,
    PinFailed,
    PinAborted,
    LockedOut,
}

impl GateOutcome {
    pub fn status(self) -> HostStatus {
        match self {
            GateOutcome::Passed => HostStatus::Success,
            GateOutcome::Timeout | GateOutcome::PinAborted | GateOutcome::LockedOut => {
                HostStatus::Timeout
            }
            GateOutcome::AuthFailed
            | GateOutcome::ProximityFailed
            | GateOutcome::NotAdmin
            | GateOutcome::PinFailed => HostStatus::AuthFailure,
        }
    }
}

impl Orchestrator {
    /// Take the session delivered by the keyfob task, if it arrives in time
    pub(super) async fn receive_session(&mut self) -> Result<Option<KeyfobSession>> {
        let session = self
            .bundle
            .keyfob_sessions
            .recv_timeout(self.timings.session_handoff)
            .await?;
        if session.is_none() {
            warn!("Keyfob task reported success but delivered no session");
        }
        Ok(session)
    }

    /// Broadcast the session seed and wait for the keyfob to lock onto it.
    /// On success the seed is retained and the seed-advance timer (re)armed.
    pub(super) async fn proximity_handshake(&mut self, session: KeyfobSession) -> Result<bool> {
        debug!("Proximity handshake with keyfob {}", session.name);
        let broadcast = session.into_broadcast();
        self.peripherals
            .proximity
            .start_broadcast(broadcast.seed())
            .await?;

        let proximity = self.peripherals.proximity.clone();
        let locked = poll_bounded(self.timings.alive_check, || {
            let proximity = proximity.clone();
            async move { proximity.is_locked().await }
        })
        .await?;

        if !locked {
            warn!("Keyfob did not lock onto broadcast");
            if let Some(previous) = &self.broadcast {
                self.peripherals
                    .proximity
                    .update_seed(previous.seed())
                    .await?;
            }
            return Ok(false);
        }

        self.broadcast = Some(broadcast);
        self.seed_timer.arm_periodic(self.timings.seed_advance_period);
        Ok(true)
    }

    /// Retry-gated PIN check against the provisioned PIN hash.
    ///
    /// With [`Lockout::Wait`] a running lockout is waited out on screen;
    /// with [`Lockout::Refuse`] it ends the check at once.
    pub(super) async fn pin_check(&mut self, lockout: Lockout) -> Result<PinOutcome> {
        let device: DeviceRecord = self.records.read_required()?;
        let hash = device
            .pin_hash
            .ok_or_else(|| DaemonError::Storage("no PIN provisioned".to_string()))?;

        match lockout {
            Lockout::Wait => self.retry.check_retry_delay().await?,
            Lockout::Refuse => {
                if self.refuse_during_lockout().await? {
                    return Ok(PinOutcome::LockedOut);
                }
            }
        }

        if self.bundle.pin_responses.reset() {
            debug!("Discarded stale PIN response");
        }
        self.show(Screen::EnterPin).await?;
        self.bundle.pin_requests.set(pin_request::ENTER_PIN);

        let response = self
            .bundle
            .pin_responses
            .recv_timeout(self.timings.pin_entry)
            .await?;
        let Some(response) = response else {
            self.bundle.pin_requests.clear(pin_request::ENTER_PIN);
            warn!("PIN entry timed out");
            return Ok(PinOutcome::Aborted);
        };

        match response.status() {
            PinStatus::Entered => {}
            PinStatus::Cancelled | PinStatus::TimedOut => {
                warn!("PIN entry ended without digits: {:?}", response.status());
                return Ok(PinOutcome::Aborted);
            }
        }

        if verify_pin(response.digits(), &hash)? {
            self.retry.reset_on_success()?;
            info!("PIN accepted");
            Ok(PinOutcome::Passed)
        } else {
            self.retry.increment_retry_count().await?;
            self.show(Screen::WrongPin).await?;
            Ok(PinOutcome::Failed)
        }
    }

    /// Show the remaining lockout and report whether one is running
    async fn refuse_during_lockout(&mut self) -> Result<bool> {
        let remaining = self.retry.lockout_remaining().await?;
        if remaining == 0 {
            return Ok(false);
        }
        warn!("PIN locked out for another {}s", remaining);
        self.show(Screen::PleaseWait { seconds: remaining }).await?;
        Ok(true)
    }

    /// Keyfob detection, proximity handshake and, for level 1, the admin
    /// privilege and PIN checks.
    ///
    /// Runs inside the unlocked loop, so every wait here is bounded and a
    /// PIN lockout is reported to the host instead of waited out.
    pub(super) async fn check_nfc_ble_pin(&mut self, level: SecurityLevel) -> Result<GateOutcome> {
        if level.requires_pin() && self.refuse_during_lockout().await? {
            self.show(Screen::Unlocked).await?;
            return Ok(GateOutcome::LockedOut);
        }

        self.bundle.events.clear(event::AUTH_OUTCOME);
        self.bundle.keyfob_sessions.reset();
        self.show(Screen::PresentKeyfob).await?;
        self.bundle.keyfob_requests.set(keyfob_request::DETECT);

        let outcome = self
            .bundle
            .events
            .take_any(event::AUTH_OUTCOME, Some(self.timings.host_keyfob_wait))
            .await;

        let result = if outcome.is_empty() {
            self.stop_keyfob().await;
            GateOutcome::Timeout
        } else if outcome.intersects(event::AUTH_FAILURE) {
            GateOutcome::AuthFailed
        } else if outcome.contains(event::DETECT_TIMEOUT) {
            GateOutcome::Timeout
        } else {
            self.gate_after_detect(level).await?
        };

        if result != GateOutcome::Passed {
            self.bundle.keyfob_sessions.reset();
            warn!("Security check level {:?} failed: {:?}", level, result);
        }
        self.show(Screen::Unlocked).await?;
        Ok(result)
    }

    async fn gate_after_detect(&mut self, level: SecurityLevel) -> Result<GateOutcome> {
        let Some(session) = self.receive_session().await? else {
            return Ok(GateOutcome::ProximityFailed);
        };
        let privilege = session.privilege;

        if !self.proximity_handshake(session).await? {
            return Ok(GateOutcome::ProximityFailed);
        }
        if !level.requires_pin() {
            return Ok(GateOutcome::Passed);
        }
        if !privilege.is_admin() {
            return Ok(GateOutcome::NotAdmin);
        }
        Ok(match self.pin_check(Lockout::Refuse).await? {
            PinOutcome::Passed => GateOutcome::Passed,
            PinOutcome::Failed => GateOutcome::PinFailed,
            PinOutcome::Aborted => GateOutcome::PinAborted,
            PinOutcome::LockedOut => GateOutcome::LockedOut,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_status_mapping() {
        assert_eq!(GateOutcome::Passed.status(), HostStatus::Success);
        assert_eq!(GateOutcome::NotAdmin.status(), HostStatus::AuthFailure);
        assert_eq!(GateOutcome::PinFailed.status(), HostStatus::AuthFailure);
        assert_eq!(GateOutcome::Timeout.status(), HostStatus::Timeout);
        assert_eq!(GateOutcome::PinAborted.status(), HostStatus::Timeout);
        assert_eq!(GateOutcome::LockedOut.status(), HostStatus::Timeout);
    }
}
