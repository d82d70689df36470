//! Proximity lock, motion response and re-entry into `Unlocked`

use std::time::Duration;

use tracing::{error, info, warn};

use warden_core::{HostAction, SecurityState};

use super::{Orchestrator, RebootReason, Transition};
use crate::error::Result;
use crate::platform::Screen;
use crate::signal::{event, keyfob_request, Signals};

impl Orchestrator {
    pub(super) async fn proximity_lock(&mut self) -> Result<Transition> {
        self.bundle.events.clear(event::BUTTONS);
        self.show(Screen::ProximityLock).await?;
        self.arm_motion().await?;

        loop {
            self.apply_config_updates().await?;
            let motion_policy = self.bundle.user_config.motion_reaction;

            let pressed = self.poll_press().await;
            if pressed.contains(event::LONG_PRESS) {
                warn!("Long press while proximity-locked: forcing host shutdown");
                return self.emergency_reboot().await;
            }
            if pressed.contains(event::SHORT_PRESS) {
                break;
            }
            let moved = !self.bundle.events.take(event::MOTION).is_empty();
            if moved && motion_policy {
                self.disarm_motion().await?;
                return Ok(Transition::Next(SecurityState::DeviceMotion));
            }
        }

        let next = self.reauthenticate().await?;
        self.disarm_motion().await?;
        Ok(next)
    }

    /// Bounded keyfob re-authentication, interleaved with button and motion
    /// checks. A long press ends the boot; motion always wins over an auth
    /// outcome seen in the same slice.
    async fn reauthenticate(&mut self) -> Result<Transition> {
        self.show(Screen::PresentKeyfob).await?;
        self.bundle.events.clear(event::AUTH_OUTCOME | event::BUTTONS);
        self.bundle.keyfob_sessions.reset();
        self.bundle.keyfob_requests.set(keyfob_request::DETECT);

        let deadline = tokio::time::Instant::now() + self.timings.host_keyfob_wait;

        loop {
            let mask = if self.bundle.user_config.motion_reaction {
                event::AUTH_OUTCOME | event::LONG_PRESS | event::MOTION
            } else {
                event::AUTH_OUTCOME | event::LONG_PRESS
            };
            let observed = self
                .bundle
                .events
                .wait_any(mask, Some(self.timings.motion_slice))
                .await;

            if observed.intersects(event::LONG_PRESS) {
                self.stop_keyfob().await;
                warn!("Long press during re-authentication: forcing host shutdown");
                return self.emergency_reboot().await;
            }

            if observed.intersects(event::MOTION) {
                self.bundle.events.clear(event::MOTION | event::AUTH_OUTCOME);
                self.stop_keyfob().await;
                warn!("Motion during re-authentication");
                return Ok(Transition::Next(SecurityState::DeviceMotion));
            }

            let outcome = self.bundle.events.take(event::AUTH_OUTCOME);
            if !outcome.is_empty() {
                return Ok(Transition::Next(reauth_next(outcome)));
            }

            if tokio::time::Instant::now() >= deadline {
                self.stop_keyfob().await;
                info!("Re-authentication window elapsed");
                return Ok(Transition::Next(SecurityState::ProximityLock));
            }
            self.apply_config_updates().await?;
        }
    }

    /// Forced host shutdown on a long press, then a device reboot
    async fn emergency_reboot(&mut self) -> Result<Transition> {
        self.bundle.events.clear(event::BUTTONS);
        self.peripherals.host.signal_forced_shutdown().await?;
        self.disarm_motion().await?;
        Ok(Transition::Reboot(RebootReason::LongPress))
    }

    pub(super) async fn device_motion(&mut self) -> Result<Transition> {
        warn!("Device motion detected while proximity-locked");
        self.show(Screen::MotionDetected).await?;
        tokio::time::sleep(self.timings.motion_warning).await;
        Ok(Transition::Reboot(RebootReason::MotionDetected))
    }

    pub(super) async fn re_le_alive_check(&mut self) -> Result<Transition> {
        let Some(session) = self.receive_session().await? else {
            return Ok(Transition::Next(SecurityState::ProximityLock));
        };
        if !self.proximity_handshake(session).await? {
            return Ok(Transition::Next(SecurityState::ProximityLock));
        }

        self.peripherals.host.set_io_enabled(true).await?;
        let host = &self.peripherals.host;
        match self.bundle.user_config.host_action() {
            Ok(HostAction::NoChange) => {}
            Ok(HostAction::Standby) => host.pulse_power_button().await?,
            Ok(HostAction::Shutdown) => host.power_on().await?,
            Err(e) => {
                error!("Unknown host action mode: {}", e);
                host.force_power_off().await?;
                self.stop_timers();
                return Ok(Transition::Reboot(RebootReason::InvalidHostAction));
            }
        }
        info!("Keyfob back in range, host restored");
        Ok(Transition::Next(SecurityState::Unlocked))
    }

    pub(super) async fn re_nfc_auth(&mut self) -> Result<Transition> {
        warn!("Keyfob re-authentication failed");
        self.show(Screen::AccessDenied).await?;
        Ok(Transition::Next(SecurityState::ProximityLock))
    }

    pub(super) async fn fatal(&mut self) -> Result<Transition> {
        self.stop_timers();
        self.bundle.motion.suspend();
        let host = &self.peripherals.host;
        if let Err(e) = host.set_io_enabled(false).await {
            error!("Could not disable host I/O: {}", e);
        }
        if let Err(e) = host.force_power_off().await {
            error!("Could not cut host power: {}", e);
        }
        if let Err(e) = self.show(Screen::Fatal).await {
            error!("Could not render fatal screen: {}", e);
        }
        error!("Security controller halted; external reset required");
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    async fn arm_motion(&mut self) -> Result<()> {
        self.bundle.events.clear(event::MOTION);
        let previous = self.peripherals.motion.enable_motion_detection().await?;
        self.motion_restore = Some(previous);
        self.bundle.motion.resume();
        Ok(())
    }

    async fn disarm_motion(&mut self) -> Result<()> {
        self.bundle.motion.suspend();
        if let Some(previous) = self.motion_restore.take() {
            self.peripherals
                .motion
                .disable_motion_detection(previous)
                .await?;
        }
        self.bundle.events.clear(event::MOTION);
        Ok(())
    }
}

/// Next state for an auth outcome observed while proximity-locked
fn reauth_next(outcome: Signals) -> SecurityState {
    if outcome.contains(event::AUTH_FAILURE) {
        // Includes success and failure together
        SecurityState::ReNfcAuth
    } else if outcome.contains(event::AUTH_SUCCESS) {
        SecurityState::ReLeAliveCheck
    } else {
        SecurityState::ProximityLock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reauth_outcomes() {
        assert_eq!(reauth_next(event::AUTH_SUCCESS), SecurityState::ReLeAliveCheck);
        assert_eq!(reauth_next(event::AUTH_FAILURE), SecurityState::ReNfcAuth);
        assert_eq!(
            reauth_next(event::AUTH_SUCCESS | event::AUTH_FAILURE),
            SecurityState::ReNfcAuth
        );
        assert_eq!(reauth_next(event::DETECT_TIMEOUT), SecurityState::ProximityLock);
    }
}
