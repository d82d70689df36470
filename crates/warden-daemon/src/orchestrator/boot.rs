//! Boot path: from `Locked` to `HostPowerOn`

use tracing::{debug, info, warn};

use warden_core::{SecurityState, UserConfig};

use super::{Lockout, Orchestrator, PinOutcome, Transition};
use crate::error::Result;
use crate::platform::Screen;
use crate::signal::{event, keyfob_request};

impl Orchestrator {
    pub(super) async fn locked(&mut self) -> Result<Transition> {
        self.peripherals.host.force_power_off().await?;
        self.peripherals.host.set_io_enabled(false).await?;

        if self.retry.repair_if_dirty().await? {
            warn!("Retry record had an interrupted clock rewrite");
        }
        let config: UserConfig = self.records.read_or_default()?;
        self.peripherals.proximity.arm(config.ble_range).await?;
        self.bundle.user_config = config;

        self.show(Screen::Locked).await?;
        Ok(Transition::Next(SecurityState::NfcAuth))
    }

    pub(super) async fn nfc_auth(&mut self) -> Result<Transition> {
        self.bundle.events.clear(event::BUTTONS);
        self.show(Screen::PressButton).await?;

        loop {
            if self.poll_press().await.contains(event::SHORT_PRESS) {
                break;
            }
        }

        self.show(Screen::PresentKeyfob).await?;
        self.bundle.keyfob_requests.set(keyfob_request::FIRST_DETECT);
        let acked = self
            .bundle
            .events
            .take_any(event::FIRST_DETECT_SUCCESS, Some(self.timings.session_handoff))
            .await;
        if acked.is_empty() {
            self.bundle.keyfob_requests.clear(keyfob_request::FIRST_DETECT);
            warn!("Keyfob task did not acknowledge first detect, retrying");
            return Ok(Transition::Next(SecurityState::NfcAuth));
        }

        if self.bundle.keyfob_sessions.reset() {
            debug!("Discarded stale keyfob session");
        }
        self.bundle.events.clear(event::AUTH_OUTCOME);
        self.bundle.keyfob_requests.set(keyfob_request::DETECT);
        let outcome = self.bundle.events.take_any(event::AUTH_OUTCOME, None).await;

        let both = event::AUTH_SUCCESS | event::AUTH_FAILURE;
        if outcome.contains(both) {
            warn!("Keyfob reported success and failure together, retrying");
            return Ok(Transition::Next(SecurityState::NfcAuth));
        }
        if outcome.contains(event::AUTH_SUCCESS) {
            return Ok(Transition::Next(SecurityState::LeAliveCheck));
        }
        if outcome.contains(event::AUTH_FAILURE) {
            warn!("Keyfob authentication failed");
            return Ok(Transition::Next(SecurityState::AccessDenial));
        }
        debug!("No keyfob presented within the detection window");
        Ok(Transition::Next(SecurityState::NfcAuth))
    }

    pub(super) async fn le_alive_check(&mut self) -> Result<Transition> {
        let Some(session) = self.receive_session().await? else {
            return Ok(Transition::Next(SecurityState::ProximityError));
        };
        if !self.proximity_handshake(session).await? {
            return Ok(Transition::Next(SecurityState::ProximityError));
        }

        if self.bundle.user_config.ask_pin_on_boot {
            match self.pin_check(Lockout::Wait).await? {
                PinOutcome::Passed => {}
                outcome => {
                    warn!("Boot PIN check failed: {:?}", outcome);
                    self.seed_timer.stop();
                    self.broadcast = None;
                    return Ok(Transition::Next(SecurityState::Locked));
                }
            }
        }
        Ok(Transition::Next(SecurityState::HostPowerOn))
    }

    pub(super) async fn access_denial(&mut self) -> Result<Transition> {
        self.show(Screen::AccessDenied).await?;
        tokio::time::sleep(self.timings.access_denial_penalty).await;
        Ok(Transition::Next(SecurityState::NfcAuth))
    }

    pub(super) async fn host_power_on(&mut self) -> Result<Transition> {
        self.peripherals.host.power_on().await?;
        self.peripherals.host.set_io_enabled(true).await?;
        info!("Host powered on");
        Ok(Transition::Next(SecurityState::Unlocked))
    }

    pub(super) async fn proximity_error(&mut self) -> Result<Transition> {
        self.show(Screen::ProximityError).await?;
        tokio::time::sleep(self.timings.proximity_error_delay).await;
        Ok(Transition::Next(SecurityState::Locked))
    }
}
