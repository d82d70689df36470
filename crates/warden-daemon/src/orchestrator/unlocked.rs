//! The unlocked supervisory loop and the proximity-loss host action

use tracing::{debug, error, info, warn};

use warden_core::{HostAction, SecurityState};

use super::{Orchestrator, RebootReason, Transition};
use crate::error::Result;
use crate::platform::Screen;
use crate::poll::poll_bounded;
use crate::signal::event;

/// Why the unlocked loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ProximityLost,
    SessionExpired,
}

impl Orchestrator {
    pub(super) async fn unlocked(&mut self) -> Result<Transition> {
        self.show(Screen::Unlocked).await?;
        self.bundle
            .events
            .clear(event::BUTTONS | event::SESSION_EXPIRED);
        self.session_timer.arm_once(self.timings.max_session);

        let mut out_of_range = 0u32;
        let end = loop {
            self.apply_config_updates().await?;

            let pressed = self.poll_press().await;
            if pressed.contains(event::LONG_PRESS) {
                warn!("Long press while unlocked: forcing host shutdown");
                self.peripherals.host.signal_forced_shutdown().await?;
                self.quiesce_host_surface().await?;
                return Ok(Transition::Reboot(RebootReason::LongPress));
            }
            if pressed.contains(event::SHORT_PRESS) {
                self.peripherals.host.pulse_power_button().await?;
            }

            let in_range = self.peripherals.proximity.in_range().await?;
            if in_range {
                out_of_range = 0;
            } else {
                out_of_range += 1;
                debug!("Keyfob out of range ({} consecutive)", out_of_range);
                if out_of_range >= self.timings.out_of_range_threshold {
                    break SessionEnd::ProximityLost;
                }
            }

            if in_range {
                let request = self
                    .bundle
                    .host_requests
                    .recv_timeout(self.timings.host_poll)
                    .await?;
                if let Some(request) = request {
                    if let Some(reason) = self.serve_host_request(request).await? {
                        self.quiesce_host_surface().await?;
                        return Ok(Transition::Reboot(reason));
                    }
                }
            }

            let fired = self
                .bundle
                .events
                .take(event::SEED_ADVANCE | event::SESSION_EXPIRED);
            if fired.contains(event::SEED_ADVANCE) {
                if let Some(broadcast) = self.broadcast.as_mut() {
                    let seed = broadcast.advance();
                    self.peripherals.proximity.update_seed(seed).await?;
                }
            }
            if fired.contains(event::SESSION_EXPIRED) {
                break SessionEnd::SessionExpired;
            }
        };

        warn!("Unlocked session ended: {:?}", end);
        self.show(Screen::ProximityLock).await?;
        self.quiesce_host_surface().await?;
        self.apply_host_action().await
    }

    /// Disable host I/O and stop both session timers
    async fn quiesce_host_surface(&mut self) -> Result<()> {
        self.peripherals.host.set_io_enabled(false).await?;
        self.stop_timers();
        self.bundle
            .events
            .clear(event::SEED_ADVANCE | event::SESSION_EXPIRED);
        Ok(())
    }

    /// Act on the configured host action after proximity loss
    async fn apply_host_action(&mut self) -> Result<Transition> {
        let host = self.peripherals.host.clone();
        match self.bundle.user_config.host_action() {
            Ok(HostAction::NoChange) => {}
            Ok(HostAction::Standby) => {
                host.request_standby().await?;
                let acked = poll_bounded(self.timings.standby_ack, || {
                    let host = host.clone();
                    async move { host.is_standby().await }
                })
                .await?;
                if !acked {
                    warn!("Host did not acknowledge standby");
                }
            }
            Ok(HostAction::Shutdown) => {
                host.request_power_down().await?;
                let off = poll_bounded(self.timings.power_off_ack, || {
                    let host = host.clone();
                    async move { Ok(!host.is_powered().await?) }
                })
                .await?;
                if !off {
                    warn!("Host ignored power-down request, cutting power");
                }
                host.force_power_off().await?;
            }
            Err(e) => {
                error!("Unknown host action mode: {}", e);
                host.force_power_off().await?;
                return Ok(Transition::Reboot(RebootReason::InvalidHostAction));
            }
        }
        info!("Host action applied, entering proximity lock");
        Ok(Transition::Next(SecurityState::ProximityLock))
    }
}
