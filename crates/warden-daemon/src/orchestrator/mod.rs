//! Security orchestrator
//!
//! A finite-state loop with one handler per [`SecurityState`]. A handler
//! runs to completion and returns the next state (or a reboot request);
//! any error it returns is a storage, render or collaborator fault and
//! sends the machine to `Fatal`.

mod boot;
mod gate;
mod host_cmd;
mod lock;
mod unlocked;

use tokio::sync::watch;
use tracing::{debug, error, info};

use warden_core::{BroadcastSeed, SecurityState, UserConfig};

use crate::bundle::ResourceBundle;
use crate::config::Timings;
use crate::error::{DaemonError, Result};
use crate::platform::{Peripherals, Screen, SensorMode};
use crate::retry_store::RetryStore;
use crate::signal::{event, keyfob_request, Signals};
use crate::storage::Records;
use crate::timer::SignalTimer;

pub use gate::{GateOutcome, Lockout, PinOutcome};

/// Why the orchestrator asked for a device reboot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootReason {
    /// Emergency override by a long button press
    LongPress,
    /// The host hibernated or shut down
    HostPoweredDown,
    /// Motion was detected while proximity-locked
    MotionDetected,
    /// The persisted host action mode is not a known value
    InvalidHostAction,
}

/// Result of one state handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Next(SecurityState),
    Reboot(RebootReason),
}

pub struct Orchestrator {
    state: SecurityState,
    state_tx: watch::Sender<SecurityState>,
    bundle: ResourceBundle,
    peripherals: Peripherals,
    records: Records,
    retry: RetryStore,
    timings: Timings,
    seed_timer: SignalTimer,
    session_timer: SignalTimer,
    broadcast: Option<BroadcastSeed>,
    motion_restore: Option<SensorMode>,
}

impl Orchestrator {
    pub fn new(
        bundle: ResourceBundle,
        peripherals: Peripherals,
        records: Records,
        retry: RetryStore,
        timings: Timings,
    ) -> Self {
        let seed_timer = SignalTimer::new(bundle.events.clone(), event::SEED_ADVANCE);
        let session_timer = SignalTimer::new(bundle.events.clone(), event::SESSION_EXPIRED);
        let (state_tx, _) = watch::channel(SecurityState::Locked);
        Self {
            state: SecurityState::Locked,
            state_tx,
            bundle,
            peripherals,
            records,
            retry,
            timings,
            seed_timer,
            session_timer,
            broadcast: None,
            motion_restore: None,
        }
    }

    pub fn state(&self) -> SecurityState {
        self.state
    }

    /// Follow state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<SecurityState> {
        self.state_tx.subscribe()
    }

    pub fn user_config(&self) -> &UserConfig {
        &self.bundle.user_config
    }

    /// Whether both the seed-advance and the session timer are stopped
    pub fn timers_idle(&self) -> bool {
        !self.seed_timer.is_running() && !self.session_timer.is_running()
    }

    /// Force the current state from a raw value. A value outside the state
    /// set is corruption and lands in `Fatal`.
    pub fn enter(&mut self, raw: u8) {
        match SecurityState::try_from(raw) {
            Ok(state) => self.set_state(state),
            Err(e) => {
                error!("Refusing corrupt state value: {}", e);
                self.set_state(SecurityState::Fatal);
            }
        }
    }

    /// Run forever, returning only when the device must reboot
    pub async fn run(&mut self) -> RebootReason {
        info!("Security orchestrator starting in {}", self.state);
        loop {
            if let Some(reason) = self.step().await {
                return reason;
            }
        }
    }

    /// Run the handler of the current state once
    pub async fn step(&mut self) -> Option<RebootReason> {
        let current = self.state;
        let outcome = match self.apply_config_updates().await {
            Ok(()) => self.dispatch(current).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Transition::Next(next)) => {
                debug!("{} -> {}", current, next);
                self.set_state(next);
                None
            }
            Ok(Transition::Reboot(reason)) => {
                info!("{} requested device reboot: {:?}", current, reason);
                Some(reason)
            }
            Err(e) => {
                error!("Unrecoverable fault in {}: {}", current, e);
                self.set_state(SecurityState::Fatal);
                None
            }
        }
    }

    async fn dispatch(&mut self, state: SecurityState) -> Result<Transition> {
        match state {
            SecurityState::Locked => self.locked().await,
            SecurityState::NfcAuth => self.nfc_auth().await,
            SecurityState::LeAliveCheck => self.le_alive_check().await,
            SecurityState::AccessDenial => self.access_denial().await,
            SecurityState::HostPowerOn => self.host_power_on().await,
            SecurityState::ProximityError => self.proximity_error().await,
            SecurityState::Unlocked => self.unlocked().await,
            SecurityState::ProximityLock => self.proximity_lock().await,
            SecurityState::DeviceMotion => self.device_motion().await,
            SecurityState::ReLeAliveCheck => self.re_le_alive_check().await,
            SecurityState::ReNfcAuth => self.re_nfc_auth().await,
            SecurityState::Fatal => self.fatal().await,
        }
    }

    fn set_state(&mut self, state: SecurityState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Apply config snapshots written by the host, persisting each one
    async fn apply_config_updates(&mut self) -> Result<()> {
        while let Ok(config) = self.bundle.config_updates.try_recv() {
            self.records.write(&config)?;
            if config.ble_range != self.bundle.user_config.ble_range {
                self.peripherals.proximity.arm(config.ble_range).await?;
            }
            info!("Applied user config update: {:?}", config);
            self.bundle.user_config = config;
        }
        Ok(())
    }

    /// Show a mandatory screen; failing to render is a fault
    async fn show(&self, screen: Screen) -> Result<()> {
        self.peripherals
            .display
            .show(screen)
            .await
            .map_err(|e| DaemonError::Display(e.to_string()))
    }

    /// Non-blocking button poll with a bounded minimum wait.
    /// Clears the press bits it observes.
    async fn poll_press(&self) -> Signals {
        self.bundle
            .events
            .take_any(event::BUTTONS, Some(self.timings.press_poll))
            .await
    }

    /// Ask the keyfob task to abandon its current operation
    async fn stop_keyfob(&self) {
        self.bundle
            .keyfob_requests
            .clear(keyfob_request::ALL);
        self.bundle.keyfob_requests.set(keyfob_request::STOP_EXECUTION);
        let acked = self
            .bundle
            .events
            .take_any(event::STOP_SUCCESS, Some(self.timings.stop_ack))
            .await;
        if acked.is_empty() {
            debug!("Keyfob task did not acknowledge stop request");
        }
    }

    fn stop_timers(&mut self) {
        self.seed_timer.stop();
        self.session_timer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::DaemonConfig;
    use crate::sim::assemble;
    use crate::storage::MemoryStorage;

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_state_value_is_fatal() {
        let (mut orchestrator, _bench) =
            assemble(Arc::new(MemoryStorage::new()), &DaemonConfig::default());

        orchestrator.enter(SecurityState::Unlocked as u8);
        assert_eq!(orchestrator.state(), SecurityState::Unlocked);

        orchestrator.enter(42);
        assert_eq!(orchestrator.state(), SecurityState::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_fault_in_locked_is_fatal() {
        let storage = Arc::new(MemoryStorage::new());
        let (mut orchestrator, bench) = assemble(storage.clone(), &DaemonConfig::default());
        let mut states = orchestrator.subscribe();

        storage.fail_reads(true);
        assert!(orchestrator.step().await.is_none());
        assert_eq!(orchestrator.state(), SecurityState::Fatal);
        assert_eq!(*states.borrow_and_update(), SecurityState::Fatal);
        assert!(!bench.board().host_powered());
    }
}
