//! Host command dispatch while unlocked

use tracing::{debug, info, warn};

use warden_core::{
    AcpiState, Error as CoreError, HostCommand, HostRequest, HostResponse, HostStatus, KeyfobTable,
    SecurityLevel,
};

use super::{GateOutcome, Orchestrator, RebootReason};
use crate::error::{DaemonError, Result};
use crate::host_link::Envelope;
use crate::platform::Screen;
use crate::poll::poll_bounded;
use crate::signal::{event, keyfob_request, Signals};

/// Work left after the response went out
enum FollowUp {
    None,
    AwaitHostPowerOff,
}

const ASSOCIATION_OUTCOME: Signals = event::ASSOCIATION_SUCCESS
    .union(event::ASSOCIATION_FAILURE)
    .union(event::NOT_ADMIN)
    .union(event::DETECT_TIMEOUT)
    .union(event::ENTRY_FULL);

const DELETE_OUTCOME: Signals = event::DELETE_SUCCESS
    .union(event::DELETE_FAILURE)
    .union(event::NOT_ADMIN)
    .union(event::DETECT_TIMEOUT);

impl Orchestrator {
    /// Answer one host request. Returns a reboot reason when the command
    /// ends this boot.
    ///
    /// A fault while executing the command is still answered, with
    /// `UnknownFailure`, before it is propagated.
    pub(super) async fn serve_host_request(
        &mut self,
        envelope: Envelope<HostRequest>,
    ) -> Result<Option<RebootReason>> {
        let request = &envelope.body;
        let executed = match HostCommand::parse(request) {
            Ok(command) => {
                debug!("Host command: {:?}", command);
                self.execute(request, command).await
            }
            Err(e) => {
                warn!("Rejected host request: {}", e);
                Ok((HostResponse::ack(request, e.status()), FollowUp::None))
            }
        };

        let (response, follow_up) = match executed {
            Ok(answer) => answer,
            Err(fault) => {
                let response = HostResponse::ack(request, HostStatus::UnknownFailure);
                if let Err(e) = self.reply(envelope.reply(response)).await {
                    warn!("Could not report fault to host: {}", e);
                }
                return Err(fault);
            }
        };
        self.reply(envelope.reply(response)).await?;

        match follow_up {
            FollowUp::None => Ok(None),
            FollowUp::AwaitHostPowerOff => {
                let host = self.peripherals.host.clone();
                let off = poll_bounded(self.timings.power_off_ack, || {
                    let host = host.clone();
                    async move { Ok(!host.is_powered().await?) }
                })
                .await?;
                if !off {
                    warn!("Host did not power off after notification, cutting power");
                    host.force_power_off().await?;
                }
                Ok(Some(RebootReason::HostPoweredDown))
            }
        }
    }

    /// Hand a response to the host link. A link that stopped waiting does
    /// not collect it; the stale response is dropped by exchange number.
    async fn reply(&self, response: Envelope<HostResponse>) -> Result<()> {
        match self
            .bundle
            .host_responses
            .send_timeout(response, self.timings.host_poll)
            .await
        {
            Ok(()) => Ok(()),
            Err(DaemonError::Timeout) => {
                warn!("Host link did not collect the response");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(
        &mut self,
        request: &HostRequest,
        command: HostCommand,
    ) -> Result<(HostResponse, FollowUp)> {
        let ack = |status| HostResponse::ack(request, status);
        let response = match command {
            HostCommand::EnrollKeyfob => ack(self.add_keyfob().await?),
            HostCommand::DeleteKeyfob { index } => {
                ack(self.delete_keyfob_entry(usize::from(index)).await?)
            }
            HostCommand::SecurityCheck(level) => ack(self.check_nfc_ble_pin(level).await?.status()),
            HostCommand::RegenerateRootOfTrust => {
                let outcome = self.check_nfc_ble_pin(SecurityLevel::ProximityPin).await?;
                if outcome == GateOutcome::Passed {
                    self.peripherals.root_of_trust.regenerate().await?;
                    info!("Root of trust regenerated");
                }
                ack(outcome.status())
            }
            HostCommand::DeviceState(state) => match state {
                AcpiState::S0 | AcpiState::Standby => {
                    debug!("Host reports {:?}", state);
                    ack(HostStatus::Success)
                }
                AcpiState::Hibernate | AcpiState::Shutdown => {
                    info!("Host reports {:?}, awaiting power-off", state);
                    return Ok((ack(HostStatus::Success), FollowUp::AwaitHostPowerOff));
                }
                AcpiState::Reset => {
                    ack(self.check_nfc_ble_pin(SecurityLevel::Proximity).await?.status())
                }
            },
            HostCommand::ListKeyfobs => {
                let table: KeyfobTable = self.records.read_or_default()?;
                let payload = serde_json::to_vec(table.entries())?;
                ack(HostStatus::Success).with_payload(payload)
            }
            HostCommand::GetTime => {
                let now = self.retry.now().await;
                ack(HostStatus::Success).with_payload(now.to_le_bytes().to_vec())
            }
            HostCommand::SetTime(seconds) => match self.retry.set_clock(seconds).await {
                Ok(()) => {
                    info!("Clock set to {}", seconds);
                    ack(HostStatus::Success)
                }
                Err(DaemonError::Clock(e)) => {
                    warn!("Clock rewrite failed: {}", e);
                    ack(HostStatus::RtcFailure)
                }
                Err(e) => return Err(e),
            },
        };
        Ok((response, FollowUp::None))
    }

    /// Associate a new keyfob and record it in the enrolled table
    async fn add_keyfob(&mut self) -> Result<HostStatus> {
        self.bundle.keyfob_sessions.reset();
        self.bundle.events.clear(ASSOCIATION_OUTCOME);
        self.show(Screen::Enrolling).await?;
        self.bundle.keyfob_requests.set(keyfob_request::ASSOCIATE);

        let outcome = self
            .bundle
            .events
            .take_any(ASSOCIATION_OUTCOME, Some(self.timings.host_keyfob_wait))
            .await;

        let status = if outcome.contains(event::ASSOCIATION_SUCCESS) {
            match self.receive_session().await? {
                Some(session) => {
                    let mut table: KeyfobTable = self.records.read_or_default()?;
                    match table.enroll(session.entry()) {
                        Ok(index) => {
                            self.records.write(&table)?;
                            info!("Enrolled keyfob {} at index {}", session.name, index);
                            HostStatus::Success
                        }
                        Err(CoreError::KeyfobTableFull(_)) => HostStatus::MemoryFailure,
                        Err(e) => return Err(e.into()),
                    }
                }
                None => HostStatus::UnknownFailure,
            }
        } else if outcome.contains(event::ENTRY_FULL) {
            HostStatus::MemoryFailure
        } else if outcome.intersects(event::ASSOCIATION_FAILURE | event::NOT_ADMIN) {
            HostStatus::AuthFailure
        } else {
            if outcome.is_empty() {
                self.stop_keyfob().await;
            }
            HostStatus::Timeout
        };

        if status != HostStatus::Success {
            self.bundle.keyfob_sessions.reset();
            warn!("Keyfob enrollment failed: {:?}", status);
        }
        self.show(Screen::Unlocked).await?;
        Ok(status)
    }

    /// Remove the enrolled keyfob at `index`, after admin confirmation
    async fn delete_keyfob_entry(&mut self, index: usize) -> Result<HostStatus> {
        let mut table: KeyfobTable = self.records.read_or_default()?;
        if index >= table.len() {
            return Ok(HostStatus::Invalid);
        }

        self.bundle.keyfob_sessions.reset();
        self.bundle.events.clear(DELETE_OUTCOME);
        self.show(Screen::PresentKeyfob).await?;
        self.bundle.keyfob_requests.set(keyfob_request::DELETE_ENTRY);

        let outcome = self
            .bundle
            .events
            .take_any(DELETE_OUTCOME, Some(self.timings.host_keyfob_wait))
            .await;

        let status = if outcome.contains(event::DELETE_SUCCESS) {
            let removed = table.remove(index)?;
            self.records.write(&table)?;
            info!("Deleted keyfob {} from index {}", removed.name, index);
            HostStatus::Success
        } else if outcome.intersects(event::DELETE_FAILURE | event::NOT_ADMIN) {
            HostStatus::AuthFailure
        } else {
            if outcome.is_empty() {
                self.stop_keyfob().await;
            }
            HostStatus::Timeout
        };

        if status != HostStatus::Success {
            self.bundle.keyfob_sessions.reset();
        }
        self.show(Screen::Unlocked).await?;
        Ok(status)
    }
}
