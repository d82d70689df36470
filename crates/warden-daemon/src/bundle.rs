//! Shared resource bundle
//!
//! Every channel between the orchestrator and its collaborators is created
//! here, once, at boot. The orchestrator keeps the [`ResourceBundle`];
//! each collaborator receives only the handles it needs.

use tokio::sync::{mpsc, watch};

use warden_core::{HostRequest, HostResponse, KeyfobSession, UserConfig};

use crate::host_link::Envelope;
use crate::pin::PinResponse;
use crate::rendezvous::{rendezvous, RendezvousReceiver, RendezvousSender};
use crate::signal::{event, SignalChannel};

/// Config snapshots queued by the host link before the orchestrator applies them
const CONFIG_QUEUE_DEPTH: usize = 4;

/// Orchestrator-owned half of every channel, plus its policy fields
pub struct ResourceBundle {
    /// Requests to the keyfob task
    pub keyfob_requests: SignalChannel,
    /// Outcomes from every collaborator
    pub events: SignalChannel,
    /// Requests to the PIN-entry task
    pub pin_requests: SignalChannel,
    pub pin_responses: RendezvousReceiver<PinResponse>,
    pub keyfob_sessions: RendezvousReceiver<KeyfobSession>,
    pub host_requests: RendezvousReceiver<Envelope<HostRequest>>,
    pub host_responses: RendezvousSender<Envelope<HostResponse>>,
    /// Config snapshots written by the host
    pub config_updates: mpsc::Receiver<UserConfig>,
    /// Current policy, as last loaded or applied
    pub user_config: UserConfig,
    pub motion: MotionControl,
}

impl ResourceBundle {
    /// Create every channel and split off the collaborator handles
    pub fn bootstrap() -> (ResourceBundle, Collaborators) {
        let keyfob_requests = SignalChannel::new();
        let events = SignalChannel::new();
        let pin_requests = SignalChannel::new();

        let (pin_tx, pin_rx) = rendezvous("pin_response");
        let (session_tx, session_rx) = rendezvous("keyfob_session");
        let (host_req_tx, host_req_rx) = rendezvous("host_request");
        let (host_resp_tx, host_resp_rx) = rendezvous("host_response");
        let (config_tx, config_rx) = mpsc::channel(CONFIG_QUEUE_DEPTH);
        let (motion_tx, motion_rx) = watch::channel(false);

        let bundle = ResourceBundle {
            keyfob_requests: keyfob_requests.clone(),
            events: events.clone(),
            pin_requests: pin_requests.clone(),
            pin_responses: pin_rx,
            keyfob_sessions: session_rx,
            host_requests: host_req_rx,
            host_responses: host_resp_tx,
            config_updates: config_rx,
            user_config: UserConfig::default(),
            motion: MotionControl { resumed: motion_tx },
        };

        let collaborators = Collaborators {
            keyfob: KeyfobHandles {
                requests: keyfob_requests,
                events: events.clone(),
                sessions: session_tx,
            },
            pin: PinHandles {
                requests: pin_requests,
                responses: pin_tx,
            },
            host: HostLinkHandles {
                requests: host_req_tx,
                responses: host_resp_rx,
                config: config_tx,
            },
            button: ButtonHandle {
                events: events.clone(),
            },
            motion: MotionHandles {
                events,
                resumed: motion_rx,
            },
        };

        (bundle, collaborators)
    }
}

/// Handles handed to the collaborator tasks at boot
pub struct Collaborators {
    pub keyfob: KeyfobHandles,
    pub pin: PinHandles,
    pub host: HostLinkHandles,
    pub button: ButtonHandle,
    pub motion: MotionHandles,
}

/// Resume/suspend control of the motion task
pub struct MotionControl {
    resumed: watch::Sender<bool>,
}

impl MotionControl {
    pub fn resume(&self) {
        self.resumed.send_replace(true);
    }

    pub fn suspend(&self) {
        self.resumed.send_replace(false);
    }
}

/// Handles for the keyfob task
pub struct KeyfobHandles {
    pub requests: SignalChannel,
    pub events: SignalChannel,
    pub sessions: RendezvousSender<KeyfobSession>,
}

/// Handles for the PIN-entry task
pub struct PinHandles {
    pub requests: SignalChannel,
    pub responses: RendezvousSender<PinResponse>,
}

/// Handles for the host-link task
pub struct HostLinkHandles {
    pub requests: RendezvousSender<Envelope<HostRequest>>,
    pub responses: RendezvousReceiver<Envelope<HostResponse>>,
    pub config: mpsc::Sender<UserConfig>,
}

/// Power-button task handle
#[derive(Clone)]
pub struct ButtonHandle {
    events: SignalChannel,
}

/// Length of a button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressKind {
    Short,
    Long,
}

impl ButtonHandle {
    pub fn press(&self, kind: PressKind) {
        let bit = match kind {
            PressKind::Short => event::SHORT_PRESS,
            PressKind::Long => event::LONG_PRESS,
        };
        self.events.set(bit);
    }
}

/// Handles for the motion task
#[derive(Clone)]
pub struct MotionHandles {
    events: SignalChannel,
    resumed: watch::Receiver<bool>,
}

impl MotionHandles {
    pub fn is_resumed(&self) -> bool {
        *self.resumed.borrow()
    }

    /// Report motion. Ignored while the task is suspended.
    pub fn report_motion(&self) -> bool {
        if !self.is_resumed() {
            return false;
        }
        self.events.set(event::MOTION);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_only_while_resumed() {
        let (bundle, collaborators) = ResourceBundle::bootstrap();

        assert!(!collaborators.motion.report_motion());
        assert!(bundle.events.get().is_empty());

        bundle.motion.resume();
        assert!(collaborators.motion.report_motion());
        assert!(bundle.events.get().contains(event::MOTION));

        bundle.motion.suspend();
        assert!(!collaborators.motion.is_resumed());
    }

    #[tokio::test]
    async fn test_collaborator_handles_share_the_bundle_channels() {
        let (mut bundle, collaborators) = ResourceBundle::bootstrap();

        collaborators.keyfob.events.set(event::AUTH_SUCCESS);
        assert!(bundle.events.get().contains(event::AUTH_SUCCESS));
        bundle.keyfob_requests.set(crate::signal::keyfob_request::DETECT);
        assert!(collaborators
            .keyfob
            .requests
            .get()
            .contains(crate::signal::keyfob_request::DETECT));

        bundle.pin_requests.set(crate::signal::pin_request::ENTER_PIN);
        assert!(!collaborators.pin.requests.get().is_empty());
        collaborators
            .pin
            .responses
            .send(PinResponse::cancelled())
            .await
            .unwrap();
        assert!(bundle.pin_responses.reset());

        let request = HostRequest::new(0x13, 0);
        collaborators
            .host
            .requests
            .send(Envelope { seq: 7, body: request })
            .await
            .unwrap();
        let received = bundle.host_requests.recv().await.unwrap();
        assert_eq!(received.seq, 7);

        collaborators.host.config.send(UserConfig::default()).await.unwrap();
        assert!(bundle.config_updates.try_recv().is_ok());
    }

    #[test]
    fn test_button_press_reaches_orchestrator() {
        let (bundle, collaborators) = ResourceBundle::bootstrap();
        collaborators.button.press(PressKind::Long);
        assert_eq!(bundle.events.take(event::BUTTONS), event::LONG_PRESS);
    }
}
