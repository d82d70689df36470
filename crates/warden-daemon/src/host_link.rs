//! Host link
//!
//! Host-facing end of the host request/response rendezvous. One exchange
//! is in flight at a time; configuration writes travel as whole snapshots
//! that the orchestrator applies and persists.
//!
//! Every request carries an exchange number and the orchestrator echoes it
//! on the response. A response that arrives after its exchange gave up is
//! recognised by its number and dropped, so it can never answer a later
//! request.

use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::debug;

use warden_core::{HostRequest, HostResponse, UserConfig};

use crate::bundle::HostLinkHandles;
use crate::error::{DaemonError, Result};
use crate::rendezvous::{RendezvousReceiver, RendezvousSender};

/// A host request or response tagged with its exchange number
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub seq: u64,
    pub body: T,
}

impl<T> Envelope<T> {
    /// Wrap `body` with the exchange number of `self`
    pub fn reply<U>(&self, body: U) -> Envelope<U> {
        Envelope { seq: self.seq, body }
    }
}

pub struct HostLink {
    exchange: Mutex<Exchange>,
    config: mpsc::Sender<UserConfig>,
    reply_timeout: Duration,
}

struct Exchange {
    next_seq: u64,
    requests: RendezvousSender<Envelope<HostRequest>>,
    responses: RendezvousReceiver<Envelope<HostResponse>>,
}

impl HostLink {
    pub fn new(handles: HostLinkHandles, reply_timeout: Duration) -> Self {
        Self {
            exchange: Mutex::new(Exchange {
                next_seq: 0,
                requests: handles.requests,
                responses: handles.responses,
            }),
            config: handles.config,
            reply_timeout,
        }
    }

    /// Send one request and wait for its response.
    ///
    /// Times out when the orchestrator is not accepting host commands
    /// (anything but `Unlocked` with the keyfob in range).
    pub async fn exchange(&self, request: HostRequest) -> Result<HostResponse> {
        let mut link = self.exchange.lock().await;
        if link.responses.reset() {
            debug!("Discarded late response from an abandoned exchange");
        }

        let seq = link.next_seq;
        link.next_seq = link.next_seq.wrapping_add(1);
        let deadline = Instant::now() + self.reply_timeout;

        link.requests
            .send_timeout(Envelope { seq, body: request }, self.reply_timeout)
            .await?;

        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let response = link
                .responses
                .recv_timeout(left)
                .await?
                .ok_or(DaemonError::Timeout)?;
            if response.seq == seq {
                return Ok(response.body);
            }
            debug!(
                "Dropped response to exchange {} while waiting for {}",
                response.seq, seq
            );
        }
    }

    /// Forward a new configuration snapshot
    pub async fn send_config(&self, config: UserConfig) -> Result<()> {
        self.config
            .send(config)
            .await
            .map_err(|_| DaemonError::ChannelClosed("config_update"))
    }
}
