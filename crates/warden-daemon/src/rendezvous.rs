//! Rendezvous channels
//!
//! Single-slot handoff of one payload per request/response cycle. A send
//! waits while the slot is occupied; a receive waits until it is filled.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{DaemonError, Result};

/// Create a named rendezvous channel
pub fn rendezvous<T>(name: &'static str) -> (RendezvousSender<T>, RendezvousReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (
        RendezvousSender { tx, name },
        RendezvousReceiver { rx, name },
    )
}

/// Sending half
#[derive(Debug)]
pub struct RendezvousSender<T> {
    tx: mpsc::Sender<T>,
    name: &'static str,
}

impl<T> Clone for RendezvousSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

impl<T> RendezvousSender<T> {
    /// Hand over `value`, waiting for the slot to free up
    pub async fn send(&self, value: T) -> Result<()> {
        self.tx
            .send(value)
            .await
            .map_err(|_| DaemonError::ChannelClosed(self.name))
    }

    /// Hand over `value`, waiting at most `timeout` for the slot
    pub async fn send_timeout(&self, value: T, timeout: Duration) -> Result<()> {
        match self.tx.send_timeout(value, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(DaemonError::Timeout),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(DaemonError::ChannelClosed(self.name))
            }
        }
    }
}

/// Receiving half
#[derive(Debug)]
pub struct RendezvousReceiver<T> {
    rx: mpsc::Receiver<T>,
    name: &'static str,
}

impl<T> RendezvousReceiver<T> {
    /// Wait for the next payload
    pub async fn recv(&mut self) -> Result<T> {
        self.rx
            .recv()
            .await
            .ok_or(DaemonError::ChannelClosed(self.name))
    }

    /// Wait at most `timeout` for the next payload; `Ok(None)` on timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<T>> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => Err(DaemonError::ChannelClosed(self.name)),
            Err(_) => Ok(None),
        }
    }

    /// Discard a stale payload left in the slot, if any
    pub fn reset(&mut self) -> bool {
        let mut discarded = false;
        while self.rx.try_recv().is_ok() {
            discarded = true;
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_handoff() {
        let (tx, mut rx) = rendezvous::<u32>("test");
        tokio::spawn(async move {
            tx.send(7).await.unwrap();
        });
        assert_eq!(rx.recv().await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_slot_blocks_second_send() {
        let (tx, mut rx) = rendezvous::<u32>("test");
        tx.send(1).await.unwrap();

        let second = tx.send_timeout(2, Duration::from_millis(100)).await;
        assert!(matches!(second, Err(DaemonError::Timeout)));

        assert_eq!(rx.recv().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_timeout_and_closed() {
        let (tx, mut rx) = rendezvous::<u32>("test");
        assert!(rx
            .recv_timeout(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());

        drop(tx);
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(10)).await,
            Err(DaemonError::ChannelClosed("test"))
        ));
    }

    #[tokio::test]
    async fn test_reset_discards_stale_payload() {
        let (tx, mut rx) = rendezvous::<u32>("test");
        tx.send(9).await.unwrap();
        assert!(rx.reset());
        assert!(!rx.reset());
    }
}
