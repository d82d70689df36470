//! Daemon socket
//!
//! The CLI reaches the device through a Unix domain socket. Each message
//! is one JSON object on one line; a connection may carry any number of
//! request/response pairs, answered in order. Host requests are relayed to
//! the orchestrator through the [`HostLink`](crate::HostLink); bench
//! requests drive the simulated peripherals directly.

mod client;
mod server;
mod types;

pub use client::IpcClient;
pub use server::IpcServer;
pub use types::{IpcRequest, IpcResponse};

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Write `message` as a single JSON line
async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}
