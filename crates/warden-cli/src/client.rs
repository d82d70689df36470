//! Client for communicating with the Warden daemon

use std::path::PathBuf;

use warden_core::{HostCommand, HostRequest, HostResponse, HostStatus, KeyfobEntry, UserConfig};
use warden_daemon::ipc::{IpcClient, IpcRequest, IpcResponse};
use warden_daemon::DaemonConfig;

/// Client for the Warden daemon
pub struct WardenClient {
    inner: IpcClient,
}

/// Error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Device answered {0:?}")]
    Refused(HostStatus),

    #[error("Malformed response payload: {0}")]
    BadPayload(String),

    #[error("Daemon error: {0}")]
    DaemonError(String),
}

impl ClientError {
    fn from_daemon_error(e: warden_daemon::DaemonError) -> Self {
        match e {
            warden_daemon::DaemonError::NotRunning(_) => ClientError::DaemonNotRunning,
            e => ClientError::DaemonError(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Snapshot of the bench device
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub state: String,
    pub host_powered: bool,
    pub host_standby: bool,
    pub host_io_enabled: bool,
    pub screen: Option<String>,
}

impl WardenClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self {
            inner: IpcClient::new(DaemonConfig::default().ipc_socket_path),
        }
    }

    /// Create a new client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            inner: IpcClient::new(socket_path),
        }
    }

    async fn request(&self, request: IpcRequest) -> Result<IpcResponse> {
        match self
            .inner
            .request(&request)
            .await
            .map_err(ClientError::from_daemon_error)?
        {
            IpcResponse::Error { message } => Err(ClientError::RequestFailed(message)),
            response => Ok(response),
        }
    }

    /// Send a request that is answered with a bare `Ok`
    async fn command(&self, request: IpcRequest) -> Result<()> {
        match self.request(request).await? {
            IpcResponse::Ok => Ok(()),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Check if the daemon is running
    pub async fn ping(&self) -> Result<String> {
        match self.request(IpcRequest::Ping).await? {
            IpcResponse::Pong { version } => Ok(version),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Exchange a raw host request; the status is left to the caller
    pub async fn host_raw(&self, request: HostRequest) -> Result<HostResponse> {
        match self.request(IpcRequest::Host { request }).await? {
            IpcResponse::Host { response } => Ok(response),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }

    /// Issue a host command, failing unless the device answers success
    pub async fn host(&self, command: HostCommand) -> Result<HostResponse> {
        let response = self.host_raw(command.to_request()).await?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(ClientError::Refused(response.status))
        }
    }

    /// List the enrolled keyfobs
    pub async fn keyfobs(&self) -> Result<Vec<KeyfobEntry>> {
        let response = self.host(HostCommand::ListKeyfobs).await?;
        serde_json::from_slice(&response.payload)
            .map_err(|e| ClientError::BadPayload(e.to_string()))
    }

    /// Read the device clock
    pub async fn time(&self) -> Result<u32> {
        let response = self.host(HostCommand::GetTime).await?;
        let bytes: [u8; 4] = response.payload.as_slice().try_into().map_err(|_| {
            ClientError::BadPayload(format!("expected 4 bytes, got {}", response.payload.len()))
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Replace the user configuration
    pub async fn set_config(&self, config: UserConfig) -> Result<()> {
        self.command(IpcRequest::SetConfig { config }).await
    }

    /// Bench: press the power button
    pub async fn press(&self, long: bool) -> Result<()> {
        self.command(IpcRequest::Press { long }).await
    }

    /// Bench: queue a valid keyfob
    pub async fn present_keyfob(&self, name: &str, admin: bool) -> Result<()> {
        self.command(IpcRequest::PresentKeyfob {
            name: name.to_string(),
            admin,
        })
        .await
    }

    /// Bench: queue a keyfob that fails authentication
    pub async fn reject_keyfob(&self) -> Result<()> {
        self.command(IpcRequest::RejectKeyfob).await
    }

    /// Bench: move the keyfob in or out of range
    pub async fn set_proximity(&self, in_range: bool) -> Result<()> {
        self.command(IpcRequest::SetProximity { in_range }).await
    }

    /// Bench: shake the device
    pub async fn motion(&self) -> Result<()> {
        self.command(IpcRequest::Motion).await
    }

    /// Bench: type a PIN at the next prompt
    pub async fn enter_pin(&self, digits: &str) -> Result<()> {
        self.command(IpcRequest::EnterPin {
            digits: digits.to_string(),
        })
        .await
    }

    /// Bench: provision the device PIN
    pub async fn provision_pin(&self, digits: &str) -> Result<()> {
        self.command(IpcRequest::ProvisionPin {
            digits: digits.to_string(),
        })
        .await
    }

    /// Bench: current device status
    pub async fn status(&self) -> Result<DeviceStatus> {
        match self.request(IpcRequest::Status).await? {
            IpcResponse::Status {
                state,
                host_powered,
                host_standby,
                host_io_enabled,
                screen,
            } => Ok(DeviceStatus {
                state,
                host_powered,
                host_standby,
                host_io_enabled,
                screen,
            }),
            _ => Err(ClientError::RequestFailed(
                "Unexpected response".to_string(),
            )),
        }
    }
}

impl Default for WardenClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use warden_daemon::sim::assemble;
    use warden_daemon::{IpcServer, MemoryStorage};

    #[tokio::test]
    async fn test_daemon_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let client = WardenClient::with_socket_path(dir.path().join("absent.sock"));

        assert!(matches!(
            client.ping().await,
            Err(ClientError::DaemonNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_bench_roundtrip_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("warden.sock");

        let (_orchestrator, bench) =
            assemble(Arc::new(MemoryStorage::new()), &DaemonConfig::default());
        let server = IpcServer::new(socket.clone(), Arc::new(bench));
        tokio::spawn(async move { server.run().await });

        let client = WardenClient::with_socket_path(socket);
        let mut version = client.ping().await;
        for _ in 0..50 {
            if version.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            version = client.ping().await;
        }
        assert_eq!(version.unwrap(), env!("CARGO_PKG_VERSION"));

        client.press(false).await.unwrap();
        client.set_proximity(false).await.unwrap();

        let status = client.status().await.unwrap();
        assert_eq!(status.state, "locked");
        assert!(!status.host_powered);

        // Nothing listens for motion before a proximity lock
        assert!(matches!(
            client.motion().await,
            Err(ClientError::RequestFailed(_))
        ));
        assert!(matches!(
            client.enter_pin("12ab").await,
            Err(ClientError::RequestFailed(_))
        ));
    }
}
