//! Daemon socket server

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

use warden_core::Privilege;

use crate::bundle::PressKind;
use crate::error::{DaemonError, Result};
use crate::sim::{fob_session, Bench, FobResponse};

use super::types::{IpcRequest, IpcResponse};
use super::write_line;

/// Serves host-link and bench requests against one bench device
pub struct IpcServer {
    socket_path: PathBuf,
    bench: Arc<Bench>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf, bench: Arc<Bench>) -> Self {
        Self { socket_path, bench }
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> Result<()> {
        let listener = bind(&self.socket_path)?;
        info!("IPC server listening on {}", self.socket_path.display());

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let bench = Arc::clone(&self.bench);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, bench).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => error!("Accept error: {}", e),
            }
        }
    }
}

/// Bind the socket, replacing one left behind by a previous boot
fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
        .map_err(|e| DaemonError::Ipc(format!("Failed to bind {}: {}", path.display(), e)))
}

async fn handle_connection(stream: UnixStream, bench: Arc<Bench>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                debug!("Received IPC request: {:?}", request);
                handle_request(request, &bench).await
            }
            Err(e) => IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            },
        };
        write_line(&mut writer, &response).await?;
    }
    Ok(())
}

/// Handle a single request
async fn handle_request(request: IpcRequest, bench: &Bench) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },

        IpcRequest::Host { request } => match bench.host_link().exchange(request).await {
            Ok(response) => IpcResponse::Host { response },
            Err(DaemonError::Timeout) => IpcResponse::Error {
                message: format!(
                    "Device is not accepting host commands (state: {})",
                    bench.state()
                ),
            },
            Err(e) => IpcResponse::Error {
                message: format!("Host exchange failed: {}", e),
            },
        },

        IpcRequest::SetConfig { config } => match bench.host_link().send_config(config).await {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::Error {
                message: format!("Failed to update config: {}", e),
            },
        },

        IpcRequest::Press { long } => {
            bench.press(if long { PressKind::Long } else { PressKind::Short });
            IpcResponse::Ok
        }

        IpcRequest::PresentKeyfob { name, admin } => {
            let privilege = if admin {
                Privilege::Admin
            } else {
                Privilege::User
            };
            bench.present(FobResponse::Accept(fob_session(&name, privilege)));
            IpcResponse::Ok
        }

        IpcRequest::RejectKeyfob => {
            bench.present(FobResponse::Reject);
            IpcResponse::Ok
        }

        IpcRequest::SetProximity { in_range } => {
            bench.set_in_range(in_range);
            IpcResponse::Ok
        }

        IpcRequest::Motion => {
            if bench.shake() {
                IpcResponse::Ok
            } else {
                IpcResponse::Error {
                    message: "Motion task is suspended".to_string(),
                }
            }
        }

        IpcRequest::EnterPin { digits } => match bench.enter_pin(&digits) {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::Error {
                message: e.to_string(),
            },
        },

        IpcRequest::ProvisionPin { digits } => match bench.provision_pin(&digits) {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::Error {
                message: format!("Provisioning failed: {}", e),
            },
        },

        IpcRequest::Status => {
            let board = bench.board();
            IpcResponse::Status {
                state: bench.state().to_string(),
                host_powered: board.host_powered(),
                host_standby: board.host_standby(),
                host_io_enabled: board.host_io_enabled(),
                screen: board.last_screen().map(|screen| format!("{:?}", screen)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::storage::MemoryStorage;
    use warden_core::SecurityState;

    #[tokio::test(start_paused = true)]
    async fn test_host_request_outside_unlocked_is_refused() {
        let mut config = DaemonConfig::default();
        config.timings.host_keyfob_wait = std::time::Duration::from_secs(1);
        let (_orchestrator, bench) = assemble_bench(&config);

        let response = handle_request(
            IpcRequest::Host {
                request: warden_core::HostRequest::new(0x14, 0),
            },
            &bench,
        )
        .await;
        match response {
            IpcResponse::Error { message } => assert!(message.contains("locked")),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_bad_pin() {
        let (_orchestrator, bench) = assemble_bench(&DaemonConfig::default());

        match handle_request(IpcRequest::Status, &bench).await {
            IpcResponse::Status { state, host_powered, .. } => {
                assert_eq!(state, SecurityState::Locked.to_string());
                assert!(!host_powered);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let response = handle_request(
            IpcRequest::EnterPin {
                digits: "12".to_string(),
            },
            &bench,
        )
        .await;
        assert!(matches!(response, IpcResponse::Error { .. }));
    }

    #[tokio::test]
    async fn test_provision_pin_writes_device_record() {
        let storage = Arc::new(MemoryStorage::new());
        let (_orchestrator, bench) =
            crate::sim::assemble(storage.clone(), &DaemonConfig::default());

        let bad = handle_request(
            IpcRequest::ProvisionPin {
                digits: "12x456".to_string(),
            },
            &bench,
        )
        .await;
        assert!(matches!(bad, IpcResponse::Error { .. }));

        let response = handle_request(
            IpcRequest::ProvisionPin {
                digits: "246810".to_string(),
            },
            &bench,
        )
        .await;
        assert!(matches!(response, IpcResponse::Ok));

        let records = crate::storage::Records::new(storage);
        let device: warden_core::DeviceRecord = records.read_required().unwrap();
        let hash = device.pin_hash.unwrap();
        let digits = crate::pin::parse_digits("246810").unwrap();
        assert!(crate::pin::verify_pin(&digits, &hash).unwrap());
    }

    fn assemble_bench(config: &DaemonConfig) -> (crate::orchestrator::Orchestrator, Bench) {
        crate::sim::assemble(Arc::new(MemoryStorage::new()), config)
    }
}
