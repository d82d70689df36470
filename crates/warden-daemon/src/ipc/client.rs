//! Client end of the daemon socket

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;

use crate::error::{DaemonError, Result};

use super::types::{IpcRequest, IpcResponse};
use super::write_line;

/// One request per connection.
///
/// No read timeout is applied: a host exchange legitimately takes as long
/// as the device needs to collect a keyfob and a PIN.
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
                    DaemonError::NotRunning(self.socket_path.clone())
                }
                _ => DaemonError::Ipc(format!(
                    "Failed to connect to {}: {}",
                    self.socket_path.display(),
                    e
                )),
            })
    }

    /// Send `request` and read the daemon's answer
    pub async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, request).await?;

        let mut line = String::new();
        if BufReader::new(reader).read_line(&mut line).await? == 0 {
            return Err(DaemonError::Ipc(
                "Daemon closed the connection without answering".to_string(),
            ));
        }
        Ok(serde_json::from_str(&line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_missing_socket_means_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.sock");
        let client = IpcClient::new(path.clone());

        match client.request(&IpcRequest::Ping).await {
            Err(DaemonError::NotRunning(reported)) => assert_eq!(reported, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hangup_without_answer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await.unwrap();
        });

        let client = IpcClient::new(path);
        assert!(matches!(
            client.request(&IpcRequest::Status).await,
            Err(DaemonError::Ipc(_))
        ));
    }
}
