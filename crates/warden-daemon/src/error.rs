//! Error types for the Warden daemon

use thiserror::Error;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon.
///
/// Security negatives (wrong PIN, failed keyfob auth, lost proximity) are
/// not errors; they travel as outcome values. Anything surfacing as a
/// `DaemonError` from a state handler sends the orchestrator to `Fatal`.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] warden_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted record could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record required by policy does not exist
    #[error("Record not found: {0}")]
    RecordNotFound(&'static str),

    /// A collaborator task dropped its end of a channel
    #[error("Collaborator channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Peripheral (host power, proximity, motion, root of trust) fault
    #[error("Peripheral error: {0}")]
    Peripheral(String),

    /// A mandatory screen could not be rendered
    #[error("Display error: {0}")]
    Display(String),

    /// Real-time clock fault
    #[error("Clock error: {0}")]
    Clock(String),

    /// PIN verifier error
    #[error("PIN verifier error: {0}")]
    Pin(String),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Nothing listens on the daemon socket
    #[error("Daemon not running at {}", .0.display())]
    NotRunning(std::path::PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}
