//! Error types for the Warden core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid security state value: {0}")]
    InvalidState(u8),

    #[error("Invalid host action mode: {0}")]
    InvalidHostAction(u8),

    #[error("Invalid privilege level: {0}")]
    InvalidPrivilege(u8),

    #[error("Keyfob table is full ({0} entries)")]
    KeyfobTableFull(usize),

    #[error("No enrolled keyfob at index {0}")]
    KeyfobNotFound(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
