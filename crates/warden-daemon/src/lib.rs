//! Warden Daemon - Security orchestration for the Warden controller
//!
//! This crate provides:
//! - Signal and rendezvous channels binding the orchestrator to its tasks
//! - The security orchestrator state machine
//! - The persistent record store and the PIN retry/backoff store
//! - Peripheral collaborator traits and a bench simulator
//! - IPC server for host-link and bench traffic

pub mod bundle;
pub mod config;
pub mod error;
pub mod host_link;
pub mod ipc;
pub mod orchestrator;
pub mod pin;
pub mod platform;
pub mod poll;
pub mod rendezvous;
pub mod retry_store;
pub mod signal;
pub mod sim;
pub mod storage;
pub mod timer;

pub use bundle::ResourceBundle;
pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use host_link::HostLink;
pub use ipc::IpcServer;
pub use orchestrator::{Orchestrator, RebootReason};
pub use retry_store::RetryStore;
pub use storage::{FileStorage, MemoryStorage, Records, Storage};
