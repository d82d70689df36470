//! Warden Core - Shared types and policy for the Warden security controller
//!
//! This crate provides the runtime-free building blocks of the controller:
//! the security state set, keyfob session data, user policy configuration,
//! the anti-bruteforce retry record and the host command vocabulary.

pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod keyfob;
pub mod retry;
pub mod state;

pub use config::{BleRange, HostAction, UserConfig};
pub use device::DeviceRecord;
pub use error::{Error, Result};
pub use host::{
    AcpiState, HostCommand, HostParseError, HostRequest, HostResponse, HostStatus, SecurityLevel,
};
pub use keyfob::{
    BleSeed, BroadcastSeed, KeyfobEntry, KeyfobSerial, KeyfobSession, KeyfobTable, Privilege,
    SeedIncrement,
};
pub use retry::{BackoffSchedule, RetryRecord};
pub use state::SecurityState;

/// Number of digits in a device PIN
pub const PIN_LENGTH: usize = 6;

/// Maximum number of keyfobs that can be enrolled at once
pub const MAX_KEYFOBS: usize = 4;

/// Length of the BLE broadcast seed in bytes
pub const SEED_LEN: usize = 16;

/// Length of the seed increment in bytes
pub const SEED_INCREMENT_LEN: usize = 4;

/// Length of a keyfob serial number in bytes
pub const SERIAL_LEN: usize = 4;
