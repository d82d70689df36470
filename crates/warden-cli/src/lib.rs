//! Warden CLI - Host-side tools for the Warden security controller
//!
//! This crate provides the client used by the `warden` binary to issue host
//! commands, write the user configuration and drive the bench device.

pub mod client;

pub use client::{ClientError, DeviceStatus, WardenClient};
