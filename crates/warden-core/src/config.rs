//! User policy configuration
//!
//! Written by the host (through the host link) and read by the
//! orchestrator. The host action mode is kept as its raw persisted value
//! so that a corrupted record is detected where it is acted upon.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// BLE range class used for proximity decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BleRange {
    Near,
    #[default]
    Medium,
    Far,
}

/// What to do with the host when the keyfob leaves proximity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostAction {
    /// Leave the host running
    NoChange = 0,
    /// Put the host into standby
    Standby = 1,
    /// Shut the host down, cutting power if it does not comply
    Shutdown = 2,
}

impl TryFrom<u8> for HostAction {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(HostAction::NoChange),
            1 => Ok(HostAction::Standby),
            2 => Ok(HostAction::Shutdown),
            other => Err(Error::InvalidHostAction(other)),
        }
    }
}

/// Persisted user configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    /// BLE range class
    pub ble_range: BleRange,

    /// Raw host action mode on proximity loss (see [`HostAction`])
    pub host_action: u8,

    /// React to device motion while proximity-locked
    pub motion_reaction: bool,

    /// Require the PIN after keyfob authentication at boot
    pub ask_pin_on_boot: bool,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            ble_range: BleRange::default(),
            host_action: HostAction::Shutdown as u8,
            motion_reaction: true,
            ask_pin_on_boot: false,
        }
    }
}

impl UserConfig {
    /// Decode the host action mode
    pub fn host_action(&self) -> Result<HostAction> {
        HostAction::try_from(self.host_action)
    }

    pub fn with_host_action(mut self, action: HostAction) -> Self {
        self.host_action = action as u8;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UserConfig::default();
        assert_eq!(config.host_action().unwrap(), HostAction::Shutdown);
        assert!(config.motion_reaction);
        assert!(!config.ask_pin_on_boot);
    }

    #[test]
    fn test_unknown_host_action_is_reported() {
        let config = UserConfig {
            host_action: 9,
            ..Default::default()
        };
        assert_eq!(config.host_action(), Err(Error::InvalidHostAction(9)));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = UserConfig::default().with_host_action(HostAction::Standby);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: UserConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
