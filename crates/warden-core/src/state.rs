//! Security states of the orchestrator

use std::fmt;

use crate::error::{Error, Result};

/// The orchestrator's control variable.
///
/// Exactly one state is active at a time. Raw values arriving from outside
/// the orchestrator go through [`SecurityState::try_from`]; a value outside
/// the set is corruption and must route to [`SecurityState::Fatal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SecurityState {
    Locked = 0,
    NfcAuth = 1,
    LeAliveCheck = 2,
    AccessDenial = 3,
    HostPowerOn = 4,
    ProximityError = 5,
    Unlocked = 6,
    ProximityLock = 7,
    DeviceMotion = 8,
    ReLeAliveCheck = 9,
    ReNfcAuth = 10,
    Fatal = 11,
}

impl SecurityState {
    /// Every state, in discriminant order
    pub const ALL: [SecurityState; 12] = [
        SecurityState::Locked,
        SecurityState::NfcAuth,
        SecurityState::LeAliveCheck,
        SecurityState::AccessDenial,
        SecurityState::HostPowerOn,
        SecurityState::ProximityError,
        SecurityState::Unlocked,
        SecurityState::ProximityLock,
        SecurityState::DeviceMotion,
        SecurityState::ReLeAliveCheck,
        SecurityState::ReNfcAuth,
        SecurityState::Fatal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SecurityState::Locked => "locked",
            SecurityState::NfcAuth => "nfc-auth",
            SecurityState::LeAliveCheck => "le-alive-check",
            SecurityState::AccessDenial => "access-denial",
            SecurityState::HostPowerOn => "host-power-on",
            SecurityState::ProximityError => "proximity-error",
            SecurityState::Unlocked => "unlocked",
            SecurityState::ProximityLock => "proximity-lock",
            SecurityState::DeviceMotion => "device-motion",
            SecurityState::ReLeAliveCheck => "re-le-alive-check",
            SecurityState::ReNfcAuth => "re-nfc-auth",
            SecurityState::Fatal => "fatal",
        }
    }
}

impl TryFrom<u8> for SecurityState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(Error::InvalidState(value))
    }
}

impl fmt::Display for SecurityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_values_match_discriminants() {
        for state in SecurityState::ALL {
            assert_eq!(SecurityState::try_from(state as u8).unwrap(), state);
        }
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        assert_eq!(SecurityState::try_from(12), Err(Error::InvalidState(12)));
        assert_eq!(SecurityState::try_from(0xFF), Err(Error::InvalidState(0xFF)));
    }
}
