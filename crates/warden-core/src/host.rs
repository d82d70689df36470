//! Host command vocabulary
//!
//! Requests carry a command tag, a sub-command tag and an opaque payload.
//! Every request the controller dequeues is answered with a response that
//! echoes both tags and carries a single status code.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command tags
pub mod tag {
    pub const ENROLL: u8 = 0x10;
    pub const SECURITY_CHECK: u8 = 0x11;
    pub const ROT_REGENERATE: u8 = 0x12;
    pub const DEVICE_STATE: u8 = 0x13;
    pub const KEYFOB_LIST: u8 = 0x14;
    pub const RTC: u8 = 0x15;
}

/// Sub-command tags
pub mod sub {
    pub const ENROLL_ADD: u8 = 0x00;
    pub const ENROLL_DELETE: u8 = 0x01;

    pub const RTC_GET: u8 = 0x00;
    pub const RTC_SET: u8 = 0x01;

    pub const STATE_S0: u8 = 0x00;
    pub const STATE_STANDBY: u8 = 0x03;
    pub const STATE_HIBERNATE: u8 = 0x04;
    pub const STATE_SHUTDOWN: u8 = 0x05;
    pub const STATE_RESET: u8 = 0x06;
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HostStatus {
    Success = 0x00,
    Invalid = 0x01,
    MemoryFailure = 0x02,
    UnknownFailure = 0x03,
    AuthFailure = 0x04,
    Timeout = 0x05,
    RtcInvalid = 0x06,
    RtcFailure = 0x07,
}

impl HostStatus {
    pub fn is_success(self) -> bool {
        self == HostStatus::Success
    }
}

/// Raw request as received from the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRequest {
    pub command: u8,
    pub sub_command: u8,
    #[serde(with = "hex_payload", default)]
    pub payload: Vec<u8>,
}

impl HostRequest {
    pub fn new(command: u8, sub_command: u8) -> Self {
        Self {
            command,
            sub_command,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Response returned to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResponse {
    pub command: u8,
    pub sub_command: u8,
    pub status: HostStatus,
    #[serde(with = "hex_payload", default)]
    pub payload: Vec<u8>,
}

impl HostResponse {
    /// Acknowledge `request` with `status` and no payload
    pub fn ack(request: &HostRequest, status: HostStatus) -> Self {
        Self {
            command: request.command,
            sub_command: request.sub_command,
            status,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Security check levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    /// Proximity and keyfob
    Proximity = 0,
    /// Proximity, keyfob and PIN; admin privilege required
    ProximityPin = 1,
}

impl SecurityLevel {
    pub fn requires_pin(self) -> bool {
        matches!(self, SecurityLevel::ProximityPin)
    }
}

/// ACPI-style device state notifications from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpiState {
    S0,
    Standby,
    Hibernate,
    Shutdown,
    Reset,
}

/// A decoded host command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    EnrollKeyfob,
    DeleteKeyfob { index: u8 },
    SecurityCheck(SecurityLevel),
    RegenerateRootOfTrust,
    DeviceState(AcpiState),
    ListKeyfobs,
    GetTime,
    SetTime(u32),
}

/// Why a request could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostParseError {
    #[error("Unknown command 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("Unknown sub-command 0x{sub:02x} for command 0x{command:02x}")]
    UnknownSubCommand { command: u8, sub: u8 },

    #[error("Malformed payload for command 0x{command:02x}: {reason}")]
    BadPayload { command: u8, reason: String },
}

impl HostParseError {
    /// Status reported to the host for this rejection
    pub fn status(&self) -> HostStatus {
        match self {
            HostParseError::BadPayload { command, .. } if *command == tag::RTC => {
                HostStatus::RtcInvalid
            }
            _ => HostStatus::Invalid,
        }
    }
}

impl HostCommand {
    /// Decode a raw request
    pub fn parse(request: &HostRequest) -> Result<Self, HostParseError> {
        let command = request.command;
        let unknown_sub = || HostParseError::UnknownSubCommand {
            command,
            sub: request.sub_command,
        };

        match command {
            tag::ENROLL => match request.sub_command {
                sub::ENROLL_ADD => Ok(HostCommand::EnrollKeyfob),
                sub::ENROLL_DELETE => match request.payload.as_slice() {
                    [index] => Ok(HostCommand::DeleteKeyfob { index: *index }),
                    _ => Err(HostParseError::BadPayload {
                        command,
                        reason: "expected a single index byte".to_string(),
                    }),
                },
                _ => Err(unknown_sub()),
            },
            tag::SECURITY_CHECK => match request.sub_command {
                0 => Ok(HostCommand::SecurityCheck(SecurityLevel::Proximity)),
                1 => Ok(HostCommand::SecurityCheck(SecurityLevel::ProximityPin)),
                _ => Err(unknown_sub()),
            },
            tag::ROT_REGENERATE => Ok(HostCommand::RegenerateRootOfTrust),
            tag::DEVICE_STATE => {
                let state = match request.sub_command {
                    sub::STATE_S0 => AcpiState::S0,
                    sub::STATE_STANDBY => AcpiState::Standby,
                    sub::STATE_HIBERNATE => AcpiState::Hibernate,
                    sub::STATE_SHUTDOWN => AcpiState::Shutdown,
                    sub::STATE_RESET => AcpiState::Reset,
                    _ => return Err(unknown_sub()),
                };
                Ok(HostCommand::DeviceState(state))
            }
            tag::KEYFOB_LIST => Ok(HostCommand::ListKeyfobs),
            tag::RTC => match request.sub_command {
                sub::RTC_GET => Ok(HostCommand::GetTime),
                sub::RTC_SET => {
                    let bytes: [u8; 4] = request.payload.as_slice().try_into().map_err(|_| {
                        HostParseError::BadPayload {
                            command,
                            reason: format!("expected 4 bytes, got {}", request.payload.len()),
                        }
                    })?;
                    Ok(HostCommand::SetTime(u32::from_le_bytes(bytes)))
                }
                _ => Err(unknown_sub()),
            },
            other => Err(HostParseError::UnknownCommand(other)),
        }
    }

    /// Encode as a raw request
    pub fn to_request(&self) -> HostRequest {
        match self {
            HostCommand::EnrollKeyfob => HostRequest::new(tag::ENROLL, sub::ENROLL_ADD),
            HostCommand::DeleteKeyfob { index } => {
                HostRequest::new(tag::ENROLL, sub::ENROLL_DELETE).with_payload(vec![*index])
            }
            HostCommand::SecurityCheck(level) => {
                HostRequest::new(tag::SECURITY_CHECK, *level as u8)
            }
            HostCommand::RegenerateRootOfTrust => HostRequest::new(tag::ROT_REGENERATE, 0),
            HostCommand::DeviceState(state) => {
                let sub = match state {
                    AcpiState::S0 => sub::STATE_S0,
                    AcpiState::Standby => sub::STATE_STANDBY,
                    AcpiState::Hibernate => sub::STATE_HIBERNATE,
                    AcpiState::Shutdown => sub::STATE_SHUTDOWN,
                    AcpiState::Reset => sub::STATE_RESET,
                };
                HostRequest::new(tag::DEVICE_STATE, sub)
            }
            HostCommand::ListKeyfobs => HostRequest::new(tag::KEYFOB_LIST, 0),
            HostCommand::GetTime => HostRequest::new(tag::RTC, sub::RTC_GET),
            HostCommand::SetTime(secs) => {
                HostRequest::new(tag::RTC, sub::RTC_SET).with_payload(secs.to_le_bytes().to_vec())
            }
        }
    }
}

/// Serde helper for opaque payloads as hex strings
mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
