//! IPC protocol types

use serde::{Deserialize, Serialize};

use warden_core::{HostRequest, HostResponse, UserConfig};

/// IPC request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Check if daemon is running
    Ping,

    /// Host command, answered by the orchestrator while unlocked
    Host { request: HostRequest },

    /// Replace the user configuration
    SetConfig { config: UserConfig },

    /// Bench: press the power button
    Press { long: bool },

    /// Bench: present a valid keyfob at the next reader operation
    PresentKeyfob { name: String, admin: bool },

    /// Bench: present a keyfob that fails authentication
    RejectKeyfob,

    /// Bench: move the keyfob in or out of range
    SetProximity { in_range: bool },

    /// Bench: shake the device
    Motion,

    /// Bench: type a PIN at the next prompt
    EnterPin { digits: String },

    /// Bench: provision the device PIN
    ProvisionPin { digits: String },

    /// Current device status
    Status,
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Success with no data
    Ok,

    /// Pong response
    Pong { version: String },

    /// Error response
    Error { message: String },

    /// Host command response
    Host { response: HostResponse },

    /// Device status
    Status {
        state: String,
        host_powered: bool,
        host_standby: bool,
        host_io_enabled: bool,
        screen: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::HostStatus;

    #[test]
    fn test_wire_format() {
        let request = IpcRequest::Host {
            request: HostRequest::new(0x15, 1).with_payload(vec![1, 0, 0, 0]),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""type":"Host""#));
        assert!(json.contains(r#""payload":"01000000""#));

        let response: IpcResponse = serde_json::from_str(
            r#"{"type":"Host","response":{"command":17,"sub_command":0,"status":"auth_failure","payload":""}}"#,
        )
        .unwrap();
        match response {
            IpcResponse::Host { response } => assert_eq!(response.status, HostStatus::AuthFailure),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
