//! Device (manufacturing) record

use serde::{Deserialize, Serialize};

use crate::keyfob::KeyfobSerial;

/// Persisted device identity and PIN verifier.
///
/// Written once at provisioning time; the controller only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device serial number
    pub serial: KeyfobSerial,

    /// PHC-format hash of the device PIN, if one has been provisioned
    pub pin_hash: Option<String>,

    /// Record format version
    pub version: u32,
}

impl DeviceRecord {
    pub fn new(serial: KeyfobSerial) -> Self {
        Self {
            serial,
            pin_hash: None,
            version: 1,
        }
    }

    pub fn with_pin_hash(mut self, hash: String) -> Self {
        self.pin_hash = Some(hash);
        self
    }
}
