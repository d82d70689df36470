//! Keyfob session data and the enrolled keyfob table

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::{MAX_KEYFOBS, SEED_INCREMENT_LEN, SEED_LEN, SERIAL_LEN};

/// Privilege carried by a keyfob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    User,
    Admin,
}

impl Privilege {
    pub fn is_admin(self) -> bool {
        matches!(self, Privilege::Admin)
    }
}

impl TryFrom<u8> for Privilege {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Privilege::User),
            1 => Ok(Privilege::Admin),
            other => Err(Error::InvalidPrivilege(other)),
        }
    }
}

/// Keyfob serial number (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyfobSerial(pub [u8; SERIAL_LEN]);

impl KeyfobSerial {
    pub fn new(bytes: [u8; SERIAL_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SERIAL_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; SERIAL_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for KeyfobSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for KeyfobSerial {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for KeyfobSerial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// BLE broadcast seed (16 bytes), zeroized on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BleSeed([u8; SEED_LEN]);

impl BleSeed {
    pub fn new(bytes: [u8; SEED_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }

    /// Add `increment` to the seed in place.
    ///
    /// Both values are big-endian integers; the carry propagates across the
    /// whole seed and the result wraps modulo 2^128.
    pub fn advance(&mut self, increment: &SeedIncrement) {
        let seed = u128::from_be_bytes(self.0);
        let step = u32::from_be_bytes(increment.0) as u128;
        self.0 = seed.wrapping_add(step).to_be_bytes();
    }
}

impl fmt::Debug for BleSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BleSeed([redacted])")
    }
}

/// Per-keyfob seed increment (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedIncrement(pub [u8; SEED_INCREMENT_LEN]);

impl SeedIncrement {
    pub fn new(bytes: [u8; SEED_INCREMENT_LEN]) -> Self {
        Self(bytes)
    }
}

/// Session data produced by the keyfob task on successful detection or
/// association. Consumed once by the state that requested it.
#[derive(Debug, Clone)]
pub struct KeyfobSession {
    pub name: String,
    pub seed: BleSeed,
    pub increment: SeedIncrement,
    pub privilege: Privilege,
    pub serial: KeyfobSerial,
}

impl KeyfobSession {
    /// Identity kept in the enrolled keyfob table
    pub fn entry(&self) -> KeyfobEntry {
        KeyfobEntry {
            name: self.name.clone(),
            serial: self.serial,
            privilege: self.privilege,
        }
    }

    /// Keep only the part needed for periodic seed advancement
    pub fn into_broadcast(self) -> BroadcastSeed {
        BroadcastSeed {
            seed: self.seed,
            increment: self.increment,
        }
    }
}

/// Seed state retained by the orchestrator after a successful handshake
#[derive(Debug, Clone)]
pub struct BroadcastSeed {
    seed: BleSeed,
    increment: SeedIncrement,
}

impl BroadcastSeed {
    pub fn new(seed: BleSeed, increment: SeedIncrement) -> Self {
        Self { seed, increment }
    }

    pub fn seed(&self) -> &BleSeed {
        &self.seed
    }

    /// Advance to the next broadcast seed and return it
    pub fn advance(&mut self) -> &BleSeed {
        self.seed.advance(&self.increment);
        &self.seed
    }
}

/// One enrolled keyfob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyfobEntry {
    pub name: String,
    pub serial: KeyfobSerial,
    pub privilege: Privilege,
}

/// Table of enrolled keyfobs (persisted)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyfobTable {
    entries: Vec<KeyfobEntry>,
}

impl KeyfobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[KeyfobEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_KEYFOBS
    }

    /// Enroll a keyfob. Re-enrolling a known serial replaces its entry.
    pub fn enroll(&mut self, entry: KeyfobEntry) -> Result<usize> {
        if let Some(index) = self.entries.iter().position(|e| e.serial == entry.serial) {
            self.entries[index] = entry;
            return Ok(index);
        }
        if self.is_full() {
            return Err(Error::KeyfobTableFull(MAX_KEYFOBS));
        }
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    /// Remove the entry at `index`
    pub fn remove(&mut self, index: usize) -> Result<KeyfobEntry> {
        if index >= self.entries.len() {
            return Err(Error::KeyfobNotFound(index));
        }
        Ok(self.entries.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(serial: u8) -> KeyfobEntry {
        KeyfobEntry {
            name: format!("fob-{}", serial),
            serial: KeyfobSerial::new([serial; SERIAL_LEN]),
            privilege: Privilege::User,
        }
    }

    #[test]
    fn test_seed_advance_adds_increment() {
        let mut seed = BleSeed::new([0u8; SEED_LEN]);
        seed.advance(&SeedIncrement::new([0, 0, 1, 2]));
        let mut expected = [0u8; SEED_LEN];
        expected[14] = 1;
        expected[15] = 2;
        assert_eq!(seed.as_bytes(), &expected);
    }

    #[test]
    fn test_seed_advance_carries() {
        let mut bytes = [0u8; SEED_LEN];
        bytes[12..].copy_from_slice(&[0, 0xFF, 0xFF, 0xFF]);
        let mut seed = BleSeed::new(bytes);
        seed.advance(&SeedIncrement::new([0, 0, 0, 1]));

        let mut expected = [0u8; SEED_LEN];
        expected[12] = 1;
        assert_eq!(seed.as_bytes(), &expected);
    }

    #[test]
    fn test_seed_advance_wraps() {
        let mut seed = BleSeed::new([0xFF; SEED_LEN]);
        seed.advance(&SeedIncrement::new([0, 0, 0, 2]));
        let mut expected = [0u8; SEED_LEN];
        expected[15] = 1;
        assert_eq!(seed.as_bytes(), &expected);
    }

    #[test]
    fn test_broadcast_keeps_seed_and_increment() {
        let session = KeyfobSession {
            name: "alice".into(),
            seed: BleSeed::new([7u8; SEED_LEN]),
            increment: SeedIncrement::new([0, 0, 0, 1]),
            privilege: Privilege::Admin,
            serial: KeyfobSerial::new([1, 2, 3, 4]),
        };
        let mut broadcast = session.into_broadcast();
        assert_eq!(broadcast.seed().as_bytes(), &[7u8; SEED_LEN]);
        assert_eq!(broadcast.advance().as_bytes()[15], 8);
    }

    #[test]
    fn test_table_enroll_and_remove() {
        let mut table = KeyfobTable::new();
        assert_eq!(table.enroll(entry(1)).unwrap(), 0);
        assert_eq!(table.enroll(entry(2)).unwrap(), 1);

        let removed = table.remove(0).unwrap();
        assert_eq!(removed.serial, KeyfobSerial::new([1; SERIAL_LEN]));
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(5), Err(Error::KeyfobNotFound(5)));
    }

    #[test]
    fn test_table_capacity() {
        let mut table = KeyfobTable::new();
        for i in 0..MAX_KEYFOBS as u8 {
            table.enroll(entry(i)).unwrap();
        }
        assert!(table.is_full());
        assert_eq!(table.enroll(entry(99)), Err(Error::KeyfobTableFull(MAX_KEYFOBS)));

        // Re-enrolling a known keyfob still works on a full table
        assert_eq!(table.enroll(entry(0)).unwrap(), 0);
    }

    #[test]
    fn test_serial_serializes_as_hex() {
        let json = serde_json::to_string(&entry(0xAB)).unwrap();
        assert!(json.contains("\"abababab\""));
        let parsed: KeyfobEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry(0xAB));
    }
}
