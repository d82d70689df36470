//! PIN hashing and verification

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use warden_core::PIN_LENGTH;

use crate::error::{DaemonError, Result};

/// How a PIN entry ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinStatus {
    Entered,
    Cancelled,
    TimedOut,
}

/// PIN-entry task reply. The digit buffer is wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PinResponse {
    digits: [u8; PIN_LENGTH],
    #[zeroize(skip)]
    status: PinStatus,
}

impl PinResponse {
    pub fn entered(digits: [u8; PIN_LENGTH]) -> Self {
        Self {
            digits,
            status: PinStatus::Entered,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            digits: [0; PIN_LENGTH],
            status: PinStatus::Cancelled,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            digits: [0; PIN_LENGTH],
            status: PinStatus::TimedOut,
        }
    }

    pub fn status(&self) -> PinStatus {
        self.status
    }

    pub fn digits(&self) -> &[u8; PIN_LENGTH] {
        &self.digits
    }
}

impl std::fmt::Debug for PinResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinResponse")
            .field("digits", &"[REDACTED]")
            .field("status", &self.status)
            .finish()
    }
}

/// Parse a digit string (`"123456"`) into a PIN buffer
pub fn parse_digits(pin: &str) -> Result<[u8; PIN_LENGTH]> {
    if pin.len() != PIN_LENGTH || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DaemonError::Pin(format!(
            "PIN must be exactly {} digits",
            PIN_LENGTH
        )));
    }
    let mut digits = [0u8; PIN_LENGTH];
    digits.copy_from_slice(pin.as_bytes());
    Ok(digits)
}

/// Hash a PIN with Argon2id, returning a PHC string
pub fn hash_pin(digits: &[u8; PIN_LENGTH]) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(digits, &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DaemonError::Pin(format!("Failed to hash PIN: {}", e)))
}

/// Check `digits` against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; only an unparseable stored hash is an error.
pub fn verify_pin(digits: &[u8; PIN_LENGTH], stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| DaemonError::Pin(format!("Invalid stored hash: {}", e)))?;
    Ok(Argon2::default().verify_password(digits, &parsed).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let pin = parse_digits("123456").unwrap();
        let hash = hash_pin(&pin).unwrap();

        assert!(verify_pin(&pin, &hash).unwrap());
        assert!(!verify_pin(&parse_digits("654321").unwrap(), &hash).unwrap());
    }

    #[test]
    fn test_corrupt_hash_is_error() {
        let pin = parse_digits("123456").unwrap();
        assert!(verify_pin(&pin, "not-a-phc-string").is_err());
    }

    #[test]
    fn test_parse_digits_rejects_bad_input() {
        assert!(parse_digits("12345").is_err());
        assert!(parse_digits("12345a").is_err());
        assert_eq!(parse_digits("000042").unwrap(), *b"000042");
    }
}
