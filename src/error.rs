//! Stable error taxonomy for the media-frame crypto core.
//!
//! Every failure mode the core can produce is a variant here, each with a
//! stable `code()` string (for metrics/telemetry keyed by error type) and a
//! `recoverable()` flag callers can use to decide whether to keep driving
//! the session or tear it down.

use thiserror::Error;

/// Errors produced by the media-frame cryptographic core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("key generation failed")]
    KeyGenerationFailed,

    #[error("key exchange failed: {0}")]
    KeyExchangeFailed(String),

    #[error("no key for generation {0}")]
    KeyNotFound(u8),

    #[error("key for generation {0} has expired")]
    KeyExpired(u8),

    #[error("invalid key material: {0}")]
    InvalidKey(&'static str),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: invalid key, tampered ciphertext, or tampered nonce")]
    DecryptionFailed,

    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("replay detected for sequence {0}")]
    ReplayDetected(u32),

    #[error("operation attempted on a destroyed component")]
    Destroyed,

    #[error("transition rejected: no rule for this event in the current state")]
    InvalidTransition,
}

impl CoreError {
    /// Stable machine-readable code, suitable for metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::KeyGenerationFailed => "key-generation-failed",
            CoreError::KeyExchangeFailed(_) => "key-exchange-failed",
            CoreError::KeyNotFound(_) => "key-not-found",
            CoreError::KeyExpired(_) => "key-expired",
            CoreError::InvalidKey(_) => "invalid-key",
            CoreError::EncryptionFailed => "encryption-failed",
            CoreError::DecryptionFailed => "decryption-failed",
            CoreError::InvalidFrame(_) => "invalid-frame",
            CoreError::ReplayDetected(_) => "replay-detected",
            CoreError::Destroyed => "destroyed",
            CoreError::InvalidTransition => "invalid-transition",
        }
    }

    /// Whether the session can keep running after this error.
    ///
    /// Per-frame failures are always recoverable; a destroyed component is
    /// never recoverable for that instance.
    pub fn recoverable(&self) -> bool {
        !matches!(self, CoreError::Destroyed)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(CoreError::KeyNotFound(3).code(), "key-not-found");
        assert_eq!(CoreError::Destroyed.code(), "destroyed");
    }

    #[test]
    fn only_destroyed_is_unrecoverable() {
        assert!(!CoreError::Destroyed.recoverable());
        assert!(CoreError::DecryptionFailed.recoverable());
        assert!(CoreError::ReplayDetected(1).recoverable());
        assert!(CoreError::InvalidTransition.recoverable());
    }

    #[test]
    fn messages_carry_context() {
        let e = CoreError::KeyNotFound(42);
        assert!(e.to_string().contains("42"));
    }
}
