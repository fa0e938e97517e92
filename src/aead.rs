//! AES-256-GCM encrypt/decrypt over a byte buffer + 12-byte nonce (C1).
//!
//! A key is an opaque handle owned exclusively by the [`crate::keystore::KeyStore`];
//! everything in this module borrows it for the duration of one call.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CoreError, Result};

/// Authentication tag size for AES-256-GCM, in bytes.
pub const TAG_SIZE: usize = 16;
/// Nonce size for AES-256-GCM, in bytes.
pub const NONCE_SIZE: usize = NONCE_LEN;
/// Raw AEAD key size, in bytes.
pub const KEY_SIZE: usize = 32;

/// 32 bytes of AES-256-GCM key material.
///
/// Zeroizes its backing bytes on drop. Cloning is explicit (`Clone`) because
/// the key store is the only component allowed to hold long-lived copies;
/// processors borrow a reference for one operation instead of cloning.
#[derive(Clone)]
pub struct AeadKey(pub(crate) [u8; KEY_SIZE]);

impl AeadKey {
    /// Draw a fresh key from a cryptographically secure RNG.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill(&mut bytes)
            .map_err(|_| CoreError::KeyGenerationFailed)?;
        Ok(Self(bytes))
    }

    /// Import 32 raw bytes as key material.
    pub fn import(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::InvalidKey("expected 32 bytes"));
        }
        let mut buf = [0u8; KEY_SIZE];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Export the raw 32 bytes of key material.
    pub fn export(&self) -> [u8; KEY_SIZE] {
        self.0
    }

    fn to_ring_key(&self) -> Result<LessSafeKey> {
        let unbound =
            UnboundKey::new(&AES_256_GCM, &self.0).map_err(|_| CoreError::InvalidKey("bad key length"))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl PartialEq for AeadKey {
    /// Constant-time: key material must never be compared in a way that
    /// leaks timing information about how many leading bytes matched.
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

/// Draw a fresh 12-byte nonce from a cryptographically secure RNG.
///
/// Callers MUST NOT reuse a (key, nonce) pair; this core relies on the CSPRNG
/// and the birthday bound rather than a counter, matching the wire format's
/// per-frame random IV.
pub fn random_nonce() -> Result<[u8; NONCE_SIZE]> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; NONCE_SIZE];
    rng.fill(&mut bytes)
        .map_err(|_| CoreError::KeyGenerationFailed)?;
    Ok(bytes)
}

/// Encrypt `plaintext`, returning ciphertext with the 16-byte tag appended.
pub fn encrypt(key: &AeadKey, nonce: [u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let aead_key = key.to_ring_key()?;
    let mut in_out = plaintext.to_vec();
    aead_key
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
        .map_err(|_| {
            tracing::debug!(plaintext_len = plaintext.len(), "aead encrypt failed");
            CoreError::EncryptionFailed
        })?;
    Ok(in_out)
}

/// Decrypt `ciphertext_with_tag`, returning the plaintext on success.
///
/// Failure is indistinguishable whether the cause is a wrong key, a
/// tampered ciphertext, or a tampered nonce: `ring` collapses all of these
/// into a single opaque `Unspecified` error, which this function maps to
/// [`CoreError::DecryptionFailed`] without further inspection.
pub fn decrypt(key: &AeadKey, nonce: [u8; NONCE_SIZE], ciphertext_with_tag: &[u8]) -> Result<Vec<u8>> {
    if ciphertext_with_tag.len() < TAG_SIZE {
        return Err(CoreError::InvalidFrame("ciphertext shorter than GCM tag"));
    }
    let aead_key = key.to_ring_key()?;
    let mut in_out = ciphertext_with_tag.to_vec();
    let plaintext = aead_key
        .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
        .map_err(|_| {
            tracing::debug!(ciphertext_len = ciphertext_with_tag.len(), "aead decrypt failed");
            CoreError::DecryptionFailed
        })?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = AeadKey::generate().unwrap();
        let nonce = random_nonce().unwrap();
        let plaintext = b"hello voice data";
        let ct = encrypt(&key, nonce, plaintext).unwrap();
        assert_eq!(ct.len(), plaintext.len() + TAG_SIZE);
        let pt = decrypt(&key, nonce, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let key1 = AeadKey::generate().unwrap();
        let key2 = AeadKey::generate().unwrap();
        let nonce = random_nonce().unwrap();
        let ct = encrypt(&key1, nonce, b"secret").unwrap();
        assert!(decrypt(&key2, nonce, &ct).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = AeadKey::generate().unwrap();
        let nonce = random_nonce().unwrap();
        let mut ct = encrypt(&key, nonce, b"secret").unwrap();
        ct[0] ^= 0xFF;
        assert!(decrypt(&key, nonce, &ct).is_err());
    }

    #[test]
    fn tampered_nonce_fails() {
        let key = AeadKey::generate().unwrap();
        let nonce = random_nonce().unwrap();
        let ct = encrypt(&key, nonce, b"secret").unwrap();
        let mut other_nonce = nonce;
        other_nonce[0] ^= 0xFF;
        assert!(decrypt(&key, other_nonce, &ct).is_err());
    }

    #[test]
    fn import_rejects_wrong_length() {
        assert!(AeadKey::import(&[0u8; 31]).is_err());
        assert!(AeadKey::import(&[0u8; 33]).is_err());
        assert!(AeadKey::import(&[0u8; 32]).is_ok());
    }

    #[test]
    fn export_import_roundtrip() {
        let key = AeadKey::generate().unwrap();
        let bytes = key.export();
        let restored = AeadKey::import(&bytes).unwrap();
        assert!(key == restored);
    }

    #[test]
    fn nonce_uniqueness_statistical() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for _ in 0..20_000 {
            let n = random_nonce().unwrap();
            assert!(seen.insert(n), "nonce collision observed");
        }
    }
}
