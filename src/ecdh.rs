//! ECDH key agreement on P-256 and HKDF-SHA256 key derivation (C2).
//!
//! Ephemeral key pairs are generated per session; the private half is
//! modeled so it can only ever be consumed by [`PrivateKey::derive_shared`]
//! — there is no accessor for the raw scalar.

use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey as P256PublicKey};
use sha2::{Digest, Sha256};

use crate::aead::AeadKey;
use crate::error::{CoreError, Result};

/// Uncompressed SEC1 encoding length: `0x04 || X(32) || Y(32)`.
pub const PUBLIC_KEY_SIZE: usize = 65;
/// Raw ECDH shared secret length.
pub const SHARED_SECRET_SIZE: usize = 32;

/// An ephemeral P-256 key pair used for a single key-agreement round.
pub struct KeyPair {
    private: EphemeralSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh ephemeral key pair from the system CSPRNG.
    pub fn generate() -> Self {
        let private = EphemeralSecret::random(&mut rand_core::OsRng);
        let public = PublicKey(p256::PublicKey::from(&private));
        Self { private, public }
    }

    /// The public half, for sending to the peer.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Derive the 32-byte shared secret from the peer's public key.
    ///
    /// This is the only operation the private key exposes; it is consumed
    /// by reference and the scalar itself is never made available to callers.
    pub fn derive_shared(&self, remote_public: &PublicKey) -> [u8; SHARED_SECRET_SIZE] {
        let shared = self.private.diffie_hellman(&remote_public.0);
        let mut out = [0u8; SHARED_SECRET_SIZE];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }
}

/// A P-256 public key, serialized as uncompressed SEC1.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(P256PublicKey);

impl PublicKey {
    /// Serialize to the 65-byte uncompressed SEC1 form: `0x04 ‖ X(32) ‖ Y(32)`.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let encoded = self.0.to_encoded_point(false);
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out.copy_from_slice(encoded.as_bytes());
        out
    }

    /// Parse from the 65-byte uncompressed SEC1 form.
    ///
    /// Rejects any buffer that is not exactly 65 bytes, whose first byte is
    /// not `0x04`, or that does not decode to a point on the curve.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CoreError::InvalidKey("expected 65-byte uncompressed SEC1 point"));
        }
        if bytes[0] != 0x04 {
            return Err(CoreError::InvalidKey("expected uncompressed point tag 0x04"));
        }
        let encoded = EncodedPoint::from_bytes(bytes)
            .map_err(|_| CoreError::InvalidKey("malformed SEC1 encoding"))?;
        let opt: Option<P256PublicKey> = P256PublicKey::from_encoded_point(&encoded).into();
        let key = opt.ok_or(CoreError::InvalidKey("point is not on the P-256 curve"))?;
        Ok(Self(key))
    }
}

/// Derive a 32-byte AEAD key from a shared secret via HKDF-SHA256.
///
/// Uses a zero 32-byte salt; `info` provides domain separation — different
/// `info` values MUST (and do) yield different keys from the same secret.
pub fn derive_aead_key(shared_secret: &[u8; SHARED_SECRET_SIZE], info: &[u8]) -> Result<AeadKey> {
    let salt = [0u8; 32];
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| CoreError::KeyExchangeFailed("HKDF expand failed".into()))?;
    AeadKey::import(&okm)
}

/// SHA-256 fingerprint of a public key's SEC1 encoding.
pub fn fingerprint(public_key: &PublicKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(public_key.to_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Format a fingerprint as uppercase, colon-separated hex, optionally
/// truncated to the first `truncate` bytes.
pub fn format_fingerprint(fingerprint: &[u8], truncate: Option<usize>) -> String {
    let len = truncate.unwrap_or(fingerprint.len()).min(fingerprint.len());
    fingerprint[..len]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
