//! End-to-end media-frame cryptographic core for real-time conferencing.
//!
//! For every outbound media frame this crate produces an authenticated
//! ciphertext carrying enough metadata to be decrypted by peers under an
//! evolving set of symmetric keys; for every inbound frame it recovers the
//! plaintext only if it is authentic, non-replayed, and encrypted under a
//! key the receiver currently holds.
//!
//! Leaves-first module order, matching the component table in the design
//! document:
//!
//! - [`aead`] — AES-256-GCM encrypt/decrypt (C1).
//! - [`ecdh`] — P-256 key agreement + HKDF-SHA256 derivation (C2).
//! - [`codec`] — on-wire frame layouts (C3).
//! - [`keystore`] — per-session key generations, bounded history (C4).
//! - [`replay`] — per-sender sliding-window replay defense (C5).
//! - [`processor`] — drives C1+C3+C4(+C5) on the media hot path (C6).
//! - [`session`] — connection/encryption lifecycle state machine (C7).
//!
//! Browser media-pipeline glue, signaling transport, peer-connection
//! negotiation and the participant roster are external collaborators, not
//! part of this core; see the crate-level design document.

pub mod aead;
pub mod codec;
pub mod config;
pub mod ecdh;
pub mod error;
pub mod events;
pub mod keystore;
pub mod processor;
pub mod replay;
pub mod session;
pub mod types;

pub use codec::{EncryptedFrame, EncryptedFrameWithSeq, FrameLayout};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use keystore::{KeyEntry, KeyStore, KeyStoreEvent};
pub use processor::{FrameProcessor, FrameStats, KeyProvider, ProcessorError};
pub use replay::{ReplayManager, ReplayState, SenderId};
pub use session::{ErrorPayload, SessionEvent, SessionMachine, SessionState, StateContext, TransitionOutcome};
pub use types::{Gen, Seq};
