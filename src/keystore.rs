//! Per-session key store (C4): current key, previous key, and a bounded
//! history of prior generations, published as an immutable snapshot.
//!
//! Readers (`key_for`, `current_generation`) never observe a torn update:
//! a new generation becomes visible atomically via an [`arc_swap::ArcSwap`]
//! over an immutable [`KeyStoreState`], mirroring the single-writer /
//! optimistic-reader pattern used elsewhere in this codebase's hot-path
//! state (§4.4, §5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};

use crate::aead::AeadKey;
use crate::error::{CoreError, Result};
use crate::events::Notifier;
use crate::types::Gen;

/// One retained key generation.
#[derive(Clone)]
pub struct KeyEntry {
    pub generation: Gen,
    pub key: AeadKey,
    pub created_at: SystemTime,
}

/// Immutable snapshot of the store's state, swapped in atomically on every
/// write.
#[derive(Clone)]
struct KeyStoreState {
    current: Option<KeyEntry>,
    previous: Option<KeyEntry>,
    history: HashMap<Gen, AeadKey>,
    active: bool,
}

impl KeyStoreState {
    fn empty() -> Self {
        Self {
            current: None,
            previous: None,
            history: HashMap::new(),
            active: false,
        }
    }
}

/// Observable side effects of key store operations (§4.4).
#[derive(Debug, Clone)]
pub enum KeyStoreEvent {
    KeyGenerated { generation: Gen },
    KeySet { generation: Gen },
    KeyRotated { generation: Gen },
    KeyExpired { generation: Gen },
    Destroyed,
}

/// Owner of the session's AEAD key material (C4).
///
/// Writers (`generate`, `set`, `rotate`, `destroy`) build a new
/// [`KeyStoreState`] and swap it in; readers take a cheap `Arc` load and
/// never block a writer or see a half-updated state.
pub struct KeyStore {
    state: ArcSwap<KeyStoreState>,
    history_size: usize,
    destroyed: AtomicBool,
    pub events: Notifier<KeyStoreEvent>,
}

impl KeyStore {
    pub fn new(history_size: usize) -> Self {
        Self {
            state: ArcSwap::new(Arc::new(KeyStoreState::empty())),
            history_size,
            destroyed: AtomicBool::new(false),
            events: Notifier::new(),
        }
    }

    fn check_not_destroyed(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CoreError::Destroyed);
        }
        Ok(())
    }

    /// Draw a fresh key and advance `current`; the old `current` becomes
    /// `previous`. Returns the new generation.
    pub fn generate(&self) -> Result<Gen> {
        let next_gen = self.generate_internal()?;
        self.events.notify(&KeyStoreEvent::KeyGenerated { generation: next_gen });
        tracing::debug!(generation = %next_gen, "key generated");
        Ok(next_gen)
    }

    fn generate_internal(&self) -> Result<Gen> {
        self.check_not_destroyed()?;
        let key = AeadKey::generate()?;
        let state = self.state.load();
        let next_gen = state.current.as_ref().map(|e| e.generation.next()).unwrap_or(Gen(1));
        self.install(next_gen, key)?;
        Ok(next_gen)
    }

    /// Install externally provided key material at `gen` (e.g. a peer's
    /// key arriving over signaling).
    pub fn set(&self, key: AeadKey, gen: Gen) -> Result<()> {
        self.check_not_destroyed()?;
        self.install(gen, key)?;
        self.events.notify(&KeyStoreEvent::KeySet { generation: gen });
        tracing::debug!(generation = %gen, "key set");
        Ok(())
    }

    /// Import 32 raw key bytes at `gen`. Delegates to [`KeyStore::set`].
    pub fn import(&self, bytes: &[u8], gen: Gen) -> Result<()> {
        let key = AeadKey::import(bytes)?;
        self.set(key, gen)
    }

    /// Equivalent to [`KeyStore::generate`], additionally emitting
    /// `key-rotated` instead of `key-generated`.
    pub fn rotate(&self) -> Result<Gen> {
        let next_gen = self.generate_internal()?;
        self.events.notify(&KeyStoreEvent::KeyRotated { generation: next_gen });
        tracing::info!(generation = %next_gen, "key rotated");
        Ok(next_gen)
    }

    /// Build the next snapshot (new current, old current -> previous,
    /// history insert + eviction) and publish it atomically.
    fn install(&self, gen: Gen, key: AeadKey) -> Result<()> {
        let prev_state = self.state.load();
        let mut history = prev_state.history.clone();

        if self.history_size > 0 {
            history.insert(gen, key.clone());
        }

        let new_previous = prev_state.current.clone();
        let new_current = Some(KeyEntry {
            generation: gen,
            key,
            created_at: SystemTime::now(),
        });

        let mut expired = Vec::new();
        if self.history_size > 0 {
            // Eviction candidates exclude the generations current/previous
            // now occupy, so invariants 1 and 2 (current/previous always
            // present in history) can never be violated by eviction.
            let protected: std::collections::HashSet<Gen> = [Some(gen), new_previous.as_ref().map(|e| e.generation)]
                .into_iter()
                .flatten()
                .collect();

            while history.len() > self.history_size {
                let evict = history
                    .keys()
                    .filter(|g| !protected.contains(g))
                    .max_by_key(|g| gen.distance_from(**g))
                    .copied();
                match evict {
                    Some(g) => {
                        history.remove(&g);
                        expired.push(g);
                    }
                    None => break,
                }
            }
        }

        let new_state = KeyStoreState {
            current: new_current,
            previous: new_previous,
            history,
            active: true,
        };
        self.state.store(Arc::new(new_state));

        for g in expired {
            self.events.notify(&KeyStoreEvent::KeyExpired { generation: g });
        }
        Ok(())
    }

    /// Export the 32 raw bytes of the current key.
    pub fn export_current(&self) -> Result<[u8; 32]> {
        self.check_not_destroyed()?;
        let state = self.state.load();
        state
            .current
            .as_ref()
            .map(|e| e.key.export())
            .ok_or_else(|| CoreError::KeyNotFound(0))
    }

    /// Look up the key usable to decrypt a frame stamped with `gen`.
    ///
    /// Checks `current`, then `previous`, then the bounded history.
    pub fn key_for(&self, gen: Gen) -> Option<AeadKey> {
        if self.destroyed.load(Ordering::Acquire) {
            return None;
        }
        let state = self.state.load();
        if let Some(entry) = &state.current {
            if entry.generation == gen {
                return Some(entry.key.clone());
            }
        }
        if let Some(entry) = &state.previous {
            if entry.generation == gen {
                return Some(entry.key.clone());
            }
        }
        state.history.get(&gen).cloned()
    }

    /// The generation `current` is set to, or `None` if no key has ever
    /// been generated/set.
    pub fn current_generation(&self) -> Option<Gen> {
        self.state.load().current.as_ref().map(|e| e.generation)
    }

    /// SHA-256 fingerprint of the current key's raw bytes.
    pub fn fingerprint_current(&self) -> Result<[u8; 32]> {
        let bytes = self.export_current()?;
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(out)
    }

    /// Uppercase, colon-separated hex rendering of [`KeyStore::fingerprint_current`].
    pub fn formatted_fingerprint(&self) -> Result<String> {
        let fp = self.fingerprint_current()?;
        Ok(crate::ecdh::format_fingerprint(&fp, None))
    }

    /// Whether at least one key has ever been installed.
    pub fn is_active(&self) -> bool {
        self.state.load().active
    }

    /// Stop auto-rotation (if any), drop all key references, and release
    /// listeners. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.state.store(Arc::new(KeyStoreState::empty()));
        self.events.notify(&KeyStoreEvent::Destroyed);
        self.events.clear();
        tracing::info!("key store destroyed");
    }
}

#[cfg(feature = "runtime")]
mod rotation {
    use super::KeyStore;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    /// Background auto-rotation timer (§4.4), gated behind the `runtime`
    /// feature. Fires `rotate()` every `interval_ms` until the store is
    /// destroyed or the handle is dropped.
    pub struct RotationHandle {
        task: tokio::task::JoinHandle<()>,
    }

    impl RotationHandle {
        pub fn spawn(store: Arc<KeyStore>, interval_ms: u64) -> Self {
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
                loop {
                    ticker.tick().await;
                    if store.destroyed.load(Ordering::Acquire) {
                        break;
                    }
                    if store.rotate().is_err() {
                        break;
                    }
                }
            });
            Self { task }
        }

        /// Cancel the timer in O(1).
        pub fn cancel(self) {
            self.task.abort();
        }
    }
}

#[cfg(feature = "runtime")]
pub use rotation::RotationHandle;
