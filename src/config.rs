//! In-process tunables for the media-frame crypto core.
//!
//! The core has no CLI and no persisted state (§6); every long-lived
//! component takes its tunables through this struct instead of hardcoding
//! them, the way the reference host's config layer is consumed downstream.

/// Tunables for the key store, replay filter and frame processor.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum number of historical key generations retained alongside
    /// `current` and `previous`. `0` means no extra history: only
    /// `current` and `previous` are retrievable.
    pub history_size: usize,

    /// Replay filter sliding-window size (§4.5).
    pub replay_window_size: i64,

    /// Replay filter maximum forward gap before a sequence is rejected as
    /// "too far ahead".
    pub replay_max_gap: i64,

    /// If true, `encrypt_frame` returns plaintext unchanged when no key is
    /// set instead of failing.
    pub pass_through_when_no_key: bool,

    /// If true, `decrypt_frame` drops (returns `None`) on an AEAD failure
    /// instead of returning the ciphertext unchanged.
    pub drop_on_decryption_error: bool,

    /// Auto-rotation interval in milliseconds. `None` disables the
    /// background timer; callers must call `rotate()` manually.
    pub rotation_interval_ms: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_size: 5,
            replay_window_size: 1024,
            replay_max_gap: 2 * 1024,
            pass_through_when_no_key: true,
            drop_on_decryption_error: true,
            rotation_interval_ms: None,
        }
    }
}
