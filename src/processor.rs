//! Frame processor (C6): drives the AEAD primitive, codec and key store on
//! every outbound/inbound frame, and optionally the replay filter when the
//! session has committed to the sequence-carrying wire layout (§4.6).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use crate::aead;
use crate::codec::{self, EncryptedFrame, EncryptedFrameWithSeq, FrameLayout};
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::replay::{ReplayDecision, ReplayManager, SenderId};
use crate::types::Gen;

/// What the processor needs from the key store, without depending on it
/// directly — a plain, non-blocking, thread-safe-for-read trait (§6).
pub trait KeyProvider: Send + Sync {
    /// The key to use for the next outbound frame, if any.
    fn encryption_key(&self) -> Option<crate::aead::AeadKey>;
    /// The key usable to decrypt a frame stamped with `gen`, if held.
    fn decryption_key(&self, gen: Gen) -> Option<crate::aead::AeadKey>;
    /// The generation `current` is set to; reported for telemetry even
    /// when no key has ever been installed (see [`crate::keystore::KeyStore::current_generation`]
    /// for the `Option` form this is derived from).
    fn current_generation(&self) -> Gen;
}

impl KeyProvider for crate::keystore::KeyStore {
    fn encryption_key(&self) -> Option<crate::aead::AeadKey> {
        self.current_generation().and_then(|g| self.key_for(g))
    }

    fn decryption_key(&self, gen: Gen) -> Option<crate::aead::AeadKey> {
        self.key_for(gen)
    }

    fn current_generation(&self) -> Gen {
        self.current_generation().unwrap_or(Gen(0))
    }
}

/// Blanket impl so a processor can be built over a borrowed key store
/// (`&KeyStore`) when the store's lifetime is managed elsewhere, e.g.
/// shared with the session state machine or a signaling task.
impl<T: KeyProvider + ?Sized> KeyProvider for &T {
    fn encryption_key(&self) -> Option<crate::aead::AeadKey> {
        (**self).encryption_key()
    }

    fn decryption_key(&self, gen: Gen) -> Option<crate::aead::AeadKey> {
        (**self).decryption_key(gen)
    }

    fn current_generation(&self) -> Gen {
        (**self).current_generation()
    }
}

/// Recoverable per-frame failures reported through [`FrameProcessor`]'s
/// error callback; never fatal to the session (§7).
#[derive(Debug, Clone)]
pub enum ProcessorError {
    Encryption,
    Decryption { generation: Option<Gen> },
    ReplayDetected { sequence: u32 },
}

/// Snapshot statistics returned by value (§4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameStats {
    pub frames_encrypted: u64,
    pub frames_decrypted: u64,
    pub frames_passed_through: u64,
    pub bytes_encrypted: u64,
    pub bytes_decrypted: u64,
    pub encryption_errors: u64,
    pub decryption_errors: u64,
    pub replays_rejected: u64,
    pub avg_encryption_micros: f64,
    pub avg_decryption_micros: f64,
    pub current_generation: u8,
}

#[derive(Default)]
struct Counters {
    frames_encrypted: AtomicU64,
    frames_decrypted: AtomicU64,
    frames_passed_through: AtomicU64,
    bytes_encrypted: AtomicU64,
    bytes_decrypted: AtomicU64,
    encryption_errors: AtomicU64,
    decryption_errors: AtomicU64,
    replays_rejected: AtomicU64,
}

/// Incremental-mean timing accumulator: `avg <- avg + (x - avg) / n`.
/// Kept exactly as the reference host computes it (§9) — avoids overflow
/// and is numerically adequate for per-frame timing.
struct RunningAverage {
    avg: RwLock<(f64, u64)>,
}

impl RunningAverage {
    fn new() -> Self {
        Self { avg: RwLock::new((0.0, 0)) }
    }

    fn record(&self, sample: f64) {
        let mut guard = self.avg.write();
        let (avg, n) = *guard;
        let n = n + 1;
        let new_avg = avg + (sample - avg) / n as f64;
        *guard = (new_avg, n);
    }

    fn value(&self) -> f64 {
        self.avg.read().0
    }
}

/// Drives C1+C3+C4(+C5) for one media stream (C6).
pub struct FrameProcessor<K: KeyProvider> {
    keys: K,
    config: CoreConfig,
    layout: FrameLayout,
    sender: SenderId,
    replay: Option<ReplayManager>,
    counters: Counters,
    encrypt_timing: RunningAverage,
    decrypt_timing: RunningAverage,
    on_error: Option<Box<dyn Fn(&ProcessorError) + Send + Sync>>,
}

impl<K: KeyProvider> FrameProcessor<K> {
    /// Construct a processor for the plain (no sequence number) layout.
    pub fn new(keys: K, config: CoreConfig) -> Self {
        Self {
            keys,
            replay: None,
            config,
            layout: FrameLayout::Plain,
            sender: 0,
            counters: Counters::default(),
            encrypt_timing: RunningAverage::new(),
            decrypt_timing: RunningAverage::new(),
            on_error: None,
        }
    }

    /// Construct a processor for the sequence-carrying layout, wiring in a
    /// replay filter for `sender`. A session committing to this layout
    /// MUST use it for the session's entire lifetime (§4.5).
    pub fn with_replay_protection(keys: K, config: CoreConfig, sender: SenderId) -> Self {
        let replay = ReplayManager::new(config.replay_window_size, config.replay_max_gap, true);
        Self {
            keys,
            replay: Some(replay),
            config,
            layout: FrameLayout::WithSequence,
            sender,
            counters: Counters::default(),
            encrypt_timing: RunningAverage::new(),
            decrypt_timing: RunningAverage::new(),
            on_error: None,
        }
    }

    pub fn set_error_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ProcessorError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    fn report_error(&self, error: ProcessorError) {
        tracing::warn!(?error, "frame processor error");
        if let Some(cb) = &self.on_error {
            cb(&error);
        }
    }

    /// Encrypt a plaintext frame into wire bytes.
    ///
    /// The sequence-carrying layout requires the caller to supply the next
    /// sequence number for this stream, since sequencing is the caller's
    /// concern (the codec/processor only carry and check it).
    pub fn encrypt_frame(&self, plaintext: &[u8], sequence: Option<u32>) -> Result<Vec<u8>> {
        let started = Instant::now();

        let key = match self.keys.encryption_key() {
            Some(k) => k,
            None => {
                if self.config.pass_through_when_no_key {
                    self.counters.frames_passed_through.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("no encryption key set, passing frame through");
                    return Ok(plaintext.to_vec());
                }
                return Err(CoreError::KeyNotFound(self.keys.current_generation().0));
            }
        };

        let nonce = aead::random_nonce()?;
        let body = match aead::encrypt(&key, nonce, plaintext) {
            Ok(b) => b,
            Err(e) => {
                self.counters.encryption_errors.fetch_add(1, Ordering::Relaxed);
                self.report_error(ProcessorError::Encryption);
                if self.config.pass_through_when_no_key {
                    return Ok(plaintext.to_vec());
                }
                return Err(e);
            }
        };

        let generation = self.keys.current_generation();
        let wire = match self.layout {
            FrameLayout::Plain => EncryptedFrame {
                generation,
                iv: nonce,
                body,
            }
            .serialize(),
            FrameLayout::WithSequence => {
                let sequence = sequence.ok_or(CoreError::InvalidFrame("sequence required for this layout"))?;
                EncryptedFrameWithSeq {
                    generation,
                    sequence: sequence.into(),
                    iv: nonce,
                    body,
                }
                .serialize()
            }
        };

        self.counters.frames_encrypted.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_encrypted.fetch_add(wire.len() as u64, Ordering::Relaxed);
        self.encrypt_timing.record(started.elapsed().as_micros() as f64);

        Ok(wire)
    }

    /// Decrypt wire bytes back into a plaintext frame, or `None` if the
    /// frame is dropped (missing key, replay, or an AEAD failure under
    /// `drop_on_decryption_error`).
    pub fn decrypt_frame(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        let started = Instant::now();

        let min_len = match self.layout {
            FrameLayout::Plain => crate::codec::MIN_FRAME_LEN,
            FrameLayout::WithSequence => crate::codec::MIN_FRAME_WITH_SEQ_LEN,
        };
        if bytes.len() < min_len {
            self.counters.frames_passed_through.fetch_add(1, Ordering::Relaxed);
            return Some(bytes.to_vec());
        }

        let (generation, sequence, iv, body): (Gen, Option<u32>, [u8; aead::NONCE_SIZE], Vec<u8>) = match self.layout
        {
            FrameLayout::Plain => {
                let frame = codec::EncryptedFrame::parse(bytes).ok()?;
                (frame.generation, None, frame.iv, frame.body)
            }
            FrameLayout::WithSequence => {
                let frame = codec::EncryptedFrameWithSeq::parse(bytes).ok()?;
                (frame.generation, Some(frame.sequence.0), frame.iv, frame.body)
            }
        };

        if let (Some(seq), Some(replay)) = (sequence, &self.replay) {
            if let ReplayDecision::Reject(_) = replay.check(self.sender, seq.into()) {
                self.counters.replays_rejected.fetch_add(1, Ordering::Relaxed);
                self.report_error(ProcessorError::ReplayDetected { sequence: seq });
                return None;
            }
        }

        let key = match self.keys.decryption_key(generation) {
            Some(k) => k,
            None => {
                self.counters.decryption_errors.fetch_add(1, Ordering::Relaxed);
                self.report_error(ProcessorError::Decryption { generation: Some(generation) });
                return None;
            }
        };

        match aead::decrypt(&key, iv, &body) {
            Ok(plaintext) => {
                self.counters.frames_decrypted.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes_decrypted.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                self.decrypt_timing.record(started.elapsed().as_micros() as f64);
                Some(plaintext)
            }
            Err(_) => {
                self.counters.decryption_errors.fetch_add(1, Ordering::Relaxed);
                self.report_error(ProcessorError::Decryption { generation: Some(generation) });
                if self.config.drop_on_decryption_error {
                    None
                } else {
                    Some(bytes.to_vec())
                }
            }
        }
    }

    /// A FIFO, per-stream adapter that applies `encrypt_frame` to each
    /// buffer in order. Any unexpected internal error forwards the input
    /// unchanged rather than breaking the pipeline.
    pub fn encrypt_stream<'a>(&'a self, frames: impl Iterator<Item = Vec<u8>> + 'a) -> impl Iterator<Item = Vec<u8>> + 'a {
        frames.map(move |frame| self.encrypt_frame(&frame, None).unwrap_or(frame))
    }

    /// A FIFO, per-stream adapter that applies `decrypt_frame` to each
    /// buffer in order, dropping frames the processor rejects.
    pub fn decrypt_stream<'a>(&'a self, frames: impl Iterator<Item = Vec<u8>> + 'a) -> impl Iterator<Item = Vec<u8>> + 'a {
        frames.filter_map(move |frame| self.decrypt_frame(&frame))
    }

    /// Point-in-time snapshot of this processor's counters.
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames_encrypted: self.counters.frames_encrypted.load(Ordering::Relaxed),
            frames_decrypted: self.counters.frames_decrypted.load(Ordering::Relaxed),
            frames_passed_through: self.counters.frames_passed_through.load(Ordering::Relaxed),
            bytes_encrypted: self.counters.bytes_encrypted.load(Ordering::Relaxed),
            bytes_decrypted: self.counters.bytes_decrypted.load(Ordering::Relaxed),
            encryption_errors: self.counters.encryption_errors.load(Ordering::Relaxed),
            decryption_errors: self.counters.decryption_errors.load(Ordering::Relaxed),
            replays_rejected: self.counters.replays_rejected.load(Ordering::Relaxed),
            avg_encryption_micros: self.encrypt_timing.value(),
            avg_decryption_micros: self.decrypt_timing.value(),
            current_generation: self.keys.current_generation().0,
        }
    }

    /// Reset all counters, preserving only `current_generation` from the
    /// key provider (§4.6).
    pub fn reset_stats(&self) {
        self.counters.frames_encrypted.store(0, Ordering::Relaxed);
        self.counters.frames_decrypted.store(0, Ordering::Relaxed);
        self.counters.frames_passed_through.store(0, Ordering::Relaxed);
        self.counters.bytes_encrypted.store(0, Ordering::Relaxed);
        self.counters.bytes_decrypted.store(0, Ordering::Relaxed);
        self.counters.encryption_errors.store(0, Ordering::Relaxed);
        self.counters.decryption_errors.store(0, Ordering::Relaxed);
        self.counters.replays_rejected.store(0, Ordering::Relaxed);
        *self.encrypt_timing.avg.write() = (0.0, 0);
        *self.decrypt_timing.avg.write() = (0.0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyStore;

    fn processor() -> FrameProcessor<KeyStore> {
        let keys = KeyStore::new(5);
        keys.generate().unwrap();
        FrameProcessor::new(keys, CoreConfig::default())
    }

    #[test]
    fn hello_aead_roundtrip() {
        // §8 scenario 1.
        let proc = processor();
        let wire = proc.encrypt_frame(b"hello", None).unwrap();
        assert_eq!(wire.len(), 5 + 1 + aead::NONCE_SIZE + aead::TAG_SIZE);
        let plaintext = proc.decrypt_frame(&wire).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn tamper_drops_frame_and_counts_error() {
        // §8 scenario 2.
        let proc = processor();
        let mut wire = proc.encrypt_frame(b"hello", None).unwrap();
        wire[20] ^= 0xFF;
        let result = proc.decrypt_frame(&wire);
        assert!(result.is_none());
        assert_eq!(proc.stats().decryption_errors, 1);
    }

    #[test]
    fn pass_through_when_no_key() {
        let keys = KeyStore::new(5);
        let proc = FrameProcessor::new(keys, CoreConfig::default());
        let wire = proc.encrypt_frame(b"plain", None).unwrap();
        assert_eq!(wire, b"plain");
        assert_eq!(proc.stats().frames_passed_through, 1);
    }

    #[test]
    fn fails_without_key_when_not_permissive() {
        let keys = KeyStore::new(5);
        let mut config = CoreConfig::default();
        config.pass_through_when_no_key = false;
        let proc = FrameProcessor::new(keys, config);
        assert!(proc.encrypt_frame(b"plain", None).is_err());
    }

    #[test]
    fn short_buffer_passes_through_decrypt() {
        let proc = processor();
        let short = vec![0u8; 5];
        let result = proc.decrypt_frame(&short).unwrap();
        assert_eq!(result, short);
        assert_eq!(proc.stats().frames_passed_through, 1);
    }

    #[test]
    fn rotation_keeps_in_flight_frame_decryptable() {
        // §8 scenario 3: encrypt under gen=1, rotate to gen=2 off the hot
        // path, and confirm the gen=1 frame still decrypts via "previous".
        let keys = KeyStore::new(5);
        keys.generate().unwrap();
        let proc = FrameProcessor::new(&keys, CoreConfig::default());

        let wire_gen1 = proc.encrypt_frame(b"frame one", None).unwrap();
        keys.rotate().unwrap();
        let wire_gen2 = proc.encrypt_frame(b"frame two", None).unwrap();

        assert_eq!(proc.decrypt_frame(&wire_gen1).unwrap(), b"frame one");
        assert_eq!(proc.decrypt_frame(&wire_gen2).unwrap(), b"frame two");
    }

    #[test]
    fn replay_protected_stream_rejects_replays() {
        let keys = KeyStore::new(5);
        keys.generate().unwrap();
        let proc = FrameProcessor::with_replay_protection(keys, CoreConfig::default(), 1);
        let wire = proc.encrypt_frame(b"seeded", Some(10)).unwrap();
        assert!(proc.decrypt_frame(&wire).is_some());
        assert!(proc.decrypt_frame(&wire).is_none());
        assert_eq!(proc.stats().replays_rejected, 1);
    }

    #[test]
    fn reset_stats_zeroes_counters() {
        let proc = processor();
        proc.encrypt_frame(b"hello", None).unwrap();
        proc.reset_stats();
        assert_eq!(proc.stats().frames_encrypted, 0);
    }

    #[test]
    fn streaming_adapters_preserve_fifo_order() {
        let proc = processor();
        let inputs: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8; 4]).collect();
        let encrypted: Vec<Vec<u8>> = proc.encrypt_stream(inputs.clone().into_iter()).collect();
        let decrypted: Vec<Vec<u8>> = proc.decrypt_stream(encrypted.into_iter()).collect();
        assert_eq!(decrypted, inputs);
    }
}
