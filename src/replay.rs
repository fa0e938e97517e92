//! Per-sender sliding-window replay filter (C5), multiplexed across senders
//! by a concurrent map so the receive path of one stream never locks out
//! another — the same sharded-state pattern this codebase's daemon-tier
//! components use instead of one global mutex (§4.5).

use std::collections::HashSet;

use dashmap::DashMap;

use crate::types::Seq;

/// Why [`ReplayState::check`] rejected a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooFarAhead,
    TooOld,
    Replay,
}

/// Outcome of a single `check(seq)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayDecision {
    Accept,
    Reject(RejectReason),
}

/// Snapshot statistics for one sender's window (§4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayStats {
    pub checked: u64,
    pub accepted: u64,
    pub replays: u64,
    pub too_old: u64,
    pub too_far_ahead: u64,
    pub highest: i64,
}

/// Sliding-window replay state for a single sender.
pub struct ReplayState {
    highest: i64,
    seen: HashSet<u32>,
    window_size: i64,
    max_gap: i64,
    wrap_enabled: bool,
    stats: ReplayStats,
}

impl ReplayState {
    pub fn new(window_size: i64, max_gap: i64, wrap_enabled: bool) -> Self {
        Self {
            highest: -1,
            seen: HashSet::new(),
            window_size,
            max_gap,
            wrap_enabled,
            stats: ReplayStats {
                highest: -1,
                ..Default::default()
            },
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(1024, 2 * 1024, true)
    }

    /// Decision procedure from §4.5.
    pub fn check(&mut self, seq: Seq) -> ReplayDecision {
        self.stats.checked += 1;

        if self.highest == -1 {
            self.highest = seq.0 as i64;
            self.stats.highest = self.highest;
            self.seen.insert(seq.0);
            self.stats.accepted += 1;
            return ReplayDecision::Accept;
        }

        let diff = seq.arc_distance(self.highest, self.wrap_enabled);

        if diff > self.max_gap {
            self.stats.too_far_ahead += 1;
            return ReplayDecision::Reject(RejectReason::TooFarAhead);
        }
        if diff < -self.window_size {
            self.stats.too_old += 1;
            return ReplayDecision::Reject(RejectReason::TooOld);
        }
        if self.seen.contains(&seq.0) {
            self.stats.replays += 1;
            return ReplayDecision::Reject(RejectReason::Replay);
        }

        self.seen.insert(seq.0);
        if diff > 0 {
            self.highest = seq.0 as i64;
            self.stats.highest = self.highest;
            let window_size = self.window_size;
            let wrap_enabled = self.wrap_enabled;
            let highest = self.highest;
            self.seen.retain(|s| Seq(*s).arc_distance(highest, wrap_enabled) >= -window_size);
        }
        self.stats.accepted += 1;
        ReplayDecision::Accept
    }

    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Zero all state, as if the sender were never seen.
    pub fn reset(&mut self) {
        self.highest = -1;
        self.seen.clear();
        self.stats = ReplayStats {
            highest: -1,
            ..Default::default()
        };
    }
}

/// Identifies the sender a replay window belongs to.
pub type SenderId = u64;

/// Multiplexes [`ReplayState`] across senders.
pub struct ReplayManager {
    window_size: i64,
    max_gap: i64,
    wrap_enabled: bool,
    states: DashMap<SenderId, ReplayState>,
}

impl ReplayManager {
    pub fn new(window_size: i64, max_gap: i64, wrap_enabled: bool) -> Self {
        Self {
            window_size,
            max_gap,
            wrap_enabled,
            states: DashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(1024, 2 * 1024, true)
    }

    /// Check `seq` against `sender`'s window, creating one if this is the
    /// first frame seen from that sender.
    pub fn check(&self, sender: SenderId, seq: Seq) -> ReplayDecision {
        let mut state = self
            .states
            .entry(sender)
            .or_insert_with(|| ReplayState::new(self.window_size, self.max_gap, self.wrap_enabled));
        state.check(seq)
    }

    pub fn stats(&self, sender: SenderId) -> Option<ReplayStats> {
        self.states.get(&sender).map(|s| s.stats())
    }

    pub fn reset(&self, sender: SenderId) {
        if let Some(mut state) = self.states.get_mut(&sender) {
            state.reset();
        }
    }

    pub fn reset_all(&self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_always_accepted() {
        let mut state = ReplayState::with_defaults();
        assert_eq!(state.check(Seq(2000)), ReplayDecision::Accept);
    }

    #[test]
    fn replay_window_scenario() {
        // §8 scenario 5.
        let mut state = ReplayState::with_defaults();
        assert_eq!(state.check(Seq(2000)), ReplayDecision::Accept);
        assert_eq!(state.check(Seq(500)), ReplayDecision::Reject(RejectReason::TooOld));
        assert_eq!(state.check(Seq(3000)), ReplayDecision::Accept);
        assert_eq!(state.check(Seq(2000)), ReplayDecision::Reject(RejectReason::Replay));
    }

    #[test]
    fn replay_idempotence() {
        let mut state = ReplayState::with_defaults();
        assert_eq!(state.check(Seq(10)), ReplayDecision::Accept);
        assert_eq!(state.check(Seq(10)), ReplayDecision::Reject(RejectReason::Replay));
        assert_eq!(state.stats().replays, 1);
    }

    #[test]
    fn too_far_ahead_rejected() {
        let mut state = ReplayState::new(1024, 2048, true);
        state.check(Seq(0));
        assert_eq!(state.check(Seq(5000)), ReplayDecision::Reject(RejectReason::TooFarAhead));
    }

    #[test]
    fn fifo_tolerance_any_permutation_accepted_once() {
        // §8: any permutation of [h-window+1 .. h] is accepted exactly once.
        // The highest value h is accepted first (it establishes `highest`
        // via the first-frame branch), then the rest of the window arrives
        // out of order.
        let mut state = ReplayState::new(1024, 2048, true);
        let window_size = 1024i64;
        let highest = 5000i64;
        let mut seqs: Vec<u32> = ((highest - window_size + 1)..=highest)
            .map(|s| s as u32)
            .collect();
        // Reordered (not strictly random) to exercise out-of-order delivery
        // without an extra proptest dependency in this unit test.
        seqs.reverse();

        let mut accepted = 0;
        for s in &seqs {
            if state.check(Seq(*s)) == ReplayDecision::Accept {
                accepted += 1;
            }
        }
        assert_eq!(accepted as i64, window_size);
        for s in &seqs {
            assert_eq!(state.check(Seq(*s)), ReplayDecision::Reject(RejectReason::Replay));
        }
    }

    #[test]
    fn reset_clears_state() {
        let mut state = ReplayState::with_defaults();
        state.check(Seq(100));
        state.reset();
        assert_eq!(state.stats().checked, 0);
        assert_eq!(state.check(Seq(5)), ReplayDecision::Accept);
    }

    #[test]
    fn manager_multiplexes_by_sender() {
        let manager = ReplayManager::with_defaults();
        assert_eq!(manager.check(1, Seq(10)), ReplayDecision::Accept);
        // sender 2 has an independent window; the same seq is a fresh "first frame".
        assert_eq!(manager.check(2, Seq(10)), ReplayDecision::Accept);
        assert_eq!(manager.check(1, Seq(10)), ReplayDecision::Reject(RejectReason::Replay));
    }

    #[test]
    fn wrap_around_accepts_sequence_after_u32_max() {
        let mut state = ReplayState::new(1024, 2048, true);
        state.check(Seq(u32::MAX - 2));
        assert_eq!(state.check(Seq(1)), ReplayDecision::Accept);
    }
}
