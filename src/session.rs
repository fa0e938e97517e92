//! Session state machine (C7): the lifecycle that gates whether C6 is
//! pass-through, encrypting, decrypting, or paused for a rekey.
//!
//! Mutated by signaling callbacks and read by the media-path processor, so
//! the same torn-read-free visibility rule as the key store applies here
//! (§5) — implemented with `parking_lot::RwLock` over the state+context
//! pair, chosen for uncontended-lock speed over the stdlib equivalent.

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::events::Notifier;

/// The fixed set of session states (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Initializing,
    Connecting,
    ExchangingKeys,
    Encrypting,
    Encrypted,
    Rekeying,
    Error,
    Disconnected,
}

/// The fixed set of events that drive transitions (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Initialize,
    Connect,
    Connected,
    KeyExchangeComplete,
    StartKeyExchange,
    EncryptionActive,
    StartRekey,
    RekeyComplete,
    Error,
    Recover,
    Disconnect,
    Reset,
}

/// Mutable context carried alongside the current state.
#[derive(Debug, Clone, Default)]
pub struct StateContext {
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: u32,
    pub last_good_state: Option<SessionState>,
    pub last_transition_time: Option<SystemTime>,
    pub user_data: HashMap<String, String>,
}

/// Payload carried by the `error` event.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

/// Result of attempting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Accepted,
    Rejected,
}

/// Observable transitions, delivered after the state+context update.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
}

fn legal_target(from: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent::*;
    use SessionState::*;

    match (from, event) {
        (Idle, Initialize) => Some(Initializing),
        (Initializing, Connect) => Some(Connecting),
        (Disconnected, Connect) => Some(Connecting),
        (Connecting, Connected) => Some(ExchangingKeys),
        (ExchangingKeys, KeyExchangeComplete) => Some(Encrypting),
        (Encrypted, StartKeyExchange) | (Encrypting, StartKeyExchange) => Some(ExchangingKeys),
        (Encrypting, EncryptionActive) => Some(Encrypted),
        (Encrypted, StartRekey) => Some(Rekeying),
        (Rekeying, RekeyComplete) => Some(Encrypted),
        (Error, Recover) => Some(Connecting),
        (_, Reset) => Some(Idle),
        (_, Error)
            if matches!(
                from,
                Initializing | Connecting | ExchangingKeys | Encrypting | Encrypted | Rekeying
            ) =>
        {
            Some(SessionState::Error)
        }
        (_, Disconnect) if is_connected_or_error(from) => Some(Disconnected),
        _ => None,
    }
}

fn is_connected_or_error(state: SessionState) -> bool {
    use SessionState::*;
    matches!(state, ExchangingKeys | Encrypting | Encrypted | Rekeying | Error)
}

/// Owner of the session's current state and context (C7).
pub struct SessionMachine {
    inner: RwLock<(SessionState, StateContext)>,
    pub transitions: Notifier<TransitionEvent>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new((SessionState::Idle, StateContext::default())),
            transitions: Notifier::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().0
    }

    pub fn context(&self) -> StateContext {
        self.inner.read().1.clone()
    }

    /// Fire a plain event with no payload.
    ///
    /// `error` carries a payload in [`SessionMachine::fire_error`]; calling
    /// it through this entry point instead still applies the transition (if
    /// legal) but leaves `error_message`/`error_code` untouched, since no
    /// event — including `error` itself — may panic a transition (§4.7).
    pub fn fire(&self, event: SessionEvent) -> TransitionOutcome {
        self.apply(event, None)
    }

    /// Fire the `error` event with its payload.
    pub fn fire_error(&self, payload: ErrorPayload) -> TransitionOutcome {
        self.apply(SessionEvent::Error, Some(payload))
    }

    fn apply(&self, event: SessionEvent, payload: Option<ErrorPayload>) -> TransitionOutcome {
        let mut guard = self.inner.write();
        let (from, _) = *guard;

        let to = match legal_target(from, event) {
            Some(to) => to,
            None => {
                tracing::debug!(?from, ?event, "transition rejected");
                return TransitionOutcome::Rejected;
            }
        };

        let ctx = &mut guard.1;
        match event {
            SessionEvent::Error => {
                if let Some(p) = payload {
                    ctx.error_message = Some(p.message);
                    ctx.error_code = Some(p.code);
                }
                ctx.last_good_state = Some(from);
                ctx.retry_count += 1;
            }
            SessionEvent::Recover => {
                ctx.error_message = None;
                ctx.error_code = None;
            }
            SessionEvent::Reset => {
                ctx.retry_count = 0;
                ctx.last_good_state = None;
                ctx.user_data.clear();
            }
            _ => {}
        }
        ctx.last_transition_time = Some(SystemTime::now());
        guard.0 = to;
        drop(guard);

        tracing::info!(?from, ?to, ?event, "session transition");
        self.transitions.notify(&TransitionEvent { from, to, event });
        TransitionOutcome::Accepted
    }

    pub fn is_encrypted(&self) -> bool {
        self.state() == SessionState::Encrypted
    }

    pub fn is_encryption_active(&self) -> bool {
        matches!(self.state(), SessionState::Encrypting | SessionState::Encrypted)
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::ExchangingKeys | SessionState::Encrypting | SessionState::Encrypted | SessionState::Rekeying
        )
    }

    pub fn is_error(&self) -> bool {
        self.state() == SessionState::Error
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
