//! A small typed notification collaborator, used in place of the reference
//! host's ad-hoc listener maps (§9 design note).
//!
//! Each component that emits observable events (the key store, the session
//! state machine) owns one `Notifier<E>` and calls [`Notifier::notify`] at
//! the point the event occurs. A listener that panics-unwinds across the
//! closure boundary would be a bug in the listener, not this collaborator;
//! what this type does guarantee is that one listener returning an error
//! from fallible setup code never stops delivery to the rest.

use parking_lot::RwLock;

/// Registered listeners for events of type `E`.
///
/// Cloning an event is required because every listener gets its own copy;
/// events in this crate are small enums/structs, so this is cheap.
pub struct Notifier<E: Clone> {
    listeners: RwLock<Vec<Box<dyn Fn(&E) + Send + Sync>>>,
}

impl<E: Clone> Notifier<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener. Returns nothing; there is no unsubscribe
    /// handle because nothing in this crate needs one — components that
    /// need to stop listening just drop the whole collaborator.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }

    /// Deliver `event` to every registered listener.
    ///
    /// A listener is a plain closure here, so "listener errors must not
    /// abort delivery" is enforced by construction: a closure has no `Err`
    /// to propagate. Panics are caught per-listener so one broken
    /// subscriber can't prevent the rest from observing the event.
    pub fn notify(&self, event: &E) {
        for listener in self.listeners.read().iter() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(event)));
        }
    }

    /// Drop every registered listener, e.g. on component teardown.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<E: Clone> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Ping;

    #[test]
    fn delivers_to_all_listeners() {
        let notifier = Notifier::<Ping>::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            notifier.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        notifier.notify(&Ping);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let notifier = Notifier::<Ping>::new();
        let count = Arc::new(AtomicUsize::new(0));

        notifier.subscribe(|_| panic!("boom"));
        let count2 = count.clone();
        notifier.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(&Ping);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_removes_listeners() {
        let notifier = Notifier::<Ping>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        notifier.subscribe(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        notifier.clear();
        notifier.notify(&Ping);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
