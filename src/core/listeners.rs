//! Registered-callback lists keyed by registration token
//!
//! Callbacks run in registration order. Each one runs inside its own
//! `catch_unwind` boundary so a panicking listener cannot stop delivery to
//! the others.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Token returned by `register`, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Raw token value
    pub fn value(self) -> u64 {
        self.0
    }
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered list of event callbacks
pub struct ListenerRegistry<E> {
    listeners: RwLock<Vec<(ListenerId, Callback<E>)>>,
    next_id: AtomicU64,
}

impl<E> ListenerRegistry<E> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback; it will be invoked after all earlier ones
    pub fn register<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback; returns false if the token was unknown
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// No callbacks registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every callback; returns how many panicked
    pub fn notify(&self, event: &E) -> usize {
        // Snapshot so callbacks may register/unregister without deadlocking
        let snapshot: Vec<(ListenerId, Callback<E>)> = self.listeners.read().clone();
        let mut panicked = 0;

        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                panicked += 1;
                tracing::warn!("Listener {} panicked; continuing delivery", id.value());
            }
        }

        panicked
    }
}

impl<E> Default for ListenerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_delivery_in_registration_order() {
        let registry = ListenerRegistry::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.register(move |value: &u32| seen.lock().push((tag, *value)));
        }

        assert_eq!(registry.notify(&7), 0);
        assert_eq!(
            *seen.lock(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let registry = ListenerRegistry::<()>::new();
        let reached = Arc::new(AtomicU64::new(0));

        registry.register(|_| panic!("listener failure"));
        let counter = Arc::clone(&reached);
        registry.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.notify(&()), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = ListenerRegistry::<()>::new();
        let id = registry.register(|_| {});
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }
}
