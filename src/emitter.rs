//! Synchronous multicast to registered listeners.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};

/// Identifies a subscription so it can be removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Listener<M> = Arc<dyn Fn(&M) -> Result<()> + Send + Sync>;

/// An ordered registry of listener callbacks.
///
/// [`emit`](EventEmitter::emit) calls every listener in registration order and
/// only returns once all of them have run. If a listener fails, emit stops
/// there and returns [`Error::Subscriber`]; listeners registered after it do
/// not see the message. Panics in a listener unwind into the caller of emit.
pub struct EventEmitter<M> {
    listeners: RwLock<Vec<(SubscriberId, Listener<M>)>>,
    next_id: AtomicU64,
}

impl<M> EventEmitter<M> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener at the end of the delivery order
    pub fn subscribe<F>(&self, listener: F) -> SubscriberId
    where
        F: Fn(&M) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        tracing::debug!(subscriber = %id, "subscriber registered");
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver `message` to every listener, in registration order.
    pub fn emit(&self, message: &M) -> Result<()> {
        // Snapshot so a listener can (un)subscribe without deadlocking.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in listeners {
            listener(message).map_err(|source| Error::subscriber(id, source))?;
        }
        Ok(())
    }
}

impl<M> Default for EventEmitter<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for EventEmitter<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn delivers_in_registration_order() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = log.clone();
            emitter.subscribe(move |msg: &String| {
                log.lock().unwrap().push(format!("{}:{}", name, msg));
                Ok(())
            });
        }

        emitter.emit(&"e0".to_string()).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:e0", "second:e0", "third:e0"]
        );
    }

    #[test]
    fn failing_listener_stops_delivery() {
        let emitter = EventEmitter::new();
        let reached = Arc::new(Mutex::new(false));

        emitter.subscribe(|_: &u32| Ok(()));
        let failing = emitter.subscribe(|n: &u32| Err(Error::custom(format!("rejected {}", n))));
        let flag = reached.clone();
        emitter.subscribe(move |_: &u32| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        let err = emitter.emit(&7).unwrap_err();
        match err {
            Error::Subscriber { id, source } => {
                assert_eq!(id, failing);
                assert_eq!(source.to_string(), "rejected 7");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!*reached.lock().unwrap());
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let id = emitter.subscribe(|_| Ok(()));
        assert_eq!(emitter.subscriber_count(), 1);
        assert!(emitter.unsubscribe(id));
        assert!(!emitter.unsubscribe(id));
        assert_eq!(emitter.subscriber_count(), 0);
        emitter.emit(&()).unwrap();
    }
}
