//! Observer plumbing shared by the store and the calculator.
//!
//! Listeners are invoked synchronously, in registration order, on the thread
//! that emits. Async consumers (outbound integrations) can take a broadcast
//! receiver instead.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Synchronous listener callback
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerEntry<T> {
    id: u64,
    callback: Listener<T>,
}

type ListenerList<T> = RwLock<Vec<ListenerEntry<T>>>;

/// Subject half of the observer pattern
pub struct EventBus<T: Clone + Send + 'static> {
    name: &'static str,
    listeners: Arc<ListenerList<T>>,
    next_id: AtomicU64,
    channel: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(name: &'static str) -> Self {
        let (channel, _) = broadcast::channel(64);
        Self {
            name,
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            channel,
        }
    }

    /// Register a synchronous listener. Dropping the returned
    /// [`Subscription`] unregisters it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(ListenerEntry {
                id,
                callback: Arc::new(callback),
            });
        debug!(bus = self.name, listener_id = id, "listener registered");

        let weak: Weak<ListenerList<T>> = Arc::downgrade(&self.listeners);
        let name = self.name;
        Subscription {
            id,
            bus: name,
            dispose: Some(Box::new(move || {
                if let Some(list) = weak.upgrade() {
                    list.write()
                        .unwrap_or_else(|e| e.into_inner())
                        .retain(|entry| entry.id != id);
                    debug!(bus = name, listener_id = id, "listener unregistered");
                }
            })),
        }
    }

    /// Receiver for async consumers. Lagging receivers lose old events.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<T> {
        self.channel.subscribe()
    }

    /// Deliver `event` to every registered listener, then to channel
    /// receivers. Returns the number of synchronous listeners invoked.
    pub fn emit(&self, event: &T) -> usize {
        // Copy the list so listeners may (un)subscribe while being called
        let callbacks: Vec<Listener<T>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|entry| Arc::clone(&entry.callback))
            .collect();

        for callback in &callbacks {
            callback(event);
        }

        // No receivers is not an error
        let _ = self.channel.send(event.clone());
        trace!(bus = self.name, listeners = callbacks.len(), "event emitted");
        callbacks.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Disposer returned by [`EventBus::subscribe`]
pub struct Subscription {
    id: u64,
    bus: &'static str,
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unregister now instead of at drop
    pub fn unsubscribe(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("bus", &self.bus)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn test_listeners_called_in_registration_order() {
        let bus: EventBus<u32> = EventBus::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |v| seen.lock().unwrap().push(("first", *v)))
        };
        let s2 = {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |v| seen.lock().unwrap().push(("second", *v)))
        };

        assert_eq!(bus.emit(&7), 2);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
        drop((s1, s2));
    }

    #[test]
    fn test_unsubscribe_and_drop_remove_listener() {
        let bus: EventBus<u32> = EventBus::new("test");
        let count = Arc::new(AtomicUsize::new(0));

        let sub = {
            let count = Arc::clone(&count);
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        bus.emit(&1);
        sub.unsubscribe();
        bus.emit(&2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);

        {
            let _scoped = bus.subscribe(|_| {});
            assert_eq!(bus.listener_count(), 1);
        }
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_bus_is_harmless() {
        let bus: EventBus<u32> = EventBus::new("test");
        let sub = bus.subscribe(|_| {});
        drop(bus);
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_channel_receivers_get_events() {
        let bus: EventBus<String> = EventBus::new("test");
        let mut rx = bus.subscribe_channel();
        bus.emit(&"hello".to_string());
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }
}
