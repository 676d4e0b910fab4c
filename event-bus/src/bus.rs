//! Event bus implementation.
//!
//! An `EventBus<A>` is one named publish point. Subscribers are kept sorted by
//! priority and run synchronously on the triggering thread.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Error type returned by subscribers and pipeline stages
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by subscribers and pipeline stages
pub type HandlerResult = Result<(), HandlerError>;

type Handler<A> = Arc<dyn Fn(&A) -> HandlerResult + Send + Sync>;
type Predicate<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// Subscription handle for unregistering from a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

struct Subscriber<A> {
    id: SubscriptionId,
    priority: i32,
    handler: Handler<A>,
    predicate: Option<Predicate<A>>,
}

impl<A> Clone for Subscriber<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            priority: self.priority,
            handler: Arc::clone(&self.handler),
            predicate: self.predicate.clone(),
        }
    }
}

/// A named publish point with an ordered, conditional subscriber list
///
/// - Lower priority values run first; equal priorities run in registration order.
/// - A subscriber with a predicate only runs when the predicate accepts the
///   trigger arguments.
/// - A subscriber that returns an error or panics is logged and skipped; the
///   remaining subscribers still run.
///
/// # Example
///
/// ```rust
/// use event_bus::EventBus;
///
/// let bus = EventBus::<u32>::new("reading");
/// bus.register(10, |value| {
///     println!("late: {value}");
///     Ok(())
/// });
/// bus.register_if(0, |value| *value > 100, |value| {
///     println!("early, only for large values: {value}");
///     Ok(())
/// });
///
/// assert_eq!(bus.trigger(&150), 2);
/// assert_eq!(bus.trigger(&5), 1);
/// ```
pub struct EventBus<A> {
    name: String,
    subscribers: RwLock<Vec<Subscriber<A>>>,
}

impl<A> EventBus<A> {
    /// Create an empty bus
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an unconditional subscriber
    pub fn register<F>(&self, priority: i32, handler: F) -> SubscriptionId
    where
        F: Fn(&A) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(Subscriber {
            id: SubscriptionId::new(),
            priority,
            handler: Arc::new(handler),
            predicate: None,
        })
    }

    /// Register a subscriber that only runs when `predicate` accepts the arguments
    pub fn register_if<P, F>(&self, priority: i32, predicate: P, handler: F) -> SubscriptionId
    where
        P: Fn(&A) -> bool + Send + Sync + 'static,
        F: Fn(&A) -> HandlerResult + Send + Sync + 'static,
    {
        self.insert(Subscriber {
            id: SubscriptionId::new(),
            priority,
            handler: Arc::new(handler),
            predicate: Some(Arc::new(predicate)),
        })
    }

    /// Remove a subscriber
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;
        if removed {
            tracing::debug!(bus = %self.name, "Subscription {} removed", id);
        }
        removed
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Invoke every matching subscriber in priority order
    ///
    /// Returns the number of subscribers whose handler was invoked (including
    /// ones that failed). Nothing from the handlers is propagated to the caller.
    pub fn trigger(&self, args: &A) -> usize {
        // Dispatch from a snapshot so handlers may (un)register without deadlock
        let subscribers: Vec<Subscriber<A>> = self.subscribers.read().clone();

        if subscribers.is_empty() {
            tracing::warn!(bus = %self.name, "Event triggered with no subscribers");
            return 0;
        }

        let mut invoked = 0;
        for subscriber in &subscribers {
            if let Some(predicate) = &subscriber.predicate {
                match catch_unwind(AssertUnwindSafe(|| predicate(args))) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(panic) => {
                        tracing::error!(
                            bus = %self.name,
                            subscription = %subscriber.id,
                            "Subscriber predicate panicked: {}",
                            panic_message(panic.as_ref())
                        );
                        continue;
                    }
                }
            }

            invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(args))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        bus = %self.name,
                        subscription = %subscriber.id,
                        "Subscriber failed: {}",
                        e
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        bus = %self.name,
                        subscription = %subscriber.id,
                        "Subscriber panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        invoked
    }

    fn insert(&self, subscriber: Subscriber<A>) -> SubscriptionId {
        let id = subscriber.id;
        let mut subscribers = self.subscribers.write();
        // Upper bound keeps registration order among equal priorities
        let position = subscribers.partition_point(|s| s.priority <= subscriber.priority);
        tracing::debug!(
            bus = %self.name,
            "Subscription {} added at priority {} (position {})",
            id,
            subscriber.priority,
            position
        );
        subscribers.insert(position, subscriber);
        id
    }
}

impl<A> std::fmt::Debug for EventBus<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_event_bus_creation() {
        let bus = EventBus::<()>::new("device_changed");
        assert_eq!(bus.name(), "device_changed");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_register_and_unregister() {
        let bus = EventBus::<()>::new("test");

        let id = bus.register(0, |_| Ok(()));
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unregister(id));
        assert_eq!(bus.subscriber_count(), 0);

        // Double unregister should return false
        assert!(!bus.unregister(id));
    }

    #[test]
    fn test_priority_order_with_registration_tie_break() {
        let bus = EventBus::<()>::new("test");
        let order = recorder();

        for (priority, label) in [(5, "c"), (1, "a"), (5, "d"), (1, "b"), (-3, "first")] {
            let order = Arc::clone(&order);
            bus.register(priority, move |_| {
                order.lock().push(label);
                Ok(())
            });
        }

        assert_eq!(bus.trigger(&()), 5);
        assert_eq!(*order.lock(), vec!["first", "a", "b", "c", "d"]);
    }

    #[test]
    fn test_predicate_filters_subscribers() {
        let bus = EventBus::<u32>::new("test");
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        bus.register_if(0, |v| *v % 2 == 0, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.trigger(&3), 0);
        assert_eq!(bus.trigger(&4), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_siblings() {
        let bus = EventBus::<()>::new("test");
        let order = recorder();

        let o = Arc::clone(&order);
        bus.register(0, move |_| {
            o.lock().push("before");
            Ok(())
        });
        bus.register(1, |_| Err("camera unavailable".into()));
        bus.register(1, |_| panic!("subscriber bug"));
        let o = Arc::clone(&order);
        bus.register(1, move |_| {
            o.lock().push("same-priority");
            Ok(())
        });
        let o = Arc::clone(&order);
        bus.register(2, move |_| {
            o.lock().push("after");
            Ok(())
        });

        assert_eq!(bus.trigger(&()), 5);
        assert_eq!(*order.lock(), vec!["before", "same-priority", "after"]);
    }

    #[test]
    fn test_trigger_without_subscribers() {
        let bus = EventBus::<()>::new("lonely");
        assert_eq!(bus.trigger(&()), 0);
    }

    #[test]
    fn test_handler_can_register_during_trigger() {
        let bus = Arc::new(EventBus::<()>::new("test"));
        let inner = Arc::clone(&bus);

        bus.register(0, move |_| {
            inner.register(0, |_| Ok(()));
            Ok(())
        });

        // Snapshot dispatch: the new subscriber is not invoked in this round
        assert_eq!(bus.trigger(&()), 1);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_subscription_id_display() {
        let id = SubscriptionId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("Sub("));
        assert_eq!(shown.len(), "Sub(".len() + 8 + 1);
    }
}
