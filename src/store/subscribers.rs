//! Subscriber bookkeeping shared by the store and the identity service.
//!
//! Fan-out works on a copy of the subscriber list, so a callback may
//! unsubscribe itself (or anyone else) without disturbing the delivery in
//! progress. Each subscriber sees strictly increasing sequence numbers; a
//! payload it has already seen (or an older one) is skipped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Callback<T> = Box<dyn Fn(Arc<T>) + Send + Sync>;

struct SubscriberEntry<T> {
    id: SubscriptionId,
    callback: Callback<T>,
    active: Arc<AtomicBool>,
    last_sequence: AtomicU64,
}

impl<T> SubscriberEntry<T> {
    fn offer(&self, sequence: u64, payload: &Arc<T>) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        if self.last_sequence.fetch_max(sequence, Ordering::AcqRel) >= sequence {
            return false;
        }
        (self.callback)(Arc::clone(payload));
        true
    }
}

/// Registry of callbacks receiving sequenced payloads.
pub struct SubscriberRegistry<T> {
    entries: Mutex<Vec<Arc<SubscriberEntry<T>>>>,
}

impl<T: Send + Sync + 'static> SubscriberRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Arc<SubscriberEntry<T>>>> {
        // A panicking callback never holds this lock; recover the list.
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers `callback`, then offers it whatever `initial` returns.
    ///
    /// `initial` runs after the callback is visible to [`deliver`](Self::deliver),
    /// so a payload published concurrently is delivered at most once.
    pub fn register_with(
        self: &Arc<Self>,
        callback: impl Fn(Arc<T>) + Send + Sync + 'static,
        initial: impl FnOnce() -> Option<(u64, Arc<T>)>,
    ) -> Subscription {
        let id = SubscriptionId::new();
        let active = Arc::new(AtomicBool::new(true));
        let entry = Arc::new(SubscriberEntry {
            id,
            callback: Box::new(callback),
            active: Arc::clone(&active),
            last_sequence: AtomicU64::new(0),
        });
        self.entries().push(Arc::clone(&entry));

        if let Some((sequence, payload)) = initial() {
            entry.offer(sequence, &payload);
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        Subscription::new(id, active, move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    /// Registers `callback` for future payloads only.
    pub fn register(self: &Arc<Self>, callback: impl Fn(Arc<T>) + Send + Sync + 'static) -> Subscription {
        self.register_with(callback, || None)
    }

    /// Offers `payload` to every active subscriber. Returns how many received it.
    pub fn deliver(&self, sequence: u64, payload: &Arc<T>) -> usize {
        let entries: Vec<_> = self.entries().clone();
        entries.iter().filter(|e| e.offer(sequence, payload)).count()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True if nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: SubscriptionId) {
        self.entries().retain(|e| e.id != id);
    }
}

impl<T> fmt::Debug for SubscriberRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.entries.lock().map_or(0, |g| g.len());
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &count)
            .finish()
    }
}

/// Handle for one registration.
///
/// [`unsubscribe`](Self::unsubscribe) stops delivery immediately and is
/// idempotent. Dropping the handle unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    active: Arc<AtomicBool>,
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(id: SubscriptionId, active: Arc<AtomicBool>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            active,
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// True until [`unsubscribe`](Self::unsubscribe) is called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stops delivery. Safe to call more than once, including from inside
    /// the subscriber's own callback.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let detach = self
            .detach
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(detach) = detach {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(Arc<u32>) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_deliver_reaches_every_subscriber() {
        let registry = SubscriberRegistry::<u32>::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let _sa = registry.register(cb_a);
        let _sb = registry.register(cb_b);

        assert_eq!(registry.deliver(1, &Arc::new(7)), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_sequences_are_skipped() {
        let registry = SubscriberRegistry::<u32>::new();
        let (count, cb) = counter();
        let _s = registry.register_with(cb, || Some((5, Arc::new(0))));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(registry.deliver(5, &Arc::new(0)), 0);
        assert_eq!(registry.deliver(4, &Arc::new(0)), 0);
        assert_eq!(registry.deliver(6, &Arc::new(0)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = SubscriberRegistry::<u32>::new();
        let (count, cb) = counter();
        let sub = registry.register(cb);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(registry.is_empty());
        assert_eq!(registry.deliver(1, &Arc::new(1)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = SubscriberRegistry::<u32>::new();
        let (_, cb) = counter();
        drop(registry.register(cb));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let registry = SubscriberRegistry::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let own = Arc::clone(&slot);
        let first_calls = Arc::new(AtomicUsize::new(0));
        let fc = Arc::clone(&first_calls);
        let first = registry.register(move |_| {
            fc.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = own.lock().unwrap().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(first);

        let (second_calls, cb) = counter();
        let _second = registry.register(cb);

        assert_eq!(registry.deliver(1, &Arc::new(1)), 2);
        assert_eq!(registry.deliver(2, &Arc::new(2)), 1);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 1);
    }
}
