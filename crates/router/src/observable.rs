//! Observable values and observer lists
//!
//! `Observable<T>` is one mutable slot with synchronous change
//! notification; `Notifier<A>` is the bare observer list underneath it,
//! also used on its own for page load/unload notifications.
//!
//! Notification rules:
//! - subscribers run in subscription order, synchronously, inside `set`
//! - no lock is held while a subscriber runs, so a subscriber may set
//!   other observables or (un)subscribe
//! - a subscriber removed during a notification is not called for the
//!   rest of it; a subscriber added during a notification waits for the
//!   next one; nobody else is skipped or called twice

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct NotifierInner<A> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Callback<A>)>>,
}

/// Ordered list of callbacks taking `&A`
pub struct Notifier<A> {
    inner: Arc<NotifierInner<A>>,
}

impl<A> Clone for Notifier<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> Notifier<A> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove exactly one subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        match subscribers.iter().position(|(sub_id, _)| *sub_id == id) {
            Some(index) => {
                subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner
            .subscribers
            .lock()
            .iter()
            .any(|(sub_id, _)| *sub_id == id)
    }

    pub fn len(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every subscriber with `arg`
    pub fn notify(&self, arg: &A) {
        let snapshot: Vec<(SubscriptionId, Callback<A>)> = self.inner.subscribers.lock().clone();

        for (id, callback) in snapshot {
            if self.is_subscribed(id) {
                callback(arg);
            }
        }
    }
}

impl<A> Default for Notifier<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for Notifier<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}

struct Slot<T> {
    current: T,
    previous: T,
}

/// A single value with change notification
///
/// Clones share the same slot and subscriber list.
pub struct Observable<T> {
    slot: Arc<Mutex<Slot<T>>>,
    changes: Notifier<(T, T)>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            changes: self.changes.clone(),
        }
    }
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                current: initial.clone(),
                previous: initial,
            })),
            changes: Notifier::new(),
        }
    }

    pub fn get(&self) -> T {
        self.slot.lock().current.clone()
    }

    /// Value before the last effective `set`
    pub fn previous(&self) -> T {
        self.slot.lock().previous.clone()
    }

    /// Store `value` and notify subscribers with `(new, previous)`
    ///
    /// Setting a value equal to the current one is a no-op. Returns whether
    /// the value changed.
    pub fn set(&self, value: T) -> bool {
        let change = {
            let mut slot = self.slot.lock();
            if slot.current == value {
                return false;
            }
            let previous = std::mem::replace(&mut slot.current, value.clone());
            slot.previous = previous.clone();
            (value, previous)
        };

        self.changes.notify(&change);
        true
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.changes
            .subscribe(move |(current, previous): &(T, T)| callback(current, previous))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.changes.len()
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Observable")
            .field("current", &slot.current)
            .field("previous", &slot.previous)
            .field("subscribers", &self.changes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let log = log.clone();
            move |entry: &str| log.lock().push(entry.to_string())
        };
        (log, sink)
    }

    #[test]
    fn test_set_notifies_with_new_and_previous() {
        let value = Observable::new("/a".to_string());
        let (log, sink) = recorder();
        value.subscribe(move |new, prev| sink(&format!("{prev}->{new}")));

        assert!(value.set("/b".to_string()));
        assert_eq!(value.get(), "/b");
        assert_eq!(value.previous(), "/a");
        assert_eq!(*log.lock(), vec!["/a->/b"]);
    }

    #[test]
    fn test_equal_value_is_noop() {
        let value = Observable::new(1);
        let (log, sink) = recorder();
        value.subscribe(move |_, _| sink("fired"));

        assert!(!value.set(1));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_subscription_order() {
        let value = Observable::new(0);
        let (log, sink) = recorder();
        for name in ["first", "second", "third"] {
            let sink = sink.clone();
            value.subscribe(move |_, _| sink(name));
        }

        value.set(1);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_one() {
        let value = Observable::new(0);
        let (log, sink) = recorder();
        let ids: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|name| {
                let sink = sink.clone();
                value.subscribe(move |_, _| sink(name))
            })
            .collect();

        assert!(value.unsubscribe(ids[0]));
        assert!(!value.unsubscribe(ids[0]));
        value.set(1);

        assert_eq!(*log.lock(), vec!["b", "c"]);
        assert_eq!(value.subscriber_count(), 2);
    }

    #[test]
    fn test_unsubscribe_during_notification() {
        let value = Observable::new(0);
        let (log, sink) = recorder();

        let victim: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        {
            let value_handle = value.clone();
            let victim = victim.clone();
            let sink = sink.clone();
            value.subscribe(move |_, _| {
                sink("remover");
                if let Some(id) = victim.lock().take() {
                    value_handle.unsubscribe(id);
                }
            });
        }
        {
            let sink = sink.clone();
            let id = value.subscribe(move |_, _| sink("victim"));
            *victim.lock() = Some(id);
        }
        value.subscribe(move |_, _| sink("last"));

        value.set(1);
        assert_eq!(*log.lock(), vec!["remover", "last"]);
    }

    #[test]
    fn test_subscriber_may_set_other_observable() {
        let route = Observable::new("/".to_string());
        let loaded = Observable::new(true);
        {
            let loaded = loaded.clone();
            route.subscribe(move |_, _| {
                loaded.set(false);
            });
        }

        route.set("/next".to_string());
        assert!(!loaded.get());
    }

    #[test]
    fn test_notifier_passes_argument() {
        let notifier: Notifier<String> = Notifier::new();
        let (log, sink) = recorder();
        let id = notifier.subscribe(move |url: &String| sink(url));

        notifier.notify(&"/loaded".to_string());
        assert!(notifier.unsubscribe(id));
        notifier.notify(&"/ignored".to_string());

        assert_eq!(*log.lock(), vec!["/loaded"]);
        assert!(notifier.is_empty());
    }
}
