//! Subscriber registries backing the live auth update feeds.
//!
//! [`TopicRegistry`] keeps an ordered list of subscriber channels per key and
//! [`SubscriberSet`] is the same thing without a key. Each registry has its own
//! lock, held only while the map is mutated and while messages are placed in
//! subscriber mailboxes. A key disappears from the map as soon as its last
//! subscriber leaves.
//!
//! Every subscriber holds at most one undelivered message. Messages are full
//! state snapshots, so a publish that finds one pending replaces it and the
//! subscriber only ever catches up to the latest state. Watchers detect a dead
//! connection through keepalives rather than backpressure.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::observability::metrics;

/// Identifies one subscriber channel within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscriber observes on its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<M> {
    Update(M),
    /// The subscribed identity is gone; the watcher must stop.
    Terminated,
}

/// Single-message buffer shared by a slot and its subscription.
struct Mailbox<M> {
    pending: Mutex<Option<M>>,
    ready: Notify,
}

impl<M> Mailbox<M> {
    /// Store `message`, returning the one it displaced.
    fn put(&self, message: M) -> Option<M> {
        let displaced = lock(&self.pending).replace(message);
        self.ready.notify_one();
        displaced
    }

    fn take(&self) -> Option<M> {
        lock(&self.pending).take()
    }
}

struct Slot<M> {
    id: SubscriptionId,
    mailbox: Arc<Mailbox<M>>,
    terminated: CancellationToken,
}

impl<M: Clone> Slot<M> {
    fn is_open(&self) -> bool {
        !self.terminated.is_cancelled()
    }

    fn offer(&self, feed: &'static str, message: &M) -> bool {
        if !self.is_open() {
            return false;
        }
        if Arc::strong_count(&self.mailbox) == 1 {
            debug!(feed, subscription_id = %self.id, "Subscriber receiver gone, dropping message");
            metrics::record_notification_dropped(feed, metrics::DROP_CLOSED);
            return false;
        }
        if self.mailbox.put(message.clone()).is_some() {
            debug!(feed, subscription_id = %self.id, "Replaced undelivered message");
            metrics::record_notification_dropped(feed, metrics::DROP_SUPERSEDED);
        }
        metrics::record_notification_sent(feed);
        true
    }
}

// A slot leaving the registry closes its subscription.
impl<M> Drop for Slot<M> {
    fn drop(&mut self) {
        self.terminated.cancel();
    }
}

fn deliver<M: Clone>(feed: &'static str, slots: &[Slot<M>], message: &M) -> usize {
    slots.iter().filter(|slot| slot.offer(feed, message)).count()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receiving half handed to a watcher.
pub struct Subscription<M> {
    id: SubscriptionId,
    mailbox: Arc<Mailbox<M>>,
    terminated: CancellationToken,
}

impl<M> Subscription<M> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next message. Termination wins over a pending message.
    pub async fn recv(&mut self) -> Delivery<M> {
        loop {
            if self.terminated.is_cancelled() {
                return Delivery::Terminated;
            }
            let pending = self.mailbox.take();
            if let Some(message) = pending {
                return Delivery::Update(message);
            }
            tokio::select! {
                biased;
                _ = self.terminated.cancelled() => return Delivery::Terminated,
                _ = self.mailbox.ready.notified() => {}
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]; `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<Delivery<M>> {
        if self.terminated.is_cancelled() {
            return Some(Delivery::Terminated);
        }
        self.mailbox.take().map(Delivery::Update)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }
}

impl<M> fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("terminated", &self.terminated.is_cancelled())
            .finish()
    }
}

fn channel<M>(id: SubscriptionId) -> (Slot<M>, Subscription<M>) {
    let mailbox = Arc::new(Mailbox { pending: Mutex::new(None), ready: Notify::new() });
    let terminated = CancellationToken::new();
    let slot = Slot { id, mailbox: Arc::clone(&mailbox), terminated: terminated.clone() };
    (slot, Subscription { id, mailbox, terminated })
}

type Release = Box<dyn FnOnce(SubscriptionId) -> Result<()> + Send + Sync>;

/// A subscription that unregisters itself when dropped.
///
/// Streaming responses own one of these; when the client goes away the body
/// is dropped and the registry entry goes with it.
pub struct ScopedSubscription<M> {
    subscription: Subscription<M>,
    release: Option<Release>,
}

impl<M> ScopedSubscription<M> {
    fn new(
        subscription: Subscription<M>,
        release: impl FnOnce(SubscriptionId) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self { subscription, release: Some(Box::new(release)) }
    }

    /// Unregister now and surface the registry's answer.
    pub fn release(mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => release(self.subscription.id),
            None => Ok(()),
        }
    }
}

impl<M> Deref for ScopedSubscription<M> {
    type Target = Subscription<M>;

    fn deref(&self) -> &Self::Target {
        &self.subscription
    }
}

impl<M> DerefMut for ScopedSubscription<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.subscription
    }
}

impl<M> Drop for ScopedSubscription<M> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Err(error) = release(self.subscription.id) {
                warn!(subscription_id = %self.subscription.id, %error, "Failed to release subscription");
            }
        }
    }
}

impl<M> fmt::Debug for ScopedSubscription<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSubscription")
            .field("subscription", &self.subscription)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Subscriber channels grouped by key.
pub struct TopicRegistry<K, M> {
    feed: &'static str,
    topics: Mutex<HashMap<K, Vec<Slot<M>>>>,
    next_id: AtomicU64,
}

impl<K, M> TopicRegistry<K, M>
where
    K: Eq + Hash + Clone + fmt::Display,
    M: Clone,
{
    /// `feed` labels this registry in logs and metrics.
    pub fn new(feed: &'static str) -> Self {
        Self { feed, topics: Mutex::new(HashMap::new()), next_id: AtomicU64::new(0) }
    }

    pub fn subscribe(&self, key: K) -> Subscription<M> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (slot, subscription) = channel(id);

        lock(&self.topics).entry(key.clone()).or_default().push(slot);

        metrics::subscription_opened(self.feed);
        debug!(feed = self.feed, key = %key, subscription_id = %id, "Registered subscriber");
        subscription
    }

    /// Remove exactly one channel. Fails if the key has no subscribers or the
    /// channel is not registered under it.
    pub fn unsubscribe(&self, key: &K, id: SubscriptionId) -> Result<()> {
        {
            let mut topics = lock(&self.topics);
            let slots = topics.get_mut(key).ok_or_else(|| {
                Error::invalid_argument(format!("no subscriptions registered for '{}'", key))
            })?;
            let position = slots.iter().position(|slot| slot.id == id).ok_or_else(|| {
                Error::invalid_argument(format!("{} is not registered for '{}'", id, key))
            })?;
            slots.remove(position);
            if slots.is_empty() {
                topics.remove(key);
            }
        }

        metrics::subscription_closed(self.feed);
        debug!(feed = self.feed, key = %key, subscription_id = %id, "Unregistered subscriber");
        Ok(())
    }

    /// Send to every open channel of `key`. `build` only runs when there is
    /// at least one, and its error is returned without sending anything.
    pub fn publish_with<F>(&self, key: &K, build: F) -> Result<usize>
    where
        F: FnOnce() -> Result<M>,
    {
        let topics = lock(&self.topics);
        let Some(slots) = topics.get(key).filter(|slots| slots.iter().any(Slot::is_open)) else {
            return Ok(0);
        };
        let message = build()?;
        Ok(deliver(self.feed, slots, &message))
    }

    pub fn publish(&self, key: &K, message: M) -> usize {
        match lock(&self.topics).get(key) {
            Some(slots) => deliver(self.feed, slots, &message),
            None => 0,
        }
    }

    /// Signal [`Delivery::Terminated`] to every current subscriber of `key`.
    /// The entries stay until each subscriber unsubscribes.
    pub fn terminate(&self, key: &K) -> usize {
        let topics = lock(&self.topics);
        let Some(slots) = topics.get(key) else {
            return 0;
        };
        let mut terminated = 0;
        for slot in slots.iter().filter(|slot| slot.is_open()) {
            slot.terminated.cancel();
            terminated += 1;
        }
        terminated
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        lock(&self.topics).get(key).map_or(0, Vec::len)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        lock(&self.topics).contains_key(key)
    }
}

impl<K, M> TopicRegistry<K, M>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    M: Clone + Send + 'static,
{
    pub fn subscribe_scoped(self: &Arc<Self>, key: K) -> ScopedSubscription<M> {
        let subscription = self.subscribe(key.clone());
        let registry = Arc::clone(self);
        ScopedSubscription::new(subscription, move |id| registry.unsubscribe(&key, id))
    }
}

/// Subscriber channels without a key.
pub struct SubscriberSet<M> {
    feed: &'static str,
    slots: Mutex<Vec<Slot<M>>>,
    next_id: AtomicU64,
}

impl<M: Clone> SubscriberSet<M> {
    pub fn new(feed: &'static str) -> Self {
        Self { feed, slots: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
    }

    pub fn subscribe(&self) -> Subscription<M> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (slot, subscription) = channel(id);
        lock(&self.slots).push(slot);

        metrics::subscription_opened(self.feed);
        debug!(feed = self.feed, subscription_id = %id, "Registered subscriber");
        subscription
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        {
            let mut slots = lock(&self.slots);
            let position = slots
                .iter()
                .position(|slot| slot.id == id)
                .ok_or_else(|| Error::invalid_argument(format!("{} is not registered", id)))?;
            slots.remove(position);
        }

        metrics::subscription_closed(self.feed);
        debug!(feed = self.feed, subscription_id = %id, "Unregistered subscriber");
        Ok(())
    }

    pub fn publish(&self, message: M) -> usize {
        deliver(self.feed, &lock(&self.slots), &message)
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M: Clone + Send + 'static> SubscriberSet<M> {
    pub fn subscribe_scoped(self: &Arc<Self>) -> ScopedSubscription<M> {
        let subscription = self.subscribe();
        let set = Arc::clone(self);
        ScopedSubscription::new(subscription, move |id| set.unsubscribe(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<TopicRegistry<String, u32>> {
        Arc::new(TopicRegistry::new("test"))
    }

    #[test]
    fn unsubscribe_removes_empty_topic() {
        let registry = registry();
        let first = registry.subscribe("alice".to_string());
        let second = registry.subscribe("alice".to_string());
        assert_eq!(registry.subscriber_count(&"alice".to_string()), 2);

        registry.unsubscribe(&"alice".to_string(), first.id()).unwrap();
        assert!(registry.contains_key(&"alice".to_string()));

        registry.unsubscribe(&"alice".to_string(), second.id()).unwrap();
        assert!(!registry.contains_key(&"alice".to_string()));
    }

    #[test]
    fn unsubscribe_contract_violations_are_invalid_argument() {
        let registry = registry();
        let subscription = registry.subscribe("alice".to_string());

        let unknown_key = registry.unsubscribe(&"bob".to_string(), subscription.id());
        assert!(matches!(unknown_key, Err(Error::InvalidArgument { .. })));

        let other = registry.subscribe("alice".to_string());
        registry.unsubscribe(&"alice".to_string(), other.id()).unwrap();
        let twice = registry.unsubscribe(&"alice".to_string(), other.id());
        assert!(matches!(twice, Err(Error::InvalidArgument { .. })));

        registry.unsubscribe(&"alice".to_string(), subscription.id()).unwrap();
        let after_cleanup = registry.unsubscribe(&"alice".to_string(), subscription.id());
        assert!(matches!(after_cleanup, Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn publish_reaches_only_the_addressed_key() {
        let registry = registry();
        let mut alice = registry.subscribe("alice".to_string());
        let mut bob = registry.subscribe("bob".to_string());

        assert_eq!(registry.publish(&"alice".to_string(), 7), 1);

        assert_eq!(alice.try_recv(), Some(Delivery::Update(7)));
        assert_eq!(bob.try_recv(), None);
    }

    #[test]
    fn pending_message_is_replaced_by_newer_one() {
        let registry = registry();
        let mut alice = registry.subscribe("alice".to_string());

        assert_eq!(registry.publish(&"alice".to_string(), 1), 1);
        assert_eq!(registry.publish(&"alice".to_string(), 2), 1);

        assert_eq!(alice.try_recv(), Some(Delivery::Update(2)));
        assert_eq!(alice.try_recv(), None);
    }

    #[tokio::test]
    async fn waiting_subscriber_wakes_on_publish() {
        let registry = registry();
        let mut alice = registry.subscribe("alice".to_string());

        let waiter = tokio::spawn(async move { alice.recv().await });
        tokio::task::yield_now().await;
        assert_eq!(registry.publish(&"alice".to_string(), 9), 1);

        assert_eq!(waiter.await.unwrap(), Delivery::Update(9));
    }

    #[test]
    fn dropped_subscription_is_not_counted_as_delivered() {
        let registry = registry();
        let alice = registry.subscribe("alice".to_string());
        drop(alice);

        assert_eq!(registry.publish(&"alice".to_string(), 1), 0);
        assert_eq!(registry.subscriber_count(&"alice".to_string()), 1);
    }

    #[test]
    fn unsubscribed_channel_reads_as_terminated() {
        let registry = registry();
        let mut alice = registry.subscribe("alice".to_string());
        registry.unsubscribe(&"alice".to_string(), alice.id()).unwrap();

        assert_eq!(alice.try_recv(), Some(Delivery::Terminated));
    }

    #[test]
    fn publish_with_skips_builder_without_subscribers() {
        let registry = registry();
        let sent = registry
            .publish_with(&"nobody".to_string(), || Err(Error::invariant("must not be called")))
            .unwrap();
        assert_eq!(sent, 0);

        let _watcher = registry.subscribe("alice".to_string());
        let result =
            registry.publish_with(&"alice".to_string(), || Err(Error::invariant("no token")));
        assert!(matches!(result, Err(Error::InvariantViolation { .. })));
    }

    #[tokio::test]
    async fn terminate_signals_and_keeps_entry_until_unsubscribe() {
        let registry = registry();
        let mut watcher = registry.subscribe("alice".to_string());

        assert_eq!(registry.terminate(&"alice".to_string()), 1);
        assert_eq!(watcher.recv().await, Delivery::Terminated);
        assert!(watcher.is_terminated());

        // terminated channels receive nothing further
        assert_eq!(registry.publish(&"alice".to_string(), 3), 0);
        assert_eq!(registry.subscriber_count(&"alice".to_string()), 1);

        registry.unsubscribe(&"alice".to_string(), watcher.id()).unwrap();
        assert!(!registry.contains_key(&"alice".to_string()));
    }

    #[tokio::test]
    async fn messages_arrive_in_publish_order() {
        let registry = registry();
        let mut watcher = registry.subscribe("alice".to_string());

        for n in 0..5 {
            assert_eq!(registry.publish(&"alice".to_string(), n), 1);
            assert_eq!(watcher.recv().await, Delivery::Update(n));
        }
    }

    #[test]
    fn scoped_subscription_releases_on_drop() {
        let registry = registry();
        {
            let _scoped = registry.subscribe_scoped("alice".to_string());
            assert_eq!(registry.subscriber_count(&"alice".to_string()), 1);
        }
        assert!(!registry.contains_key(&"alice".to_string()));
    }

    #[test]
    fn scoped_release_reports_registry_errors() {
        let registry = registry();
        let scoped = registry.subscribe_scoped("alice".to_string());
        registry.unsubscribe(&"alice".to_string(), scoped.id()).unwrap();

        assert!(matches!(scoped.release(), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn subscriber_set_fan_out_and_cleanup() {
        let set: Arc<SubscriberSet<&'static str>> = Arc::new(SubscriberSet::new("test"));
        let mut first = set.subscribe();
        let scoped = set.subscribe_scoped();
        assert_eq!(set.len(), 2);

        assert_eq!(set.publish("created"), 2);
        assert_eq!(first.try_recv(), Some(Delivery::Update("created")));

        drop(scoped);
        assert_eq!(set.len(), 1);

        set.unsubscribe(first.id()).unwrap();
        assert!(set.is_empty());
        assert!(matches!(set.unsubscribe(first.id()), Err(Error::InvalidArgument { .. })));
    }
}
