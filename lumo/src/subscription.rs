// Copyright (c) 2026 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::{PublishPacket, QoS, SubscribeTopic};
use std::sync::Mutex;

use crate::events::MessageHandler;

/// One active subscription: the requested filter and options, the QoS
/// the broker granted, and an optional per-filter handler.
#[derive(Clone)]
pub struct Subscription {
    topic: SubscribeTopic,
    granted_qos: Option<QoS>,
    handler: Option<MessageHandler>,
}

impl Subscription {
    #[must_use]
    pub const fn topic(&self) -> &SubscribeTopic {
        &self.topic
    }

    #[must_use]
    pub const fn granted_qos(&self) -> Option<QoS> {
        self.granted_qos
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("granted_qos", &self.granted_qos)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Whether an `add` call created a new entry or replaced an old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Replaced,
}

/// Insertion-ordered set of active subscriptions.
///
/// Dedup is by byte-identical filter string, never by topic matching:
/// `a/+` and `a/b` are distinct entries even though both match `a/b`.
/// Dispatch order follows insertion order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subscription, replacing any entry with the same filter
    /// string. Replacement keeps the entry's position.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn add(&self, topic: SubscribeTopic, handler: Option<MessageHandler>) -> AddOutcome {
        let mut entries = self.entries.lock().unwrap();
        let subscription = Subscription {
            topic,
            granted_qos: None,
            handler,
        };
        let filter = subscription.topic.filter().as_str().to_string();
        for entry in entries.iter_mut() {
            if entry.topic.filter().as_str() == filter {
                *entry = subscription;
                return AddOutcome::Replaced;
            }
        }
        entries.push(subscription);
        AddOutcome::Added
    }

    /// Record the QoS granted by the broker for `filter`.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn set_granted(&self, filter: &str, qos: QoS) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.iter_mut() {
            if entry.topic.filter().as_str() == filter {
                entry.granted_qos = Some(qos);
                return;
            }
        }
    }

    /// Remove the entry with exactly this filter string.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn remove(&self, filter: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|entry| entry.topic.filter().as_str() != filter);
        entries.len() != before
    }

    /// Drop every entry. Used when the broker reports no session after a
    /// reconnect.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Granted QoS of the entry with this exact filter string.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    #[must_use]
    pub fn granted_qos(&self, filter: &str) -> Option<QoS> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|entry| entry.topic.filter().as_str() == filter)
            .and_then(Subscription::granted_qos)
    }

    /// Handlers of all subscriptions matching `topic`, in insertion
    /// order.
    ///
    /// # Panics
    ///
    /// Panics if the inner mutex is poisoned.
    #[must_use]
    pub fn matching_handlers(&self, topic: &str) -> Vec<MessageHandler> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.topic.filter().matches(topic))
            .filter_map(|entry| entry.handler.clone())
            .collect()
    }

    /// Dispatch `publish` to every matching per-filter handler.
    pub fn dispatch(&self, publish: &PublishPacket) {
        for handler in self.matching_handlers(publish.topic()) {
            handler(publish);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn topic(filter: &str, qos: QoS) -> SubscribeTopic {
        SubscribeTopic::new(filter, qos).unwrap()
    }

    #[test]
    fn test_replace_by_exact_filter() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(
            registry.add(topic("x/#", QoS::AtMostOnce), None),
            AddOutcome::Added
        );
        assert_eq!(
            registry.add(topic("x/#", QoS::AtLeastOnce), None),
            AddOutcome::Replaced
        );
        assert_eq!(registry.len(), 1);

        registry.set_granted("x/#", QoS::AtLeastOnce);
        assert_eq!(registry.granted_qos("x/#"), Some(QoS::AtLeastOnce));
    }

    #[test]
    fn test_overlapping_filters_are_distinct() {
        let registry = SubscriptionRegistry::new();
        registry.add(topic("a/+", QoS::AtMostOnce), None);
        registry.add(topic("a/b", QoS::AtMostOnce), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_dispatch_in_insertion_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (index, filter) in ["sensors/#", "sensors/+"].iter().enumerate() {
            let order = Arc::clone(&order);
            let handler: MessageHandler = Arc::new(move |_publish| {
                order.lock().unwrap().push(index);
            });
            registry.add(topic(filter, QoS::AtMostOnce), Some(handler));
        }

        let publish = PublishPacket::new("sensors/temp", QoS::AtMostOnce, b"1").unwrap();
        registry.dispatch(&publish);
        assert_eq!(*order.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_handler_fires_once_after_replace() {
        let registry = SubscriptionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let count = Arc::clone(&count);
            let handler: MessageHandler = Arc::new(move |_publish| {
                count.fetch_add(1, Ordering::SeqCst);
            });
            registry.add(topic("z", QoS::AtLeastOnce), Some(handler));
        }

        let publish = PublishPacket::new("z", QoS::AtMostOnce, b"m").unwrap();
        registry.dispatch(&publish);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let registry = SubscriptionRegistry::new();
        registry.add(topic("a/b", QoS::AtLeastOnce), None);
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.matching_handlers("a/b").is_empty());
    }
}
