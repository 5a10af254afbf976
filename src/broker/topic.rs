//! Topic management
//!
//! A `Topic` holds the subscriptions registered for one destination. A
//! subscriber is a session plus the subscription id that session chose, so one
//! session may subscribe to the same destination more than once.
//!
//! Callers must synchronize access (for example via the broker lock).

use std::collections::HashSet;

use crate::broker::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscriber {
    pub session: SessionId,
    pub subscription: String,
}

impl Subscriber {
    pub fn new(session: impl Into<SessionId>, subscription: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            subscription: subscription.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<Subscriber>,
}

impl Topic {
    /// Create a new topic with the given destination name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber. Duplicate adds are ignored.
    pub fn subscribe(&mut self, subscriber: Subscriber) {
        self.subscribers.insert(subscriber);
    }

    /// Remove a subscriber, returning whether it was present.
    pub fn unsubscribe(&mut self, subscriber: &Subscriber) -> bool {
        self.subscribers.remove(subscriber)
    }

    /// Remove every subscription held by `session`.
    pub fn remove_session(&mut self, session: &str) {
        self.subscribers.retain(|s| s.session != session);
    }
}
