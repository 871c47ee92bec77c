//! Trigger registry mapping exact inbound lines to canned replies.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Entries = HashMap<String, Vec<String>>;

/// Shared table of triggers and their ordered replies.
///
/// Cloning yields another handle onto the same table, so registrations made
/// through any handle are visible to every session.
#[derive(Debug, Clone, Default)]
pub struct TriggerRegistry {
    entries: Arc<RwLock<Entries>>,
}

impl TriggerRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) the reply list for `trigger`.
    ///
    /// Any replies previously registered for the same trigger are discarded.
    pub fn define(&self, trigger: impl Into<String>) -> ResponseBuilder {
        let trigger = trigger.into();
        self.write().insert(trigger.clone(), Vec::new());
        ResponseBuilder {
            registry: self.clone(),
            trigger,
        }
    }

    /// Appends `response` to the replies for `trigger`, creating the entry if
    /// it does not exist.
    pub fn register(&self, trigger: &str, response: impl Into<String>) {
        let response = response.into();
        let mut entries = self.write();
        if let Some(replies) = entries.get_mut(trigger) {
            replies.push(response);
        } else {
            entries.insert(trigger.to_owned(), vec![response]);
        }
    }

    /// Returns the replies for an exact match of `line`.
    #[must_use]
    pub fn lookup(&self, line: &str) -> Option<Vec<String>> {
        self.read().get(line).cloned()
    }

    /// Reports whether `trigger` has an entry, even one without replies.
    #[must_use]
    pub fn contains(&self, trigger: &str) -> bool {
        self.read().contains_key(trigger)
    }

    /// Returns the registered triggers in sorted order.
    #[must_use]
    pub fn triggers(&self) -> Vec<String> {
        let mut triggers: Vec<String> = self.read().keys().cloned().collect();
        triggers.sort_unstable();
        triggers
    }

    /// Number of registered triggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no trigger has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Chainable handle returned by [`TriggerRegistry::define`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    registry: TriggerRegistry,
    trigger: String,
}

impl ResponseBuilder {
    /// Appends one reply line and hands the builder back for chaining.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.registry.register(&self.trigger, text);
        self
    }

    /// The trigger this builder appends to.
    #[must_use]
    pub fn trigger(&self) -> &str {
        &self.trigger
    }
}
