//! Process-wide set of remote addresses with an authenticated session.
//!
//! Backed by a `DashSet` so sessions on any worker can add and remove
//! entries while observers take snapshots. Membership is tied to the
//! lifetime of a [`Registration`] guard held by the session task.

use crate::events::EventBus;
use dashmap::DashSet;
use rctl_core::Event;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Registry of authenticated clients, keyed by `ip:port`.
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: Arc<DashSet<String>>,
    events: EventBus,
}

impl ClientRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            clients: Arc::new(DashSet::new()),
            events,
        }
    }

    /// Insert `address`. Returns false if it was already present.
    pub fn add(&self, address: &str) -> bool {
        let inserted = self.clients.insert(address.to_string());
        if inserted {
            debug!(remote = %address, clients = self.clients.len(), "client registered");
            self.events.publish(Event::ClientConnected {
                address: address.to_string(),
            });
        }
        inserted
    }

    /// Remove `address`. Returns false if it was not present.
    pub fn remove(&self, address: &str) -> bool {
        let removed = self.clients.remove(address).is_some();
        if removed {
            debug!(remote = %address, clients = self.clients.len(), "client unregistered");
            self.events.publish(Event::ClientDisconnected {
                address: address.to_string(),
            });
        }
        removed
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.clients.iter().map(|a| a.key().clone()).collect()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.clients.contains(address)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Add `address` and return a guard that removes it on drop.
    ///
    /// Returns `None` if the address is already registered.
    pub fn register(&self, address: &str) -> Option<Registration> {
        self.add(address).then(|| Registration {
            registry: self.clone(),
            address: address.to_string(),
        })
    }
}

/// Scoped registry membership. Dropping it deregisters exactly once.
#[derive(Debug)]
pub struct Registration {
    registry: ClientRegistry,
    address: String,
}

impl Registration {
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.address);
    }
}
