//! Connection and registration bookkeeping for the coordinator.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::warn;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::{self, Capability, ClientId, ClientMessage, EntryId};

/// Outbound side of one connection.
#[derive(Debug)]
pub enum Outbox {
    /// In-process client reading typed messages.
    Typed(UnboundedSender<ClientMessage>),
    /// Client reading the JSON wire form.
    Wire(UnboundedSender<String>),
}

impl Outbox {
    /// Returns `false` when the receiving side is gone.
    fn deliver(&self, message: ClientMessage) -> bool {
        match self {
            Outbox::Typed(sender) => sender.send(message).is_ok(),
            Outbox::Wire(sender) => match protocol::encode_client_message(&message) {
                Ok(payload) => sender.send(payload).is_ok(),
                Err(err) => {
                    warn!("Coordinator: failed to encode outbound message: {}", err);
                    !sender.is_closed()
                }
            },
        }
    }
}

/// One registered client as seen by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRegistration {
    pub client_id: ClientId,
    pub capability: Capability,
    /// Monotonic registration order; the election tie-break.
    pub registration_seq: u64,
    pub last_seen: Instant,
    /// Entries this client resolved and has not unloaded.
    pub held: HashSet<EntryId>,
}

/// Attached connections keyed by client id, plus the registrations among them.
#[derive(Default)]
pub struct ClientRegistry {
    outboxes: HashMap<ClientId, Outbox>,
    registrations: HashMap<ClientId, ClientRegistration>,
    next_registration_seq: u64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the outbound channel for a connection. Replaces a stale one.
    pub fn attach(&mut self, client_id: ClientId, outbox: Outbox) {
        self.outboxes.insert(client_id, outbox);
    }

    /// Creates or refreshes a registration. Returns `None` when the client has
    /// no attached connection, `Some(true)` for a first registration.
    pub fn register(
        &mut self,
        client_id: &str,
        capability: Capability,
        now: Instant,
    ) -> Option<bool> {
        if !self.outboxes.contains_key(client_id) {
            return None;
        }
        if let Some(existing) = self.registrations.get_mut(client_id) {
            existing.capability = capability;
            existing.last_seen = now;
            return Some(false);
        }
        let registration_seq = self.next_registration_seq;
        self.next_registration_seq += 1;
        self.registrations.insert(
            client_id.to_string(),
            ClientRegistration {
                client_id: client_id.to_string(),
                capability,
                registration_seq,
                last_seen: now,
                held: HashSet::new(),
            },
        );
        Some(true)
    }

    /// Drops both the registration and the connection.
    pub fn remove(&mut self, client_id: &str) -> Option<ClientRegistration> {
        self.outboxes.remove(client_id);
        self.registrations.remove(client_id)
    }

    pub fn is_registered(&self, client_id: &str) -> bool {
        self.registrations.contains_key(client_id)
    }

    pub fn get(&self, client_id: &str) -> Option<&ClientRegistration> {
        self.registrations.get(client_id)
    }

    pub fn set_capability(&mut self, client_id: &str, capability: Capability) -> bool {
        match self.registrations.get_mut(client_id) {
            Some(registration) => {
                registration.capability = capability;
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, client_id: &str, now: Instant) {
        if let Some(registration) = self.registrations.get_mut(client_id) {
            registration.last_seen = now;
        }
    }

    pub fn hold(&mut self, client_id: &str, ids: impl IntoIterator<Item = EntryId>) {
        if let Some(registration) = self.registrations.get_mut(client_id) {
            registration.held.extend(ids);
        }
    }

    /// Drops `ids` from the client's holdings. Returns the ids no registered
    /// client holds anymore.
    pub fn unhold(&mut self, client_id: &str, ids: &[EntryId]) -> Vec<EntryId> {
        let Some(registration) = self.registrations.get_mut(client_id) else {
            return Vec::new();
        };
        let dropped: Vec<EntryId> = ids
            .iter()
            .filter(|id| registration.held.remove(*id))
            .cloned()
            .collect();
        self.unheld(dropped)
    }

    /// Filters `ids` down to the ones no registered client holds.
    pub fn unheld(&self, ids: impl IntoIterator<Item = EntryId>) -> Vec<EntryId> {
        ids.into_iter()
            .filter(|id| {
                !self
                    .registrations
                    .values()
                    .any(|registration| registration.held.contains(id))
            })
            .collect()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &ClientRegistration> {
        self.registrations.values()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Registered ids in registration order.
    pub fn registered_ids(&self) -> Vec<ClientId> {
        let mut registrations: Vec<&ClientRegistration> = self.registrations.values().collect();
        registrations.sort_by(|a, b| {
            a.registration_seq
                .cmp(&b.registration_seq)
                .then_with(|| a.client_id.cmp(&b.client_id))
        });
        registrations
            .into_iter()
            .map(|registration| registration.client_id.clone())
            .collect()
    }

    /// Registrations not heard from within `timeout`.
    pub fn stale(&self, now: Instant, timeout: Duration) -> Vec<ClientId> {
        let mut stale: Vec<ClientId> = self
            .registrations
            .values()
            .filter(|registration| now.saturating_duration_since(registration.last_seen) > timeout)
            .map(|registration| registration.client_id.clone())
            .collect();
        stale.sort();
        stale
    }

    /// Delivers one message. Returns `false` when the receiving side is gone.
    pub fn send(&self, client_id: &str, message: ClientMessage) -> bool {
        match self.outboxes.get(client_id) {
            Some(outbox) => outbox.deliver(message),
            None => false,
        }
    }
}
