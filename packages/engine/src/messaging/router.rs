// packages/engine/src/messaging/router.rs
//! Message routing
//!
//! Resolves destinations against the registry's primary map and pushes
//! envelopes into mailboxes. Misses are dropped silently (traced), or offered
//! to the remote bridge when one is attached:
//!
//! | operation      | forwarded to the bridge when        |
//! |----------------|-------------------------------------|
//! | `send`         | the receiver id is unknown locally  |
//! |                | (not even pending reconciliation)   |
//! | `send_by_name` | nothing was delivered locally       |
//! | `broadcast`    | always                              |
//!
//! Traffic that came in from the bridge is never forwarded again.

use crate::messaging::message::{Message, Payload};
use crate::remote::bridge::{RemoteBridge, RemoteEnvelope, RoutingMode};
use crate::runtime::agent::AgentId;
use crate::runtime::registry::Registry;
use tracing::{trace, warn};

/// Where a direct send ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Local,
    Forwarded,
    Dropped,
}

#[derive(Clone, Copy)]
pub struct Router<'a> {
    registry: &'a Registry,
    bridge: Option<&'a dyn RemoteBridge>,
    forward: bool,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            bridge: None,
            forward: true,
        }
    }

    pub fn with_bridge(mut self, bridge: Option<&'a dyn RemoteBridge>) -> Self {
        self.bridge = bridge;
        self
    }

    /// Router for traffic that arrived through the bridge
    pub(crate) fn inbound(mut self) -> Self {
        self.forward = false;
        self
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn bridge(&self) -> Option<&'a dyn RemoteBridge> {
        self.bridge
    }

    pub fn send(&self, sender: AgentId, receiver: AgentId, payload: Payload) -> Delivery {
        match self.registry.get(receiver) {
            Some(entry) if entry.is_dead() => {
                trace!("Dropping message from {} to dead agent {}", sender, receiver);
                Delivery::Dropped
            }
            Some(entry) => {
                if entry.post(Message::new(sender, receiver, payload)) {
                    trace!("Delivered message {} -> {}", sender, receiver);
                    Delivery::Local
                } else {
                    Delivery::Dropped
                }
            }
            None if self.registry.is_pending(receiver) => {
                trace!("Dropping message from {} to unreconciled agent {}", sender, receiver);
                Delivery::Dropped
            }
            None => {
                if self.forward_remote(sender, RoutingMode::Direct { receiver }, payload) {
                    Delivery::Forwarded
                } else {
                    trace!("Dropping message from {} to unknown agent {}", sender, receiver);
                    Delivery::Dropped
                }
            }
        }
    }

    /// Deliver by exact name or name fragment; returns local deliveries
    pub fn send_by_name(
        &self,
        sender: AgentId,
        name: &str,
        payload: Payload,
        is_fragment: bool,
        first_only: bool,
    ) -> usize {
        let candidates = if is_fragment {
            self.registry.lookup_by_fragment(name, false)
        } else {
            self.registry.lookup_by_name(name, false)
        };

        let mut delivered = 0;
        for id in candidates {
            let Some(entry) = self.registry.get(id) else {
                continue;
            };
            if entry.is_dead() {
                continue;
            }
            if entry.post(Message::new(sender, id, payload.clone())) {
                delivered += 1;
                if first_only {
                    break;
                }
            }
        }

        if delivered == 0 {
            let routing = if is_fragment {
                RoutingMode::ByFragment {
                    fragment: name.to_string(),
                    first_only,
                }
            } else {
                RoutingMode::ByName {
                    name: name.to_string(),
                    first_only,
                }
            };
            if !self.forward_remote(sender, routing, payload) {
                trace!("No agent matched '{}' for message from {}", name, sender);
            }
        }
        delivered
    }

    /// Deliver to every live agent except the sender; returns local deliveries
    pub fn broadcast(&self, sender: AgentId, payload: Payload) -> usize {
        let mut delivered = 0;
        for entry in self.registry.iter() {
            if entry.id() == sender || entry.is_dead() {
                continue;
            }
            if entry.post(Message::new(sender, entry.id(), payload.clone())) {
                delivered += 1;
            }
        }
        self.forward_remote(sender, RoutingMode::Broadcast, payload);
        trace!("Broadcast from {} reached {} local agents", sender, delivered);
        delivered
    }

    /// Route an envelope according to its routing mode
    pub fn route(&self, envelope: RemoteEnvelope) {
        let RemoteEnvelope {
            sender,
            routing,
            payload,
            ..
        } = envelope;
        match routing {
            RoutingMode::Direct { receiver } => {
                self.send(sender, receiver, payload);
            }
            RoutingMode::ByName { name, first_only } => {
                self.send_by_name(sender, &name, payload, false, first_only);
            }
            RoutingMode::ByFragment {
                fragment,
                first_only,
            } => {
                self.send_by_name(sender, &fragment, payload, true, first_only);
            }
            RoutingMode::Broadcast => {
                self.broadcast(sender, payload);
            }
        }
    }

    fn forward_remote(&self, sender: AgentId, routing: RoutingMode, payload: Payload) -> bool {
        if !self.forward {
            return false;
        }
        let Some(bridge) = self.bridge else {
            return false;
        };

        let envelope = RemoteEnvelope {
            origin: bridge.environment_id().to_string(),
            sender,
            routing,
            payload,
        };
        match bridge.forward(envelope) {
            Ok(()) => true,
            Err(e) => {
                warn!("Bridge failed to forward message from {}: {}", sender, e);
                false
            }
        }
    }
}
