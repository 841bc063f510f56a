// packages/engine/src/runtime/context.rs
//! Capability handed to agent behavior hooks
//!
//! Everything an agent can do to the world during its step goes through
//! here: messaging, spawning, stopping, lookups, observable updates and
//! migration. None of it touches the registry's primary map directly; spawns
//! and removals take effect at the next reconciliation.

use crate::messaging::message::Payload;
use crate::messaging::router::{Delivery, Router};
use crate::remote::bridge::AgentTransfer;
use crate::runtime::agent::{Agent, AgentEntry, AgentId, Observables};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Handle passed to every [`Agent`] hook for the duration of one step
pub struct AgentContext<'a> {
    /// The agent whose hook is running
    entry: &'a AgentEntry,

    /// Routing over the registry snapshot of this turn
    router: Router<'a>,

    /// Turn being executed
    turn: u64,
}

impl<'a> AgentContext<'a> {
    pub(crate) fn new(entry: &'a AgentEntry, router: Router<'a>, turn: u64) -> Self {
        Self {
            entry,
            router,
            turn,
        }
    }

    pub fn id(&self) -> AgentId {
        self.entry.id()
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Index of the turn being executed
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Stop this agent. No further hooks run after the current one returns.
    pub fn stop(&self) {
        self.entry.stop();
    }

    /// Send directly to `receiver`
    pub fn send(&self, receiver: AgentId, payload: Payload) -> Delivery {
        self.router.send(self.id(), receiver, payload)
    }

    /// Encode `value` as JSON and send it to `receiver`
    pub fn send_json<T: Serialize + ?Sized>(&self, receiver: AgentId, value: &T) -> Result<Delivery> {
        Ok(self.send(receiver, Payload::json(value)?))
    }

    /// Send to agents with exactly this name; returns local deliveries
    pub fn send_by_name(&self, name: &str, payload: Payload, first_only: bool) -> usize {
        self.router
            .send_by_name(self.id(), name, payload, false, first_only)
    }

    /// Send to agents whose name contains `fragment`; returns local deliveries
    pub fn send_by_fragment(&self, fragment: &str, payload: Payload, first_only: bool) -> usize {
        self.router
            .send_by_name(self.id(), fragment, payload, true, first_only)
    }

    /// Send to every other live agent; returns local deliveries
    pub fn broadcast(&self, payload: Payload) -> usize {
        self.router.broadcast(self.id(), payload)
    }

    /// Register a new agent. It becomes visible at the next reconciliation.
    pub fn spawn(&self, name: impl Into<String>, agent: impl Agent) -> AgentId {
        self.router.registry().register(name, Box::new(agent))
    }

    /// Mark another agent (or this one) for removal
    pub fn remove(&self, id: AgentId) -> bool {
        self.router.registry().remove(id)
    }

    /// Agents in the registry, including dead ones not yet reaped
    pub fn agents_count(&self) -> usize {
        self.router.registry().count()
    }

    /// Display name of a reconciled agent
    pub fn agent_name(&self, id: AgentId) -> Option<String> {
        self.router
            .registry()
            .get(id)
            .map(|entry| entry.name().to_string())
    }

    /// First reconciled agent registered under `name`
    pub fn first_agent_by_name(&self, name: &str) -> Option<AgentId> {
        self.router
            .registry()
            .lookup_by_name(name, true)
            .into_iter()
            .next()
    }

    pub fn agents_by_name(&self, name: &str) -> Vec<AgentId> {
        self.router.registry().lookup_by_name(name, false)
    }

    pub fn agents_by_fragment(&self, fragment: &str) -> Vec<AgentId> {
        self.router.registry().lookup_by_fragment(fragment, false)
    }

    /// This agent's published observables
    pub fn observables(&self) -> Arc<Observables> {
        self.entry.observables()
    }

    /// Publish or overwrite one observable value
    pub fn set_observable(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        let (key, value) = (key.into(), value.into());
        self.entry.update_observables(|obs| {
            obs.insert(key, value);
        });
    }

    pub fn remove_observable(&self, key: &str) {
        self.entry.update_observables(|obs| {
            obs.remove(key);
        });
    }

    /// Apply several observable changes as one snapshot swap
    pub fn update_observables<F>(&self, update: F)
    where
        F: FnOnce(&mut Observables),
    {
        self.entry.update_observables(update);
    }

    /// Id of the environment as known to the attached bridge
    pub fn environment_id(&self) -> Option<&str> {
        self.router.bridge().map(|bridge| bridge.environment_id())
    }

    /// Environments reachable through the bridge, this one included
    pub fn environments(&self) -> Vec<String> {
        self.router
            .bridge()
            .map(|bridge| bridge.environments())
            .unwrap_or_default()
    }

    /// Hand this agent's serialized state to another environment, then stop.
    ///
    /// `kind` tells the destination's agent factory which type to rebuild.
    pub fn migrate(&self, destination: &str, kind: &str, state: impl Into<Bytes>) -> Result<()> {
        let bridge = self.router.bridge().ok_or(EngineError::BridgeUnavailable)?;
        let transfer = AgentTransfer {
            name: self.name().to_string(),
            kind: kind.to_string(),
            state: state.into(),
        };
        bridge.migrate(destination, transfer)?;
        info!("Agent {} ({}) migrating to {}", self.name(), self.id(), destination);
        self.stop();
        Ok(())
    }
}
