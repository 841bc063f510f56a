// packages/engine/src/remote/loopback.rs
//! In-process bridge
//!
//! A [`LoopbackHub`] is a table from environment id to inbox. Each
//! environment connects once and gets a [`LoopbackBridge`]; forwarded
//! messages fan out to every other connected environment, migrations go to
//! the named one. Dropping a bridge disconnects it.

use crate::remote::bridge::{AgentTransfer, RemoteBridge, RemoteEnvelope, RemoteEvent};
use crate::utils::errors::{EngineError, Result};
use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    inboxes: Arc<DashMap<String, Sender<RemoteEvent>>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an environment. Reconnecting an id replaces its inbox.
    pub fn connect(&self, environment_id: impl Into<String>) -> LoopbackBridge {
        let environment_id = environment_id.into();
        let (tx, rx) = crossbeam_channel::unbounded();

        info!("Environment {} connected to loopback hub", environment_id);
        self.inboxes.insert(environment_id.clone(), tx);

        LoopbackBridge {
            environment_id,
            hub: self.clone(),
            inbox: rx,
        }
    }

    /// Connected environment ids, sorted
    pub fn environments(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inboxes.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    fn deliver(&self, destination: &str, event: RemoteEvent) -> Result<()> {
        let inbox = self
            .inboxes
            .get(destination)
            .ok_or_else(|| EngineError::UnknownEnvironment(destination.to_string()))?;
        inbox
            .send(event)
            .map_err(|_| EngineError::UnknownEnvironment(destination.to_string()))
    }
}

#[derive(Debug)]
pub struct LoopbackBridge {
    environment_id: String,
    hub: LoopbackHub,
    inbox: Receiver<RemoteEvent>,
}

impl RemoteBridge for LoopbackBridge {
    fn environment_id(&self) -> &str {
        &self.environment_id
    }

    fn environments(&self) -> Vec<String> {
        self.hub.environments()
    }

    fn forward(&self, envelope: RemoteEnvelope) -> Result<()> {
        let peers: Vec<String> = self
            .hub
            .environments()
            .into_iter()
            .filter(|id| *id != self.environment_id)
            .collect();

        for peer in &peers {
            self.hub.deliver(peer, RemoteEvent::Message(envelope.clone()))?;
        }
        debug!(
            "Forwarded message from {} to {} peer environments",
            envelope.sender,
            peers.len()
        );
        Ok(())
    }

    fn migrate(&self, destination: &str, transfer: AgentTransfer) -> Result<()> {
        debug!("Migrating agent {} to {}", transfer.name, destination);
        self.hub.deliver(destination, RemoteEvent::Agent(transfer))
    }

    fn poll(&self) -> Vec<RemoteEvent> {
        self.inbox.try_iter().collect()
    }
}

impl Drop for LoopbackBridge {
    fn drop(&mut self) {
        self.hub.inboxes.remove(&self.environment_id);
    }
}
