// packages/engine/src/remote/bridge.rs
//! Remote bridge contract

use crate::messaging::message::Payload;
use crate::runtime::agent::{Agent, AgentId};
use crate::utils::errors::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// How a forwarded message should be resolved on the far side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoutingMode {
    Direct { receiver: AgentId },
    ByName { name: String, first_only: bool },
    ByFragment { fragment: String, first_only: bool },
    Broadcast,
}

/// Message travelling between environments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    /// Environment the message left from
    pub origin: String,
    pub sender: AgentId,
    pub routing: RoutingMode,
    pub payload: Payload,
}

/// Serialized agent moving between environments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTransfer {
    pub name: String,

    /// Type tag the destination's [`AgentFactory`] dispatches on
    pub kind: String,

    /// Agent state, in whatever encoding the agent type chose
    pub state: Bytes,
}

/// Event delivered to an environment by its bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Message(RemoteEnvelope),
    Agent(AgentTransfer),
}

pub trait RemoteBridge: Send + Sync {
    /// Id of the environment this bridge belongs to
    fn environment_id(&self) -> &str;

    /// Every environment reachable through the bridge, this one included
    fn environments(&self) -> Vec<String>;

    /// Offer a message that could not be (fully) delivered locally
    fn forward(&self, envelope: RemoteEnvelope) -> Result<()>;

    /// Hand an agent to another environment
    fn migrate(&self, destination: &str, transfer: AgentTransfer) -> Result<()>;

    /// Drain inbound events without blocking
    fn poll(&self) -> Vec<RemoteEvent>;
}

/// Rebuilds concrete agents from inbound transfers
pub trait AgentFactory: Send + Sync {
    fn restore(&self, transfer: &AgentTransfer) -> anyhow::Result<Box<dyn Agent>>;
}

impl<F> AgentFactory for F
where
    F: Fn(&AgentTransfer) -> anyhow::Result<Box<dyn Agent>> + Send + Sync,
{
    fn restore(&self, transfer: &AgentTransfer) -> anyhow::Result<Box<dyn Agent>> {
        self(transfer)
    }
}
