// packages/engine/src/utils/errors.rs
//! Engine error type
//!
//! Routing misses are not errors (they are dropped and traced). Everything
//! here is either a configuration problem, a bridge problem, or a fault raised
//! by agent behavior while a turn was being dispatched.

use crate::messaging::message::PayloadFormat;
use crate::runtime::agent::AgentId;
use std::fmt;
use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Lifecycle phase a behavior hook was running in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Perceive,
    Act,
    IdleAct,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Setup => "setup",
            Phase::Perceive => "perceive",
            Phase::Act => "act",
            Phase::IdleAct => "idle_act",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("agent {name} ({id}) failed during {phase}: {source}")]
    AgentFault {
        id: AgentId,
        name: String,
        phase: Phase,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("agent {name} ({id}) panicked during {phase}: {message}")]
    AgentPanicked {
        id: AgentId,
        name: String,
        phase: Phase,
        message: String,
    },

    #[error("worker thread panicked outside of an agent step")]
    WorkerPanicked,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("no remote bridge attached to this environment")]
    BridgeUnavailable,

    #[error("unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("no agent factory registered for inbound agents")]
    FactoryMissing,

    #[error("failed to restore migrated agent: {0}")]
    AgentRestoreFailed(String),

    #[error("failed to encode payload: {0}")]
    PayloadEncode(String),

    #[error("failed to decode payload: {0}")]
    PayloadDecode(String),

    #[error("payload format {0:?} has no in-core codec")]
    UnsupportedFormat(PayloadFormat),
}

impl EngineError {
    /// Id of the agent whose behavior caused this error, if any
    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            EngineError::AgentFault { id, .. } | EngineError::AgentPanicked { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}
