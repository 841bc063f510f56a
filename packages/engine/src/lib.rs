// packages/engine/src/lib.rs
//! Troupe: a turn-based multi-agent runtime
//!
//! A population of message-driven agents is advanced through discrete global
//! turns. In each turn every live agent runs one lifecycle step: `setup` the
//! first time it is scheduled, then an optional `perceive` over its peers'
//! observable state followed by draining its mailbox through `act` (or a
//! single `idle_act` when the mailbox is empty).
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **runtime**: agents, registry, worker pool and the turn loop
//! - **messaging**: messages, per-agent mailboxes and routing
//! - **remote**: bridge contract for forwarding and migration between environments
//! - **observability**: tracing subscriber setup
//! - **utils**: configuration and the engine error type
//!
//! # Example
//!
//! ```
//! use troupe_engine::{Agent, AgentContext, BehaviorResult, Environment, Message, SchedulerConfig};
//!
//! struct Greeter;
//!
//! impl Agent for Greeter {
//!     fn setup(&mut self, ctx: &AgentContext<'_>) -> BehaviorResult {
//!         ctx.stop();
//!         Ok(())
//!     }
//! }
//!
//! let mut env = Environment::new(SchedulerConfig::sequential()).unwrap();
//! env.add("greeter", Greeter);
//! let summary = env.start().unwrap();
//! assert_eq!(summary.agents_remaining, 0);
//! ```

// Public module exports
pub mod messaging;
pub mod observability;
pub mod remote;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use messaging::{Delivery, Message, Payload, PayloadFormat};
pub use remote::{AgentFactory, AgentTransfer, LoopbackHub, RemoteBridge};
pub use runtime::{
    Agent, AgentContext, AgentId, BehaviorResult, Environment, EnvironmentHooks, ExecutionMode,
    Observables, Registry, RunSummary, TurnReport,
};
pub use utils::config::{EngineConfig, LoggingConfig, SchedulerConfig};
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
