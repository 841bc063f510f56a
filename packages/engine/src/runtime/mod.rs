// packages/engine/src/runtime/mod.rs
//! Agent execution runtime
//!
//! This module provides the turn-based scheduling core, including:
//!
//! - **Agent**: behavior trait and the registry-held agent cell
//! - **Context**: the capability handed to every behavior hook
//! - **Registry**: id / name indexes with buffered insertion and reaping
//! - **Worker Pool**: work-stealing barrier for parallel turns
//! - **Environment**: the turn loop, execution modes and lifecycle callbacks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Environment                        │
//! │   seeded RNG ─► dispatch order ─► Worker Pool / inline  │
//! │                      │                                  │
//! │         ┌────────────┼────────────┐                     │
//! │         ▼            ▼            ▼                     │
//! │   ┌──────────┐ ┌──────────┐ ┌──────────┐                │
//! │   │ Agent A  │ │ Agent B  │ │ Agent C  │  ...           │
//! │   │ mailbox  │ │ mailbox  │ │ mailbox  │                │
//! │   └──────────┘ └──────────┘ └──────────┘                │
//! │         ▲            ▲            ▲                     │
//! │         └──── Router (reads Registry) ────┘             │
//! │                      │                                  │
//! │     Registry: read-only during a turn, written only     │
//! │     by reconciliation between turns                     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod context;
pub mod environment;
pub mod registry;
pub mod worker_pool;

// Re-export commonly used types
pub use agent::{Agent, AgentEntry, AgentId, BehaviorResult, Observables, StepOutcome};
pub use context::AgentContext;
pub use environment::{Environment, EnvironmentHooks, ExecutionMode, RunSummary, TurnReport};
pub use registry::{ReconcileStats, Registry};
pub use worker_pool::WorkerPool;
