// packages/engine/src/remote/mod.rs
//! Bridge between independent environments
//!
//! The core only depends on the [`RemoteBridge`] contract: forward traffic it
//! could not deliver locally, hand over migrating agents, and report inbound
//! events when polled. [`LoopbackHub`] implements it in-process, which is what
//! the tests and the demo binary use; a networked broker would implement the
//! same trait.

pub mod bridge;
pub mod loopback;

pub use bridge::{AgentFactory, AgentTransfer, RemoteBridge, RemoteEnvelope, RemoteEvent, RoutingMode};
pub use loopback::{LoopbackBridge, LoopbackHub};
