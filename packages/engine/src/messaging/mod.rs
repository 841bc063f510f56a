// packages/engine/src/messaging/mod.rs
//! Messages, mailboxes and routing
//!
//! - **Message**: immutable envelope (sender, receiver, payload + format tag)
//! - **Mailbox**: per-agent MPSC queue; producers only ever get a push handle
//! - **Router**: id / name / name-fragment / broadcast delivery over the registry
//!
//! Delivery is in-process, at-most-once and FIFO per sender/receiver pair.
//! Messages pushed while the receiver is draining may be seen in the same turn
//! or the next one.

pub mod mailbox;
pub mod message;
pub mod router;

pub use mailbox::{mailbox, Mailbox, MailboxSender, MailboxStats};
pub use message::{Message, Payload, PayloadFormat};
pub use router::{Delivery, Router};
