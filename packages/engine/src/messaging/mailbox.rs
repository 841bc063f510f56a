// packages/engine/src/messaging/mailbox.rs
//! Per-agent mailbox
//!
//! Multi-producer / single-consumer queue over an unbounded crossbeam channel.
//! Producers hold a [`MailboxSender`] (push only); the owning agent holds the
//! [`Mailbox`] (pop only). Pops never block, so a drain loop that observed an
//! empty queue moves on instead of waiting.

use crate::messaging::message::Message;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

/// Create a connected sender/receiver pair
pub fn mailbox() -> (MailboxSender, Mailbox) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let counters = Arc::new(Counters::default());
    (
        MailboxSender {
            tx,
            counters: Arc::clone(&counters),
        },
        Mailbox { rx, counters },
    )
}

/// Push capability for a mailbox
#[derive(Debug, Clone)]
pub struct MailboxSender {
    tx: Sender<Message>,
    counters: Arc<Counters>,
}

impl MailboxSender {
    /// Enqueue a message. Returns false if the mailbox is gone.
    pub fn push(&self, message: Message) -> bool {
        match self.tx.send(message) {
            Ok(()) => {
                self.counters.pushed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Messages waiting to be drained
    pub(crate) fn len(&self) -> usize {
        self.tx.len()
    }

    /// Counters shared with the consumer side
    pub fn stats(&self) -> MailboxStats {
        MailboxStats::read(&self.counters, self.tx.len())
    }
}

/// Consumer side, owned by exactly one agent
#[derive(Debug)]
pub struct Mailbox {
    rx: Receiver<Message>,
    counters: Arc<Counters>,
}

impl Mailbox {
    /// Pop the oldest message without blocking
    pub fn try_pop(&self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(message) => {
                self.counters.popped.fetch_add(1, Ordering::Relaxed);
                Some(message)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Mailbox counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    /// Total messages enqueued
    pub pushed: u64,

    /// Total messages handed to the agent
    pub popped: u64,

    /// Pushes that found the mailbox closed
    pub dropped: u64,

    /// Messages currently queued
    pub pending: usize,
}

impl MailboxStats {
    fn read(counters: &Counters, pending: usize) -> Self {
        Self {
            pushed: counters.pushed.load(Ordering::Relaxed),
            popped: counters.popped.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            pending,
        }
    }
}
