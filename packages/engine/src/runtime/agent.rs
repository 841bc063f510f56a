// packages/engine/src/runtime/agent.rs
//! Agents: behavior trait, identity, and the registry-held agent cell
//!
//! # Lifecycle
//!
//! ```text
//! register ──► AwaitingSetup ──setup()──► Active ──stop()/remove()──► Dead ──reconcile──► reaped
//!                                         │    ▲
//!                                         └────┘ perceive? → act(msg)* | idle_act()
//! ```
//!
//! An [`AgentEntry`] is shared (`Arc`) between the registry and worker threads.
//! The behavior and the pop side of the mailbox sit behind one mutex, so a
//! single agent's step always runs on one thread at a time. Everything other
//! agents may touch concurrently (flags, mailbox push side, observables) lives
//! outside that mutex.

use crate::messaging::mailbox::{mailbox, Mailbox, MailboxSender, MailboxStats};
use crate::messaging::message::Message;
use crate::messaging::router::Router;
use crate::runtime::context::AgentContext;
use crate::utils::errors::{EngineError, Phase, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;
use ulid::Ulid;

/// Observable state an agent exposes to its peers' perception step
pub type Observables = BTreeMap<String, serde_json::Value>;

/// Return type of every behavior hook
pub type BehaviorResult = anyhow::Result<()>;

/// Globally unique agent identifier, assigned when the agent is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Ulid);

impl AgentId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Sender id for messages injected from outside any agent
    pub fn external() -> Self {
        Self(Ulid::nil())
    }

    pub fn is_external(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for AgentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// User-supplied agent behavior
///
/// Every hook has a no-op default. Hooks returning an error (or panicking)
/// abort the current turn; the error reaches the caller of
/// [`Environment::start`](crate::runtime::environment::Environment::start)
/// tagged with the agent's id, name and the hook that failed.
pub trait Agent: Send + 'static {
    /// Whether this agent takes part in perception. Read once at registration.
    fn uses_observables(&self) -> bool {
        false
    }

    /// Decide whether another agent's observables are visible to this one
    fn perception_filter(&self, _own: &Observables, _observed: &Observables) -> bool {
        false
    }

    /// Runs once, the first turn the agent is scheduled
    fn setup(&mut self, _ctx: &AgentContext<'_>) -> BehaviorResult {
        Ok(())
    }

    /// Runs before the mailbox is drained, for agents using observables
    fn perceive(&mut self, _ctx: &AgentContext<'_>, _visible: &[Arc<Observables>]) -> BehaviorResult {
        Ok(())
    }

    /// Runs once per drained message
    fn act(&mut self, _ctx: &AgentContext<'_>, _message: Message) -> BehaviorResult {
        Ok(())
    }

    /// Runs when the mailbox was empty at the start of the step
    fn idle_act(&mut self, _ctx: &AgentContext<'_>) -> BehaviorResult {
        Ok(())
    }
}

/// What a single lifecycle step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Agent was already dead
    Skipped,
    SetUp,
    /// Agent stopped itself while perceiving
    Perceived,
    Acted { messages: usize },
    Idled,
}

/// State only the agent's own step touches
pub(crate) struct AgentSlot {
    /// User-supplied behavior
    behavior: Box<dyn Agent>,

    /// Consumer side of the agent's mailbox
    mailbox: Mailbox,
}

/// Registry cell for one agent
pub struct AgentEntry {
    /// Unique id, fixed at construction
    id: AgentId,

    /// Display name, not unique
    name: String,

    /// Cached from [`Agent::uses_observables`] at registration
    uses_observables: bool,

    /// Set once `setup` has returned successfully
    setup_done: AtomicBool,

    /// Set when the agent is stopped or removed
    dead: AtomicBool,

    /// Published snapshot; writers swap in a modified copy
    observables: RwLock<Arc<Observables>>,

    /// Producer side of the mailbox, used by the router
    sender: MailboxSender,

    /// Locked for the duration of a step
    slot: Mutex<AgentSlot>,
}

impl AgentEntry {
    pub(crate) fn new(name: String, behavior: Box<dyn Agent>) -> Self {
        let (sender, mailbox) = mailbox();
        Self {
            id: AgentId::new(),
            name,
            uses_observables: behavior.uses_observables(),
            setup_done: AtomicBool::new(false),
            dead: AtomicBool::new(false),
            observables: RwLock::new(Arc::new(Observables::new())),
            sender,
            slot: Mutex::new(AgentSlot { behavior, mailbox }),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `setup` has already run
    pub fn is_setup(&self) -> bool {
        self.setup_done.load(Ordering::Acquire)
    }

    /// Whether the agent is marked for removal
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Whether the agent takes part in perception
    pub fn uses_observables(&self) -> bool {
        self.uses_observables
    }

    /// Mark for removal. Idempotent; the entry is reaped at the next reconciliation.
    pub fn stop(&self) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            trace!("Agent {} ({}) marked dead", self.name, self.id);
        }
    }

    /// Current observable snapshot
    pub fn observables(&self) -> Arc<Observables> {
        Arc::clone(&self.observables.read())
    }

    pub(crate) fn update_observables<F>(&self, update: F)
    where
        F: FnOnce(&mut Observables),
    {
        let mut guard = self.observables.write();
        update(Arc::make_mut(&mut guard));
    }

    /// Messages waiting in the mailbox
    pub fn mailbox_len(&self) -> usize {
        self.sender.len()
    }

    /// Pushed / popped / dropped counters of the mailbox
    pub fn mailbox_stats(&self) -> MailboxStats {
        self.sender.stats()
    }

    pub(crate) fn post(&self, message: Message) -> bool {
        self.sender.push(message)
    }

    /// Run one lifecycle step for `turn`
    pub(crate) fn run_step(&self, router: Router<'_>, turn: u64) -> Result<StepOutcome> {
        if self.is_dead() {
            return Ok(StepOutcome::Skipped);
        }

        let mut slot = self.slot.lock();
        let AgentSlot { behavior, mailbox } = &mut *slot;
        let ctx = AgentContext::new(self, router, turn);

        if !self.is_setup() {
            self.guarded(Phase::Setup, || behavior.setup(&ctx))?;
            self.setup_done.store(true, Ordering::Release);
            return Ok(StepOutcome::SetUp);
        }

        if self.uses_observables {
            let own = self.observables();
            self.guarded(Phase::Perceive, || {
                let visible = router
                    .registry()
                    .observable_snapshots(self.id, |observed| {
                        behavior.perception_filter(&own, observed)
                    });
                behavior.perceive(&ctx, &visible)
            })?;
            if self.is_dead() {
                return Ok(StepOutcome::Perceived);
            }
        }

        let Some(first) = mailbox.try_pop() else {
            self.guarded(Phase::IdleAct, || behavior.idle_act(&ctx))?;
            return Ok(StepOutcome::Idled);
        };

        let mut handled = 0;
        let mut next = Some(first);
        while let Some(message) = next {
            self.guarded(Phase::Act, || behavior.act(&ctx, message))?;
            handled += 1;
            if self.is_dead() {
                break;
            }
            next = mailbox.try_pop();
        }
        Ok(StepOutcome::Acted { messages: handled })
    }

    fn guarded<F>(&self, phase: Phase, hook: F) -> Result<()>
    where
        F: FnOnce() -> BehaviorResult,
    {
        match panic::catch_unwind(AssertUnwindSafe(hook)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(EngineError::AgentFault {
                id: self.id,
                name: self.name.clone(),
                phase,
                source: source.into(),
            }),
            Err(payload) => Err(EngineError::AgentPanicked {
                id: self.id,
                name: self.name.clone(),
                phase,
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

impl fmt::Debug for AgentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("setup", &self.is_setup())
            .field("dead", &self.is_dead())
            .field("mailbox", &self.mailbox_len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
