// packages/engine/src/runtime/environment.rs
//! The scheduler: turn loop, execution order and lifecycle callbacks
//!
//! ```text
//! reconcile ─► ┌───────────────────────────── turn N ─────────────────────────────┐
//!              │ snapshot live ids ─► order ─► dispatch steps ─► barrier ─► delay  │
//!              │                                              ─► turn_finished(N)  │
//!              └──────────────────────────────────────────────────────────────────┘
//!          ─► absorb bridge events ─► reconcile ─► turn N+1 ... ─► simulation_finished
//! ```
//!
//! The seeded RNG is only advanced here, on the driving thread, so two
//! environments built with the same seed and population produce the same
//! dispatch orders. Message interleavings across parallel agents are not
//! reproducible.

use crate::messaging::message::Payload;
use crate::messaging::router::{Delivery, Router};
use crate::remote::bridge::{AgentFactory, AgentTransfer, RemoteBridge, RemoteEvent};
use crate::runtime::agent::{Agent, AgentEntry, AgentId, StepOutcome};
use crate::runtime::registry::Registry;
use crate::runtime::worker_pool::WorkerPool;
use crate::utils::config::SchedulerConfig;
use crate::utils::errors::{EngineError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// How agents are ordered and dispatched within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Insertion order, on the driving thread
    Sequential,
    /// Seeded shuffle, on the driving thread
    SequentialRandom,
    /// Seeded shuffle, on the worker pool
    #[default]
    Parallel,
}

impl ExecutionMode {
    pub fn is_randomized(&self) -> bool {
        matches!(self, ExecutionMode::SequentialRandom | ExecutionMode::Parallel)
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, ExecutionMode::Parallel)
    }
}

/// Callbacks for the embedding application
pub trait EnvironmentHooks: Send {
    fn turn_finished(&mut self, _turn: u64, _registry: &Registry) {}

    fn simulation_finished(&mut self, _registry: &Registry) {}
}

struct NoHooks;

impl EnvironmentHooks for NoHooks {}

/// What happened in one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub turn: u64,

    /// Agents in the order their steps were dispatched
    pub dispatch_order: Vec<AgentId>,

    /// Steps that ran a hook
    pub executed: usize,

    /// Agents found dead (or gone) when their step came up
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub turns: u64,
    pub agents_remaining: usize,
}

/// Scheduler owning the registry, the worker pool and the seeded RNG
pub struct Environment {
    /// Scheduler settings this environment was built with
    config: SchedulerConfig,

    /// Seed in use, configured or drawn from entropy
    seed: u64,

    /// Only advanced on the driving thread
    rng: StdRng,

    /// Agents, reconciled between turns
    registry: Registry,

    /// Used in parallel mode only
    pool: WorkerPool,

    /// Index of the next turn to run
    turn: u64,

    /// Embedding application callbacks
    hooks: Box<dyn EnvironmentHooks>,

    /// Link to other environments, if any
    bridge: Option<Arc<dyn RemoteBridge>>,

    /// Rebuilds agents migrating in through the bridge
    factory: Option<Arc<dyn AgentFactory>>,
}

impl Environment {
    /// Create an environment; fails if the configuration is invalid
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let pool = WorkerPool::new(config.worker_count());

        info!(
            "Environment created: mode={:?}, turn_limit={}, seed={}",
            config.mode, config.turn_limit, seed
        );

        Ok(Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            registry: Registry::new(),
            pool,
            turn: 0,
            hooks: Box::new(NoHooks),
            bridge: None,
            factory: None,
            config,
        })
    }

    /// Replace the default no-op lifecycle callbacks
    pub fn with_hooks(mut self, hooks: impl EnvironmentHooks + 'static) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Attach a bridge used for forwarding and migration
    pub fn with_bridge(mut self, bridge: impl RemoteBridge + 'static) -> Self {
        self.bridge = Some(Arc::new(bridge));
        self
    }

    /// Factory used to rebuild agents migrating in through the bridge
    pub fn with_factory(mut self, factory: impl AgentFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Scheduler settings in effect
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Seed actually in use (drawn from entropy if none was configured)
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Index of the next turn to run
    pub fn current_turn(&self) -> u64 {
        self.turn
    }

    /// Read access to the agent registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Id under which the attached bridge knows this environment
    pub fn environment_id(&self) -> Option<&str> {
        self.bridge.as_deref().map(|bridge| bridge.environment_id())
    }

    /// Register an agent; it is scheduled from the next reconciliation on
    pub fn add(&self, name: impl Into<String>, agent: impl Agent) -> AgentId {
        self.registry.register(name, Box::new(agent))
    }

    /// Register an already boxed agent
    pub fn add_boxed(&self, name: impl Into<String>, agent: Box<dyn Agent>) -> AgentId {
        self.registry.register(name, agent)
    }

    /// Look up a reconciled agent by id
    pub fn get(&self, id: AgentId) -> Option<&Arc<AgentEntry>> {
        self.registry.get(id)
    }

    /// Mark an agent for removal at the next reconciliation
    pub fn remove(&self, id: AgentId) -> bool {
        self.registry.remove(id)
    }

    /// Agents in the primary map, including dead ones not yet reaped
    pub fn agents_count(&self) -> usize {
        self.registry.count()
    }

    /// Display name of a reconciled agent
    pub fn agent_name(&self, id: AgentId) -> Option<&str> {
        self.registry.get(id).map(|entry| entry.name())
    }

    /// First agent registered under `name`
    pub fn first_agent_by_name(&self, name: &str) -> Option<AgentId> {
        self.registry.lookup_by_name(name, true).into_iter().next()
    }

    pub fn lookup_by_name(&self, name: &str, first_only: bool) -> Vec<AgentId> {
        self.registry.lookup_by_name(name, first_only)
    }

    pub fn lookup_by_fragment(&self, fragment: &str, first_only: bool) -> Vec<AgentId> {
        self.registry.lookup_by_fragment(fragment, first_only)
    }

    /// Uniformly pick a live agent with the environment's seeded RNG
    pub fn random_agent(&mut self) -> Option<AgentId> {
        self.registry
            .random_live_agent(&mut self.rng)
            .map(|entry| entry.id())
    }

    /// Router for messages injected from outside any agent
    pub fn router(&self) -> Router<'_> {
        Router::new(&self.registry).with_bridge(self.bridge.as_deref())
    }

    /// Direct send; use [`AgentId::external`] as sender from outside the simulation
    pub fn send(&self, sender: AgentId, receiver: AgentId, payload: Payload) -> Delivery {
        self.router().send(sender, receiver, payload)
    }

    pub fn send_by_name(
        &self,
        sender: AgentId,
        name: &str,
        payload: Payload,
        is_fragment: bool,
        first_only: bool,
    ) -> usize {
        self.router()
            .send_by_name(sender, name, payload, is_fragment, first_only)
    }

    /// Deliver to every live agent but `sender`
    pub fn broadcast(&self, sender: AgentId, payload: Payload) -> usize {
        self.router().broadcast(sender, payload)
    }

    /// Rebuild and register an agent that migrated in
    pub fn on_new_agent(&self, transfer: &AgentTransfer) -> Result<AgentId> {
        let factory = self.factory.as_ref().ok_or(EngineError::FactoryMissing)?;
        let agent = factory
            .restore(transfer)
            .map_err(|e| EngineError::AgentRestoreFailed(format!("{}: {}", transfer.name, e)))?;
        let id = self.registry.register(transfer.name.clone(), agent);
        info!("Agent {} ({}) arrived as {}", transfer.name, transfer.kind, id);
        Ok(id)
    }

    /// Run with the configured turn limit
    pub fn start(&mut self) -> Result<RunSummary> {
        self.continue_simulation(self.config.turn_limit)
    }

    /// Run `turns` more turns (0 = until no agent is left). The turn counter
    /// carries on from previous runs.
    pub fn continue_simulation(&mut self, turns: u64) -> Result<RunSummary> {
        let first_turn = self.turn;
        info!(
            "Simulation running from turn {} ({} turns, {:?}, {} workers)",
            first_turn,
            turns,
            self.config.mode,
            self.pool.num_workers()
        );

        self.reconcile();
        while !self.registry.is_empty() {
            if let Err(e) = self.execute_turn() {
                error!("Turn {} aborted: {}", self.turn, e);
                return Err(e);
            }
            self.reconcile();

            if turns != 0 && self.turn - first_turn >= turns {
                break;
            }
        }

        let summary = RunSummary {
            turns: self.turn - first_turn,
            agents_remaining: self.registry.count(),
        };
        info!(
            "Simulation finished after {} turns, {} agents remaining",
            summary.turns, summary.agents_remaining
        );
        self.hooks.simulation_finished(&self.registry);
        Ok(summary)
    }

    /// Reconcile, run a single turn, reconcile again
    pub fn run_turn(&mut self) -> Result<TurnReport> {
        self.reconcile();
        let report = self.execute_turn()?;
        self.reconcile();
        Ok(report)
    }

    fn execute_turn(&mut self) -> Result<TurnReport> {
        let turn = self.turn;
        let dispatch_order = self.dispatch_order();
        let entries: Vec<Arc<AgentEntry>> = dispatch_order
            .iter()
            .filter_map(|id| self.registry.get(*id).cloned())
            .collect();
        let missing = dispatch_order.len() - entries.len();
        debug!("Turn {}: dispatching {} agents", turn, entries.len());

        let router = Router::new(&self.registry).with_bridge(self.bridge.as_deref());
        let outcomes = if self.config.mode.is_parallel() {
            self.pool
                .dispatch(entries, |entry| entry.run_step(router, turn))?
        } else {
            entries
                .iter()
                .map(|entry| entry.run_step(router, turn))
                .collect::<Result<Vec<_>>>()?
        };

        let skipped = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, StepOutcome::Skipped))
            .count()
            + missing;
        let report = TurnReport {
            turn,
            executed: outcomes.len() + missing - skipped,
            skipped,
            dispatch_order,
        };

        let delay = self.config.delay_after_turn();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.turn += 1;
        self.hooks.turn_finished(turn, &self.registry);
        Ok(report)
    }

    fn dispatch_order(&mut self) -> Vec<AgentId> {
        let mut ids = self.registry.live_ids();
        if self.config.mode.is_randomized() {
            ids.shuffle(&mut self.rng);
        }
        ids
    }

    /// Absorb bridge traffic, then apply buffered registry changes
    fn reconcile(&mut self) {
        if let Some(bridge) = self.bridge.as_deref() {
            let inbound = Router::new(&self.registry).inbound();
            for event in bridge.poll() {
                match event {
                    RemoteEvent::Message(envelope) => inbound.route(envelope),
                    RemoteEvent::Agent(transfer) => {
                        if let Err(e) = self.on_new_agent(&transfer) {
                            warn!("Dropping inbound agent {}: {}", transfer.name, e);
                        }
                    }
                }
            }
        }
        self.registry.reconcile();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::Message;
    use crate::runtime::agent::BehaviorResult;
    use crate::runtime::context::AgentContext;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Idle;
    impl Agent for Idle {}

    /// Stops after a fixed number of idle turns
    struct Countdown(u32);

    impl Agent for Countdown {
        fn idle_act(&mut self, ctx: &AgentContext<'_>) -> BehaviorResult {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                ctx.stop();
            }
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        turns: Arc<Mutex<Vec<u64>>>,
        finished: Arc<AtomicU64>,
    }

    impl EnvironmentHooks for Recorder {
        fn turn_finished(&mut self, turn: u64, _registry: &Registry) {
            self.turns.lock().push(turn);
        }

        fn simulation_finished(&mut self, _registry: &Registry) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Echo;

    impl Agent for Echo {
        fn act(&mut self, ctx: &AgentContext<'_>, message: Message) -> BehaviorResult {
            if !message.sender().is_external() {
                ctx.send(message.sender(), message.payload().clone());
            }
            Ok(())
        }
    }

    fn sequential(turns: u64) -> SchedulerConfig {
        SchedulerConfig::sequential().with_turn_limit(turns).with_seed(1)
    }

    #[test]
    fn test_mode_flags() {
        assert!(!ExecutionMode::Sequential.is_randomized());
        assert!(ExecutionMode::SequentialRandom.is_randomized());
        assert!(ExecutionMode::Parallel.is_randomized());
        assert!(ExecutionMode::Parallel.is_parallel());
        assert!(!ExecutionMode::SequentialRandom.is_parallel());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig::default().with_workers(0);
        assert!(Environment::new(config).is_err());
    }

    #[test]
    fn test_turn_limit_and_hooks() {
        let hooks = Recorder::default();
        let mut env = Environment::new(sequential(3)).unwrap().with_hooks(hooks.clone());
        env.add("idle", Idle);

        let summary = env.start().unwrap();
        assert_eq!(summary.turns, 3);
        assert_eq!(summary.agents_remaining, 1);
        assert_eq!(*hooks.turns.lock(), vec![0, 1, 2]);
        assert_eq!(hooks.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unbounded_run_ends_when_registry_empties() {
        let mut env = Environment::new(sequential(0)).unwrap();
        env.add("short", Countdown(2));
        env.add("long", Countdown(4));

        let summary = env.start().unwrap();
        // setup turn + 4 idle turns for the longest agent
        assert_eq!(summary.turns, 5);
        assert_eq!(summary.agents_remaining, 0);
    }

    #[test]
    fn test_continue_keeps_counting() {
        let mut env = Environment::new(sequential(2)).unwrap();
        env.add("idle", Idle);

        env.start().unwrap();
        assert_eq!(env.current_turn(), 2);
        let summary = env.continue_simulation(3).unwrap();
        assert_eq!(summary.turns, 3);
        assert_eq!(env.current_turn(), 5);
    }

    #[test]
    fn test_empty_environment_runs_no_turns() {
        let mut env = Environment::new(sequential(5)).unwrap();
        assert_eq!(env.start().unwrap().turns, 0);
    }

    #[test]
    fn test_sequential_order_is_insertion_order() {
        let mut env = Environment::new(sequential(1)).unwrap();
        let ids: Vec<AgentId> = ["c", "a", "b"].iter().map(|n| env.add(*n, Idle)).collect();

        let report = env.run_turn().unwrap();
        assert_eq!(report.dispatch_order, ids);
        assert_eq!(report.executed, 3);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn test_random_agent_is_live() {
        let mut env = Environment::new(sequential(1)).unwrap();
        assert!(env.random_agent().is_none());

        let a = env.add("a", Idle);
        let b = env.add("b", Idle);
        env.run_turn().unwrap();
        env.remove(a);

        for _ in 0..20 {
            assert_eq!(env.random_agent(), Some(b));
        }
    }

    #[test]
    fn test_external_send_reaches_agent() {
        let mut env = Environment::new(sequential(1)).unwrap();
        let echo = env.add("echo", Echo);
        env.run_turn().unwrap();

        assert_eq!(env.send(AgentId::external(), echo, Payload::raw("ping")), Delivery::Local);
        assert_eq!(env.get(echo).unwrap().mailbox_len(), 1);
        env.run_turn().unwrap();
        assert_eq!(env.get(echo).unwrap().mailbox_len(), 0);
    }

    #[test]
    fn test_on_new_agent_requires_factory() {
        let env = Environment::new(sequential(1)).unwrap();
        let transfer = AgentTransfer {
            name: "mobile".to_string(),
            kind: "idle".to_string(),
            state: bytes::Bytes::new(),
        };
        assert!(matches!(env.on_new_agent(&transfer), Err(EngineError::FactoryMissing)));

        let env = env.with_factory(|_: &AgentTransfer| -> anyhow::Result<Box<dyn Agent>> { Ok(Box::new(Idle)) });
        let id = env.on_new_agent(&transfer).unwrap();
        assert_eq!(env.registry().pending_count(), 1);
        assert!(env.get(id).is_none());
    }

    #[test]
    fn test_delay_after_each_turn() {
        let config = sequential(3).with_delay(std::time::Duration::from_millis(25));
        let mut env = Environment::new(config).unwrap();
        env.add("idle", Idle);

        let started = std::time::Instant::now();
        let summary = env.start().unwrap();
        assert_eq!(summary.turns, 3);
        assert!(started.elapsed() >= std::time::Duration::from_millis(75));
    }

    #[test]
    fn test_no_delay_by_default() {
        assert!(sequential(1).delay_after_turn().is_zero());
    }
}
