// packages/engine/src/runtime/registry.rs
//! Agent registry with buffered mutation
//!
//! # Concurrency
//!
//! ```text
//!            dispatch phase (many threads)          reconciliation (driving thread)
//! register ──► pending queue (SegQueue) ─────────────► primary map + name index
//! remove   ──► dead flag on the entry  ─────────────► reaped from map + index
//! lookups  ──► primary map (read-only) 
//! ```
//!
//! The primary map and name index are only written by [`Registry::reconcile`],
//! which takes `&mut self`. Everything reachable through `&self` is either a
//! read or goes through the lock-free pending queue, so workers can share a
//! `&Registry` for the whole dispatch phase without locking it.

use crate::runtime::agent::{Agent, AgentEntry, AgentId, Observables};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct Registry {
    /// Live agents in insertion order
    agents: Vec<Arc<AgentEntry>>,

    /// Position of each id in `agents`
    positions: HashMap<AgentId, usize>,

    /// Name → ids, ids in insertion order
    by_name: BTreeMap<String, Vec<AgentId>>,

    /// Registered but not yet reconciled, in registration order
    pending: SegQueue<Arc<AgentEntry>>,

    /// Pending entries by id, so they can be removed before they go live
    pending_ids: DashMap<AgentId, Arc<AgentEntry>>,
}

/// Result of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Pending agents promoted to the primary map
    pub added: usize,

    /// Dead agents removed from the primary map
    pub reaped: usize,

    /// Agents in the primary map afterwards
    pub live: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an agent for insertion. The id is usable immediately; the agent
    /// becomes addressable and schedulable at the next reconciliation.
    pub fn register(&self, name: impl Into<String>, agent: Box<dyn Agent>) -> AgentId {
        let entry = Arc::new(AgentEntry::new(name.into(), agent));
        let id = entry.id();
        self.pending_ids.insert(id, Arc::clone(&entry));
        self.pending.push(entry);
        id
    }

    /// Mark an agent dead, whether live or still pending. Returns false if
    /// the id is unknown.
    pub fn remove(&self, id: AgentId) -> bool {
        if let Some(entry) = self.get(id) {
            entry.stop();
            return true;
        }
        if let Some(entry) = self.pending_ids.get(&id) {
            entry.stop();
            return true;
        }
        false
    }

    /// Apply pending insertions, then reap dead agents
    pub fn reconcile(&mut self) -> ReconcileStats {
        let mut added = 0;
        while let Some(entry) = self.pending.pop() {
            let id = entry.id();
            self.pending_ids.remove(&id);
            self.by_name
                .entry(entry.name().to_string())
                .or_default()
                .push(id);
            self.positions.insert(id, self.agents.len());
            self.agents.push(entry);
            added += 1;
        }

        let before = self.agents.len();
        let mut reaped_entries = Vec::new();
        self.agents.retain(|entry| {
            if entry.is_dead() {
                reaped_entries.push(Arc::clone(entry));
                false
            } else {
                true
            }
        });

        for entry in &reaped_entries {
            if let Some(ids) = self.by_name.get_mut(entry.name()) {
                ids.retain(|id| *id != entry.id());
                if ids.is_empty() {
                    self.by_name.remove(entry.name());
                }
            }
        }

        let reaped = before - self.agents.len();
        if reaped > 0 {
            self.positions = self
                .agents
                .iter()
                .enumerate()
                .map(|(position, entry)| (entry.id(), position))
                .collect();
        }

        let stats = ReconcileStats {
            added,
            reaped,
            live: self.agents.len(),
        };
        if added > 0 || reaped > 0 {
            debug!(
                "Reconciled registry: {} added, {} reaped, {} live",
                stats.added, stats.reaped, stats.live
            );
        }
        stats
    }

    /// Agents in the primary map, including dead ones not yet reaped
    pub fn count(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents registered since the last reconciliation
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is registered but not reconciled yet
    pub fn is_pending(&self, id: AgentId) -> bool {
        self.pending_ids.contains_key(&id)
    }

    /// Whether `id` is in the primary map (dead or alive)
    pub fn contains(&self, id: AgentId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Look an agent up by id. Pending agents are not visible.
    pub fn get(&self, id: AgentId) -> Option<&Arc<AgentEntry>> {
        self.positions
            .get(&id)
            .and_then(|&position| self.agents.get(position))
    }

    /// Primary map entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentEntry>> {
        self.agents.iter()
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|entry| entry.id()).collect()
    }

    /// Ids of agents not marked dead, in insertion order
    pub fn live_ids(&self) -> Vec<AgentId> {
        self.agents
            .iter()
            .filter(|entry| !entry.is_dead())
            .map(|entry| entry.id())
            .collect()
    }

    /// Ids registered under exactly `name`, in insertion order
    pub fn lookup_by_name(&self, name: &str, first_only: bool) -> Vec<AgentId> {
        let ids = self.by_name.get(name).map(Vec::as_slice).unwrap_or_default();
        let take = if first_only { 1 } else { ids.len() };
        ids.iter().take(take).copied().collect()
    }

    /// Ids whose name contains `fragment`, grouped by name in lexical order
    pub fn lookup_by_fragment(&self, fragment: &str, first_only: bool) -> Vec<AgentId> {
        let matches = self
            .by_name
            .iter()
            .filter(|(name, _)| name.contains(fragment))
            .flat_map(|(_, ids)| ids.iter().copied());
        if first_only {
            matches.take(1).collect()
        } else {
            matches.collect()
        }
    }

    /// Uniform pick among agents not marked dead
    pub fn random_live_agent<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Arc<AgentEntry>> {
        let live: Vec<&Arc<AgentEntry>> =
            self.agents.iter().filter(|entry| !entry.is_dead()).collect();
        if live.is_empty() {
            return None;
        }
        live.get(rng.gen_range(0..live.len())).copied()
    }

    /// Observables of every other live agent with a non-empty map that
    /// passes `filter`
    pub(crate) fn observable_snapshots<F>(&self, perceiver: AgentId, mut filter: F) -> Vec<Arc<Observables>>
    where
        F: FnMut(&Observables) -> bool,
    {
        self.agents
            .iter()
            .filter(|entry| entry.id() != perceiver && !entry.is_dead())
            .map(|entry| entry.observables())
            .filter(|observed| !observed.is_empty() && filter(observed))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Idle;
    impl Agent for Idle {}

    fn reconciled(names: &[&str]) -> (Registry, Vec<AgentId>) {
        let mut registry = Registry::new();
        let ids = names
            .iter()
            .map(|name| registry.register(*name, Box::new(Idle)))
            .collect();
        registry.reconcile();
        (registry, ids)
    }

    #[test]
    fn test_register_is_buffered() {
        let mut registry = Registry::new();
        let id = registry.register("alpha", Box::new(Idle));

        assert_eq!(registry.count(), 0);
        assert_eq!(registry.pending_count(), 1);
        assert!(registry.get(id).is_none());
        assert!(registry.lookup_by_name("alpha", false).is_empty());

        let stats = registry.reconcile();
        assert_eq!(stats.added, 1);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.get(id).unwrap().name(), "alpha");
        assert_eq!(registry.lookup_by_name("alpha", false), vec![id]);
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let (registry, ids) = reconciled(&["c", "a", "b"]);
        assert_eq!(registry.ids(), ids);
        assert_eq!(registry.live_ids(), ids);
    }

    #[test]
    fn test_reap_dead_agents() {
        let (mut registry, ids) = reconciled(&["worker", "worker", "monitor"]);

        assert!(registry.remove(ids[0]));
        assert_eq!(registry.count(), 3);
        assert_eq!(registry.live_ids(), vec![ids[1], ids[2]]);

        let stats = registry.reconcile();
        assert_eq!(stats.reaped, 1);
        assert!(registry.get(ids[0]).is_none());
        assert_eq!(registry.get(ids[2]).unwrap().name(), "monitor");
        assert_eq!(registry.lookup_by_name("worker", false), vec![ids[1]]);
    }

    #[test]
    fn test_double_removal_is_idempotent() {
        let (mut registry, ids) = reconciled(&["solo"]);

        assert!(registry.remove(ids[0]));
        assert!(registry.remove(ids[0]));
        registry.reconcile();
        assert!(!registry.remove(ids[0]));
        assert_eq!(registry.reconcile().reaped, 0);
        assert!(registry.is_empty());
        assert!(registry.lookup_by_name("solo", false).is_empty());
    }

    #[test]
    fn test_remove_while_pending() {
        let mut registry = Registry::new();
        let id = registry.register("ghost", Box::new(Idle));

        assert!(registry.remove(id));
        let stats = registry.reconcile();
        assert_eq!(stats.added, 1);
        assert_eq!(stats.reaped, 1);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_name_and_fragment_lookup() {
        let (registry, ids) = reconciled(&["worker", "monitor", "worker", "co-worker"]);

        assert_eq!(registry.lookup_by_name("worker", false), vec![ids[0], ids[2]]);
        assert_eq!(registry.lookup_by_name("worker", true), vec![ids[0]]);
        assert!(registry.lookup_by_name("work", false).is_empty());

        // name index order: "co-worker" < "worker"
        assert_eq!(registry.lookup_by_fragment("work", false), vec![ids[3], ids[0], ids[2]]);
        assert_eq!(registry.lookup_by_fragment("work", true), vec![ids[3]]);
        assert_eq!(registry.lookup_by_fragment("mon", false), vec![ids[1]]);
    }

    #[test]
    fn test_random_live_agent() {
        let (registry, ids) = reconciled(&["a", "b", "c"]);
        registry.remove(ids[1]);

        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let picked = registry.random_live_agent(&mut rng).unwrap();
            assert_ne!(picked.id(), ids[1]);
        }

        registry.remove(ids[0]);
        registry.remove(ids[2]);
        assert!(registry.random_live_agent(&mut rng).is_none());
    }

    #[test]
    fn test_random_live_agent_is_seeded() {
        let (registry, _) = reconciled(&["a", "b", "c", "d", "e"]);
        let pick = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..10)
                .map(|_| registry.random_live_agent(&mut rng).unwrap().name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(pick(3), pick(3));
    }

    #[test]
    fn test_observable_snapshots() {
        let (registry, ids) = reconciled(&["me", "visible", "empty", "filtered"]);
        registry.get(ids[1]).unwrap().update_observables(|obs| {
            obs.insert("n".to_string(), serde_json::json!(1));
        });
        registry.get(ids[3]).unwrap().update_observables(|obs| {
            obs.insert("n".to_string(), serde_json::json!(100));
        });
        registry.get(ids[0]).unwrap().update_observables(|obs| {
            obs.insert("n".to_string(), serde_json::json!(2));
        });

        let seen = registry.observable_snapshots(ids[0], |obs| obs["n"] == serde_json::json!(1));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["n"], serde_json::json!(1));
    }

    #[test]
    fn test_dead_agent_observables_hidden_before_reap() {
        let (registry, ids) = reconciled(&["me", "alive", "leaving"]);
        for id in &ids {
            registry.get(*id).unwrap().update_observables(|obs| {
                obs.insert("n".to_string(), serde_json::json!(1));
            });
        }
        assert_eq!(registry.observable_snapshots(ids[0], |_| true).len(), 2);

        assert!(registry.remove(ids[2]));
        assert!(registry.contains(ids[2]));
        assert_eq!(registry.observable_snapshots(ids[0], |_| true).len(), 1);
    }
}
