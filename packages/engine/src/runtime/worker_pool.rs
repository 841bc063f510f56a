// packages/engine/src/runtime/worker_pool.rs
//! Fixed-size work-stealing pool for parallel turns
//!
//! Each call to [`WorkerPool::dispatch`] is one barrier. Tasks are dealt
//! round-robin onto `min(tasks, workers)` local FIFO queues up front, one
//! scoped thread drains each queue, and a thread whose queue runs dry steals
//! from its peers. The call returns only after every thread has finished.
//!
//! ```text
//! Worker 1        Worker 2        Worker 3        Worker 4
//! [Tasks...]      [Tasks...]      [Tasks...]      [Tasks...]
//!    ↓               ↓               ↓               ↓
//!    └───────── Steal ←──────────────┘               │
//!                                   Steal ←──────────┘
//! ```
//!
//! A failed task stops workers from picking up new tasks; steps already
//! running still complete before the error is returned. There is no
//! timeout: a task that never returns blocks the barrier forever.
//!
//! The pool size is fixed but its threads are not persistent: every dispatch
//! spawns and joins its scoped threads, so each parallel turn pays one thread
//! spawn per worker. Scoped threads are what let a step borrow the registry
//! for the length of the turn.

use crate::utils::errors::{EngineError, Result};
use crossbeam::deque::{Steal, Stealer, Worker};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, error, trace};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    /// Upper bound on threads used by a single dispatch
    num_workers: usize,
}

/// Where the tasks of one dispatch were taken from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DispatchStats {
    /// Popped from the worker's own queue
    pub local: usize,

    /// Stolen from another worker's queue
    pub stolen: usize,
}

impl WorkerPool {
    /// Create a pool; `num_workers` is clamped to at least one
    pub fn new(num_workers: usize) -> Self {
        let num_workers = num_workers.max(1);
        debug!("Worker pool initialized with {} workers", num_workers);
        Self { num_workers }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run `job` over every task and wait for all of them
    pub fn dispatch<T, R, F>(&self, tasks: Vec<T>, job: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        let (results, stats) = self.dispatch_with_stats(tasks, job)?;
        trace!(
            "Dispatch finished: {} local pops, {} steals",
            stats.local,
            stats.stolen
        );
        Ok(results)
    }

    pub(crate) fn dispatch_with_stats<T, R, F>(&self, tasks: Vec<T>, job: F) -> Result<(Vec<R>, DispatchStats)>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        let count = tasks.len();
        if count == 0 {
            return Ok((Vec::new(), DispatchStats::default()));
        }

        let locals: Vec<Worker<T>> = (0..count.min(self.num_workers))
            .map(|_| Worker::new_fifo())
            .collect();
        for (index, task) in tasks.into_iter().enumerate() {
            locals[index % locals.len()].push(task);
        }
        let stealers: Vec<Stealer<T>> = locals.iter().map(Worker::stealer).collect();
        trace!("Dispatching {} tasks across {} workers", count, locals.len());

        let results = Mutex::new(Vec::with_capacity(count));
        let failures = Mutex::new(Vec::new());
        let aborted = AtomicBool::new(false);
        let local_pops = AtomicUsize::new(0);
        let steals = AtomicUsize::new(0);

        let scoped = crossbeam::thread::scope(|scope| {
            for (index, local) in locals.into_iter().enumerate() {
                let (stealers, job) = (&stealers, &job);
                let (results, failures, aborted) = (&results, &failures, &aborted);
                let (local_pops, steals) = (&local_pops, &steals);
                scope.spawn(move |_| {
                    while !aborted.load(Ordering::Acquire) {
                        let task = match local.pop() {
                            Some(task) => {
                                local_pops.fetch_add(1, Ordering::Relaxed);
                                task
                            }
                            None => match steal_from_peers(stealers, index) {
                                Some(task) => {
                                    steals.fetch_add(1, Ordering::Relaxed);
                                    task
                                }
                                None => break,
                            },
                        };
                        match job(task) {
                            Ok(result) => results.lock().push(result),
                            Err(e) => {
                                aborted.store(true, Ordering::Release);
                                failures.lock().push(e);
                            }
                        }
                    }
                });
            }
        });
        if scoped.is_err() {
            return Err(EngineError::WorkerPanicked);
        }

        let mut failures = failures.into_inner().into_iter();
        if let Some(first) = failures.next() {
            for other in failures {
                error!("Additional failure in the same turn: {}", other);
            }
            return Err(first);
        }

        let stats = DispatchStats {
            local: local_pops.into_inner(),
            stolen: steals.into_inner(),
        };
        Ok((results.into_inner(), stats))
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(crate::utils::config::DEFAULT_WORKERS),
        )
    }
}

/// Try every other worker once, starting with the next one. Queues are
/// only ever drained once dealt, so an empty sweep means no work is left.
fn steal_from_peers<T>(stealers: &[Stealer<T>], index: usize) -> Option<T> {
    loop {
        let mut retry = false;
        let others = stealers
            .iter()
            .cycle()
            .skip(index + 1)
            .take(stealers.len().saturating_sub(1));
        for stealer in others {
            match stealer.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Retry => retry = true,
                Steal::Empty => {}
            }
        }

        if !retry {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_pool_creation() {
        assert_eq!(WorkerPool::new(4).num_workers(), 4);
        assert_eq!(WorkerPool::new(0).num_workers(), 1);
        assert!(WorkerPool::default().num_workers() >= 1);
    }

    #[test]
    fn test_every_task_runs_once() {
        let pool = WorkerPool::new(4);
        let mut results = pool.dispatch((0..1000).collect(), |n: u32| Ok(n * 2)).unwrap();
        results.sort_unstable();

        assert_eq!(results.len(), 1000);
        assert_eq!(results, (0..1000).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_dispatch() {
        let pool = WorkerPool::new(2);
        let results: Vec<()> = pool.dispatch(Vec::<u8>::new(), |_| Ok(())).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_runs_on_several_threads() {
        let pool = WorkerPool::new(4);
        let threads = Mutex::new(HashSet::new());

        pool.dispatch((0..64).collect::<Vec<u32>>(), |_| {
            threads.lock().insert(thread::current().id());
            thread::sleep(std::time::Duration::from_millis(2));
            Ok(())
        })
        .unwrap();

        assert!(threads.into_inner().len() > 1);
    }

    #[test]
    fn test_idle_worker_steals_from_busy_peer() {
        let pool = WorkerPool::new(2);

        // dealt round-robin: worker 0 gets the slow even tasks, worker 1 the fast odd ones
        let (results, stats) = pool
            .dispatch_with_stats((0..8).collect::<Vec<u32>>(), |n| {
                if n % 2 == 0 {
                    thread::sleep(std::time::Duration::from_millis(50));
                }
                Ok(n)
            })
            .unwrap();

        assert_eq!(results.len(), 8);
        assert_eq!(stats.local + stats.stolen, 8);
        assert!(stats.local > 0);
        assert!(stats.stolen > 0);
    }

    #[test]
    fn test_single_worker_never_steals() {
        let pool = WorkerPool::new(1);
        let (_, stats) = pool
            .dispatch_with_stats((0..16).collect::<Vec<u32>>(), Ok)
            .unwrap();
        assert_eq!(stats, DispatchStats { local: 16, stolen: 0 });
    }

    #[test]
    fn test_barrier_waits_for_running_tasks() {
        let pool = WorkerPool::new(4);
        let started = AtomicUsize::new(0);
        let finished = AtomicUsize::new(0);

        let result = pool.dispatch(vec![0u32, 1, 2, 3, 4, 5, 6, 7], |n| {
            started.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                thread::sleep(std::time::Duration::from_millis(5));
                return Err(EngineError::WorkerPanicked);
            }
            thread::sleep(std::time::Duration::from_millis(30));
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(matches!(result, Err(EngineError::WorkerPanicked)));
        // everything that started (bar the failure) had finished by the barrier
        assert_eq!(finished.load(Ordering::SeqCst) + 1, started.load(Ordering::SeqCst));
    }
}
