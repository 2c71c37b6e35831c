//! Fork/join scheduling of matching work.
//!
//! The coordinator only ever runs pure evaluations (alpha predicates, join
//! lookups) in parallel. Results come back in input order and are applied to
//! memories and the agenda by the caller on its own thread, so parallel and
//! sequential runs are indistinguishable downstream.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use reticle_foundation::{Error, Result};

use crate::config::{EngineConfig, ExecutionMode};

/// Runs batches of independent evaluations, sequentially or on a worker pool.
pub struct ExecutionCoordinator {
    pool: Option<ThreadPool>,
    threshold: usize,
}

impl ExecutionCoordinator {
    /// Builds a coordinator for the given configuration.
    ///
    /// # Errors
    /// Returns an error if the worker pool cannot be created.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let pool = match config.execution {
            ExecutionMode::Sequential => None,
            ExecutionMode::Parallel => Some(
                ThreadPoolBuilder::new()
                    .num_threads(config.worker_threads.unwrap_or(0))
                    .thread_name(|i| format!("reticle-match-{i}"))
                    .build()
                    .map_err(|e| Error::internal(format!("cannot start worker pool: {e}")))?,
            ),
        };
        Ok(Self {
            pool,
            threshold: config.parallel_threshold.max(1),
        })
    }

    /// A coordinator that never leaves the calling thread.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            pool: None,
            threshold: usize::MAX,
        }
    }

    /// Returns true if work may be fanned out.
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Number of workers (1 when sequential).
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.as_ref().map_or(1, ThreadPool::current_num_threads)
    }

    /// Applies `f` to every item and returns the results in input order.
    ///
    /// Batches smaller than the threshold stay on the calling thread.
    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        match &self.pool {
            Some(pool) if items.len() >= self.threshold => {
                pool.install(|| items.par_iter().map(&f).collect())
            }
            _ => items.iter().map(f).collect(),
        }
    }
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("workers", &self.workers())
            .field("threshold", &self.threshold)
            .finish()
    }
}
