//! Engine configuration.

/// How matching work is scheduled.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Everything runs on the calling thread.
    #[default]
    Sequential,
    /// Alpha evaluation and join lookups fan out over a worker pool.
    Parallel,
}

/// Configuration frozen into a knowledge base and shared by its sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Scheduling of matching work.
    pub execution: ExecutionMode,

    /// Minimum number of independent evaluations before work is fanned out.
    pub parallel_threshold: usize,

    /// Worker count for parallel mode (`None` = available hardware parallelism).
    pub worker_threads: Option<usize>,

    /// Maximum activations fired by one `fire` call (`None` = unbounded).
    pub max_fires: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::Sequential,
            parallel_threshold: 64,
            worker_threads: None,
            max_fires: None,
        }
    }
}

impl EngineConfig {
    /// Single-threaded matching.
    #[must_use]
    pub fn sequential() -> Self {
        Self::default()
    }

    /// Parallel matching on a pool sized to the hardware.
    #[must_use]
    pub fn parallel() -> Self {
        Self {
            execution: ExecutionMode::Parallel,
            ..Self::default()
        }
    }

    /// Builder method to set the execution mode.
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Builder method to set the fan-out threshold.
    #[must_use]
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Builder method to set the worker count.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Builder method to cap activations per `fire` call.
    #[must_use]
    pub fn with_max_fires(mut self, max: usize) -> Self {
        self.max_fires = Some(max);
        self
    }
}
