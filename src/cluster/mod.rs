//! Cluster bootstrap
//!
//! Starts the worker pool that every pipeline pass runs on and gives each
//! worker its own pooled memory arena. The resulting [`ExecutionContext`]
//! is passed explicitly to every pipeline call.

mod monitor;
mod pool;

pub use monitor::{occupied_beyond, MemoryMonitor, MemorySnapshot};
pub use pool::{MemoryPool, PoolStats, PooledBuffer};

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Worker count and memory fractions for the execution context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of workers (None = one per available core)
    pub n_workers: Option<usize>,
    /// Fraction of a worker's memory share at which checkouts spill to host
    pub device_limit_frac: f64,
    /// Fraction of a worker's memory share retained by its pool
    pub device_pool_frac: f64,
    /// Fraction of a worker's memory share used as the default partition size
    pub part_mem_frac: f64,
    /// Warn at startup when more than this fraction of memory is in use
    pub occupied_warn_frac: f64,
    /// Override for total memory (None = read from the system)
    pub memory_limit_bytes: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            n_workers: None,
            device_limit_frac: 0.7,
            device_pool_frac: 0.8,
            part_mem_frac: 0.15,
            occupied_warn_frac: 0.5,
            memory_limit_bytes: None,
        }
    }
}

impl ClusterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.n_workers = Some(n);
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.n_workers == Some(0) {
            return Err(PipelineError::ClusterStartup("worker count must be positive".into()));
        }
        let fractions = [
            ("device_limit_frac", self.device_limit_frac),
            ("device_pool_frac", self.device_pool_frac),
            ("part_mem_frac", self.part_mem_frac),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(PipelineError::ClusterStartup(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Resolved sizes for a running cluster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub n_workers: usize,
    pub total_memory_bytes: u64,
    /// Per-worker spill threshold
    pub device_limit_bytes: usize,
    /// Per-worker pool size
    pub pool_size_bytes: usize,
    /// Default target partition size
    pub part_size_bytes: usize,
}

impl ClusterSpec {
    fn resolve(config: &ClusterConfig, total_memory_bytes: u64) -> Self {
        let n_workers = config.n_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        });
        let share = total_memory_bytes as f64 / n_workers as f64;
        Self {
            n_workers,
            total_memory_bytes,
            device_limit_bytes: (share * config.device_limit_frac) as usize,
            pool_size_bytes: (share * config.device_pool_frac) as usize,
            part_size_bytes: ((share * config.part_mem_frac) as usize).max(1),
        }
    }
}

/// Handle to the running worker pool and its per-worker arenas
pub struct ExecutionContext {
    thread_pool: rayon::ThreadPool,
    workers: Vec<Arc<MemoryPool>>,
    spec: ClusterSpec,
}

impl ExecutionContext {
    /// Start workers and initialize one memory pool per worker.
    ///
    /// Memory already in use beyond `occupied_warn_frac` is reported as a
    /// warning only. Failing to start the thread pool is fatal.
    pub fn bootstrap(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;

        let snapshot = MemoryMonitor::new().snapshot();
        if let Some(used) = occupied_beyond(&snapshot, config.occupied_warn_frac) {
            warn!(
                used_fraction = %format!("{used:.2}"),
                threshold = config.occupied_warn_frac,
                "memory already occupied before cluster startup"
            );
        }

        let total = config.memory_limit_bytes.unwrap_or(snapshot.total_bytes);
        if total == 0 {
            return Err(PipelineError::ClusterStartup("could not determine total memory".into()));
        }
        let spec = ClusterSpec::resolve(config, total);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(spec.n_workers)
            .thread_name(|i| format!("criteo-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::ClusterStartup(e.to_string()))?;

        let workers = (0..spec.n_workers)
            .map(|i| MemoryPool::new(i, spec.pool_size_bytes, spec.device_limit_bytes))
            .collect();

        info!(
            workers = spec.n_workers,
            pool_mb = spec.pool_size_bytes / (1024 * 1024),
            spill_mb = spec.device_limit_bytes / (1024 * 1024),
            part_mb = spec.part_size_bytes / (1024 * 1024),
            "cluster started"
        );

        Ok(Self { thread_pool, workers, spec })
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub fn n_workers(&self) -> usize {
        self.spec.n_workers
    }

    /// Run `op` inside the worker pool
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.thread_pool.install(op)
    }

    /// Memory pool of the worker executing the caller (worker 0 outside the pool)
    pub fn worker_pool(&self) -> &Arc<MemoryPool> {
        let idx = self
            .thread_pool
            .current_thread_index()
            .unwrap_or(0)
            .min(self.workers.len() - 1);
        &self.workers[idx]
    }

    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.workers.iter().map(|w| w.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_sizes_workers() {
        let config = ClusterConfig::new()
            .with_workers(4)
            .with_memory_limit(4 * 1024 * 1024 * 1024);
        let ctx = ExecutionContext::bootstrap(&config).unwrap();
        let spec = ctx.spec();
        assert_eq!(spec.n_workers, 4);
        assert_eq!(spec.pool_size_bytes, (1024.0 * 1024.0 * 1024.0 * 0.8) as usize);
        assert_eq!(spec.device_limit_bytes, (1024.0 * 1024.0 * 1024.0 * 0.7) as usize);
        assert_eq!(ctx.pool_stats().len(), 4);
    }

    #[test]
    fn test_zero_workers_is_fatal() {
        let config = ClusterConfig::new().with_workers(0);
        assert!(matches!(
            ExecutionContext::bootstrap(&config),
            Err(PipelineError::ClusterStartup(_))
        ));
    }

    #[test]
    fn test_bad_fraction_is_fatal() {
        let config = ClusterConfig { part_mem_frac: 1.5, ..ClusterConfig::default() };
        assert!(ExecutionContext::bootstrap(&config).is_err());
    }

    #[test]
    fn test_worker_pool_inside_install() {
        let config = ClusterConfig::new().with_workers(2).with_memory_limit(1 << 30);
        let ctx = ExecutionContext::bootstrap(&config).unwrap();
        let worker = ctx.install(|| ctx.worker_pool().worker());
        assert!(worker < 2);
    }
}
