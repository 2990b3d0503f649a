//! Run configuration, passed explicitly by the caller.

use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sub-batch size used when none is configured.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Bounded task queue capacity of the worker pool.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Hard ceiling on shards per wave.
pub const MAX_SHARD_COUNT: usize = 128;

/// How conflicts between transactions are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// Exact dependency ordering decided before execution.
    #[default]
    Pessimistic,
    /// Every transaction depends on its predecessor.
    Sequential,
    /// Optimistic execution with rollback. Not implemented.
    Speculative,
}

impl ConflictMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictMode::Pessimistic => "pessimistic",
            ConflictMode::Sequential => "sequential",
            ConflictMode::Speculative => "speculative",
        }
    }
}

impl std::str::FromStr for ConflictMode {
    type Err = StrataError;

    fn from_str(s: &str) -> StrataResult<Self> {
        match s {
            "pessimistic" => Ok(ConflictMode::Pessimistic),
            "sequential" => Ok(ConflictMode::Sequential),
            "speculative" => Ok(ConflictMode::Speculative),
            other => Err(StrataError::InvalidConfig(format!(
                "unknown conflict mode `{other}`"
            ))),
        }
    }
}

/// Which dependency analysis feeds the scheduler in pessimistic mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyAnalysis {
    /// Per-location access sets.
    #[default]
    Exact,
    /// Shared sender/recipient addresses only.
    AddressHeuristic,
}

impl std::str::FromStr for DependencyAnalysis {
    type Err = StrataError;

    fn from_str(s: &str) -> StrataResult<Self> {
        match s {
            "exact" => Ok(DependencyAnalysis::Exact),
            "address" | "address_heuristic" => Ok(DependencyAnalysis::AddressHeuristic),
            other => Err(StrataError::InvalidConfig(format!(
                "unknown dependency analysis `{other}`"
            ))),
        }
    }
}

/// Parallel execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Worker threads in the pool.
    pub workers: usize,
    /// Transactions per sub-batch.
    pub max_batch_size: usize,
    /// Shards per wave; `None` derives it from available parallelism.
    pub shard_count: Option<usize>,
    pub queue_capacity: usize,
    /// Deadline for a whole run.
    pub timeout_ms: Option<u64>,
    pub analysis: DependencyAnalysis,
    pub conflict_mode: ConflictMode,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            workers: available_parallelism(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            shard_count: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout_ms: None,
            analysis: DependencyAnalysis::Exact,
            conflict_mode: ConflictMode::Pessimistic,
        }
    }
}

impl ParallelConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_shard_count(mut self, shards: usize) -> Self {
        self.shard_count = Some(shards);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_analysis(mut self, analysis: DependencyAnalysis) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_conflict_mode(mut self, mode: ConflictMode) -> Self {
        self.conflict_mode = mode;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> StrataResult<()> {
        if self.workers == 0 {
            return Err(StrataError::InvalidConfig("workers must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(StrataError::InvalidConfig(
                "max_batch_size must be > 0".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(StrataError::InvalidConfig(
                "queue_capacity must be > 0".into(),
            ));
        }
        if self.shard_count == Some(0) {
            return Err(StrataError::InvalidConfig("shard_count must be > 0".into()));
        }
        Ok(())
    }
}

/// Logical CPUs, falling back to 4 when the platform cannot tell.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
