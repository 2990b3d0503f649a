//! Parallel execution pipeline: access analysis, dependency graphing, wave
//! scheduling, the worker pool, executors, result merging, the batch
//! controller, reporting and data sinks.

pub mod access;
pub mod batch;
pub mod executor;
pub mod graph;
pub mod merge;
pub mod pool;
pub mod reporter;
pub mod schedule;
pub mod sink;

pub use access::{AccessAnalyzer, KnownCall};
pub use batch::{
    execute_sequential, plan_graph, plan_graph_with_recovery, run_parallel, run_parallel_async,
    run_parallel_with_recovery,
};
pub use executor::{execute_checked, RevmExecutor, TransferExecutor};
pub use graph::{build_address_graph, build_dependency_graph, build_sequential_graph};
pub use pool::WorkerPool;
pub use schedule::schedule;
