//! Batch controller: sub-batch splitting, wave sharding and the run loop.
//!
//! A run is a sequence of sub-batches of at most `max_batch_size`
//! transactions. Each sub-batch is analyzed, graphed and scheduled on its
//! own, then executed wave by wave against a working copy of canonical
//! state that is committed back only once the whole sub-batch succeeded.

use crate::access::AccessAnalyzer;
use crate::executor::execute_checked;
use crate::graph::{build_address_graph, build_dependency_graph, build_sequential_graph};
use crate::merge::{build_receipts, ResultSlots};
use crate::pool::{CommitLog, ShardJob, TxTask, WorkerPool};
use crate::schedule::schedule;
use crossbeam::channel::{self, RecvTimeoutError};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::config::{available_parallelism, MAX_SHARD_COUNT};
use strata_core::error::{StrataError, StrataResult};
use strata_core::{
    BatchStats, BlockContext, BlockOutput, ConflictMode, DeclaredSender, DependencyAnalysis,
    DependencyGraph, ExecutionResult, ParallelConfig, Receipt, Schedule, SenderRecovery, StateDb,
    SubBatchStats, Transaction, TxExecutor, TxIndex,
};

// ---------------------------------------------------------------------------
// Sharding
// ---------------------------------------------------------------------------

/// Shards used for a wave of `wave_len` transactions.
///
/// The configured count (or the CPU count) capped at [`MAX_SHARD_COUNT`],
/// at twice the CPU count and at the wave size.
pub fn effective_shards(config: &ParallelConfig, wave_len: usize) -> usize {
    let cpus = available_parallelism();
    config
        .shard_count
        .unwrap_or(cpus)
        .min(MAX_SHARD_COUNT)
        .min(cpus * 2)
        .min(wave_len)
        .max(1)
}

/// Splits `members` into `shards` contiguous slices; the first
/// `len % shards` slices take one extra member.
pub fn split_shards(members: &[TxIndex], shards: usize) -> Vec<&[TxIndex]> {
    let shards = shards.clamp(1, members.len().max(1));
    let base = members.len() / shards;
    let extra = members.len() % shards;

    let mut out = Vec::with_capacity(shards);
    let mut start = 0;
    for shard in 0..shards {
        let len = base + usize::from(shard < extra);
        out.push(&members[start..start + len]);
        start += len;
    }
    out
}

// ---------------------------------------------------------------------------
// Graph selection
// ---------------------------------------------------------------------------

/// Dependency graph for one sub-batch under `config`, trusting declared
/// senders.
pub fn plan_graph(
    block: &BlockContext,
    transactions: &[Transaction],
    config: &ParallelConfig,
) -> StrataResult<DependencyGraph> {
    plan_graph_with_recovery(block, transactions, &DeclaredSender, config)
}

/// [`plan_graph`] with a host-supplied sender recovery. Transactions whose
/// sender cannot be recovered are planned as opaque.
pub fn plan_graph_with_recovery<R: SenderRecovery + ?Sized>(
    block: &BlockContext,
    transactions: &[Transaction],
    recovery: &R,
    config: &ParallelConfig,
) -> StrataResult<DependencyGraph> {
    match config.conflict_mode {
        ConflictMode::Sequential => Ok(build_sequential_graph(transactions.len())),
        ConflictMode::Speculative => Err(StrataError::UnsupportedMode(
            ConflictMode::Speculative.as_str().into(),
        )),
        ConflictMode::Pessimistic => Ok(match config.analysis {
            DependencyAnalysis::Exact => {
                let analyzer = AccessAnalyzer::with_recovery(recovery, block);
                build_dependency_graph(&analyzer.analyze_batch(transactions))
            }
            DependencyAnalysis::AddressHeuristic => build_address_graph(transactions),
        }),
    }
}

// ---------------------------------------------------------------------------
// Parallel run
// ---------------------------------------------------------------------------

/// Executes `transactions` in dependency-ordered parallel waves and
/// advances `state` to the post-batch state.
///
/// On timeout `state` holds the sub-batches completed before the deadline
/// and the error carries their receipts.
pub fn run_parallel<S, E>(
    block: &BlockContext,
    state: &mut S,
    transactions: &[Transaction],
    executor: Arc<E>,
    config: &ParallelConfig,
) -> StrataResult<BlockOutput>
where
    S: StateDb + 'static,
    E: TxExecutor<S> + 'static,
{
    run_parallel_with_recovery(block, state, transactions, executor, &DeclaredSender, config)
}

/// [`run_parallel`] with a host-supplied sender recovery used during
/// access analysis.
pub fn run_parallel_with_recovery<S, E, R>(
    block: &BlockContext,
    state: &mut S,
    transactions: &[Transaction],
    executor: Arc<E>,
    recovery: &R,
    config: &ParallelConfig,
) -> StrataResult<BlockOutput>
where
    S: StateDb + 'static,
    E: TxExecutor<S> + 'static,
    R: SenderRecovery + ?Sized,
{
    config.validate()?;
    if config.conflict_mode == ConflictMode::Speculative {
        return Err(StrataError::UnsupportedMode(
            ConflictMode::Speculative.as_str().into(),
        ));
    }

    let start = Instant::now();
    let deadline = config.timeout().map(|t| start + t);
    tracing::info!(
        txs = transactions.len(),
        workers = config.workers,
        max_batch_size = config.max_batch_size,
        mode = config.conflict_mode.as_str(),
        "parallel run started"
    );

    let pool = WorkerPool::new(
        config.workers,
        config.queue_capacity,
        executor,
        block.clone(),
    )?;
    let runner = SubBatchRunner {
        block,
        config,
        recovery,
        pool: &pool,
        deadline,
    };

    let mut receipts: Vec<Receipt> = Vec::with_capacity(transactions.len());
    let mut sub_batches = Vec::new();
    let mut cumulative_gas = 0u64;

    for (id, chunk) in transactions.chunks(config.max_batch_size).enumerate() {
        let offset = id * config.max_batch_size;
        let mut working = state.copy();
        match runner.run(id, chunk, offset, cumulative_gas, &mut working) {
            Ok((chunk_receipts, stats)) => {
                *state = working;
                cumulative_gas += stats.gas_used;
                receipts.extend(chunk_receipts);
                sub_batches.push(stats);
            }
            Err(StrataError::Timeout { .. }) => {
                pool.cancel();
                let elapsed = start.elapsed();
                tracing::warn!(
                    sub_batch = id,
                    completed = receipts.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "parallel run timed out"
                );
                let partial = finish(receipts, sub_batches, config.workers, elapsed);
                return Err(StrataError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    partial: Box::new(partial),
                });
            }
            Err(e) => {
                pool.cancel();
                tracing::error!(sub_batch = id, error = %e, "parallel run aborted");
                return Err(e);
            }
        }
    }
    pool.shutdown()?;

    let output = finish(receipts, sub_batches, config.workers, start.elapsed());
    tracing::info!(
        txs = output.stats.tx_count,
        succeeded = output.stats.succeeded,
        failed = output.stats.failed,
        gas_used = output.total_gas_used,
        waves = output.stats.waves,
        elapsed_ms = output.stats.elapsed.as_millis() as u64,
        tps = output.stats.tps,
        "parallel run complete"
    );
    Ok(output)
}

/// [`run_parallel`] on tokio's blocking pool. Returns the advanced state
/// alongside the output.
pub async fn run_parallel_async<S, E>(
    block: BlockContext,
    mut state: S,
    transactions: Vec<Transaction>,
    executor: Arc<E>,
    config: ParallelConfig,
) -> StrataResult<(BlockOutput, S)>
where
    S: StateDb + 'static,
    E: TxExecutor<S> + 'static,
{
    tokio::task::spawn_blocking(move || {
        let output = run_parallel(&block, &mut state, &transactions, executor, &config)?;
        Ok((output, state))
    })
    .await
    .map_err(|e| StrataError::Internal(format!("spawn_blocking panicked: {e}")))?
}

struct SubBatchRunner<'a, S, R: ?Sized> {
    block: &'a BlockContext,
    config: &'a ParallelConfig,
    recovery: &'a R,
    pool: &'a WorkerPool<S>,
    deadline: Option<Instant>,
}

impl<S: StateDb + 'static, R: SenderRecovery + ?Sized> SubBatchRunner<'_, S, R> {
    fn timed_out(&self) -> StrataError {
        StrataError::Timeout {
            elapsed_ms: 0,
            partial: Box::default(),
        }
    }

    fn run(
        &self,
        id: usize,
        transactions: &[Transaction],
        offset: TxIndex,
        cumulative_gas: u64,
        working: &mut S,
    ) -> StrataResult<(Vec<Receipt>, SubBatchStats)> {
        let started = Instant::now();
        let graph =
            plan_graph_with_recovery(self.block, transactions, self.recovery, self.config)?;
        let schedule = schedule(&graph);

        tracing::debug!(
            sub_batch = id,
            offset,
            txs = transactions.len(),
            edges = graph.edge_count(),
            waves = schedule.len(),
            "sub-batch planned"
        );

        let (slots, max_shards) =
            self.execute_waves(id, transactions, &graph, &schedule, offset, working)?;

        let receipts = slots.into_receipts(transactions, offset, cumulative_gas)?;
        let gas_used = receipts.iter().map(|r| r.gas_used).sum();
        let stats = SubBatchStats {
            id,
            offset,
            tx_count: transactions.len(),
            waves: schedule.len(),
            max_wave_width: schedule.max_width(),
            dependency_edges: graph.edge_count(),
            forced_advancements: schedule.forced.len(),
            max_shards,
            gas_used,
            elapsed: started.elapsed(),
        };
        Ok((receipts, stats))
    }

    /// Runs `schedule` wave by wave on `working`. Returns the filled result
    /// slots and the widest shard fan-out used.
    fn execute_waves(
        &self,
        id: usize,
        transactions: &[Transaction],
        graph: &DependencyGraph,
        schedule: &Schedule,
        offset: TxIndex,
        working: &mut S,
    ) -> StrataResult<(ResultSlots, usize)> {
        let committed = Arc::new(CommitLog::new(transactions.len()));
        let mut slots = ResultSlots::new(transactions.len());
        let mut max_shards = 0;

        for wave in &schedule.waves {
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(self.timed_out());
            }

            let shards = split_shards(&wave.members, effective_shards(self.config, wave.len()));
            max_shards = max_shards.max(shards.len());

            let (done, results) = channel::bounded(wave.len());
            for (shard, members) in shards.into_iter().enumerate() {
                let tasks = members
                    .iter()
                    .map(|&index| TxTask {
                        index,
                        tx: transactions[index].clone(),
                        view: working.copy(),
                        // Forced indices run with unresolved dependencies.
                        dependencies: if schedule.forced.contains(&index) {
                            SmallVec::new()
                        } else {
                            graph.dependencies(index).iter().copied().collect()
                        },
                    })
                    .collect();
                let job = ShardJob {
                    shard,
                    tasks,
                    committed: Arc::clone(&committed),
                    done: done.clone(),
                };
                match self.deadline {
                    Some(deadline) => {
                        if !self.pool.submit_deadline(job, deadline)? {
                            return Err(self.timed_out());
                        }
                    }
                    None => self.pool.submit(job)?,
                }
            }
            drop(done);

            for _ in 0..wave.len() {
                let received = match self.deadline {
                    Some(deadline) => results.recv_deadline(deadline),
                    None => results.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match received {
                    Ok(result) => slots.record(result?)?,
                    Err(RecvTimeoutError::Timeout) => return Err(self.timed_out()),
                    Err(RecvTimeoutError::Disconnected) => {
                        let index = wave
                            .members
                            .iter()
                            .copied()
                            .find(|&i| slots.get(i).is_none())
                            .unwrap_or_default();
                        tracing::error!(index = offset + index, wave = wave.id, "worker dropped result");
                        return Err(StrataError::MissingResult {
                            index: offset + index,
                        });
                    }
                }
            }

            slots.commit_wave(wave, working)?;
            for &index in &wave.members {
                committed.mark(index);
            }
            tracing::trace!(sub_batch = id, wave = wave.id, width = wave.len(), "wave committed");
        }
        Ok((slots, max_shards))
    }
}

fn finish(
    receipts: Vec<Receipt>,
    sub_batches: Vec<SubBatchStats>,
    workers: usize,
    elapsed: Duration,
) -> BlockOutput {
    let succeeded = receipts.iter().filter(|r| r.is_success()).count();
    let total_gas_used = receipts.last().map_or(0, |r| r.cumulative_gas_used);
    let secs = elapsed.as_secs_f64();
    let stats = BatchStats {
        tx_count: receipts.len(),
        succeeded,
        failed: receipts.len() - succeeded,
        gas_used: total_gas_used,
        waves: sub_batches.iter().map(|s| s.waves).sum(),
        sub_batches,
        workers,
        elapsed,
        tps: if secs > 0.0 {
            receipts.len() as f64 / secs
        } else {
            0.0
        },
    };
    BlockOutput {
        receipts,
        total_gas_used,
        stats,
    }
}

// ---------------------------------------------------------------------------
// Sequential reference
// ---------------------------------------------------------------------------

/// Executes `transactions` one after another directly on `state`.
///
/// The output every parallel run must reproduce.
pub fn execute_sequential<S, E>(
    block: &BlockContext,
    state: &mut S,
    transactions: &[Transaction],
    executor: &E,
) -> BlockOutput
where
    S: StateDb,
    E: TxExecutor<S> + ?Sized,
{
    let start = Instant::now();
    let results: Vec<ExecutionResult> = transactions
        .iter()
        .enumerate()
        .map(|(index, tx)| {
            ExecutionResult::from_outcome(index, execute_checked(executor, tx, block, state))
        })
        .collect();
    let receipts = build_receipts(transactions, results, 0, 0);
    let gas_used = receipts.last().map_or(0, |r| r.cumulative_gas_used);
    let elapsed = start.elapsed();

    let sub_batch = SubBatchStats {
        id: 0,
        offset: 0,
        tx_count: transactions.len(),
        waves: transactions.len(),
        max_wave_width: usize::from(!transactions.is_empty()),
        dependency_edges: transactions.len().saturating_sub(1),
        forced_advancements: 0,
        max_shards: usize::from(!transactions.is_empty()),
        gas_used,
        elapsed,
    };
    tracing::info!(txs = transactions.len(), gas_used, "sequential run complete");
    finish(receipts, vec![sub_batch], 1, elapsed)
}
