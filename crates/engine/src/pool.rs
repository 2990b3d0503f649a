//! Fixed-size worker pool executing wave shards.
//!
//! Workers block on a bounded crossbeam queue of [`ShardJob`]s. Each job
//! carries the tasks of one shard: the transaction, its isolated state view
//! and its dependency list. Results travel back over the job's completion
//! channel; the pool itself never touches canonical state.

use crate::executor::execute_checked;
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use strata_core::error::{StrataError, StrataResult};
use strata_core::{BlockContext, ExecutionResult, StateDb, Transaction, TxExecutor, TxIndex};

/// One transaction ready to run against its own view.
pub struct TxTask<S> {
    pub index: TxIndex,
    pub tx: Transaction,
    pub view: S,
    pub dependencies: SmallVec<[TxIndex; 4]>,
}

/// Contiguous slice of a wave handed to a single worker.
pub struct ShardJob<S> {
    pub shard: usize,
    pub tasks: Vec<TxTask<S>>,
    pub committed: Arc<CommitLog>,
    pub done: Sender<StrataResult<ExecutionResult>>,
}

/// Which transactions of the current sub-batch are in canonical state.
///
/// Written by the controller between waves, read by workers to assert that
/// nothing runs ahead of its dependencies.
#[derive(Debug)]
pub struct CommitLog {
    flags: Vec<AtomicBool>,
}

impl CommitLog {
    pub fn new(tx_count: usize) -> Self {
        Self {
            flags: (0..tx_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn mark(&self, index: TxIndex) {
        if let Some(flag) = self.flags.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    pub fn is_committed(&self, index: TxIndex) -> bool {
        self.flags
            .get(index)
            .is_some_and(|f| f.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicBool,
}

pub struct WorkerPool<S> {
    queue: Option<Sender<ShardJob<S>>>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
}

impl<S: StateDb + 'static> WorkerPool<S> {
    /// Spawns `workers` threads named `strata-worker-N`.
    pub fn new<E>(
        workers: usize,
        queue_capacity: usize,
        executor: Arc<E>,
        block: BlockContext,
    ) -> StrataResult<Self>
    where
        E: TxExecutor<S> + 'static,
    {
        let (queue, jobs) = channel::bounded::<ShardJob<S>>(queue_capacity);
        let counters = Arc::new(PoolCounters::default());
        let block = Arc::new(block);

        let mut pool = Self {
            queue: Some(queue),
            handles: Vec::with_capacity(workers),
            counters: Arc::clone(&counters),
        };
        for worker_id in 0..workers {
            let jobs = jobs.clone();
            let executor = Arc::clone(&executor);
            let block = Arc::clone(&block);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("strata-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, jobs, executor.as_ref(), &block, &counters))
                .map_err(|e| StrataError::WorkerPool(format!("spawn failed: {e}")))?;
            pool.handles.push(handle);
        }

        tracing::debug!(workers, queue_capacity, "worker pool started");
        Ok(pool)
    }

    /// Blocks while the queue is full.
    pub fn submit(&self, job: ShardJob<S>) -> StrataResult<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| StrataError::WorkerPool("pool is shut down".into()))?;
        let tasks = job.tasks.len();
        queue
            .send(job)
            .map_err(|_| StrataError::WorkerPool("all workers exited".into()))?;
        self.counters.submitted.fetch_add(tasks, Ordering::Relaxed);
        Ok(())
    }

    /// [`submit`](Self::submit) that gives up at `deadline`. Returns
    /// `false` when the queue stayed full until then.
    pub fn submit_deadline(&self, job: ShardJob<S>, deadline: Instant) -> StrataResult<bool> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| StrataError::WorkerPool("pool is shut down".into()))?;
        let tasks = job.tasks.len();
        match queue.send_deadline(job, deadline) {
            Ok(()) => {
                self.counters.submitted.fetch_add(tasks, Ordering::Relaxed);
                Ok(true)
            }
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(tasks, "task queue full at deadline");
                Ok(false)
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                Err(StrataError::WorkerPool("all workers exited".into()))
            }
        }
    }

    /// Tasks handed to the pool so far.
    pub fn submitted(&self) -> usize {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    /// Tasks that produced a result.
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Workers drop queued tasks instead of running them.
    pub fn cancel(&self) {
        self.counters.cancelled.store(true, Ordering::Release);
    }

    /// Stops accepting jobs, drains the queue and joins every worker.
    pub fn shutdown(mut self) -> StrataResult<()> {
        self.join_all()
    }

    fn join_all(&mut self) -> StrataResult<()> {
        self.queue.take();
        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            tracing::error!(panicked, "worker threads panicked");
            return Err(StrataError::WorkerPool(format!(
                "{panicked} worker thread(s) panicked"
            )));
        }
        tracing::debug!(
            submitted = self.submitted(),
            completed = self.completed(),
            "worker pool stopped"
        );
        Ok(())
    }
}

impl<S> Drop for WorkerPool<S> {
    fn drop(&mut self) {
        self.queue.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<S, E>(
    worker_id: usize,
    jobs: Receiver<ShardJob<S>>,
    executor: &E,
    block: &BlockContext,
    counters: &PoolCounters,
) where
    S: StateDb,
    E: TxExecutor<S> + ?Sized,
{
    let mut executed = 0usize;
    for job in jobs.iter() {
        for task in job.tasks {
            if counters.cancelled.load(Ordering::Acquire) {
                break;
            }
            let result = run_task(task, executor, block, &job.committed);
            counters.completed.fetch_add(1, Ordering::Relaxed);
            executed += 1;
            if job.done.send(result).is_err() {
                // Receiver gone: the wave was abandoned.
                break;
            }
        }
    }
    tracing::trace!(worker_id, executed, "worker exiting");
}

fn run_task<S, E>(
    task: TxTask<S>,
    executor: &E,
    block: &BlockContext,
    committed: &CommitLog,
) -> StrataResult<ExecutionResult>
where
    S: StateDb,
    E: TxExecutor<S> + ?Sized,
{
    if let Some(&dependency) = task
        .dependencies
        .iter()
        .find(|&&d| !committed.is_committed(d))
    {
        tracing::error!(index = task.index, dependency, "dependency not committed");
        return Err(StrataError::DependencyViolation {
            index: task.index,
            dependency,
        });
    }

    let TxTask {
        index,
        tx,
        mut view,
        ..
    } = task;
    let outcome = execute_checked(executor, &tx, block, &mut view);
    if let Some(error) = &outcome.error {
        tracing::debug!(index, tx_hash = %tx.hash, %error, "transaction failed");
    }
    Ok(ExecutionResult::from_outcome(index, outcome))
}
