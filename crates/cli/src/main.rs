//! CLI for the Strata parallel transaction engine.
//!
//! Pipeline: load workload -> analyze -> dependency graph -> waves ->
//! parallel execution -> receipts and report.

use alloy_primitives::{Address, Bytes, B256, U256};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_core::{
    BlockContext, BlockOutput, ConflictMode, DependencyAnalysis, ParallelConfig, Transaction,
    TxExecutor,
};
use strata_engine::reporter::Report;
use strata_engine::sink::json_stream::JsonStreamSink;
use strata_engine::sink::{ReceiptRow, RunSummaryRow, WaveRow};
use strata_engine::{
    execute_sequential, plan_graph, run_parallel_async, schedule, RevmExecutor, TransferExecutor,
};
use strata_state::{Account, Genesis, MemoryState, Workload};

#[derive(Parser, Debug)]
#[command(name = "strata", version, about = "Parallel EVM transaction executor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a workload in parallel waves.
    Run {
        #[arg(short, long, env = "STRATA_WORKLOAD")]
        workload: PathBuf,

        #[arg(long, value_enum, default_value_t = ExecutorKind::Revm)]
        executor: ExecutorKind,

        /// Re-run sequentially and compare receipts and post-state.
        #[arg(long, default_value_t = false)]
        verify: bool,

        /// Print receipts as JSON instead of the report.
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Sink output: "ndjson" writes NDJSON to stdout,
        /// "ndjson:/path/to/file" writes to file.
        #[arg(long)]
        sink: Option<String>,

        /// Hotspots listed in the report.
        #[arg(long, default_value_t = 10)]
        top: usize,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Analyze and schedule a workload without executing it.
    Plan {
        #[arg(short, long, env = "STRATA_WORKLOAD")]
        workload: PathBuf,

        /// Print waves as JSON instead of the report.
        #[arg(long, default_value_t = false)]
        json: bool,

        #[arg(long, default_value_t = 10)]
        top: usize,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Generate a synthetic transfer workload.
    Synth {
        #[arg(long, default_value_t = 10_000)]
        txs: usize,

        /// Fewer accounts means more conflicts.
        #[arg(long, default_value_t = 1_000)]
        accounts: u64,

        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Initial balance of every account, in wei.
        #[arg(long, default_value_t = 1_000_000_000)]
        balance: u64,

        /// Output file; stdout when absent.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExecutorKind {
    /// Full EVM semantics.
    Revm,
    /// Native value transfers only.
    Transfer,
}

/// Execution settings; flags override the optional JSON config file.
#[derive(Args, Debug)]
struct ExecArgs {
    #[arg(long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "STRATA_WORKERS")]
    workers: Option<usize>,

    #[arg(long, env = "STRATA_MAX_BATCH_SIZE")]
    max_batch_size: Option<usize>,

    #[arg(long, env = "STRATA_SHARDS")]
    shards: Option<usize>,

    #[arg(long, env = "STRATA_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// "exact" or "address".
    #[arg(long, env = "STRATA_ANALYSIS")]
    analysis: Option<DependencyAnalysis>,

    /// "pessimistic", "sequential" or "speculative".
    #[arg(long, env = "STRATA_CONFLICT_MODE")]
    mode: Option<ConflictMode>,
}

impl ExecArgs {
    fn to_config(&self) -> Result<ParallelConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => ParallelConfig::default(),
        };
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(size) = self.max_batch_size {
            config = config.with_max_batch_size(size);
        }
        if let Some(shards) = self.shards {
            config = config.with_shard_count(shards);
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(analysis) = self.analysis {
            config = config.with_analysis(analysis);
        }
        if let Some(mode) = self.mode {
            config = config.with_conflict_mode(mode);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workload,
            executor,
            verify,
            json,
            sink,
            top,
            exec,
        } => {
            let config = exec.to_config()?;
            let workload = Workload::load(&workload)?;
            let opts = RunOptions {
                verify,
                json,
                sink,
                top,
            };
            match executor {
                ExecutorKind::Revm => run(workload, RevmExecutor, config, opts).await?,
                ExecutorKind::Transfer => run(workload, TransferExecutor, config, opts).await?,
            }
        }

        Commands::Plan {
            workload,
            json,
            top,
            exec,
        } => {
            let config = exec.to_config()?;
            let workload = Workload::load(&workload)?;
            let t0 = Instant::now();
            let graph = plan_graph(&workload.block, &workload.transactions, &config)?;
            let waves = schedule(&graph);
            tracing::info!(
                txs = workload.transactions.len(),
                edges = graph.edge_count(),
                waves = waves.len(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "plan complete"
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&waves)?);
            } else {
                print!(
                    "{}",
                    Report::build(workload.block.number, &graph, &waves).render(top)
                );
            }
        }

        Commands::Synth {
            txs,
            accounts,
            seed,
            balance,
            out,
        } => {
            let workload = synthesize(txs, accounts.max(1), seed, balance);
            let json = workload.to_json()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    tracing::info!(txs, accounts, path = %path.display(), "workload written");
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

struct RunOptions {
    verify: bool,
    json: bool,
    sink: Option<String>,
    top: usize,
}

async fn run<E>(
    workload: Workload,
    executor: E,
    config: ParallelConfig,
    opts: RunOptions,
) -> Result<(), Box<dyn std::error::Error>>
where
    E: TxExecutor<MemoryState> + 'static,
{
    let Workload {
        block,
        genesis,
        transactions,
    } = workload;
    let pre_state = genesis.into_state();
    let executor = Arc::new(executor);

    // Plan once more for the report; execution re-plans per sub-batch.
    let graph = plan_graph(&block, &transactions, &config)?;
    let waves = schedule(&graph);

    let (output, post_state) = run_parallel_async(
        block.clone(),
        pre_state.clone(),
        transactions.clone(),
        Arc::clone(&executor),
        config,
    )
    .await?;

    if opts.verify {
        verify(&block, &pre_state, &transactions, executor.as_ref(), &output, &post_state)?;
    }

    let report = Report::build(block.number, &graph, &waves).with_output(&output);
    if let Some(ref sink_spec) = opts.sink {
        let summary = RunSummaryRow::from_output(block.number, &output);
        let wave_rows = WaveRow::from_schedule(block.number, &waves);
        let receipt_rows: Vec<_> = output
            .receipts
            .iter()
            .map(|r| ReceiptRow::from_receipt(block.number, r))
            .collect();

        if sink_spec == "ndjson" {
            let mut s = JsonStreamSink::stdout();
            s.write_summary(&summary)?;
            s.write_rows(&wave_rows)?;
            s.write_rows(&receipt_rows)?;
            let n = s.finish()?;
            tracing::info!(rows = n, "ndjson sink: wrote to stdout");
        } else if let Some(path) = sink_spec.strip_prefix("ndjson:") {
            let file = std::fs::File::create(path)?;
            let mut s = JsonStreamSink::new(file);
            s.write_summary(&summary)?;
            s.write_rows(&wave_rows)?;
            s.write_rows(&receipt_rows)?;
            let n = s.finish()?;
            tracing::info!(rows = n, path, "ndjson sink: wrote to file");
        } else {
            eprintln!("Unknown sink: {sink_spec}. Use 'ndjson' or 'ndjson:/path'");
        }

        eprint!("{}", report.render(opts.top));
    } else if opts.json {
        println!("{}", serde_json::to_string_pretty(&output.receipts)?);
    } else {
        print!("{}", report.render(opts.top));
    }
    Ok(())
}

fn verify<E>(
    block: &BlockContext,
    pre_state: &MemoryState,
    transactions: &[Transaction],
    executor: &E,
    output: &BlockOutput,
    post_state: &MemoryState,
) -> Result<(), Box<dyn std::error::Error>>
where
    E: TxExecutor<MemoryState>,
{
    use strata_core::StateDb;

    let mut reference = pre_state.copy();
    let expected = execute_sequential(block, &mut reference, transactions, executor);
    let mismatch = expected
        .receipts
        .iter()
        .zip(&output.receipts)
        .position(|(a, b)| a != b);

    if let Some(index) = mismatch {
        return Err(format!("receipt {index} differs from sequential execution").into());
    }
    if expected.receipts.len() != output.receipts.len() {
        return Err("receipt count differs from sequential execution".into());
    }
    if reference.digest() != post_state.digest() {
        return Err("post-state differs from sequential execution".into());
    }
    tracing::info!(
        receipts = expected.receipts.len(),
        state_root = %post_state.digest(),
        sequential_ms = expected.stats.elapsed.as_millis() as u64,
        parallel_ms = output.stats.elapsed.as_millis() as u64,
        "verified against sequential execution"
    );
    Ok(())
}

fn synth_account(i: u64) -> Address {
    Address::from_word(B256::from(U256::from(0x10_000 + i)))
}

/// Random transfers with valid per-sender nonces.
fn synthesize(txs: usize, accounts: u64, seed: u64, balance: u64) -> Workload {
    let mut rng = StdRng::seed_from_u64(seed);
    let genesis = Genesis {
        alloc: (0..accounts)
            .map(|i| (synth_account(i), Account::with_balance(U256::from(balance))))
            .collect(),
    };

    let mut nonces = vec![0u64; accounts as usize];
    let transactions = (0..txs)
        .map(|i| {
            let from = rng.gen_range(0..accounts);
            let to = rng.gen_range(0..accounts);
            let nonce = nonces[from as usize];
            nonces[from as usize] += 1;
            Transaction {
                hash: B256::from(U256::from(i as u64 + 1)),
                from: synth_account(from),
                to: Some(synth_account(to)),
                nonce,
                value: U256::from(rng.gen_range(1..=balance.max(1) / 100 + 1)),
                gas: 21_000,
                input: Bytes::new(),
            }
        })
        .collect();

    Workload {
        block: BlockContext::default(),
        genesis,
        transactions,
    }
}
