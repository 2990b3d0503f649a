use alloy_primitives::{Address, Bytes, B256, U256};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use strata_core::{BlockContext, ParallelConfig, StateDb, Transaction};
use strata_engine::access::AccessAnalyzer;
use strata_engine::{build_dependency_graph, execute_sequential, run_parallel, schedule, TransferExecutor};
use strata_state::{Account, MemoryState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn account(i: u64) -> Address {
    Address::from_word(B256::from(U256::from(0x10_000 + i)))
}

/// `count` transfers over `accounts` accounts; fewer accounts, more conflicts.
fn make_txs(count: u64, accounts: u64) -> Vec<Transaction> {
    let mut nonces = vec![0u64; accounts as usize];
    (0..count)
        .map(|i| {
            let from = (i * 7) % accounts;
            let to = (i * 13 + 1) % accounts;
            let nonce = nonces[from as usize];
            nonces[from as usize] += 1;
            Transaction {
                hash: B256::from(U256::from(i)),
                from: account(from),
                to: Some(account(to)),
                nonce,
                value: U256::from(1),
                gas: 21_000,
                input: Bytes::new(),
            }
        })
        .collect()
}

fn make_state(accounts: u64) -> MemoryState {
    MemoryState::from_accounts(
        (0..accounts).map(|i| (account(i), Account::with_balance(U256::from(u64::MAX)))),
    )
}

// ---------------------------------------------------------------------------
// Benchmark: analysis + graph + schedule
// ---------------------------------------------------------------------------

fn bench_plan(c: &mut Criterion) {
    let analyzer = AccessAnalyzer::new(&BlockContext::default());
    let mut group = c.benchmark_group("plan");
    for (count, accounts) in [(1_000, 2_000), (1_000, 50), (10_000, 20_000), (10_000, 200)] {
        let txs = make_txs(count, accounts);
        group.bench_with_input(
            BenchmarkId::new(format!("accounts_{accounts}"), count),
            &txs,
            |b, txs| {
                b.iter(|| {
                    let sets = analyzer.analyze_batch(black_box(txs));
                    let graph = build_dependency_graph(&sets);
                    black_box(schedule(&graph))
                });
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: full pipeline vs sequential reference
// ---------------------------------------------------------------------------

fn bench_execute(c: &mut Criterion) {
    let accounts = 4_000;
    let txs = make_txs(2_000, accounts);
    let base = make_state(accounts);

    let mut group = c.benchmark_group("execute");
    group.sample_size(20);

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let mut state = base.copy();
            black_box(execute_sequential(
                &BlockContext::default(),
                &mut state,
                &txs,
                &TransferExecutor,
            ))
        });
    });

    for workers in [1, 4, 8] {
        let cfg = ParallelConfig::default().with_workers(workers);
        group.bench_with_input(BenchmarkId::new("parallel", workers), &cfg, |b, cfg| {
            b.iter(|| {
                let mut state = base.copy();
                black_box(
                    run_parallel(
                        &BlockContext::default(),
                        &mut state,
                        &txs,
                        Arc::new(TransferExecutor),
                        cfg,
                    )
                    .unwrap(),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_plan, bench_execute);
criterion_main!(benches);
