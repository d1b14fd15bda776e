use criterion::{criterion_group, criterion_main, Criterion};
use ledger_core::pow::{mine, mine_parallel, StopSignal};
use ledger_core::{merkle_root, Priority, TaskAction, TaskSnapshot, Transaction};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::hint::black_box;

fn task_txs(n: usize) -> Vec<Transaction> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|i| {
            let mut task = TaskSnapshot::new(format!("task-{i}"));
            task.priority = match rng.gen_range(0..3) {
                0 => Priority::Low,
                1 => Priority::Medium,
                _ => Priority::High,
            };
            Transaction::new(
                "alice",
                "alice",
                TaskAction::Create {
                    task_id: format!("t{i}"),
                    task_data: task,
                },
            )
        })
        .collect()
}

fn bench_pow(c: &mut Criterion) {
    let txs = task_txs(10);

    c.bench_function("mine_difficulty_3", |b| {
        b.iter(|| mine(1, black_box(txs.clone()), "0", "alice", 3));
    });

    c.bench_function("mine_parallel_difficulty_3", |b| {
        b.iter(|| {
            mine_parallel(1, black_box(txs.clone()), "0", "alice", 3, &StopSignal::never())
        });
    });

    let many = task_txs(1000);
    c.bench_function("merkle_root_1000_txs", |b| {
        b.iter(|| merkle_root(black_box(&many)));
    });
}

criterion_group!(benches, bench_pow);
criterion_main!(benches);
