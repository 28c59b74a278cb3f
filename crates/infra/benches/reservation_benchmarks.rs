use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use fmshop_core::{OrderId, ProductId};
use fmshop_infra::ledger::{InMemoryLedger, InventoryLedger};
use fmshop_inventory::StockItem;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn bench_reserve_release_latency(c: &mut Criterion) {
    let rt = runtime();
    let ledger = InMemoryLedger::new();
    let product = ProductId::new();
    rt.block_on(ledger.restock(product, 1_000_000, None)).unwrap();

    let mut group = c.benchmark_group("reserve_release_latency");
    group.bench_function("reserve_then_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order = OrderId::new();
                ledger.reserve(order, product, 1).await.unwrap();
                black_box(ledger.release(order, product).await.unwrap());
            })
        });
    });
    group.finish();
}

fn bench_concurrent_reservations(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("concurrent_reservations");

    for tasks in [1usize, 8, 64].iter() {
        group.throughput(Throughput::Elements(*tasks as u64));
        group.bench_with_input(BenchmarkId::new("same_product", tasks), tasks, |b, &tasks| {
            b.iter(|| {
                rt.block_on(async {
                    let ledger = Arc::new(InMemoryLedger::new());
                    let product = ProductId::new();
                    // Half the demand fits; the rest must be turned away.
                    ledger.restock(product, (tasks / 2).max(1) as u32, None).await.unwrap();

                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let ledger = ledger.clone();
                            tokio::spawn(async move { ledger.reserve(OrderId::new(), product, 1).await.is_ok() })
                        })
                        .collect();
                    let mut admitted = 0;
                    for handle in handles {
                        if handle.await.unwrap() {
                            admitted += 1;
                        }
                    }
                    black_box(admitted)
                })
            });
        });
    }
    group.finish();
}

fn bench_replay_rebuild(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("replay_rebuild");

    for entries in [10u32, 100, 1000, 10000].iter() {
        let ledger = InMemoryLedger::new();
        let product = ProductId::new();
        let log = rt.block_on(async {
            ledger.restock(product, *entries, None).await.unwrap();
            for _ in 1..*entries {
                ledger.reserve(OrderId::new(), product, 1).await.unwrap();
            }
            ledger.transactions(product).await.unwrap()
        });

        group.throughput(Throughput::Elements(log.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &log, |b, log| {
            b.iter(|| black_box(StockItem::replay(product, "unit", log.iter())));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_reserve_release_latency,
    bench_concurrent_reservations,
    bench_replay_rebuild
);
criterion_main!(benches);
