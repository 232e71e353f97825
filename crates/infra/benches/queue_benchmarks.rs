use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use relayq_core::NewJob;
use relayq_infra::jobs::{Collector, JobQueue};
use relayq_infra::secrets::InMemorySecretStore;
use relayq_infra::{InMemoryStore, InMemoryTransport, QueueConfig};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

struct Loaded {
    store: Arc<InMemoryStore>,
    transport: Arc<InMemoryTransport>,
}

/// `jobs` dispatched jobs whose requests have all resolved with 200.
fn loaded(rt: &tokio::runtime::Runtime, jobs: usize) -> Loaded {
    let store = InMemoryStore::arc();
    let transport = Arc::new(InMemoryTransport::new());
    let secrets = Arc::new(InMemorySecretStore::with_dispatch_secrets("k", "http://bench"));
    let queue = JobQueue::new(
        store.clone(),
        store.clone(),
        transport.clone(),
        secrets,
        &QueueConfig::default(),
    );
    rt.block_on(async {
        for i in 0..jobs {
            queue
                .create_job(NewJob::new("POST", format!("/ingest/{i}")))
                .await
                .unwrap();
        }
    });
    transport.respond_all(200, "ok");
    Loaded { store, transport }
}

fn bench_collector_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("collector_drain");

    for jobs in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.iter_batched(
                || loaded(&rt, jobs),
                |l| {
                    let collector =
                        Collector::new(l.store.clone(), l.store.clone(), l.transport.clone())
                            .with_batch_size(jobs);
                    let report = rt.block_on(collector.collect_once()).unwrap();
                    black_box(report)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_job_creation(c: &mut Criterion) {
    let rt = runtime();
    let store = InMemoryStore::arc();
    let transport = Arc::new(InMemoryTransport::new());
    let secrets = Arc::new(InMemorySecretStore::with_dispatch_secrets("k", "http://bench"));
    let queue = JobQueue::new(
        store.clone(),
        store,
        transport,
        secrets,
        &QueueConfig::default(),
    );

    c.bench_function("create_job_with_dispatch", |b| {
        b.iter(|| {
            let job = rt
                .block_on(queue.create_job(
                    NewJob::new("POST", "/ingest").with_payload(serde_json::json!({"x": 1})),
                ))
                .unwrap();
            black_box(job)
        });
    });
}

criterion_group!(benches, bench_collector_drain, bench_job_creation);
criterion_main!(benches);
