//! Benchmarks for storage write/read and budgeted retrieval.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hindsight_memory::prelude::*;
use tokio::runtime::Runtime;

fn make_input(i: usize) -> FragmentInput {
    FragmentInput {
        content: format!("fragment {i} about rust ownership and borrowing"),
        project_id: "bench".to_string(),
        agent_id: "agent".to_string(),
        ..Default::default()
    }
}

fn store_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = Arc::new(MemoryEngine::new(MemoryEngineConfig::for_testing()));

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Elements(1));
    group.bench_function("single_fragment", |b| {
        let engine = engine.clone();
        b.to_async(&rt).iter(|| async {
            engine.store(black_box(make_input(0)), None).await.unwrap();
        });
    });
    group.finish();
}

fn retrieve_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = Arc::new(MemoryEngine::new(MemoryEngineConfig::for_testing()));

    rt.block_on(async {
        for i in 0..1000 {
            engine.store(make_input(i), None).await.unwrap();
        }
    });

    let mut group = c.benchmark_group("retrieve");
    for top_k in &[5, 10, 20, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(top_k), top_k, |b, &top_k| {
            let engine = engine.clone();
            b.to_async(&rt).iter(|| {
                let engine = engine.clone();
                async move {
                    let query = RetrieveQuery {
                        query: "rust ownership".to_string(),
                        top_k: Some(top_k),
                        ..Default::default()
                    };
                    engine.retrieve(black_box(query)).await.unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, store_benchmark, retrieve_benchmark);
criterion_main!(benches);
