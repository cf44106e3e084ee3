//! Performance benchmarks for the publication engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use docfeed::{
    Document, DocumentStore, Filter, Mutation, ObjectId, SubscriptionConfig, SubscriptionManager,
};
use serde_json::json;
use std::sync::Arc;

fn set_mutation(value: serde_json::Value) -> Mutation {
    match value {
        serde_json::Value::Object(m) => Mutation::Set(m),
        _ => panic!("expected object"),
    }
}

/// Insert throughput with no subscribers attached.
fn bench_insert(c: &mut Criterion) {
    c.bench_function("insert", |b| {
        let store = DocumentStore::new();
        b.iter(|| {
            let doc = Document::from_json(ObjectId::new(), json!({"n": 1})).unwrap();
            black_box(store.insert(doc).unwrap());
        });
    });
}

/// Filtered scans over a populated store.
fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");

    for size in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("store_size", size), &size, |b, &size| {
            let store = DocumentStore::new();
            for i in 0..size {
                store
                    .insert(Document::from_json(i as i64, json!({"group": i % 10})).unwrap())
                    .unwrap();
            }
            let filter = Filter::where_eq("group", json!(3));

            b.iter(|| black_box(store.find(&filter)).len());
        });
    }

    group.finish();
}

/// Update throughput with a varying number of live subscriptions, each
/// drained by its own thread.
fn bench_update_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_fanout");

    for subscribers in [0usize, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &subscribers| {
                let store = Arc::new(DocumentStore::new());
                let manager = SubscriptionManager::new(Arc::clone(&store));
                store
                    .insert(Document::from_json("hot", json!({"n": 0})).unwrap())
                    .unwrap();

                let mut drains = Vec::new();
                for _ in 0..subscribers {
                    let handle = manager.subscribe_channel(SubscriptionConfig {
                        buffer_size: 1 << 16,
                        ..Default::default()
                    });
                    drains.push(std::thread::spawn(move || {
                        while handle.recv().is_ok() {}
                    }));
                }

                let id = "hot".into();
                let mut n = 0i64;
                b.iter(|| {
                    n += 1;
                    store
                        .update_by_id(&id, set_mutation(json!({"n": n})))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_find, bench_update_fanout);
criterion_main!(benches);
