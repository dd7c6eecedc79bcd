//! Performance benchmarks for live collections.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use live_mirror::{
    ApiSource, CollectionConfig, EventBridge, FieldIdentity, Key, LiveCollection, MemoryApi,
    MemoryBus, Method, PushChannels, RecordingLog, Source, Topic,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Row {
    id: u64,
    #[allow(dead_code)]
    name: String,
}

fn collection(api: &Arc<MemoryApi>) -> LiveCollection<Row> {
    let source: Arc<dyn Source> = Arc::new(ApiSource::new(api.clone(), "rows"));
    LiveCollection::new(
        CollectionConfig {
            name: "rows".to_string(),
            expandable: false,
            log: Arc::new(RecordingLog::new()),
        },
        FieldIdentity::new("id", |row: &Row| Key(row.id)),
        Some(source),
        Some(PushChannels::new(
            Arc::new(MemoryBus::new()),
            Topic::new("row-create", 1u64),
            Topic::new("row-delete", 1u64),
        )),
    )
}

fn rows(count: u64) -> Value {
    Value::Array(
        (0..count)
            .map(|i| json!({"id": i, "name": format!("row {}", i)}))
            .collect(),
    )
}

/// Benchmark bulk loads of varying size
fn bench_bulk_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_load");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for size in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("items", size), &size, |b, &size| {
            let api = Arc::new(MemoryApi::new());
            api.respond(Method::Get, "rows", rows(size));

            b.iter(|| {
                let rows = collection(&api);
                black_box(runtime.block_on(rows.refresh(false)).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark push churn: create then delete every key
fn bench_push_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_churn");

    for size in [100u64, 1_000] {
        group.bench_with_input(BenchmarkId::new("keys", size), &size, |b, &size| {
            let api = Arc::new(MemoryApi::new());
            let rows = collection(&api);
            let payloads: Vec<Value> = (0..size)
                .map(|i| json!({"id": i, "name": "x"}))
                .collect();

            b.iter(|| {
                for raw in &payloads {
                    rows.apply_create(raw.clone()).unwrap();
                }
                for raw in &payloads {
                    black_box(rows.apply_delete(raw.clone()).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark in-place replacement of an existing key
fn bench_replace_in_place(c: &mut Criterion) {
    let api = Arc::new(MemoryApi::new());
    let rows = collection(&api);
    for i in 0..1_000u64 {
        rows.apply_create(json!({"id": i, "name": "x"})).unwrap();
    }

    c.bench_function("replace_in_place", |b| {
        b.iter(|| {
            black_box(rows.apply_create(json!({"id": 500, "name": "y"})).unwrap());
        });
    });
}

/// Benchmark event fan-out with varying listener counts
fn bench_event_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_fanout");

    for listeners in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, &listeners| {
                let bridge: EventBridge<u64> = EventBridge::new();
                for _ in 0..listeners {
                    bridge.listen(|event| {
                        black_box(event);
                    });
                }

                b.iter(|| bridge.emit(black_box(7)));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_bulk_load,
    bench_push_churn,
    bench_replace_in_place,
    bench_event_fanout,
);

criterion_main!(benches);
