//! Record log and instance store benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use durafsm_core::instance::next_timestamp;
use durafsm_core::InstanceRecord;
use durafsm_log::{Frame, FrameKind, LogConfig, LogEntry, RecordLog, SyncPolicy};
use durafsm_store::{InstanceStore, LogStore, MemoryStore};
use tempfile::TempDir;

fn log_config(dir: &TempDir, policy: SyncPolicy) -> LogConfig {
    LogConfig::new(dir.path())
        .with_segment_size(64 * 1024 * 1024) // 64MB segments
        .with_sync_policy(policy)
}

fn test_entry(id_len: usize) -> LogEntry {
    LogEntry::Record {
        id: "d".repeat(id_len),
        created_at: next_timestamp(None),
        state: "uploaded".to_string(),
    }
}

fn bench_log_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_append");
    group.throughput(Throughput::Elements(1));

    for (name, policy) in [
        ("no_sync", SyncPolicy::Manual),
        ("sync_every_100", SyncPolicy::EveryN(100)),
    ] {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::open(log_config(&dir, policy)).unwrap();
        let entry = test_entry(36);

        group.bench_with_input(BenchmarkId::new("record", name), &entry, |b, entry| {
            b.iter(|| black_box(log.append(entry).unwrap()));
        });
    }

    group.finish();
}

fn bench_log_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_replay");

    for count in [1_000u64, 10_000] {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::open(log_config(&dir, SyncPolicy::Manual)).unwrap();
        let entry = test_entry(36);
        for _ in 0..count {
            log.append(&entry).unwrap();
        }
        log.sync().unwrap();

        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &log, |b, log| {
            b.iter(|| black_box(log.replay().unwrap().len()));
        });
    }

    group.finish();
}

fn bench_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for size in [64usize, 1024, 16 * 1024] {
        let frame = Frame::new(FrameKind::Record, 1, Bytes::from(vec![b'x'; size]));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(frame.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_store_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_append");
    group.throughput(Throughput::Elements(1));

    let dir = TempDir::new().unwrap();
    let stores: Vec<(&str, Box<dyn InstanceStore>)> = vec![
        ("memory", Box::new(MemoryStore::new())),
        (
            "log",
            Box::new(LogStore::open(log_config(&dir, SyncPolicy::Manual)).unwrap()),
        ),
    ];

    for (name, store) in &stores {
        let mut previous = None;
        group.bench_function(*name, |b| {
            b.iter(|| {
                let record = InstanceRecord {
                    id: "bench-doc".to_string(),
                    created_at: next_timestamp(previous),
                    state: "uploaded".to_string(),
                };
                previous = Some(record.created_at);
                store.append(black_box(&record)).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_store_latest(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_latest");

    let store = MemoryStore::new();
    let mut previous = None;
    for i in 0..10_000 {
        let record = InstanceRecord {
            id: format!("doc-{}", i % 1_000),
            created_at: next_timestamp(previous),
            state: "uploaded".to_string(),
        };
        previous = Some(record.created_at);
        store.append(&record).unwrap();
    }

    group.bench_function("hit", |b| {
        b.iter(|| black_box(store.latest("doc-500").unwrap()));
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(store.latest("nobody").unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_log_append,
    bench_log_replay,
    bench_frame_encode,
    bench_store_append,
    bench_store_latest,
);

criterion_main!(benches);
