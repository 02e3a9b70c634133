//! Store benchmark: byte throughput, structural edits and compaction.
//!
//! Target: single-byte operations on an attached window stay in the
//! nanosecond range; paging and compaction scale with the text touched.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use pagerope::{Store, StoreConfig, TextId, Whence};
use std::io::Write;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'A' + (i % 26) as u8).collect()
}

fn filled(len: usize) -> (Store, TextId) {
    let mut store = Store::new();
    let text = store.open(None).expect("open");
    store.put_bytes(text, &pattern(len)).expect("fill");
    (store, text)
}

fn store_put_char(c: &mut Criterion) {
    c.bench_function("store_put_then_delete_back", |b| {
        let (mut store, text) = filled(4_096);
        b.iter(|| {
            store.put_char(text, black_box(b'x')).expect("put");
            store.delete_back(text).expect("delete");
        });
    });
}

fn store_get_char(c: &mut Criterion) {
    c.bench_function("store_read_64k", |b| {
        let (mut store, text) = filled(64 * 1024);
        b.iter(|| {
            store.rewind(text).expect("rewind");
            let mut sum = 0u64;
            while let Some(byte) = store.get_char(text).expect("get") {
                sum += u64::from(byte);
            }
            black_box(sum)
        });
    });
}

fn store_insert_middle(c: &mut Criterion) {
    let line = pattern(80);
    c.bench_function("store_insert_80_bytes_middle", |b| {
        let (mut store, text) = filled(64 * 1024);
        b.iter(|| {
            store.seek(text, 32 * 1024, Whence::Start).expect("seek");
            store.put_bytes(text, black_box(&line)).expect("put");
            store.delete(text, -80).expect("delete");
        });
    });
}

fn store_excise_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_excise_insert");

    for len in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::new("half", len), &len, |b, &len| {
            let (mut store, text) = filled(len);
            b.iter(|| {
                store.seek(text, (len / 4) as i64, Whence::Start).expect("seek");
                let cut = store.excise(text, (len / 2) as i64).expect("excise").expect("non-empty");
                store.seek(text, 0, Whence::End).expect("seek");
                store.insert(text, cut).expect("insert");
            });
        });
    }

    group.finish();
}

fn store_file_backward(c: &mut Criterion) {
    let data = pattern(1 << 20);
    c.bench_function("store_file_back_up_1m", |b| {
        b.iter_batched(
            || {
                let mut file = tempfile::tempfile().expect("tempfile");
                file.write_all(&data).expect("write");
                let mut store = Store::new();
                let (_, rope) = store.open_file(file).expect("open file");
                let text = store.open(Some(rope)).expect("open");
                store.seek(text, 0, Whence::End).expect("seek");
                (store, text)
            },
            |(mut store, text)| {
                let mut count = 0u32;
                while store.back_up(text).expect("back up").is_some() {
                    count += 1;
                }
                black_box(count)
            },
            BatchSize::PerIteration,
        );
    });
}

fn store_compaction(c: &mut Criterion) {
    let config = StoreConfig::default().with_window_size(64);
    let mut group = c.benchmark_group("store_compact");

    for level in [0u32, 1, 2, 4] {
        group.bench_with_input(BenchmarkId::new("level", level), &level, |b, &level| {
            b.iter_batched(
                || {
                    let mut store = Store::with_config(config.clone());
                    let text = store.open(None).expect("open");
                    store.put_bytes(text, &pattern(256 * 1024)).expect("fill");
                    store.rewind(text).expect("rewind");
                    store
                },
                |mut store| {
                    store.compact(level).expect("compact");
                    black_box(store.stats())
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    store_put_char,
    store_get_char,
    store_insert_middle,
    store_excise_insert,
    store_file_backward,
    store_compaction,
);
criterion_main!(benches);
