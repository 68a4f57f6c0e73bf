#![allow(missing_docs)]
mod utils;

use criterion::{Criterion, criterion_group, criterion_main};
use signet_lmdb::{Cursor, LmdbResult, TransactionKind, ffi};
use std::{hint::black_box, ptr};
use utils::*;

/// Benchmark of iterator sequential read performance.
fn bench_get_seq_iter(c: &mut Criterion) {
    let n = 100;
    let (_dir, env) = setup_bench_db(n);
    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    // The named database adds one record to the main database.
    let actual_items = n + 1;
    c.bench_function("cursor::traverse::iter_x3", |b| {
        b.iter(|| {
            let mut cursor = txn.cursor(db).unwrap();
            let mut i = 0;
            let mut count = 0u32;

            for (key, data) in cursor.iter_start().map(Result::unwrap) {
                i += key.len() + data.len();
                count += 1;
            }
            for (key, data) in cursor.iter_start().filter_map(Result::ok) {
                i += key.len() + data.len();
                count += 1;
            }

            fn iterate<K: TransactionKind>(cursor: &mut Cursor<'_, K>) -> LmdbResult<usize> {
                let mut i = 0;
                for result in cursor.iter_start() {
                    let (key, data) = result?;
                    i += key.try_get()?.len() + data.try_get()?.len();
                }
                Ok(i)
            }
            i += iterate(&mut cursor).unwrap();

            black_box(i);
            assert_eq!(count, actual_items * 2);
        })
    });
}

/// Benchmark of cursor sequential read performance.
fn bench_get_seq_cursor(c: &mut Criterion) {
    let n = 100;
    let (_dir, env) = setup_bench_db(n);
    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    let actual_items = n + 1;
    c.bench_function("cursor::traverse::iter", |b| {
        b.iter(|| {
            let (i, count) = txn
                .cursor(db)
                .unwrap()
                .iter_start()
                .map(Result::unwrap)
                .fold((0, 0), |(i, count), (key, val)| (i + key.len() + val.len(), count + 1));

            black_box(i);
            assert_eq!(count, actual_items);
        })
    });
}

/// Benchmark of manual cursor stepping with checked access.
fn bench_get_seq_step(c: &mut Criterion) {
    let n = 100;
    let (_dir, env) = setup_bench_db(n);
    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    let actual_items = n + 1;
    c.bench_function("cursor::traverse::step", |b| {
        b.iter(|| {
            let mut cursor = txn.cursor(db).unwrap();
            let mut i = 0;
            let mut count = 0u32;
            while let Some((key, data)) = cursor.next().unwrap() {
                i += key.try_get().unwrap().len() + data.try_get().unwrap().len();
                count += 1;
            }
            black_box(i);
            assert_eq!(count, actual_items);
        })
    });
}

/// Benchmark of raw LMDB sequential read performance (control).
fn bench_get_seq_raw(c: &mut Criterion) {
    let n = 100;
    let (_dir, env) = setup_bench_db(n);
    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_db(None).unwrap();
    let actual_items = n + 1;

    let mut key = ffi::MDB_val { mv_size: 0, mv_data: ptr::null_mut() };
    let mut data = ffi::MDB_val { mv_size: 0, mv_data: ptr::null_mut() };

    c.bench_function("cursor::traverse::raw", |b| {
        b.iter(|| unsafe {
            let cursor = txn.cursor(db).unwrap();
            let raw = cursor.cursor();
            let mut i = 0;
            let mut count = 0u32;

            while ffi::mdb_cursor_get(raw, &mut key, &mut data, ffi::MDB_NEXT) == 0 {
                i += key.mv_size + data.mv_size;
                count += 1;
            }

            black_box(i);
            assert_eq!(count, actual_items);
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = bench_get_seq_iter, bench_get_seq_cursor, bench_get_seq_step, bench_get_seq_raw
}
criterion_main!(benches);
