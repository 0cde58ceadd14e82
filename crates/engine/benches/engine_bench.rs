use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Db, Options};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 128;

fn key(i: usize) -> Vec<u8> {
    format!("bench-key-{i:09}").into_bytes()
}

fn open_empty() -> (tempfile::TempDir, Db) {
    let dir = tempdir().unwrap();
    let options = Options {
        dir_path: dir.path().to_path_buf(),
        ..Options::default()
    };
    let db = Db::open(options).unwrap();
    (dir, db)
}

fn open_populated() -> (tempfile::TempDir, Db) {
    let (dir, db) = open_empty();
    let value = vec![b'x'; VALUE_SIZE];
    for i in 0..N_KEYS {
        db.put(&key(i), &value).unwrap();
    }
    (dir, db)
}

fn put_benchmark(c: &mut Criterion) {
    c.bench_function("engine_put_10k", |b| {
        b.iter_batched(
            open_empty,
            |(_dir, db)| {
                let value = vec![b'x'; VALUE_SIZE];
                for i in 0..N_KEYS {
                    db.put(&key(i), &value).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn get_benchmark(c: &mut Criterion) {
    c.bench_function("engine_get_10k", |b| {
        b.iter_batched(
            open_populated,
            |(_dir, db)| {
                for i in 0..N_KEYS {
                    let value = db.get(&key(i)).unwrap();
                    assert_eq!(value.len(), VALUE_SIZE);
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn delete_benchmark(c: &mut Criterion) {
    c.bench_function("engine_delete_10k", |b| {
        b.iter_batched(
            open_populated,
            |(_dir, db)| {
                for i in 0..N_KEYS {
                    db.delete(&key(i)).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, put_benchmark, get_benchmark, delete_benchmark);
criterion_main!(benches);
