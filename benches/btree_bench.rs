use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use shaledb::common::config::HEADER_PAGE_ID;
use shaledb::common::rid::Rid;
use shaledb::index::btree::{BTreeIndex, GenericKey, I64KeyComparator};
use shaledb::storage::buffer::BufferPoolManager;
use shaledb::storage::disk::DiskManager;
use shaledb::storage::page::header_page;

type Key = GenericKey<8>;

fn setup_pool() -> (Arc<BufferPoolManager>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(file.path()).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::new(256, disk_manager));

    let (page, page_id) = buffer_pool.new_page().unwrap();
    assert_eq!(page_id, HEADER_PAGE_ID);
    header_page::init(&mut page.write());
    buffer_pool.unpin_page(page_id, true);
    (buffer_pool, file)
}

fn bench_btree(c: &mut Criterion) {
    c.bench_function("btree_insert_sequential", |b| {
        b.iter_batched(
            setup_pool,
            |(buffer_pool, _file)| {
                let index =
                    BTreeIndex::<Key, _>::new("bench", buffer_pool, I64KeyComparator).unwrap();
                for k in 0..1000i64 {
                    index
                        .insert(&Key::from_i64(k), Rid::from_i64(k))
                        .unwrap();
                }
            },
            criterion::BatchSize::LargeInput,
        )
    });

    c.bench_function("btree_point_lookup", |b| {
        let (buffer_pool, _file) = setup_pool();
        let index = BTreeIndex::<Key, _>::new("bench", buffer_pool, I64KeyComparator).unwrap();
        for k in 0..10_000i64 {
            index.insert(&Key::from_i64(k), Rid::from_i64(k)).unwrap();
        }
        let mut cursor = 0i64;
        b.iter(|| {
            let k = (cursor * 7919) % 10_000;
            cursor += 1;
            std::hint::black_box(index.get_value(&Key::from_i64(k)).unwrap());
        })
    });

    c.bench_function("btree_full_scan", |b| {
        let (buffer_pool, _file) = setup_pool();
        let index = BTreeIndex::<Key, _>::new("bench", buffer_pool, I64KeyComparator).unwrap();
        for k in 0..10_000i64 {
            index.insert(&Key::from_i64(k), Rid::from_i64(k)).unwrap();
        }
        b.iter(|| {
            let count = index.iter().unwrap().count();
            std::hint::black_box(count);
        })
    });
}

criterion_group!(benches, bench_btree);
criterion_main!(benches);
