use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use shaledb::storage::buffer::BufferPoolManager;
use shaledb::storage::disk::DiskManager;

fn bench_buffer_pool(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(file.path()).unwrap());
    let buffer_pool = Arc::new(BufferPoolManager::new(64, disk_manager));

    // pre-create a working set larger than the pool to force evictions
    let mut page_ids = Vec::new();
    for _ in 0..256 {
        let (_, page_id) = buffer_pool.new_page().unwrap();
        buffer_pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    c.bench_function("fetch_unpin_hot", |b| {
        let hot = page_ids[0];
        b.iter(|| {
            let page = buffer_pool.fetch_page(hot).unwrap();
            std::hint::black_box(page.read().page_id);
            buffer_pool.unpin_page(hot, false);
        })
    });

    c.bench_function("fetch_unpin_scan_with_eviction", |b| {
        let mut cursor = 0usize;
        b.iter(|| {
            let page_id = page_ids[cursor % page_ids.len()];
            cursor += 1;
            let page = buffer_pool.fetch_page(page_id).unwrap();
            std::hint::black_box(page.read().page_id);
            buffer_pool.unpin_page(page_id, false);
        })
    });
}

criterion_group!(benches, bench_buffer_pool);
criterion_main!(benches);
