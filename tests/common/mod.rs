use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use shaledb::common::config::HEADER_PAGE_ID;
use shaledb::storage::buffer::BufferPoolManager;
use shaledb::storage::disk::DiskManager;
use shaledb::storage::page::header_page;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk_manager = Arc::new(DiskManager::new(path)?);
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    Ok((buffer_pool, file))
}

// Like create_test_buffer_pool, but with page 0 set up as the header
// directory the way the engine bootstraps it
#[allow(dead_code)]
pub fn create_test_buffer_pool_with_header(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size)?;
    let (page, page_id) = buffer_pool.new_page()?;
    assert_eq!(page_id, HEADER_PAGE_ID);
    header_page::init(&mut page.write());
    buffer_pool.unpin_page(page_id, true);
    Ok((buffer_pool, file))
}

// Generate test data of the given size
#[allow(dead_code)]
pub fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}
