use anyhow::Result;

mod common;
use common::{create_test_buffer_pool, generate_test_data};

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    assert!(buffer_pool.unpin_page(page_id, false));
    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false);

    let fetched = buffer_pool.fetch_page(page_id)?;
    assert_eq!(fetched.read().page_id, page_id);
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_page_modification_survives_eviction() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    let payload = generate_test_data(64);
    {
        let mut page_guard = page.write();
        page_guard.data[100..100 + payload.len()].copy_from_slice(&payload);
    }
    buffer_pool.unpin_page(page_id, true);

    // push the page out of the small pool
    for _ in 0..3 {
        let (_, other) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(other, true);
    }

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[100..100 + payload.len()], &payload[..]);
    }
    buffer_pool.unpin_page(page_id, false);
    Ok(())
}

#[test]
fn test_pool_exhaustion_when_all_pinned() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(3)?;

    let mut pinned = Vec::new();
    for _ in 0..3 {
        pinned.push(buffer_pool.new_page()?);
    }
    // every frame is pinned, so there is no victim
    assert!(buffer_pool.new_page().is_err());

    let (_, page_id) = pinned[0];
    buffer_pool.unpin_page(page_id, false);
    // one unpinned frame makes room again
    let (_, new_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_id, false);
    for &(_, page_id) in &pinned[1..] {
        buffer_pool.unpin_page(page_id, false);
    }
    Ok(())
}

#[test]
fn test_unpin_semantics() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    assert!(buffer_pool.unpin_page(page_id, false));
    // pin count is already zero
    assert!(!buffer_pool.unpin_page(page_id, false));
    // unknown page
    assert!(!buffer_pool.unpin_page(9999, false));
    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    let payload = generate_test_data(32);
    {
        let mut page_guard = page.write();
        page_guard.data[10..10 + payload.len()].copy_from_slice(&payload);
    }
    buffer_pool.unpin_page(page_id, true);
    buffer_pool.flush_page(page_id)?;

    // the bytes are on disk now
    let mut raw = [0u8; shaledb::common::config::PAGE_SIZE];
    buffer_pool.disk_manager().read_page(page_id, &mut raw)?;
    assert_eq!(&raw[10..10 + payload.len()], &payload[..]);

    assert!(buffer_pool.flush_page(9999).is_err());
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    // pinned pages cannot be deleted
    assert!(buffer_pool.delete_page(page_id).is_err());

    buffer_pool.unpin_page(page_id, false);
    buffer_pool.delete_page(page_id)?;

    // the freed frame is reusable
    let (_, new_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_id, false);
    Ok(())
}

#[test]
fn test_audit_invariant() -> Result<()> {
    let pool_size = 10;
    let (buffer_pool, _file) = create_test_buffer_pool(pool_size)?;

    let mut page_ids = Vec::new();
    for _ in 0..4 {
        let (_, page_id) = buffer_pool.new_page()?;
        page_ids.push(page_id);
    }

    // four pages resident and pinned: none replaceable yet
    let (table, replacer, free) = buffer_pool.audit();
    assert_eq!(table, 4);
    assert_eq!(replacer, 0);
    assert_eq!(free, pool_size - 4);

    for &page_id in &page_ids {
        buffer_pool.unpin_page(page_id, false);
    }

    // every frame is either free or holds a resident page
    let (table, replacer, free) = buffer_pool.audit();
    assert_eq!(table, 4);
    assert_eq!(replacer, 4);
    assert_eq!(free, pool_size - 4);
    assert_eq!(table, pool_size - free);
    Ok(())
}

#[test]
fn test_fetch_prefers_free_list_over_victims() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(4)?;

    let (_, a) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(a, true);

    // free frames remain, so page `a` must not be evicted
    let (_, b) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(b, false);

    let (table, _, free) = buffer_pool.audit();
    assert_eq!(table, 2);
    assert_eq!(free, 2);
    Ok(())
}
