//! The header page (page id 0) is a compact directory mapping user-visible
//! names (indexes and tables, at most 32 bytes each) to their root page
//! ids.
//!
//! ```text
//!  -----------------------------------------------------------------
//! | RecordCount (4) | Entry_1 name (32) | Entry_1 root_id (4) | ... |
//!  -----------------------------------------------------------------
//! ```

use byteorder::{ByteOrder, LittleEndian};

use crate::common::config::{PageId, PAGE_SIZE};
use crate::storage::page::page::Page;

pub const MAX_NAME_LEN: usize = 32;
const RECORD_SIZE: usize = MAX_NAME_LEN + 4;
/// As many (name, root id) records as fit behind the count field.
pub const MAX_RECORDS: usize = (PAGE_SIZE - 4) / RECORD_SIZE;

pub fn init(page: &mut Page) {
    page.data.fill(0);
    set_record_count(page, 0);
}

pub fn record_count(page: &Page) -> usize {
    LittleEndian::read_i32(&page.data[0..4]) as usize
}

fn set_record_count(page: &mut Page, count: usize) {
    LittleEndian::write_i32(&mut page.data[0..4], count as i32);
}

fn record_offset(index: usize) -> usize {
    4 + index * RECORD_SIZE
}

fn name_at(page: &Page, index: usize) -> &[u8] {
    let pos = record_offset(index);
    let raw = &page.data[pos..pos + MAX_NAME_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
    &raw[..end]
}

fn find_record(page: &Page, name: &str) -> Option<usize> {
    (0..record_count(page)).find(|&i| name_at(page, i) == name.as_bytes())
}

/// Register `name -> root_id`. Fails on duplicates, over-long names and a
/// full directory.
pub fn insert_record(page: &mut Page, name: &str, root_id: PageId) -> bool {
    if name.len() > MAX_NAME_LEN || name.is_empty() {
        return false;
    }
    let count = record_count(page);
    if count >= MAX_RECORDS || find_record(page, name).is_some() {
        return false;
    }

    let pos = record_offset(count);
    page.data[pos..pos + MAX_NAME_LEN].fill(0);
    page.data[pos..pos + name.len()].copy_from_slice(name.as_bytes());
    LittleEndian::write_i32(
        &mut page.data[pos + MAX_NAME_LEN..pos + RECORD_SIZE],
        root_id,
    );
    set_record_count(page, count + 1);
    true
}

/// Point an existing record at a new root.
pub fn update_record(page: &mut Page, name: &str, root_id: PageId) -> bool {
    let Some(index) = find_record(page, name) else {
        return false;
    };
    let pos = record_offset(index);
    LittleEndian::write_i32(
        &mut page.data[pos + MAX_NAME_LEN..pos + RECORD_SIZE],
        root_id,
    );
    true
}

/// Drop a record, compacting the tail over it.
pub fn delete_record(page: &mut Page, name: &str) -> bool {
    let Some(index) = find_record(page, name) else {
        return false;
    };
    let count = record_count(page);
    let start = record_offset(index + 1);
    let end = record_offset(count);
    page.data.copy_within(start..end, record_offset(index));
    set_record_count(page, count - 1);
    true
}

pub fn get_root_id(page: &Page, name: &str) -> Option<PageId> {
    let index = find_record(page, name)?;
    let pos = record_offset(index);
    Some(LittleEndian::read_i32(
        &page.data[pos + MAX_NAME_LEN..pos + RECORD_SIZE],
    ))
}
