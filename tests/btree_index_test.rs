use std::sync::Arc;

use anyhow::Result;

mod common;
use common::create_test_buffer_pool_with_header;

use shaledb::common::rid::Rid;
use shaledb::index::btree::{BTreeIndex, GenericKey, I64KeyComparator};

type Key = GenericKey<8>;

fn key(k: i64) -> Key {
    Key::from_i64(k)
}

#[test]
fn test_single_leaf_round_trip() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(50)?;
    let index = BTreeIndex::<Key, _>::new("primary", buffer_pool, I64KeyComparator)?;

    for k in 1..=99i64 {
        assert!(index.insert(&key(k), Rid::from_i64(k))?);
    }

    for k in 1..=99i64 {
        let rid = index.get_value(&key(k))?.unwrap();
        assert_eq!(rid, Rid::new((k >> 32) as i32, k as i32));
    }
    assert_eq!(index.get_value(&key(0))?, None);
    assert_eq!(index.get_value(&key(100))?, None);

    // the iterator from key 1 yields exactly 99 ordered pairs
    let pairs: Vec<(Key, Rid)> = index.iter_from(&key(1))?.collect();
    assert_eq!(pairs.len(), 99);
    for (i, (k, rid)) in pairs.iter().enumerate() {
        assert_eq!(k.to_i64(), i as i64 + 1);
        assert_eq!(*rid, Rid::from_i64(i as i64 + 1));
    }
    Ok(())
}

#[test]
fn test_duplicate_key_rejected() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(50)?;
    let index = BTreeIndex::<Key, _>::new("primary", buffer_pool, I64KeyComparator)?;

    assert!(index.insert(&key(7), Rid::from_i64(7))?);
    assert!(!index.insert(&key(7), Rid::from_i64(777))?);
    // the original value is untouched
    assert_eq!(index.get_value(&key(7))?, Some(Rid::from_i64(7)));
    Ok(())
}

#[test]
fn test_splits_build_a_deep_tree() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(50)?;
    // tiny nodes force splits every few inserts
    let index = BTreeIndex::<Key, _>::with_max_sizes(
        "primary",
        buffer_pool,
        I64KeyComparator,
        3,
        4,
    )?;

    // interleave low and high keys so both leaf halves see inserts
    let keys: Vec<i64> = (0..100).map(|i| if i % 2 == 0 { i } else { 200 - i }).collect();
    for &k in &keys {
        assert!(index.insert(&key(k), Rid::from_i64(k))?);
    }

    for &k in &keys {
        assert_eq!(index.get_value(&key(k))?, Some(Rid::from_i64(k)));
    }

    // the leaf chain enumerates every key exactly once, in order
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    let scanned: Vec<i64> = index.iter()?.map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned, sorted);
    Ok(())
}

#[test]
fn test_remove_with_coalesce_down_to_empty() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(50)?;
    let index = BTreeIndex::<Key, _>::with_max_sizes(
        "primary",
        buffer_pool,
        I64KeyComparator,
        3,
        4,
    )?;

    for k in 0..60i64 {
        index.insert(&key(k), Rid::from_i64(k))?;
    }

    // removing a missing key is a no-op
    assert!(!index.remove(&key(999))?);

    // drain from both ends to exercise redistribute and coalesce
    for k in 0..30i64 {
        assert!(index.remove(&key(k))?, "failed to remove {k}");
        assert_eq!(index.get_value(&key(k))?, None);
    }
    for k in (30..60i64).rev() {
        assert!(index.remove(&key(k))?, "failed to remove {k}");
    }

    assert!(index.is_empty());
    assert_eq!(index.get_value(&key(31))?, None);

    // the tree is usable again after being emptied
    assert!(index.insert(&key(5), Rid::from_i64(5))?);
    assert_eq!(index.get_value(&key(5))?, Some(Rid::from_i64(5)));
    Ok(())
}

#[test]
fn test_remove_then_reinsert_restores_state() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(50)?;
    let index = BTreeIndex::<Key, _>::with_max_sizes(
        "primary",
        buffer_pool,
        I64KeyComparator,
        4,
        5,
    )?;

    for k in 0..40i64 {
        index.insert(&key(k), Rid::from_i64(k))?;
    }
    for k in 10..20i64 {
        assert!(index.remove(&key(k))?);
    }
    for k in 10..20i64 {
        assert!(index.insert(&key(k), Rid::from_i64(k))?);
    }

    let scanned: Vec<i64> = index.iter()?.map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned, (0..40i64).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_iter_from_starts_mid_tree() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(50)?;
    let index = BTreeIndex::<Key, _>::with_max_sizes(
        "primary",
        buffer_pool,
        I64KeyComparator,
        3,
        4,
    )?;

    for k in (0..100i64).step_by(2) {
        index.insert(&key(k), Rid::from_i64(k))?;
    }

    // start key between two stored keys lands on the next larger one
    let scanned: Vec<i64> = index.iter_from(&key(51))?.map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned, (52..100i64).step_by(2).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_root_persisted_in_header_page() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(50)?;

    {
        let index = BTreeIndex::<Key, _>::new(
            "orders_pk",
            Arc::clone(&buffer_pool),
            I64KeyComparator,
        )?;
        for k in 0..20i64 {
            index.insert(&key(k), Rid::from_i64(k))?;
        }
    }

    // a new handle on the same name finds the tree through page 0
    let reopened = BTreeIndex::<Key, _>::new("orders_pk", buffer_pool, I64KeyComparator)?;
    assert!(!reopened.is_empty());
    for k in 0..20i64 {
        assert_eq!(reopened.get_value(&key(k))?, Some(Rid::from_i64(k)));
    }
    Ok(())
}

#[test]
fn test_concurrent_inserts_all_visible() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(100)?;
    let index = Arc::new(BTreeIndex::<Key, _>::with_max_sizes(
        "primary",
        buffer_pool,
        I64KeyComparator,
        8,
        8,
    )?);

    let mut handles = Vec::new();
    for t in 0..4i64 {
        let index = Arc::clone(&index);
        handles.push(std::thread::spawn(move || -> Result<()> {
            for i in 0..100i64 {
                let k = t * 1000 + i;
                assert!(index.insert(&key(k), Rid::from_i64(k))?);
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().unwrap()?;
    }

    for t in 0..4i64 {
        for i in 0..100i64 {
            let k = t * 1000 + i;
            assert_eq!(index.get_value(&key(k))?, Some(Rid::from_i64(k)));
        }
    }

    let scanned: Vec<i64> = index.iter()?.map(|(k, _)| k.to_i64()).collect();
    assert_eq!(scanned.len(), 400);
    assert!(scanned.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn test_concurrent_reads_during_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool_with_header(100)?;
    let index = Arc::new(BTreeIndex::<Key, _>::with_max_sizes(
        "primary",
        buffer_pool,
        I64KeyComparator,
        8,
        8,
    )?);

    for k in 0..200i64 {
        index.insert(&key(k), Rid::from_i64(k))?;
    }

    let writer = {
        let index = Arc::clone(&index);
        std::thread::spawn(move || -> Result<()> {
            for k in 200..400i64 {
                index.insert(&key(k), Rid::from_i64(k))?;
            }
            Ok(())
        })
    };

    // established keys stay visible while the writer grows the tree
    for _ in 0..5 {
        for k in (0..200i64).step_by(17) {
            assert_eq!(index.get_value(&key(k))?, Some(Rid::from_i64(k)));
        }
    }
    writer.join().unwrap()?;

    for k in 0..400i64 {
        assert_eq!(index.get_value(&key(k))?, Some(Rid::from_i64(k)));
    }
    Ok(())
}
