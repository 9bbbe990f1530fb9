mod common;

use common::{i32_at, TableBuilder};
use std::sync::Arc;
use vdb_cursor::{Error, Manager, ManagerConfig};

fn values(n: i32) -> Vec<i32> {
    (1..=n).collect()
}

#[test]
fn test_cached_cursor_reuses_blobs() {
    let mut tb = TableBuilder::new("T");
    let prod = tb.i32_column("A", 1, &values(16), 8);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();

    // Alternate between the two blobs
    let mut buf = [0u8; 4];
    for row in [1, 9, 2, 10, 3, 11] {
        curs.read_direct(row, a, 32, &mut buf).unwrap();
        assert_eq!(i32_at(&buf, 0), row as i32);
    }
    assert_eq!(prod.reads(), 2);
    assert_eq!(curs.blob_cache().unwrap().len(), 2);

    // Hits hand out the cached blob itself
    let first = curs.get_blob_direct(3, a).unwrap();
    let again = curs.get_blob_direct(7, a).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
}

#[test]
fn test_uncached_cursor_keeps_last_blob() {
    let mut tb = TableBuilder::new("T");
    let prod = tb.i32_column("A", 1, &values(16), 8);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cursor_read().unwrap();
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();

    let mut buf = [0u8; 4];
    for row in 1..=8 {
        curs.read_direct(row, a, 32, &mut buf).unwrap();
    }
    assert_eq!(prod.reads(), 1);

    for row in [9, 1, 9] {
        curs.read_direct(row, a, 32, &mut buf).unwrap();
    }
    assert_eq!(prod.reads(), 4);
}

#[test]
fn test_short_blobs_not_cached() {
    let mut tb = TableBuilder::new("T");
    let prod = tb.i32_column("A", 1, &values(8), 4);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();

    let mut buf = [0u8; 4];
    for row in [1, 5, 1] {
        curs.read_direct(row, a, 32, &mut buf).unwrap();
    }
    assert_eq!(prod.reads(), 3);
    assert!(curs.blob_cache().unwrap().is_empty());
}

#[test]
fn test_cache_capacity_evicts_oldest() {
    let mut tb = TableBuilder::new("T");
    tb.i32_column("A", 1, &values(32), 8);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();

    let size = curs.get_blob_direct(1, a).unwrap().size_bytes();
    assert_eq!(curs.set_cache_capacity(size * 3 / 2), 1 << 20);
    assert_eq!(curs.blob_cache().unwrap().len(), 1);

    // Room for one blob only
    curs.get_blob_direct(9, a).unwrap();
    curs.get_blob_direct(17, a).unwrap();
    let cache = curs.blob_cache().unwrap();
    assert_eq!(cache.len(), 1);
    assert!(cache.contents() <= cache.capacity());

    // Shrinking below a blob empties the cache
    curs.set_cache_capacity(1);
    assert!(curs.blob_cache().unwrap().is_empty());
    // Reads still work without caching
    let mut buf = [0u8; 4];
    curs.read_direct(20, a, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 20);
}

#[test]
fn test_data_prefetch() {
    let mut tb = TableBuilder::new("T");
    let prod = tb.i32_column("A", 1, &values(24), 8);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();

    // Out-of-range ids are ignored; ids sharing a blob load it once
    curs.data_prefetch(&[12, 3, 30, 5, 0], a, 1, 16, false).unwrap();
    assert_eq!(prod.reads(), 2);
    assert_eq!(curs.blob_cache().unwrap().len(), 2);
    assert!(!curs.blob_cache().unwrap().is_flush_suspended());

    // Already cached
    curs.data_prefetch(&[4, 10], a, 1, 24, false).unwrap();
    assert_eq!(prod.reads(), 2);

    let mut buf = [0u8; 4];
    for row in [3, 12, 16] {
        curs.read_direct(row, a, 32, &mut buf).unwrap();
        assert_eq!(i32_at(&buf, 0), row as i32);
    }
    assert_eq!(prod.reads(), 2);
}

#[test]
fn test_data_prefetch_errors() {
    let mut tb = TableBuilder::new("T");
    tb.i32_column("A", 1, &values(16), 8);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();

    assert!(matches!(
        curs.data_prefetch(&[3, 40], a, 1, 100, false),
        Err(Error::NotFound(_))
    ));
    assert!(!curs.blob_cache().unwrap().is_flush_suspended());

    curs.data_prefetch(&[40, 41, 12], a, 1, 100, true).unwrap();
    assert_eq!(curs.blob_cache().unwrap().len(), 2);

    assert!(matches!(
        curs.data_prefetch(&[1], 7, 1, 100, false),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_data_prefetch_without_cache() {
    let mut tb = TableBuilder::new("T");
    let prod = tb.i32_column("A", 1, &values(16), 8);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cursor_read().unwrap();
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();

    curs.data_prefetch(&[1, 9], a, 1, 16, false).unwrap();
    assert_eq!(prod.reads(), 0);
}

#[test]
fn test_pagemap_worker_follows_manager() {
    let manager = Arc::new(Manager::with_config(ManagerConfig {
        pagemap_thread: true,
        sidecar_cache_capacity: 1 << 20,
    }));

    let mut tb = TableBuilder::with_manager("T", manager.clone());
    tb.i32_column("A", 1, &values(16), 8);
    let (tbl, _) = tb.build();

    // Only cached cursors get a worker
    let curs = tbl.create_cursor_read().unwrap();
    assert!(!curs.page_maps().has_worker());

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    assert!(curs.page_maps().has_worker());

    // Blobs decode their page maps on the worker
    let a = curs.add_column("A").unwrap();
    curs.open().unwrap();
    let mut buf = [0u8; 4];
    for row in [1, 9, 16] {
        curs.read_direct(row, a, 32, &mut buf).unwrap();
        assert_eq!(i32_at(&buf, 0), row as i32);
    }
    drop(curs);

    manager.disable_pagemap_thread();
    let curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    assert!(!curs.page_maps().has_worker());
}

#[test]
fn test_data_prefetch_requires_open() {
    let mut tb = TableBuilder::new("T");
    let prod = tb.i32_column("A", 1, &values(16), 8);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    let a = curs.add_column("A").unwrap();
    assert!(matches!(
        curs.data_prefetch(&[1, 9], a, 1, 16, false),
        Err(Error::InvalidState("cursor not open"))
    ));
    assert_eq!(prod.reads(), 0);
}
