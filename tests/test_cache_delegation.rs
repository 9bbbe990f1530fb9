mod common;

use common::{i32_at, MemProduction, TableBuilder};
use vdb_cursor::{CacheLink, CacheTarget, Error, RowId, TypeDecl};

// Rows of a cache column: present values at the listed rows, empty elsewhere
fn cache_rows(rows: usize, present: &[(RowId, i32)]) -> Vec<Vec<u8>> {
    let mut out = vec![Vec::new(); rows];
    for (row, value) in present {
        out[(*row - 1) as usize] = value.to_le_bytes().to_vec();
    }
    out
}

fn cache_column(tb: &mut TableBuilder, name: &str, present: &[(RowId, i32)]) {
    let i32t: TypeDecl = tb.i32t;
    tb.stbl.add_column(name, i32t);
    tb.provide(MemProduction::new(name, i32t, 32, 1, cache_rows(10, present), 16));
}

#[test]
fn test_cache_column_in_same_table() {
    let mut tb = TableBuilder::new("T");
    tb.i32_column("A", 1, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 4);
    cache_column(&mut tb, "A_CACHE", &[(1, 100), (5, 500)]);
    let (tbl, _) = tb.build();

    let mut curs = tbl.create_cursor_read().unwrap();
    let a = curs.add_column("A").unwrap();

    // The cache column was bound alongside
    let cache_idx = curs.get_column_index("A_CACHE").unwrap();
    assert_eq!(
        curs.cache_link(a),
        Some(CacheLink {
            target: CacheTarget::SelfCursor,
            index: cache_idx,
        })
    );
    assert!(matches!(curs.add_column("A_CACHE"), Err(Error::ColumnExists(idx)) if idx == cache_idx));
    curs.open().unwrap();

    let mut buf = [0u8; 4];

    // Cached value wins
    curs.open_row().unwrap();
    curs.read(a, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 100);
    curs.close_row().unwrap();

    // Empty cache rows fall through to the column and are remembered
    curs.open_row().unwrap();
    curs.read(a, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 2);
    curs.close_row().unwrap();
    assert_eq!(curs.empty_window(), Some((2, 4)));

    curs.open_row().unwrap();
    curs.read(a, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 3);
    curs.close_row().unwrap();
    assert_eq!(curs.empty_window(), Some((2, 4)));

    // Past the window the cache is consulted again
    let mut direct = [0u8; 4];
    curs.read_direct(5, a, 32, &mut direct).unwrap();
    assert_eq!(i32_at(&direct, 0), 500);
    curs.read_direct(6, a, 32, &mut direct).unwrap();
    assert_eq!(i32_at(&direct, 0), 6);
    assert_eq!(curs.empty_window(), Some((6, 10)));

    // The cache column itself reads normally
    assert_eq!(curs.read_direct(1, cache_idx, 32, &mut direct).unwrap(), 1);
    assert_eq!(curs.read_direct(2, cache_idx, 32, &mut direct).unwrap(), 0);

    // Blob access bypasses the cache column
    let blob = curs.get_blob_direct(1, a).unwrap();
    assert_eq!(&blob.data()[..4], &1i32.to_le_bytes());
}

#[test]
fn test_cache_column_in_sidecar_table() {
    let mut cache_tb = TableBuilder::new("T_CACHE");
    cache_column(&mut cache_tb, "A_CACHE", &[(3, 333)]);
    let (cache_tbl, _) = cache_tb.build();

    let mut tb = TableBuilder::new("T");
    tb.i32_column("A", 1, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 4);
    tb.i32_column("B", 1, &[0; 10], 4);
    let tbl = tb.build_with_cache(cache_tbl);

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    assert!(curs.sidecar().is_some());

    let a = curs.add_column("A").unwrap();
    let b = curs.add_column("B").unwrap();
    assert_eq!(
        curs.cache_link(a),
        Some(CacheLink {
            target: CacheTarget::SideCar,
            index: 1,
        })
    );
    // No counterpart anywhere
    assert_eq!(curs.cache_link(b), None);

    curs.open().unwrap();
    assert!(curs.sidecar().unwrap().state().is_open());

    let mut buf = [0u8; 4];
    curs.read_direct(3, a, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 333);
    curs.read_direct(1, a, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 1);
    assert_eq!(curs.empty_window(), Some((1, 2)));
    curs.read_direct(2, a, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 2);
}

#[test]
fn test_sidecar_follows_post_open_add() {
    let mut cache_tb = TableBuilder::new("T_CACHE");
    cache_column(&mut cache_tb, "B_CACHE", &[(1, -1)]);
    let (cache_tbl, _) = cache_tb.build();

    let mut tb = TableBuilder::new("T");
    tb.i32_column("A", 1, &[1, 2, 3], 4);
    tb.i32_column("B", 1, &[4, 5, 6], 4);
    let tbl = tb.build_with_cache(cache_tbl);

    let mut curs = tbl.create_cached_cursor_read(1 << 20).unwrap();
    curs.permit_post_open_add().unwrap();
    curs.add_column("A").unwrap();
    curs.open().unwrap();

    // Both cursors accept columns after open
    let b = curs.add_column("B").unwrap();
    assert_eq!(curs.cache_link(b).map(|link| link.target), Some(CacheTarget::SideCar));

    let mut buf = [0u8; 4];
    curs.read_direct(1, b, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), -1);
    curs.read_direct(2, b, 32, &mut buf).unwrap();
    assert_eq!(i32_at(&buf, 0), 5);
}

#[test]
fn test_uncached_cursor_has_no_sidecar() {
    let (cache_tbl, _) = TableBuilder::new("T_CACHE").build();
    let mut tb = TableBuilder::new("T");
    tb.i32_column("A", 1, &[1], 4);
    let tbl = tb.build_with_cache(cache_tbl);

    let curs = tbl.create_cursor_read().unwrap();
    assert!(curs.sidecar().is_none());
}
