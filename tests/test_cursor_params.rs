mod common;

use common::TableBuilder;
use std::sync::Arc;
use vdb_cursor::{Cursor, CursorRef, Error, Table};

// Common test setup
fn setup_test_cursor() -> (Arc<Table>, Cursor) {
    let mut tb = TableBuilder::new("SEQUENCE");
    tb.i32_column("SPOT_LEN", 1, &[150, 151], 4);
    let (tbl, _) = tb.build();
    let curs = tbl.create_cursor_read().unwrap();
    (tbl, curs)
}

#[test]
fn test_named_params() {
    let (_tbl, mut curs) = setup_test_cursor();

    assert!(matches!(curs.param("QUALITY"), Err(Error::NotFound(_))));
    assert!(matches!(curs.param(""), Err(Error::InvalidArgument(_))));

    curs.set_param("QUALITY", format_args!("{}", 30)).unwrap();
    assert_eq!(curs.param("QUALITY").unwrap(), b"30");

    // Longer value grows the buffer
    curs.set_param("QUALITY", format_args!("{}-{}", "phred", 33)).unwrap();
    assert_eq!(curs.param("QUALITY").unwrap(), b"phred-33");

    // Shorter value reuses it
    curs.set_param("QUALITY", format_args!("x")).unwrap();
    assert_eq!(curs.param("QUALITY").unwrap(), b"x");

    curs.unset_param("QUALITY").unwrap();
    assert_eq!(curs.param("QUALITY").unwrap(), b"");
    assert!(matches!(curs.unset_param("MISSING"), Err(Error::NotFound(_))));
    assert!(matches!(
        curs.set_param("", format_args!("1")),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_linked_cursors() {
    let (tbl, mut curs) = setup_test_cursor();
    let other = CursorRef::new(tbl.create_cursor_read().unwrap());
    assert!(!other.is_sub_cursor());

    assert!(matches!(curs.linked_cursor("REFERENCE"), Err(Error::NotFound(_))));
    curs.set_linked_cursor("REFERENCE", other.clone()).unwrap();
    assert!(other.is_sub_cursor());

    let found = curs.linked_cursor("REFERENCE").unwrap();
    assert!(found.ptr_eq(&other));

    // One cursor per name
    let third = CursorRef::new(tbl.create_cursor_read().unwrap());
    assert!(matches!(
        curs.set_linked_cursor("REFERENCE", third.clone()),
        Err(Error::DuplicateName(_))
    ));
    assert!(!third.is_sub_cursor());

    // Names are keyed on their first 64 bytes
    let long = "T".repeat(80);
    curs.set_linked_cursor(&long, third.clone()).unwrap();
    assert!(curs.linked_cursor(&"T".repeat(64)).unwrap().ptr_eq(&third));
    assert!(matches!(curs.linked_cursor(""), Err(Error::InvalidArgument(_))));

    // The linked cursor stays usable through its handle
    let idx = found.lock().add_column("SPOT_LEN").unwrap();
    assert_eq!(idx, 1);
}

#[test]
fn test_user_data() {
    let (_tbl, mut curs) = setup_test_cursor();
    assert!(curs.user_data::<u32>().is_none());

    assert!(curs.set_user_data(7u32).is_none());
    assert_eq!(curs.user_data::<u32>(), Some(&7));
    assert!(curs.user_data::<String>().is_none());

    *curs.user_data_mut::<u32>().unwrap() += 1;
    let previous = curs.set_user_data(String::from("spots")).unwrap();
    assert_eq!(previous.downcast_ref::<u32>(), Some(&8));
    assert_eq!(curs.user_data::<String>().map(String::as_str), Some("spots"));

    assert!(curs.take_user_data().is_some());
    assert!(curs.user_data::<String>().is_none());
}
