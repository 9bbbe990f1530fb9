use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::collections::btree_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::constants::LINKED_TABLE_KEY_LEN;
use crate::cursor::Cursor;
use crate::error::{Error, Result};

struct CursorCell {
    cursor: Mutex<Cursor>,
    /// Set once the cursor is linked into another
    is_sub_cursor: AtomicBool,
}

/// Shared handle on a cursor linked into other cursors
#[derive(Clone)]
pub struct CursorRef(Arc<CursorCell>);

impl CursorRef {
    pub fn new(cursor: Cursor) -> Self {
        CursorRef(Arc::new(CursorCell {
            cursor: Mutex::new(cursor),
            is_sub_cursor: AtomicBool::new(false),
        }))
    }

    /// Lock the cursor for use
    pub fn lock(&self) -> MutexGuard<'_, Cursor> {
        self.0.cursor.lock()
    }

    /// True once linked as the sub-cursor of another cursor
    pub fn is_sub_cursor(&self) -> bool {
        self.0.is_sub_cursor.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &CursorRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn mark_sub_cursor(&self) {
        self.0.is_sub_cursor.store(true, Ordering::Release);
    }
}

impl fmt::Debug for CursorRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CursorRef")
            .field("is_sub_cursor", &self.is_sub_cursor())
            .finish()
    }
}

/// Formats into a buffer without growing it, counting the full length
struct BoundedWriter<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
    required: usize,
}

impl fmt::Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.required += s.len();
        let room = self.limit.saturating_sub(self.buf.len()).min(s.len());
        self.buf.extend_from_slice(&s.as_bytes()[..room]);
        Ok(())
    }
}

/// Format `args` into `value`'s existing capacity; returns the length the
/// full value needs
fn write_bounded(value: &mut Vec<u8>, args: fmt::Arguments<'_>) -> Result<usize> {
    value.clear();
    let limit = value.capacity();
    let mut writer = BoundedWriter {
        buf: value,
        limit,
        required: 0,
    };
    fmt::write(&mut writer, args)
        .map_err(|_| Error::InvalidArgument("failed to format parameter value".into()))?;
    Ok(writer.required)
}

/// Truncate a table name to its key length on a char boundary
fn linked_key(tbl: &str) -> &str {
    if tbl.len() <= LINKED_TABLE_KEY_LEN {
        return tbl;
    }
    let mut end = LINKED_TABLE_KEY_LEN;
    while !tbl.is_char_boundary(end) {
        end -= 1;
    }
    &tbl[..end]
}

impl Cursor {
    /// Value of a named parameter
    pub fn param(&self, name: &str) -> Result<&[u8]> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty parameter name".into()));
        }
        self.named_params
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::NotFound(format!("parameter '{}'", name)))
    }

    /// Set a named parameter from format arguments, e.g.
    /// `curs.set_param("SPOT", format_args!("{}", 42))`
    pub fn set_param(&mut self, name: &str, args: fmt::Arguments<'_>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty parameter name".into()));
        }

        let value = self.named_params.entry(name.to_string()).or_default();
        let required = write_bounded(value, args)?;
        if required == value.len() {
            return Ok(());
        }

        // grow once and format again
        value.clear();
        value
            .try_reserve_exact(required)
            .map_err(|e| Error::ResourceExhausted(format!("parameter '{}': {}", name, e)))?;
        if write_bounded(value, args)? != value.len() {
            value.clear();
            return Err(Error::InvalidArgument(format!(
                "parameter '{}' changed length while formatting",
                name
            )));
        }
        Ok(())
    }

    /// Clear a named parameter; the name stays known
    pub fn unset_param(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty parameter name".into()));
        }
        match self.named_params.get_mut(name) {
            Some(value) => {
                value.clear();
                Ok(())
            }
            None => Err(Error::NotFound(format!("parameter '{}'", name))),
        }
    }

    /// Cursor linked under table name `tbl`
    pub fn linked_cursor(&self, tbl: &str) -> Result<CursorRef> {
        if tbl.is_empty() {
            return Err(Error::InvalidArgument("empty table name".into()));
        }
        self.linked_cursors
            .get(linked_key(tbl))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("linked cursor '{}'", tbl)))
    }

    /// Link `curs` under table name `tbl` and mark it as a sub-cursor
    pub fn set_linked_cursor(&mut self, tbl: &str, curs: CursorRef) -> Result<()> {
        if tbl.is_empty() {
            return Err(Error::InvalidArgument("empty table name".into()));
        }
        match self.linked_cursors.entry(linked_key(tbl).to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateName(tbl.to_string())),
            Entry::Vacant(slot) => {
                curs.mark_sub_cursor();
                slot.insert(curs);
                Ok(())
            }
        }
    }

    /// Attach user data, returning what was attached before
    pub fn set_user_data<T: Any + Send>(&mut self, data: T) -> Option<Box<dyn Any + Send>> {
        self.user.replace(Box::new(data))
    }

    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user.as_deref().and_then(|data| data.downcast_ref::<T>())
    }

    pub fn user_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.user.as_deref_mut().and_then(|data| data.downcast_mut::<T>())
    }

    pub fn take_user_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.user.take()
    }
}
