use std::fmt;

/// Row identifier; rows are addressed by signed 64-bit ids
pub type RowId = i64;

/// Stable per-cursor column index, dense from 1 (0 is reserved)
pub type ColumnIndex = u32;

/// Context-qualified id of a schema object: `ctx` selects the
/// declaring context, `id` the slot within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CtxId {
    pub ctx: u32,
    pub id: u32,
}

impl CtxId {
    pub const fn new(ctx: u32, id: u32) -> Self {
        CtxId { ctx, id }
    }
}

impl fmt::Display for CtxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.ctx, self.id)
    }
}

/// Cursor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Columns may be added; not yet readable
    Construct,
    /// Open, no row selected
    Ready,
    /// A row is selected and readable
    RowOpen,
    /// Resolution failed; terminal
    Failed,
}

impl CursorState {
    /// True once the cursor has been opened successfully
    pub fn is_open(self) -> bool {
        matches!(self, CursorState::Ready | CursorState::RowOpen)
    }
}

/// Result of a bit-level read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitsRead {
    /// Elements copied into the buffer
    pub num_read: u32,
    /// Elements left in the row after the copied ones
    pub remaining: u32,
}
