use bitflags::bitflags;

// Cursor flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CursorFlags: u32 {
        const READ_ONLY = 0x01;
        const PERMIT_ADD_COLUMN = 0x02;
        const PERMIT_POST_OPEN_ADD = 0x04;
        const SUSPEND_TRIGGERS = 0x08;
    }
}

// Manager flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ManagerFlags: u32 {
        const DISABLE_PAGEMAP_THREAD = 0x01;
    }
}

/// Longest colspec accepted by `add_column`, in bytes
pub const MAX_COLSPEC_LEN: usize = 1024;
/// Suffix naming the side-car counterpart of a column
pub const CACHE_COLUMN_SUFFIX: &str = "_CACHE";
/// Blobs spanning this many rows or fewer are not kept in the MRU cache
pub const MIN_CACHED_BLOB_SPAN: i64 = 4;
/// Default blob cache capacity of a side-car cursor
pub const DEFAULT_SIDECAR_CACHE_CAPACITY: usize = 64 * 1024 * 1024;
/// Linked cursor table names are keyed on this many bytes
pub const LINKED_TABLE_KEY_LEN: usize = 64;
/// Initial capacity of the per-cursor row vector
pub const INITIAL_ROW_CAPACITY: usize = 16;
/// Name of the page-map worker thread
pub const PAGEMAP_THREAD_NAME: &str = "vdb-pagemap";
