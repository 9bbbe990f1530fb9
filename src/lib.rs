// src/lib.rs
mod bitstr;
mod blob;
mod blob_cache;
mod column;
mod column_cache;
mod config;
mod constants;
mod cursor;
mod error;
mod page_map;
mod pagemap_worker;
mod params;
mod production;
mod schema;
mod table;
mod types;

pub use bitstr::{bitcpy, bytes_for_bits};
pub use blob::{Blob, BlobBuilder, CellData, CellLocation};
pub use blob_cache::BlobCache;
pub use column::Column;
pub use column_cache::ColumnCache;
pub use config::{Manager, ManagerConfig, ENV_DISABLE_PAGEMAP_THREAD, ENV_SIDECAR_CACHE_CAPACITY};
pub use constants::{
    CursorFlags, ManagerFlags, CACHE_COLUMN_SUFFIX, DEFAULT_SIDECAR_CACHE_CAPACITY,
    LINKED_TABLE_KEY_LEN, MAX_COLSPEC_LEN, MIN_CACHED_BLOB_SPAN,
};
pub use cursor::{CacheLink, CacheTarget, ColumnRef, Cursor};
pub use error::{Error, Result};
pub use page_map::{PageMap, PageMapEntry, RowLocation};
pub use pagemap_worker::{PageMapCodec, PageMapState, PageMapWorker};
pub use params::CursorRef;
pub use production::{
    BlobContext, ChainKind, DlSet, NativeColumn, PhysicalColumn, ProdResolve, Production,
    ProductionResolver,
};
pub use schema::{ColumnDecl, ColumnMatch, PhysicalDecl, Schema, TableSchema, TypeDecl, TypeDesc};
pub use table::{StaticColumnMeta, Table, TableStore};
pub use types::{BitsRead, ColumnIndex, CtxId, CursorState, RowId};
