//! Production chains and the resolver that builds them.
//!
//! A production manufactures blobs of column data for a row range. The
//! resolver is supplied by the embedding application: given a column
//! declaration it walks the schema and returns the root production of the
//! column's read chain, memoizing intermediate productions in the caches
//! lent to it through `ProdResolve`.

use std::fmt;
use std::sync::Arc;

use crate::blob::Blob;
use crate::column_cache::ColumnCache;
use crate::error::Result;
use crate::pagemap_worker::PageMapCodec;
use crate::schema::{ColumnDecl, Schema, TableSchema, TypeDecl};
use crate::table::Table;
use crate::types::{ColumnIndex, RowId};

/// Services available to a production while it builds a blob
pub struct BlobContext<'a> {
    /// Cursor column the blob is requested for
    pub col_idx: ColumnIndex,
    /// Page-map (de)serialization, on the cursor's worker when it has one
    pub page_maps: &'a PageMapCodec,
}

/// Native storage behind a production
#[derive(Clone)]
pub enum NativeColumn {
    /// Stored column with its own row-id index
    Physical(Arc<dyn PhysicalColumn>),
    /// Single value repeated over a contiguous id range
    Static,
    /// Computed from other columns
    Computed,
}

impl fmt::Debug for NativeColumn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NativeColumn::Physical(_) => write!(f, "Physical"),
            NativeColumn::Static => write!(f, "Static"),
            NativeColumn::Computed => write!(f, "Computed"),
        }
    }
}

/// Handle on a stored column
pub trait PhysicalColumn: Send + Sync {
    /// First row id >= `start` holding data; `NotFound` past the end
    fn find_first_row_id(&self, start: RowId) -> Result<RowId>;

    /// Inclusive id range, `None` when the column holds no rows
    fn id_range(&self) -> Result<Option<(RowId, RowId)>>;
}

/// One node of a column's read chain
pub trait Production: Send + Sync {
    fn name(&self) -> &str;

    /// Output type; completes columns declared without one
    fn typedecl(&self) -> TypeDecl;

    /// Manufacture a blob covering `row_id`, spanning at least `count` rows
    /// when the data allows
    fn read_blob(&self, row_id: RowId, count: u32, cx: &BlobContext<'_>) -> Result<Arc<Blob>>;

    /// Inclusive id range, `None` when there are no rows
    fn id_range(&self) -> Result<Option<(RowId, RowId)>>;

    /// Id range of the blob that holds `row_id`
    fn page_id_range(&self, row_id: RowId, cx: &BlobContext<'_>) -> Result<(RowId, RowId)> {
        let blob = self.read_blob(row_id, 1, cx)?;
        Ok((blob.start_id(), blob.stop_id()))
    }

    fn native(&self) -> NativeColumn {
        NativeColumn::Computed
    }
}

/// Set of libraries implementing schema functions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlSet {
    libs: Vec<String>,
}

impl DlSet {
    pub fn new(libs: Vec<String>) -> Self {
        DlSet { libs }
    }

    pub fn libs(&self) -> &[String] {
        &self.libs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.libs.iter().any(|lib| lib == name)
    }
}

/// Direction a chain is resolved for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Decoding,
    Encoding,
}

/// Resolution context handed to a `ProductionResolver`
pub struct ProdResolve<'a> {
    pub schema: &'a Schema,
    pub libs: &'a DlSet,
    pub stbl: &'a TableSchema,
    /// Table being read, for storage access
    pub table: &'a Table,
    /// Productions shared across the cursor's columns
    pub cache: &'a mut ColumnCache<Arc<dyn Production>>,
    /// Physical columns opened so far
    pub phys: &'a mut ColumnCache<Arc<dyn PhysicalColumn>>,
    /// Productions created for this cursor but not cached
    pub owned: &'a mut Vec<Arc<dyn Production>>,
    /// Indirect bindings, one slot per schema indirect
    pub cx_bind: &'a mut Vec<Option<TypeDecl>>,
    pub chain: ChainKind,
    pub blobbing: bool,
    pub ignore_column_errors: bool,
    pub discover_writable_columns: bool,
}

/// Builds read chains for column declarations
pub trait ProductionResolver: Send + Sync {
    /// Open the libraries schema functions are loaded from
    fn open_libs(&self) -> Result<DlSet> {
        Ok(DlSet::default())
    }

    /// Root production of `scol`'s read chain; `None` when the column is
    /// undefined for this table
    fn resolve_column_root(
        &self,
        pr: &mut ProdResolve<'_>,
        scol: &ColumnDecl,
    ) -> Result<Option<Arc<dyn Production>>>;
}
