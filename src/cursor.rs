use log::{debug, error};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::bitstr::bitcpy;
use crate::blob::{Blob, CellData};
use crate::blob_cache::BlobCache;
use crate::column::Column;
use crate::column_cache::ColumnCache;
use crate::constants::{
    CursorFlags, CACHE_COLUMN_SUFFIX, INITIAL_ROW_CAPACITY, MAX_COLSPEC_LEN, MIN_CACHED_BLOB_SPAN,
};
use crate::error::{Error, Result};
use crate::pagemap_worker::PageMapCodec;
use crate::params::CursorRef;
use crate::production::{
    BlobContext, ChainKind, DlSet, NativeColumn, PhysicalColumn, ProdResolve, Production,
};
use crate::schema::{ColumnDecl, Schema, TableSchema, TypeDecl, TypeDesc};
use crate::table::Table;
use crate::types::{BitsRead, ColumnIndex, CursorState, RowId};

/// Where reads of a column are tried first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTarget {
    /// Another column of the same cursor
    SelfCursor,
    /// A column of the side-car cursor
    SideCar,
}

/// Delegation of a column to its `_CACHE` counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLink {
    pub target: CacheTarget,
    pub index: ColumnIndex,
}

/// A readable column as reported by `list_readable_columns`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColumnRef {
    pub name: String,
    /// Type rendered as text
    pub typedecl: String,
    pub td: TypeDecl,
}

/// Row/column cursor over a table
pub struct Cursor {
    /// Table being read
    tbl: Arc<Table>,
    /// Private copy of the table's schema
    schema: Schema,
    /// Table schema, extended with implicit members
    stbl: TableSchema,
    /// Bound columns by index; slot 0 is reserved
    row: Vec<Option<Column>>,
    /// Column index by declaration id
    col: ColumnCache<ColumnIndex>,
    /// Physical columns opened during resolution
    phys: ColumnCache<Arc<dyn PhysicalColumn>>,
    /// Productions shared between columns
    prod: ColumnCache<Arc<dyn Production>>,
    /// Productions created during resolution but not cached
    owned: Vec<Arc<dyn Production>>,
    /// Libraries, opened on first resolution
    libs: OnceCell<DlSet>,
    /// Current row id
    row_id: RowId,
    /// Lifecycle state
    state: CursorState,
    /// Cursor flags
    flags: CursorFlags,
    /// Cursor on the companion cache table
    sidecar: Option<Box<Cursor>>,
    /// Per-column `_CACHE` delegation
    cache_links: Vec<Option<CacheLink>>,
    /// Rows known to have no `_CACHE` data
    empty_window: Option<(RowId, RowId)>,
    /// Recently used blobs
    blob_cache: Option<BlobCache>,
    /// Page-map (de)serialization
    page_maps: PageMapCodec,
    /// Named parameters
    pub(crate) named_params: BTreeMap<String, Vec<u8>>,
    /// Linked cursors by table name
    pub(crate) linked_cursors: BTreeMap<String, CursorRef>,
    /// User data
    pub(crate) user: Option<Box<dyn Any + Send>>,
}

impl Cursor {
    /// Create a read cursor; a non-zero `capacity` enables the blob cache
    pub(crate) fn make_read(tbl: Arc<Table>, capacity: u64) -> Result<Self> {
        let (blob_cache, page_maps) = if capacity > 0 {
            (
                Some(BlobCache::new(capacity)),
                PageMapCodec::launch(tbl.manager().pagemap_thread_enabled()),
            )
        } else {
            (None, PageMapCodec::synchronous())
        };

        let mut row = Vec::with_capacity(INITIAL_ROW_CAPACITY);
        row.push(None);

        let mut curs = Cursor {
            schema: (**tbl.schema()).clone(),
            stbl: tbl.table_schema().clone_extend(),
            tbl,
            row,
            col: ColumnCache::new(),
            phys: ColumnCache::new(),
            prod: ColumnCache::new(),
            owned: Vec::new(),
            libs: OnceCell::new(),
            row_id: 0,
            state: CursorState::Construct,
            flags: CursorFlags::READ_ONLY,
            sidecar: None,
            cache_links: Vec::new(),
            empty_window: None,
            blob_cache,
            page_maps,
            named_params: BTreeMap::new(),
            linked_cursors: BTreeMap::new(),
            user: None,
        };
        curs.supplement_schema()?;
        Ok(curs)
    }

    pub(crate) fn set_sidecar(&mut self, sidecar: Cursor) {
        self.sidecar = Some(Box::new(sidecar));
    }

    /// Add implicit members for stored columns the schema does not declare
    fn supplement_schema(&mut self) -> Result<()> {
        let store = Arc::clone(self.tbl.store());

        for name in store.list_columns()? {
            self.supplement_name(None, &name);
        }

        for meta in store.static_columns()? {
            let text = match meta.typedecl.as_deref() {
                Some(text) if !text.is_empty() => text,
                _ => continue,
            };
            match self.schema.resolve_typedecl(text) {
                Ok(td) => self.supplement_name(Some(td), &meta.name),
                Err(e) => debug!("static column '{}': type '{}' ignored: {}", meta.name, text, e),
            }
        }
        Ok(())
    }

    fn supplement_name(&mut self, td: Option<TypeDecl>, name: &str) {
        let pname = format!(".{}", name);

        if let Some(phys) = self.stbl.physical(&pname) {
            if phys.is_virtual {
                self.stbl.implicit_phys_member(td, &pname);
            }
            return;
        }

        if !self.stbl.has_column(name) {
            self.stbl.implicit_phys_member(td, &pname);
            self.stbl.implicit_col_member(name, &pname);
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn flags(&self) -> CursorFlags {
        self.flags
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(CursorFlags::READ_ONLY)
    }

    /// Shared handle on the table
    pub fn open_parent(&self) -> Arc<Table> {
        Arc::clone(&self.tbl)
    }

    /// The cursor's schema copy
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The cursor's extended table schema
    pub fn table_schema(&self) -> &TableSchema {
        &self.stbl
    }

    pub fn sidecar(&self) -> Option<&Cursor> {
        self.sidecar.as_deref()
    }

    pub fn sidecar_mut(&mut self) -> Option<&mut Cursor> {
        self.sidecar.as_deref_mut()
    }

    /// `_CACHE` delegation recorded for a column
    pub fn cache_link(&self, col_idx: ColumnIndex) -> Option<CacheLink> {
        self.cache_links.get(col_idx as usize).copied().flatten()
    }

    /// Rows currently known to have no `_CACHE` data
    pub fn empty_window(&self) -> Option<(RowId, RowId)> {
        self.empty_window
    }

    pub fn page_maps(&self) -> &PageMapCodec {
        &self.page_maps
    }

    pub fn blob_cache(&self) -> Option<&BlobCache> {
        self.blob_cache.as_ref()
    }

    /// Allow columns to be added after `open`. Only valid before opening;
    /// applied to the side-car cursor as well.
    pub fn permit_post_open_add(&mut self) -> Result<()> {
        let result = match self.state {
            CursorState::Failed => Err(Error::InvalidState("cursor failed")),
            CursorState::Construct => {
                self.flags.insert(CursorFlags::PERMIT_POST_OPEN_ADD);
                Ok(())
            }
            _ => Err(Error::InvalidState("cursor already open")),
        };
        if let Some(sidecar) = self.sidecar.as_mut() {
            let _ = sidecar.permit_post_open_add();
        }
        result
    }

    /// Block resolution of schema triggers
    pub fn suspend_triggers(&mut self) {
        self.flags.insert(CursorFlags::SUSPEND_TRIGGERS);
    }

    /// Add a column by colspec: a name, or `(type) name` to pick one of
    /// several declarations. Adding a column twice fails with
    /// `ColumnExists` carrying the index it already has.
    pub fn add_column(&mut self, colspec: &str) -> Result<ColumnIndex> {
        let result = self.add_column_checked(colspec);
        if let Err(e) = &result {
            if e.existing_column().is_none() && !self.flags.contains(CursorFlags::PERMIT_ADD_COLUMN) {
                error!("failed to add column '{}' to cursor: {}", colspec, e);
            }
        }
        result
    }

    fn add_column_checked(&mut self, colspec: &str) -> Result<ColumnIndex> {
        // Validate cursor and name
        if colspec.is_empty() {
            return Err(Error::InvalidArgument("empty column name".into()));
        }
        if self.state == CursorState::Failed {
            return Err(Error::InvalidState("cursor failed"));
        }
        if self.state != CursorState::Construct && !self.flags.contains(CursorFlags::PERMIT_ADD_COLUMN) {
            return Err(Error::Locked);
        }
        if colspec.len() >= MAX_COLSPEC_LEN {
            return Err(Error::InvalidArgument(format!(
                "column spec longer than {} bytes",
                MAX_COLSPEC_LEN - 1
            )));
        }

        let found = self.stbl.find(&self.schema, colspec)?;
        let idx = self.add_scolumn(found.decl, found.cast)?;
        self.link_cache_column(colspec, idx);
        Ok(idx)
    }

    /// Bind a declaration to a new column index
    fn add_scolumn(&mut self, scol: ColumnDecl, cast: Option<TypeDecl>) -> Result<ColumnIndex> {
        if self.is_read_only() && !scol.readable {
            return Err(Error::WrongAccessMode(format!("column '{}' is not readable", scol.name)));
        }

        // benign duplicate
        if let Some(&idx) = self.col.get(&scol.cid) {
            return Err(Error::ColumnExists(idx));
        }

        let idx = self.row.len() as ColumnIndex;
        let cid = scol.cid;
        let needs_resolve = self.state.is_open() || !scol.td.is_known();

        self.row.push(Some(Column::new(scol, idx)));
        let result = self.col.set(cid, idx).and_then(|_| {
            if needs_resolve {
                self.resolve_column(idx, false)?;
            }
            self.check_cast(idx, cast)
        });

        if let Err(e) = result {
            // roll back; the index stays retired
            self.col.swap(cid, None)?;
            self.row[idx as usize] = None;
            return Err(e);
        }
        Ok(idx)
    }

    fn check_cast(&self, idx: ColumnIndex, cast: Option<TypeDecl>) -> Result<()> {
        let cast = match cast {
            Some(cast) => cast,
            None => return Ok(()),
        };
        let td = self.column(idx)?.typedecl();
        if td == cast || self.schema.cast_to(td, cast) {
            return Ok(());
        }
        Err(Error::TypeMismatch {
            stored: td.type_id,
            requested: cast.type_id,
        })
    }

    /// Record where `<colspec>_CACHE` lives, looking in this cursor first
    /// and then in the side-car cursor
    fn link_cache_column(&mut self, colspec: &str, idx: ColumnIndex) {
        if self.cache_links.len() <= idx as usize {
            self.cache_links.resize(idx as usize + 1, None);
        }
        self.cache_links[idx as usize] = None;

        let cache_spec = format!("{}{}", colspec, CACHE_COLUMN_SUFFIX);
        if cache_spec.len() >= MAX_COLSPEC_LEN {
            return;
        }

        let link = match self.add_column_checked(&cache_spec) {
            Ok(cidx) | Err(Error::ColumnExists(cidx)) => Some(CacheLink {
                target: CacheTarget::SelfCursor,
                index: cidx,
            }),
            Err(e) => {
                debug!("{}: not in table: {}", cache_spec, e);
                match self.sidecar.as_mut().map(|sc| sc.add_column_checked(&cache_spec)) {
                    Some(Ok(cidx)) | Some(Err(Error::ColumnExists(cidx))) => Some(CacheLink {
                        target: CacheTarget::SideCar,
                        index: cidx,
                    }),
                    Some(Err(e)) => {
                        debug!("{}: not in cache table: {}", cache_spec, e);
                        None
                    }
                    None => None,
                }
            }
        };
        if let Some(link) = link {
            debug!("column {} delegates to {:?} column {}", idx, link.target, link.index);
        }
        self.cache_links[idx as usize] = link;
    }

    /// Look up the index of an added column. A bare name shared by several
    /// added declarations is `Ambiguous`.
    pub fn get_column_index(&self, colspec: &str) -> Result<ColumnIndex> {
        if colspec.is_empty() {
            return Err(Error::InvalidArgument("empty column name".into()));
        }
        if self.state == CursorState::Failed {
            return Err(Error::InvalidState("cursor failed"));
        }
        if colspec.len() >= MAX_COLSPEC_LEN {
            return Err(Error::InvalidArgument("column spec too long".into()));
        }

        let (exact, overloads) = match self.stbl.find(&self.schema, colspec) {
            Ok(m) => (Some(m.decl.cid), m.overloads),
            Err(Error::Ambiguous(name)) => (None, self.stbl.overloads(&name)),
            Err(e) => return Err(e),
        };

        if let Some(idx) = exact.and_then(|cid| self.col.get(&cid)) {
            return Ok(*idx);
        }

        let bound: Vec<ColumnIndex> = overloads
            .iter()
            .filter_map(|cid| self.col.get(cid).copied())
            .collect();
        match bound.as_slice() {
            [idx] => Ok(*idx),
            [] => Err(Error::NotFound(format!("column '{}' not added", colspec))),
            _ => Err(Error::Ambiguous(colspec.to_string())),
        }
    }

    fn column(&self, idx: ColumnIndex) -> Result<&Column> {
        self.row
            .get(idx as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::NotFound(format!("column {}", idx)))
    }

    /// Resolve the read chain of column `idx`. With `ignore_errors` a
    /// column that fails is dropped from the cursor instead.
    fn resolve_column(&mut self, idx: ColumnIndex, ignore_errors: bool) -> Result<()> {
        let scol = match self.row.get(idx as usize).and_then(Option::as_ref) {
            Some(col) if !col.is_resolved() => col.scol().clone(),
            _ => return Ok(()),
        };

        match self.resolve_production(&scol, ignore_errors) {
            Ok(prod) => {
                if !scol.td.is_known() {
                    self.stbl.repair_typedecl(scol.cid, prod.typedecl());
                }
                if let Some(col) = self.row[idx as usize].as_mut() {
                    col.set_production(prod);
                }
                Ok(())
            }
            Err(e) if ignore_errors => {
                debug!("dropping column '{}' idx {}: {}", scol.name, idx, e);
                self.row[idx as usize] = None;
                self.col.swap(scol.cid, None)?;
                Ok(())
            }
            Err(e) => {
                if !self.flags.contains(CursorFlags::PERMIT_POST_OPEN_ADD) {
                    error!("failed to resolve column '{}' idx '{}': {}", scol.name, idx, e);
                }
                Err(e)
            }
        }
    }

    fn resolve_production(&mut self, scol: &ColumnDecl, ignore_errors: bool) -> Result<Arc<dyn Production>> {
        let linker = Arc::clone(self.tbl.linker());
        let libs = self.libs.get_or_try_init(|| linker.open_libs())?;
        let mut cx_bind = vec![None; self.schema.num_indirect() as usize];

        let mut pr = ProdResolve {
            schema: &self.schema,
            libs,
            stbl: &self.stbl,
            table: &*self.tbl,
            cache: &mut self.prod,
            phys: &mut self.phys,
            owned: &mut self.owned,
            cx_bind: &mut cx_bind,
            chain: ChainKind::Decoding,
            blobbing: false,
            ignore_column_errors: ignore_errors,
            discover_writable_columns: false,
        };

        linker
            .resolve_column_root(&mut pr, scol)?
            .ok_or_else(|| Error::Undefined(format!("column '{}'", scol.name)))
    }

    fn resolve_column_productions(&mut self, ignore_errors: bool) -> Result<()> {
        for idx in 1..self.row.len() {
            self.resolve_column(idx as ColumnIndex, ignore_errors)?;
        }
        Ok(())
    }

    /// Resolve every added column and make the cursor readable. A column
    /// that cannot be resolved on an empty table reports `TableEmpty`.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            CursorState::Ready | CursorState::RowOpen => return Ok(()),
            CursorState::Failed => return Err(Error::InvalidState("cursor failed")),
            CursorState::Construct => {}
        }

        match self.resolve_column_productions(false) {
            Ok(()) => {
                self.row_id = 1;
                self.state = CursorState::Ready;
                if self.flags.contains(CursorFlags::PERMIT_POST_OPEN_ADD) {
                    self.flags.insert(CursorFlags::PERMIT_ADD_COLUMN);
                }
                if let Some(sidecar) = self.sidecar.as_mut() {
                    if let Err(e) = sidecar.open() {
                        debug!("side-car cursor failed to open: {}", e);
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.state = CursorState::Failed;
                if e.is_undefined() && matches!(self.tbl.is_empty(), Ok(true)) {
                    return Err(Error::TableEmpty);
                }
                Err(e)
            }
        }
    }

    /// Current row id
    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    /// Select the row the next `open_row` opens
    pub fn set_row_id(&mut self, row_id: RowId) -> Result<()> {
        match self.state {
            CursorState::Failed => Err(Error::InvalidState("cursor failed")),
            CursorState::RowOpen => Err(Error::InvalidState("row is open")),
            _ => {
                self.row_id = row_id;
                Ok(())
            }
        }
    }

    pub fn open_row(&mut self) -> Result<()> {
        match self.state {
            CursorState::Ready => {
                self.state = CursorState::RowOpen;
                Ok(())
            }
            CursorState::Construct => Err(Error::InvalidState("cursor not open")),
            CursorState::RowOpen => Err(Error::InvalidState("row already open")),
            CursorState::Failed => Err(Error::InvalidState("cursor failed")),
        }
    }

    /// Close the open row and advance to the next row id
    pub fn close_row(&mut self) -> Result<()> {
        match self.state {
            CursorState::RowOpen => {
                self.row_id = self
                    .row_id
                    .checked_add(1)
                    .ok_or_else(|| Error::InvalidArgument(format!("row id {} is the last", self.row_id)))?;
                self.state = CursorState::Ready;
                Ok(())
            }
            CursorState::Failed => Err(Error::InvalidState("cursor failed")),
            _ => Err(Error::InvalidState("row not open")),
        }
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            CursorState::Ready | CursorState::RowOpen => Ok(()),
            CursorState::Construct => Err(Error::InvalidState("cursor not open")),
            CursorState::Failed => Err(Error::InvalidState("cursor failed")),
        }
    }

    fn check_row_open(&self) -> Result<()> {
        self.check_open()?;
        if self.state != CursorState::RowOpen {
            return Err(Error::InvalidState("row not open"));
        }
        Ok(())
    }

    /// Read the current row of `col_idx`
    fn read_column(&mut self, col_idx: ColumnIndex) -> Result<CellData> {
        self.check_row_open()?;
        self.read_column_direct(self.row_id, col_idx)
    }

    /// Read a row, trying the column's `_CACHE` counterpart first
    fn read_column_direct(&mut self, row_id: RowId, col_idx: ColumnIndex) -> Result<CellData> {
        self.check_open()?;

        if let Some(link) = self.cache_link(col_idx) {
            let known_empty = matches!(self.empty_window, Some((start, end)) if row_id >= start && row_id <= end);
            if !known_empty {
                let probe = match link.target {
                    CacheTarget::SelfCursor => self.read_column_direct_int(row_id, link.index),
                    CacheTarget::SideCar => match self.sidecar.as_mut() {
                        Some(sidecar) => sidecar.read_column_direct_int(row_id, link.index),
                        None => Err(Error::InvalidState("no side-car cursor")),
                    },
                };
                match probe {
                    Ok(cell) if cell.row_len() > 0 => return Ok(cell),
                    Ok(cell) => {
                        let end = row_id.saturating_add(cell.repeat_count().max(1) as RowId - 1);
                        debug!("column {}: no cached data for rows {}..={}", col_idx, row_id, end);
                        self.empty_window = Some((row_id, end));
                    }
                    Err(e) => debug!("column {}: cache probe at row {} failed: {}", col_idx, row_id, e),
                }
            }
        }

        self.read_column_direct_int(row_id, col_idx)
    }

    /// Read a row through the blob cache, filling it on a miss
    fn read_column_direct_int(&mut self, row_id: RowId, col_idx: ColumnIndex) -> Result<CellData> {
        let Cursor {
            row,
            blob_cache,
            page_maps,
            ..
        } = self;

        let col = row
            .get_mut(col_idx as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::NotFound(format!("column {}", col_idx)))?;
        let cx = BlobContext {
            col_idx,
            page_maps: &*page_maps,
        };

        let cache = match blob_cache.as_mut() {
            Some(cache) => cache,
            None => return col.read(row_id, &cx),
        };

        if let Some(blob) = cache.find(col_idx, row_id) {
            return col.read_cached_blob(blob, row_id);
        }

        let cell = col.read_blob(row_id, 1, &cx)?;
        let blob = cell.blob();
        if blob.stop_id() > blob.start_id() + MIN_CACHED_BLOB_SPAN {
            if let Err(e) = cache.save(col_idx, blob) {
                debug!(
                    "column {}: blob {}..={} not cached: {}",
                    col_idx,
                    blob.start_id(),
                    blob.stop_id(),
                    e
                );
            }
        }
        Ok(cell)
    }

    /// Read the current row of a byte-aligned column into `buffer`,
    /// returning the row length in `elem_bits` elements. A short buffer
    /// receives what fits and the call fails with `BufferTooSmall`
    /// carrying the full length.
    pub fn read(&mut self, col_idx: ColumnIndex, elem_bits: u32, buffer: &mut [u8]) -> Result<u32> {
        check_byte_elem_bits(elem_bits)?;
        let cell = self.read_column(col_idx)?;
        copy_row(&cell, elem_bits, buffer)
    }

    /// `read` for an explicit row id
    pub fn read_direct(
        &mut self,
        row_id: RowId,
        col_idx: ColumnIndex,
        elem_bits: u32,
        buffer: &mut [u8],
    ) -> Result<u32> {
        check_byte_elem_bits(elem_bits)?;
        let cell = self.read_column_direct(row_id, col_idx)?;
        copy_row(&cell, elem_bits, buffer)
    }

    /// Read up to `max_elems` elements of the current row, starting at
    /// element `start`, into `buffer` at bit offset `bit_offset`
    pub fn read_bits(
        &mut self,
        col_idx: ColumnIndex,
        elem_bits: u32,
        start: u32,
        buffer: &mut [u8],
        bit_offset: u64,
        max_elems: u32,
    ) -> Result<BitsRead> {
        if elem_bits == 0 {
            return Err(Error::InvalidArgument("element size is zero".into()));
        }
        let cell = self.read_column(col_idx)?;
        copy_bits(&cell, elem_bits, start, buffer, bit_offset, max_elems)
    }

    /// `read_bits` for an explicit row id
    #[allow(clippy::too_many_arguments)]
    pub fn read_bits_direct(
        &mut self,
        row_id: RowId,
        col_idx: ColumnIndex,
        elem_bits: u32,
        start: u32,
        buffer: &mut [u8],
        bit_offset: u64,
        max_elems: u32,
    ) -> Result<BitsRead> {
        if elem_bits == 0 {
            return Err(Error::InvalidArgument("element size is zero".into()));
        }
        let cell = self.read_column_direct(row_id, col_idx)?;
        copy_bits(&cell, elem_bits, start, buffer, bit_offset, max_elems)
    }

    /// Zero-copy access to the current row's cell
    pub fn cell_data(&mut self, col_idx: ColumnIndex) -> Result<CellData> {
        self.read_column(col_idx)
    }

    pub fn cell_data_direct(&mut self, row_id: RowId, col_idx: ColumnIndex) -> Result<CellData> {
        self.read_column_direct(row_id, col_idx)
    }

    /// Blob holding the current row of `col_idx`
    pub fn get_blob(&mut self, col_idx: ColumnIndex) -> Result<Arc<Blob>> {
        self.check_row_open()?;
        let cell = self.read_column_direct_int(self.row_id, col_idx)?;
        Ok(Arc::clone(cell.blob()))
    }

    /// Blob holding row `row_id` of `col_idx`
    pub fn get_blob_direct(&mut self, row_id: RowId, col_idx: ColumnIndex) -> Result<Arc<Blob>> {
        self.check_open()?;
        let cell = self.read_column_direct_int(row_id, col_idx)?;
        Ok(Arc::clone(cell.blob()))
    }

    /// First row id and row count of a column, or of the union of all
    /// columns when `col_idx` is 0. Empty columns contribute nothing.
    pub fn id_range(&self, col_idx: ColumnIndex) -> Result<(RowId, u64)> {
        self.check_open()?;

        let range = if col_idx == 0 {
            let mut range: Option<(RowId, RowId)> = None;
            for col in self.row.iter().flatten() {
                if let Some((first, last)) = col.id_range()? {
                    range = Some(match range {
                        Some((lo, hi)) => (lo.min(first), hi.max(last)),
                        None => (first, last),
                    });
                }
            }
            range
        } else {
            self.column(col_idx)?.id_range()?
        };

        Ok(match range {
            Some((first, last)) if last >= first => (first, (last - first + 1) as u64),
            _ => (0, 0),
        })
    }

    /// Id range of the blob holding `row_id`
    pub fn page_id_range(&self, col_idx: ColumnIndex, row_id: RowId) -> Result<(RowId, RowId)> {
        let cx = BlobContext {
            col_idx,
            page_maps: &self.page_maps,
        };
        self.column(col_idx)?.page_id_range(row_id, &cx)
    }

    /// Next row after the current one with data in `col_idx`, or in any
    /// column when `col_idx` is 0
    pub fn find_next_row_id(&self, col_idx: ColumnIndex) -> Result<RowId> {
        let start_id = self
            .row_id
            .checked_add(1)
            .ok_or_else(|| Error::NotFound(format!("no row after {}", self.row_id)))?;
        self.find_next_row_id_int(col_idx, start_id)
    }

    /// First row id >= `start_id` with data
    pub fn find_next_row_id_direct(&self, col_idx: ColumnIndex, start_id: RowId) -> Result<RowId> {
        self.find_next_row_id_int(col_idx, start_id)
    }

    fn find_next_row_id_int(&self, col_idx: ColumnIndex, start_id: RowId) -> Result<RowId> {
        self.check_open()?;

        let columns = if col_idx == 0 {
            &self.row[1..]
        } else if (col_idx as usize) < self.row.len() {
            &self.row[col_idx as usize..col_idx as usize + 1]
        } else {
            return Err(Error::InvalidArgument(format!("column index {}", col_idx)));
        };

        let mut best: Option<RowId> = None;
        for col in columns.iter().flatten() {
            let candidate = match col.native()? {
                NativeColumn::Physical(kcol) => match kcol.find_first_row_id(start_id) {
                    Ok(next) => Some(next),
                    Err(Error::NotFound(_)) => None,
                    Err(e) => return Err(e),
                },
                // contiguous range: anything inside it is valid
                NativeColumn::Static => match col.id_range()? {
                    Some((first, last)) if start_id <= last => Some(start_id.max(first)),
                    _ => None,
                },
                NativeColumn::Computed => None,
            };

            if let Some(next) = candidate {
                if next == start_id {
                    return Ok(next);
                }
                best = Some(best.map_or(next, |b| b.min(next)));
            }
        }

        best.ok_or_else(|| Error::NotFound(format!("no row at or after {}", start_id)))
    }

    /// Load and cache the blobs covering `row_ids` that fall within
    /// `[min_valid, max_valid]`. Does nothing without a blob cache.
    pub fn data_prefetch(
        &mut self,
        row_ids: &[RowId],
        col_idx: ColumnIndex,
        min_valid: RowId,
        max_valid: RowId,
        continue_on_error: bool,
    ) -> Result<()> {
        self.check_open()?;

        let Cursor {
            row,
            blob_cache,
            page_maps,
            ..
        } = self;

        let col = row
            .get(col_idx as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::NotFound(format!("column {}", col_idx)))?;
        let cache = match blob_cache.as_mut() {
            Some(cache) => cache,
            None => return Ok(()),
        };

        let mut sorted: Vec<RowId> = row_ids
            .iter()
            .copied()
            .filter(|id| *id >= min_valid && *id <= max_valid)
            .collect();
        if sorted.is_empty() {
            return Ok(());
        }
        sorted.sort_unstable();

        let cx = BlobContext {
            col_idx,
            page_maps: &*page_maps,
        };
        let mut last_cached = RowId::MIN;
        let mut outcome = Ok(());

        for row_id in sorted {
            if last_cached >= row_id {
                continue;
            }
            if let Some(blob) = cache.find(col_idx, row_id) {
                last_cached = blob.stop_id();
                continue;
            }

            match col.read_blob(row_id, 1, &cx) {
                Ok(cell) => {
                    let blob = cell.blob();
                    // the first save may evict; later ones pile up until the end
                    let saved = cache.save(col_idx, blob);
                    cache.suspend_flush();
                    match saved {
                        Ok(()) => last_cached = blob.stop_id(),
                        Err(e) => debug!("prefetch: column {} row {} not cached: {}", col_idx, row_id, e),
                    }
                }
                Err(_) if continue_on_error => last_cached = row_id,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        if cache.is_flush_suspended() {
            cache.resume_flush();
        }
        outcome
    }

    /// Add every declared readable column, resolve them tolerating
    /// failures, and report the ones that resolved
    pub fn list_readable_columns(&mut self) -> Result<Vec<ColumnRef>> {
        if self.state == CursorState::Failed {
            return Err(Error::InvalidState("cursor failed"));
        }

        let decls: Vec<ColumnDecl> = self.stbl.columns().to_vec();
        for decl in decls {
            if let Err(e) = self.add_scolumn(decl, None) {
                debug!("listing: column skipped: {}", e);
            }
        }

        self.resolve_column_productions(true)?;

        let columns: BTreeSet<ColumnRef> = self
            .row
            .iter()
            .flatten()
            .map(|col| ColumnRef {
                name: col.name().to_string(),
                typedecl: self.schema.typedecl_string(col.typedecl()),
                td: col.typedecl(),
            })
            .collect();
        Ok(columns.into_iter().collect())
    }

    /// Type and layout of a column
    pub fn datatype(&self, col_idx: ColumnIndex) -> Result<(TypeDecl, TypeDesc)> {
        self.column(col_idx)?.datatype(&self.schema)
    }

    /// True if every cell of the column holds the same value
    pub fn is_static_column(&self, col_idx: ColumnIndex) -> Result<bool> {
        if col_idx == 0 || col_idx as usize >= self.row.len() {
            return Err(Error::InvalidArgument(format!("column index {}", col_idx)));
        }
        self.column(col_idx)?.is_static()
    }

    /// Set the blob cache capacity in bytes, returning the previous one.
    /// A cursor created without a cache gets one.
    pub fn set_cache_capacity(&mut self, capacity: u64) -> u64 {
        match self.blob_cache.as_mut() {
            Some(cache) => cache.set_capacity(capacity),
            None => {
                if capacity > 0 {
                    self.blob_cache = Some(BlobCache::new(capacity));
                }
                0
            }
        }
    }

    pub fn cache_capacity(&self) -> u64 {
        self.blob_cache.as_ref().map_or(0, BlobCache::capacity)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("table", &self.tbl.name())
            .field("state", &self.state)
            .field("row_id", &self.row_id)
            .field("columns", &self.row.iter().flatten().count())
            .field("sidecar", &self.sidecar.is_some())
            .finish()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        // stop the worker before the blobs it may reference go away
        self.page_maps.terminate();
        self.col.whack();
        self.prod.whack();
        self.phys.whack();
    }
}

/// Stored and requested element sizes are compatible when equal or when
/// one evenly divides the other
fn bad_elem_bits(elem_size: u32, elem_bits: u32) -> bool {
    if elem_size == elem_bits {
        return false;
    }
    if elem_size < elem_bits {
        return elem_bits % elem_size != 0;
    }
    elem_size % elem_bits != 0
}

fn check_byte_elem_bits(elem_bits: u32) -> Result<()> {
    if elem_bits == 0 || elem_bits % 8 != 0 {
        return Err(Error::InvalidArgument(format!(
            "element size {} is not a whole number of bytes",
            elem_bits
        )));
    }
    Ok(())
}

fn copy_row(cell: &CellData, elem_bits: u32, buffer: &mut [u8]) -> Result<u32> {
    let elem_size = cell.elem_bits();
    if bad_elem_bits(elem_size, elem_bits) {
        return Err(Error::TypeMismatch {
            stored: elem_size,
            requested: elem_bits,
        });
    }
    if cell.row_len() == 0 {
        return Ok(0);
    }

    let to_read = cell.row_len() as u64 * elem_size as u64;
    let required = (to_read / elem_bits as u64) as u32;
    let capacity = (buffer.len() as u64 * 8) / elem_bits as u64 * elem_bits as u64;

    if to_read > capacity {
        bitcpy(buffer, 0, cell.base(), cell.bit_offset(), capacity);
        return Err(Error::BufferTooSmall { required });
    }
    bitcpy(buffer, 0, cell.base(), cell.bit_offset(), to_read);
    Ok(required)
}

fn copy_bits(
    cell: &CellData,
    elem_bits: u32,
    start: u32,
    buffer: &mut [u8],
    bit_offset: u64,
    max_elems: u32,
) -> Result<BitsRead> {
    let elem_size = cell.elem_bits();
    if bad_elem_bits(elem_size, elem_bits) {
        return Err(Error::TypeMismatch {
            stored: elem_size,
            requested: elem_bits,
        });
    }
    if cell.row_len() == 0 {
        return Ok(BitsRead::default());
    }

    let doff = start as u64 * elem_bits as u64;
    let mut to_read = (cell.row_len() as u64 * elem_size as u64).saturating_sub(doff);
    if max_elems == 0 {
        return Ok(BitsRead {
            num_read: 0,
            remaining: (to_read / elem_bits as u64) as u32,
        });
    }

    let bsize = max_elems as u64 * elem_bits as u64;
    let fits = bit_offset
        .checked_add(bsize)
        .map_or(false, |end| end <= buffer.len() as u64 * 8);
    if !fits {
        return Err(Error::InvalidArgument(format!(
            "buffer holds fewer than {} elements after bit {}",
            max_elems, bit_offset
        )));
    }

    let mut remaining = 0;
    if to_read > bsize {
        remaining = ((to_read - bsize) / elem_bits as u64) as u32;
        to_read = bsize;
    }
    bitcpy(buffer, bit_offset, cell.base(), cell.bit_offset() + doff, to_read);
    Ok(BitsRead {
        num_read: (to_read / elem_bits as u64) as u32,
        remaining,
    })
}
