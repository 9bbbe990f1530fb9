#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vdb_cursor::{
    Blob, BlobBuilder, BlobContext, ColumnDecl, CtxId, DlSet, Error, Manager, ManagerConfig,
    NativeColumn, PhysicalColumn, ProdResolve, Production, ProductionResolver, Result, RowId,
    Schema, StaticColumnMeta, Table, TableSchema, TableStore, TypeDecl,
};

/// Storage backing of a test column
#[derive(Debug, Clone)]
pub enum Native {
    /// Stored rows at the listed ids only
    Physical(Vec<RowId>),
    Static,
    Computed,
}

/// Row ids present in a physical column
pub struct MemPhysical {
    ids: Vec<RowId>,
}

impl PhysicalColumn for MemPhysical {
    fn find_first_row_id(&self, start: RowId) -> Result<RowId> {
        self.ids
            .iter()
            .copied()
            .find(|id| *id >= start)
            .ok_or_else(|| Error::NotFound(format!("row {}", start)))
    }

    fn id_range(&self) -> Result<Option<(RowId, RowId)>> {
        Ok(self.ids.first().copied().zip(self.ids.last().copied()))
    }
}

/// In-memory production serving fixed rows in blobs of `blob_rows` rows
pub struct MemProduction {
    name: String,
    td: TypeDecl,
    elem_bits: u32,
    first: RowId,
    rows: Vec<Vec<u8>>,
    blob_rows: u64,
    native: Native,
    reads: AtomicUsize,
}

impl MemProduction {
    pub fn new(name: &str, td: TypeDecl, elem_bits: u32, first: RowId, rows: Vec<Vec<u8>>, blob_rows: u64) -> Self {
        let ids = (0..rows.len() as RowId).map(|i| first + i).collect();
        MemProduction {
            name: name.to_string(),
            td,
            elem_bits,
            first,
            rows,
            blob_rows: blob_rows.max(1),
            native: Native::Physical(ids),
            reads: AtomicUsize::new(0),
        }
    }

    /// One 32-bit element per row
    pub fn i32s(name: &str, td: TypeDecl, first: RowId, values: &[i32], blob_rows: u64) -> Self {
        let rows = values.iter().map(|v| v.to_le_bytes().to_vec()).collect();
        Self::new(name, td, 32, first, rows, blob_rows)
    }

    /// Variable-length 8-bit rows
    pub fn text(name: &str, td: TypeDecl, first: RowId, values: &[&str], blob_rows: u64) -> Self {
        let rows = values.iter().map(|v| v.as_bytes().to_vec()).collect();
        Self::new(name, td, 8, first, rows, blob_rows)
    }

    pub fn with_native(mut self, native: Native) -> Self {
        self.native = native;
        self
    }

    /// Number of blobs manufactured so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn last(&self) -> RowId {
        self.first + self.rows.len() as RowId - 1
    }
}

impl Production for MemProduction {
    fn name(&self) -> &str {
        &self.name
    }

    fn typedecl(&self) -> TypeDecl {
        self.td
    }

    fn read_blob(&self, row_id: RowId, _count: u32, cx: &BlobContext<'_>) -> Result<Arc<Blob>> {
        if self.rows.is_empty() || row_id < self.first || row_id > self.last() {
            return Err(Error::NotFound(format!("{}: row {}", self.name, row_id)));
        }
        self.reads.fetch_add(1, Ordering::SeqCst);

        let start = self.first + ((row_id - self.first) as u64 / self.blob_rows * self.blob_rows) as RowId;
        let stop = (start + self.blob_rows as RowId - 1).min(self.last());

        // runs of identical rows are stored once
        let mut builder = BlobBuilder::new(start, self.elem_bits);
        let mut id = start;
        while id <= stop {
            let bytes = &self.rows[(id - self.first) as usize];
            let mut repeat = 1;
            while id + (repeat as RowId) <= stop && self.rows[(id + repeat as RowId - self.first) as usize] == *bytes {
                repeat += 1;
            }
            let row_len = (bytes.len() as u32 * 8) / self.elem_bits;
            builder.push_repeated(bytes, row_len, repeat)?;
            id += repeat as RowId;
        }
        let blob = builder.build()?;

        // page maps travel serialized, as they do in storage
        let encoded = cx.page_maps.serialize(blob.page_map())?;
        let page_map = cx.page_maps.deserialize(&encoded, blob.row_count())?;
        Ok(Arc::new(Blob::new(start, self.elem_bits, blob.data().to_vec(), page_map)?))
    }

    fn id_range(&self) -> Result<Option<(RowId, RowId)>> {
        if self.rows.is_empty() {
            return Ok(None);
        }
        Ok(Some((self.first, self.last())))
    }

    fn native(&self) -> NativeColumn {
        match &self.native {
            Native::Physical(ids) => NativeColumn::Physical(Arc::new(MemPhysical { ids: ids.clone() })),
            Native::Static => NativeColumn::Static,
            Native::Computed => NativeColumn::Computed,
        }
    }
}

/// Resolves columns by name to registered productions
#[derive(Default)]
pub struct MemResolver {
    productions: BTreeMap<String, Arc<MemProduction>>,
    broken: BTreeSet<String>,
    libs: Vec<String>,
    libs_opened: AtomicUsize,
}

impl MemResolver {
    pub fn libs_opened(&self) -> usize {
        self.libs_opened.load(Ordering::SeqCst)
    }
}

impl ProductionResolver for MemResolver {
    fn open_libs(&self) -> Result<DlSet> {
        self.libs_opened.fetch_add(1, Ordering::SeqCst);
        Ok(DlSet::new(self.libs.clone()))
    }

    fn resolve_column_root(&self, pr: &mut ProdResolve<'_>, scol: &ColumnDecl) -> Result<Option<Arc<dyn Production>>> {
        if self.broken.contains(&scol.name) {
            return Err(Error::Corrupted(format!("column '{}'", scol.name)));
        }
        if let Some(prod) = pr.cache.get(&scol.cid) {
            return Ok(Some(Arc::clone(prod)));
        }

        let prod: Arc<dyn Production> = match self.productions.get(&scol.name) {
            Some(prod) => Arc::clone(prod) as Arc<dyn Production>,
            None => return Ok(None),
        };
        pr.cache.set(scol.cid, Arc::clone(&prod))?;
        if let NativeColumn::Physical(kcol) = prod.native() {
            pr.phys.set(scol.cid, kcol)?;
        }
        Ok(Some(prod))
    }
}

/// Storage listing for a test table
#[derive(Default)]
pub struct MemStore {
    pub columns: Vec<String>,
    pub statics: Vec<StaticColumnMeta>,
    pub empty: bool,
}

impl TableStore for MemStore {
    fn list_columns(&self) -> Result<Vec<String>> {
        Ok(self.columns.clone())
    }

    fn static_columns(&self) -> Result<Vec<StaticColumnMeta>> {
        Ok(self.statics.clone())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.empty)
    }
}

/// Assembles a table with U8 and I32 types and in-memory columns
pub struct TableBuilder {
    pub name: String,
    pub manager: Arc<Manager>,
    pub schema: Schema,
    pub u8t: TypeDecl,
    pub i32t: TypeDecl,
    pub stbl: TableSchema,
    pub store: MemStore,
    pub resolver: MemResolver,
}

impl TableBuilder {
    pub fn new(name: &str) -> Self {
        let manager = Arc::new(Manager::with_config(ManagerConfig {
            pagemap_thread: false,
            sidecar_cache_capacity: 1 << 20,
        }));
        Self::with_manager(name, manager)
    }

    pub fn with_manager(name: &str, manager: Arc<Manager>) -> Self {
        let mut schema = Schema::new();
        let u8t = schema.define_type("U8", 8).unwrap();
        let i32t = schema.define_type("I32", 32).unwrap();
        TableBuilder {
            name: name.to_string(),
            manager,
            schema,
            u8t,
            i32t,
            stbl: TableSchema::new(name, 1),
            store: MemStore::default(),
            resolver: MemResolver::default(),
        }
    }

    /// Register the production serving column `name`
    pub fn provide(&mut self, prod: MemProduction) -> Arc<MemProduction> {
        let prod = Arc::new(prod);
        self.resolver.productions.insert(prod.name.clone(), Arc::clone(&prod));
        prod
    }

    /// Declare an I32 column and serve `values` from row `first`
    pub fn i32_column(&mut self, name: &str, first: RowId, values: &[i32], blob_rows: u64) -> Arc<MemProduction> {
        self.stbl.add_column(name, self.i32t);
        self.provide(MemProduction::i32s(name, self.i32t, first, values, blob_rows))
    }

    /// Declare a U8 text column and serve `values` from row `first`
    pub fn text_column(&mut self, name: &str, first: RowId, values: &[&str], blob_rows: u64) -> Arc<MemProduction> {
        self.stbl.add_column(name, self.u8t);
        self.provide(MemProduction::text(name, self.u8t, first, values, blob_rows))
    }

    /// Declare a column whose resolution fails
    pub fn broken_column(&mut self, name: &str) -> CtxId {
        self.resolver.broken.insert(name.to_string());
        self.stbl.add_column(name, TypeDecl::UNKNOWN)
    }

    pub fn add_lib(&mut self, lib: &str) {
        self.resolver.libs.push(lib.to_string());
    }

    pub fn build(self) -> (Arc<Table>, Arc<MemResolver>) {
        let resolver = Arc::new(self.resolver);
        let table = Table::new(
            &self.name,
            self.manager,
            Arc::new(self.schema),
            Arc::new(self.stbl),
            Arc::new(self.store),
            resolver.clone(),
        );
        (Arc::new(table), resolver)
    }

    pub fn build_with_cache(self, cache_tbl: Arc<Table>) -> Arc<Table> {
        let (table, _) = self.build();
        let table = Arc::try_unwrap(table).unwrap();
        Arc::new(table.with_cache_table(cache_tbl))
    }
}

pub fn i32_at(buf: &[u8], elem: usize) -> i32 {
    i32::from_le_bytes([buf[elem * 4], buf[elem * 4 + 1], buf[elem * 4 + 2], buf[elem * 4 + 3]])
}
