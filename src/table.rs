use log::debug;
use std::fmt;
use std::sync::Arc;

use crate::config::Manager;
use crate::cursor::Cursor;
use crate::error::Result;
use crate::production::ProductionResolver;
use crate::schema::{Schema, TableSchema};

/// Metadata recorded for a static column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticColumnMeta {
    pub name: String,
    /// Typedecl text from the column's `type` attribute
    pub typedecl: Option<String>,
}

/// Storage-layer view of a table
pub trait TableStore: Send + Sync {
    /// Names of the physical columns stored for the table
    fn list_columns(&self) -> Result<Vec<String>>;

    /// Static columns listed in the table's column metadata
    fn static_columns(&self) -> Result<Vec<StaticColumnMeta>> {
        Ok(Vec::new())
    }

    /// True when the table holds no rows
    fn is_empty(&self) -> Result<bool>;
}

/// An opened table: schema, storage and the resolver for its columns
pub struct Table {
    /// Table name
    name: String,
    /// Manager the table was opened through
    manager: Arc<Manager>,
    /// Schema the table is declared in
    schema: Arc<Schema>,
    /// Declarations of the table's columns
    stbl: Arc<TableSchema>,
    /// Storage
    store: Arc<dyn TableStore>,
    /// Builds column read chains
    linker: Arc<dyn ProductionResolver>,
    /// Companion cache table
    cache_tbl: Option<Arc<Table>>,
}

impl Table {
    /// Create a table handle
    pub fn new(
        name: &str,
        manager: Arc<Manager>,
        schema: Arc<Schema>,
        stbl: Arc<TableSchema>,
        store: Arc<dyn TableStore>,
        linker: Arc<dyn ProductionResolver>,
    ) -> Self {
        Table {
            name: name.to_string(),
            manager,
            schema,
            stbl,
            store,
            linker,
            cache_tbl: None,
        }
    }

    /// Attach a companion cache table
    pub fn with_cache_table(mut self, cache_tbl: Arc<Table>) -> Self {
        self.cache_tbl = Some(cache_tbl);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn table_schema(&self) -> &Arc<TableSchema> {
        &self.stbl
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    pub fn linker(&self) -> &Arc<dyn ProductionResolver> {
        &self.linker
    }

    pub fn cache_table(&self) -> Option<&Arc<Table>> {
        self.cache_tbl.as_ref()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    /// Create a read cursor without a blob cache
    pub fn create_cursor_read(self: &Arc<Self>) -> Result<Cursor> {
        Cursor::make_read(Arc::clone(self), 0)
    }

    /// Create a read cursor caching up to `capacity` bytes of blobs. When
    /// the table has a cache table, a side-car cursor is created on it.
    /// Cached cursors decode page maps on a worker thread unless the
    /// manager disables it.
    pub fn create_cached_cursor_read(self: &Arc<Self>, capacity: usize) -> Result<Cursor> {
        let capacity = if cfg!(target_pointer_width = "32") {
            0
        } else {
            capacity as u64
        };

        let mut curs = Cursor::make_read(Arc::clone(self), capacity)?;

        if let Some(cache_tbl) = &self.cache_tbl {
            match cache_tbl.create_cached_cursor_read(self.manager.sidecar_cache_capacity()) {
                Ok(sidecar) => {
                    debug!("table {}: side-car cursor on {}", self.name, cache_tbl.name);
                    curs.set_sidecar(sidecar);
                }
                Err(e) => debug!(
                    "table {}: no side-car cursor on {}: {}",
                    self.name, cache_tbl.name, e
                ),
            }
        }
        Ok(curs)
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("cache_tbl", &self.cache_tbl.as_ref().map(|t| t.name.as_str()))
            .finish()
    }
}
