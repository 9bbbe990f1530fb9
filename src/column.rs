use std::fmt;
use std::sync::Arc;

use crate::blob::{Blob, CellData};
use crate::error::{Error, Result};
use crate::production::{BlobContext, NativeColumn, Production};
use crate::schema::{ColumnDecl, Schema, TypeDecl, TypeDesc};
use crate::types::{ColumnIndex, RowId};

/// A column bound into a cursor
pub struct Column {
    /// Declaration the column was resolved from
    scol: ColumnDecl,
    /// Column type; filled in on resolution when declared incomplete
    td: TypeDecl,
    /// Index within the owning cursor
    ord: ColumnIndex,
    /// Root of the read chain, once resolved
    production: Option<Arc<dyn Production>>,
    /// Last blob read, for cursors without a blob cache
    last_blob: Option<Arc<Blob>>,
}

impl Column {
    pub fn new(scol: ColumnDecl, ord: ColumnIndex) -> Self {
        Column {
            td: scol.td,
            scol,
            ord,
            production: None,
            last_blob: None,
        }
    }

    pub fn scol(&self) -> &ColumnDecl {
        &self.scol
    }

    pub fn name(&self) -> &str {
        &self.scol.name
    }

    pub fn typedecl(&self) -> TypeDecl {
        self.td
    }

    pub fn ord(&self) -> ColumnIndex {
        self.ord
    }

    pub fn is_resolved(&self) -> bool {
        self.production.is_some()
    }

    /// Bind the read chain; an incomplete type is taken from its output
    pub fn set_production(&mut self, production: Arc<dyn Production>) {
        if !self.td.is_known() {
            self.td = production.typedecl();
        }
        self.production = Some(production);
    }

    pub fn production(&self) -> Result<&Arc<dyn Production>> {
        self.production
            .as_ref()
            .ok_or(Error::InvalidState("column not resolved"))
    }

    /// Read a row, reusing the last blob when it covers `row_id`
    pub fn read(&mut self, row_id: RowId, cx: &BlobContext<'_>) -> Result<CellData> {
        if let Some(blob) = &self.last_blob {
            if blob.contains(row_id) {
                return CellData::from_blob(Arc::clone(blob), row_id);
            }
        }
        let blob = self.production()?.read_blob(row_id, 1, cx)?;
        self.last_blob = Some(Arc::clone(&blob));
        CellData::from_blob(blob, row_id)
    }

    /// Read a row out of a blob found in a cursor cache
    pub fn read_cached_blob(&self, blob: Arc<Blob>, row_id: RowId) -> Result<CellData> {
        CellData::from_blob(blob, row_id)
    }

    /// Have the production manufacture a fresh blob for `row_id`
    pub fn read_blob(&self, row_id: RowId, count: u32, cx: &BlobContext<'_>) -> Result<CellData> {
        let blob = self.production()?.read_blob(row_id, count, cx)?;
        CellData::from_blob(blob, row_id)
    }

    /// Inclusive id range, `None` when empty
    pub fn id_range(&self) -> Result<Option<(RowId, RowId)>> {
        self.production()?.id_range()
    }

    pub fn page_id_range(&self, row_id: RowId, cx: &BlobContext<'_>) -> Result<(RowId, RowId)> {
        self.production()?.page_id_range(row_id, cx)
    }

    pub fn native(&self) -> Result<NativeColumn> {
        Ok(self.production()?.native())
    }

    pub fn is_static(&self) -> Result<bool> {
        Ok(matches!(self.native()?, NativeColumn::Static))
    }

    /// Type and layout of the column data
    pub fn datatype(&self, schema: &Schema) -> Result<(TypeDecl, TypeDesc)> {
        if !self.td.is_known() {
            return Err(Error::InvalidState("column type unknown"));
        }
        Ok((self.td, schema.describe(self.td)?))
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.scol.name)
            .field("ord", &self.ord)
            .field("td", &self.td)
            .field("resolved", &self.production.is_some())
            .finish()
    }
}
