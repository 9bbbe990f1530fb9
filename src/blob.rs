use std::sync::Arc;

use crate::bitstr::{bitcpy, bytes_for_bits};
use crate::error::{Error, Result};
use crate::page_map::PageMap;
use crate::types::RowId;

/// Immutable chunk of column data covering the inclusive row range
/// `[start_id, stop_id]`; shared as `Arc<Blob>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    start_id: RowId,
    stop_id: RowId,
    elem_bits: u32,
    data: Vec<u8>,
    page_map: PageMap,
}

impl Blob {
    /// Create a blob of `elem_bits`-bit elements starting at `start_id`;
    /// the page map decides how many rows it spans
    pub fn new(start_id: RowId, elem_bits: u32, data: Vec<u8>, page_map: PageMap) -> Result<Self> {
        if elem_bits == 0 {
            return Err(Error::InvalidArgument("blob element size is zero".into()));
        }
        if page_map.row_count() == 0 {
            return Err(Error::InvalidArgument("blob has no rows".into()));
        }
        let needed = page_map.data_len() * elem_bits as u64;
        if (data.len() as u64) * 8 < needed {
            return Err(Error::InvalidArgument(format!(
                "blob data holds {} bits, page map needs {}",
                data.len() * 8,
                needed
            )));
        }

        Ok(Blob {
            start_id,
            stop_id: start_id + page_map.row_count() as RowId - 1,
            elem_bits,
            data,
            page_map,
        })
    }

    pub fn start_id(&self) -> RowId {
        self.start_id
    }

    pub fn stop_id(&self) -> RowId {
        self.stop_id
    }

    /// Number of rows spanned
    pub fn row_count(&self) -> u64 {
        (self.stop_id - self.start_id + 1) as u64
    }

    pub fn contains(&self, row_id: RowId) -> bool {
        row_id >= self.start_id && row_id <= self.stop_id
    }

    pub fn elem_bits(&self) -> u32 {
        self.elem_bits
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn page_map(&self) -> &PageMap {
        &self.page_map
    }

    /// Bytes charged against a blob cache
    pub fn size_bytes(&self) -> u64 {
        (self.data.len() + self.page_map.byte_size() + std::mem::size_of::<Blob>()) as u64
    }

    /// Locate a row's cell
    pub fn locate(&self, row_id: RowId) -> Result<CellLocation> {
        if !self.contains(row_id) {
            return Err(Error::NotFound(format!(
                "row {} outside blob [{}, {}]",
                row_id, self.start_id, self.stop_id
            )));
        }
        let loc = self
            .page_map
            .lookup((row_id - self.start_id) as u64)
            .ok_or_else(|| Error::Corrupted(format!("page map has no row {}", row_id)))?;

        Ok(CellLocation {
            bit_offset: loc.elem_offset * self.elem_bits as u64,
            row_len: loc.row_len,
            repeat_count: loc.repeat_count,
        })
    }
}

/// Position of a cell inside its blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLocation {
    pub bit_offset: u64,
    pub row_len: u32,
    pub repeat_count: u64,
}

/// A row's cell, kept alive by a shared handle on its blob
#[derive(Debug, Clone)]
pub struct CellData {
    blob: Arc<Blob>,
    row_id: RowId,
    loc: CellLocation,
}

impl CellData {
    /// Resolve `row_id` within `blob`
    pub fn from_blob(blob: Arc<Blob>, row_id: RowId) -> Result<Self> {
        let loc = blob.locate(row_id)?;
        Ok(CellData { blob, row_id, loc })
    }

    pub fn row_id(&self) -> RowId {
        self.row_id
    }

    /// Stored element size in bits
    pub fn elem_bits(&self) -> u32 {
        self.blob.elem_bits
    }

    /// Bit offset of the row's first element within `base()`
    pub fn bit_offset(&self) -> u64 {
        self.loc.bit_offset
    }

    /// Row length in stored elements
    pub fn row_len(&self) -> u32 {
        self.loc.row_len
    }

    /// Rows, starting with this one, sharing the same data
    pub fn repeat_count(&self) -> u64 {
        self.loc.repeat_count
    }

    /// Blob data the cell points into
    pub fn base(&self) -> &[u8] {
        &self.blob.data
    }

    pub fn blob(&self) -> &Arc<Blob> {
        &self.blob
    }

    /// Total bits in the row
    pub fn bit_len(&self) -> u64 {
        self.loc.row_len as u64 * self.blob.elem_bits as u64
    }

    /// Copy the row out, left-aligned, into a new byte vector
    pub fn to_bytes(&self) -> Vec<u8> {
        let bits = self.bit_len();
        let mut out = vec![0u8; bytes_for_bits(bits)];
        bitcpy(&mut out, 0, &self.blob.data, self.loc.bit_offset, bits);
        out
    }
}

/// Accumulates rows into a blob
#[derive(Debug)]
pub struct BlobBuilder {
    start_id: RowId,
    elem_bits: u32,
    data: Vec<u8>,
    bit_len: u64,
    page_map: PageMap,
}

impl BlobBuilder {
    pub fn new(start_id: RowId, elem_bits: u32) -> Self {
        BlobBuilder {
            start_id,
            elem_bits,
            data: Vec::new(),
            bit_len: 0,
            page_map: PageMap::new(),
        }
    }

    /// Append a row of `row_len` elements packed at the front of `bits`
    pub fn push_row(&mut self, bits: &[u8], row_len: u32) -> Result<&mut Self> {
        self.push_repeated(bits, row_len, 1)
    }

    /// Append `repeat` identical rows stored once
    pub fn push_repeated(&mut self, bits: &[u8], row_len: u32, repeat: u32) -> Result<&mut Self> {
        let nbits = row_len as u64 * self.elem_bits as u64;
        if (bits.len() as u64) * 8 < nbits {
            return Err(Error::InvalidArgument(format!(
                "row needs {} bits, {} supplied",
                nbits,
                bits.len() * 8
            )));
        }
        if repeat == 0 {
            return Ok(self);
        }

        self.data.resize(bytes_for_bits(self.bit_len + nbits), 0);
        bitcpy(&mut self.data, self.bit_len, bits, 0, nbits);
        self.bit_len += nbits;
        self.page_map.push(row_len, repeat);
        Ok(self)
    }

    /// Rows appended so far
    pub fn row_count(&self) -> u64 {
        self.page_map.row_count()
    }

    pub fn build(self) -> Result<Blob> {
        Blob::new(self.start_id, self.elem_bits, self.data, self.page_map)
    }
}
