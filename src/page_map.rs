use crate::error::{Error, Result};

/// Bytes per serialized entry: row length + repeat count
const ENTRY_SIZE: usize = 8;
/// Bytes of the serialized entry-count header
const HEADER_SIZE: usize = 4;

/// One run of identical rows: `repeat` consecutive rows, each `row_len`
/// elements long, all sharing a single copy of the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapEntry {
    pub row_len: u32,
    pub repeat: u32,
}

/// Where a row lives inside its blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLocation {
    /// Offset of the row's first element in the blob data, in elements
    pub elem_offset: u64,
    /// Row length in elements
    pub row_len: u32,
    /// Rows, starting with this one, that carry the same data
    pub repeat_count: u64,
}

/// Prefix sums that make row lookup logarithmic
#[derive(Debug, Clone, PartialEq, Eq)]
struct Expansion {
    /// First row index of each entry
    row_starts: Vec<u64>,
    /// First data element of each entry
    data_offsets: Vec<u64>,
}

/// Maps row positions within a blob onto the blob's data
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageMap {
    entries: Vec<PageMapEntry>,
    row_count: u64,
    data_len: u64,
    expansion: Option<Expansion>,
}

impl PageMap {
    /// Create an empty page map
    pub fn new() -> Self {
        Self::default()
    }

    /// Page map where each row has its own data
    pub fn from_row_lengths(lengths: &[u32]) -> Self {
        let mut pm = PageMap::new();
        for &len in lengths {
            pm.push(len, 1);
        }
        pm
    }

    /// Append a run of `repeat` identical rows of `row_len` elements
    pub fn push(&mut self, row_len: u32, repeat: u32) {
        if repeat == 0 {
            return;
        }
        self.entries.push(PageMapEntry { row_len, repeat });
        self.row_count += repeat as u64;
        self.data_len += row_len as u64;
        self.expansion = None;
    }

    /// Number of rows described
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Total data elements referenced (each run stored once)
    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn entries(&self) -> &[PageMapEntry] {
        &self.entries
    }

    pub fn is_expanded(&self) -> bool {
        self.expansion.is_some()
    }

    /// Approximate heap footprint in bytes
    pub fn byte_size(&self) -> usize {
        let base = self.entries.len() * std::mem::size_of::<PageMapEntry>();
        match &self.expansion {
            Some(x) => base + (x.row_starts.len() + x.data_offsets.len()) * 8,
            None => base,
        }
    }

    /// Precompute the per-entry offsets
    pub fn expand_full(&mut self) {
        if self.expansion.is_some() {
            return;
        }
        let mut row_starts = Vec::with_capacity(self.entries.len());
        let mut data_offsets = Vec::with_capacity(self.entries.len());
        let (mut row, mut data) = (0u64, 0u64);
        for e in &self.entries {
            row_starts.push(row);
            data_offsets.push(data);
            row += e.repeat as u64;
            data += e.row_len as u64;
        }
        self.expansion = Some(Expansion {
            row_starts,
            data_offsets,
        });
    }

    /// Locate the zero-based row `row` within the blob
    pub fn lookup(&self, row: u64) -> Option<RowLocation> {
        if row >= self.row_count {
            return None;
        }

        if let Some(x) = &self.expansion {
            // last entry whose first row is <= row
            let i = x.row_starts.partition_point(|&start| start <= row) - 1;
            let e = self.entries[i];
            return Some(RowLocation {
                elem_offset: x.data_offsets[i],
                row_len: e.row_len,
                repeat_count: x.row_starts[i] + e.repeat as u64 - row,
            });
        }

        let (mut start, mut data) = (0u64, 0u64);
        for e in &self.entries {
            let end = start + e.repeat as u64;
            if row < end {
                return Some(RowLocation {
                    elem_offset: data,
                    row_len: e.row_len,
                    repeat_count: end - row,
                });
            }
            start = end;
            data += e.row_len as u64;
        }
        None
    }

    /// Serialize into the compact entry-list form
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.entries.len() * ENTRY_SIZE);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for e in &self.entries {
            out.extend_from_slice(&e.row_len.to_le_bytes());
            out.extend_from_slice(&e.repeat.to_le_bytes());
        }
        out
    }

    /// Rebuild a page map from its serialized form, checking it describes
    /// exactly `row_count` rows
    pub fn deserialize(data: &[u8], row_count: u64) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corrupted("truncated header".into()));
        }
        let (header, body) = data.split_at(HEADER_SIZE);
        let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if body.len() != count * ENTRY_SIZE {
            return Err(Error::Corrupted(format!(
                "expected {} entry bytes, found {}",
                count * ENTRY_SIZE,
                body.len()
            )));
        }

        let mut pm = PageMap::new();
        for chunk in body.chunks_exact(ENTRY_SIZE) {
            let row_len = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let repeat = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            if repeat == 0 {
                return Err(Error::Corrupted("zero repeat count".into()));
            }
            pm.push(row_len, repeat);
        }

        if pm.row_count != row_count {
            return Err(Error::Corrupted(format!(
                "page map covers {} rows, expected {}",
                pm.row_count, row_count
            )));
        }
        Ok(pm)
    }
}
