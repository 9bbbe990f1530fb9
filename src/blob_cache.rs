use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::types::{ColumnIndex, RowId};

/// A cached blob and the recency tick of its last use
#[derive(Debug)]
struct CacheEntry {
    blob: Arc<Blob>,
    tick: u64,
}

/// Byte-bounded most-recently-used blob cache keyed by column index.
///
/// Blobs of one column never overlap, so a row id is covered by at most
/// one entry: the last one starting at or before it.
#[derive(Debug)]
pub struct BlobCache {
    /// Capacity in bytes
    capacity: u64,
    /// Bytes currently charged
    contents: u64,
    /// Eviction is deferred while set
    suspend_flush: bool,
    /// Recency counter
    tick: u64,
    /// Per-column entries ordered by first row id
    columns: BTreeMap<ColumnIndex, BTreeMap<RowId, CacheEntry>>,
    /// Recency order: oldest tick first
    lru: BTreeMap<u64, (ColumnIndex, RowId)>,
}

impl BlobCache {
    /// Create a cache holding at most `capacity` bytes
    pub fn new(capacity: u64) -> Self {
        BlobCache {
            capacity,
            contents: 0,
            suspend_flush: false,
            tick: 0,
            columns: BTreeMap::new(),
            lru: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Change the capacity, returning the previous one. Shrinking evicts
    /// immediately unless flushing is suspended.
    pub fn set_capacity(&mut self, capacity: u64) -> u64 {
        let old = std::mem::replace(&mut self.capacity, capacity);
        if !self.suspend_flush {
            self.flush(0);
        }
        old
    }

    /// Bytes currently held
    pub fn contents(&self) -> u64 {
        self.contents
    }

    /// Number of cached blobs
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    pub fn is_flush_suspended(&self) -> bool {
        self.suspend_flush
    }

    /// Defer eviction until `resume_flush`
    pub fn suspend_flush(&mut self) {
        self.suspend_flush = true;
    }

    /// Re-enable eviction and bring the cache back within capacity
    pub fn resume_flush(&mut self) {
        self.suspend_flush = false;
        self.flush(0);
    }

    /// Find the blob of column `col` covering `row_id`, marking it as
    /// most recently used
    pub fn find(&mut self, col: ColumnIndex, row_id: RowId) -> Option<Arc<Blob>> {
        let entries = self.columns.get_mut(&col)?;
        let (_, entry) = entries.range_mut(..=row_id).next_back()?;
        if !entry.blob.contains(row_id) {
            return None;
        }

        self.tick += 1;
        self.lru.remove(&entry.tick);
        entry.tick = self.tick;
        self.lru.insert(self.tick, (col, entry.blob.start_id()));
        Some(Arc::clone(&entry.blob))
    }

    /// Keep a shared handle on `blob` for column `col`. Cached blobs
    /// overlapping its row range are dropped first.
    ///
    /// Fails without storing anything if the blob alone exceeds capacity.
    pub fn save(&mut self, col: ColumnIndex, blob: &Arc<Blob>) -> Result<()> {
        let size = blob.size_bytes();
        if size > self.capacity {
            return Err(Error::ResourceExhausted(format!(
                "blob of {} bytes exceeds cache capacity {}",
                size, self.capacity
            )));
        }

        // already cached: just refresh recency
        if let Some(cached) = self.find(col, blob.start_id()) {
            if Arc::ptr_eq(&cached, blob) {
                return Ok(());
            }
        }

        self.remove_overlapping(col, blob.start_id(), blob.stop_id());

        if !self.suspend_flush {
            self.flush(size);
        }

        self.tick += 1;
        self.columns.entry(col).or_default().insert(
            blob.start_id(),
            CacheEntry {
                blob: Arc::clone(blob),
                tick: self.tick,
            },
        );
        self.lru.insert(self.tick, (col, blob.start_id()));
        self.contents += size;
        Ok(())
    }

    /// Drop every blob of every column
    pub fn clear(&mut self) {
        self.columns.clear();
        self.lru.clear();
        self.contents = 0;
    }

    fn remove_overlapping(&mut self, col: ColumnIndex, start: RowId, stop: RowId) {
        let victims: Vec<RowId> = match self.columns.get(&col) {
            Some(entries) => entries
                .range(..=stop)
                .rev()
                .take_while(|(_, e)| e.blob.stop_id() >= start)
                .map(|(&first, _)| first)
                .collect(),
            None => return,
        };
        for first in victims {
            self.remove(col, first);
        }
    }

    /// Evict least recently used blobs until `incoming` more bytes fit
    fn flush(&mut self, incoming: u64) {
        while self.contents + incoming > self.capacity {
            let (col, first) = match self.lru.iter().next() {
                Some((_, &key)) => key,
                None => break,
            };
            debug!("blob cache: evicting column {} blob at row {}", col, first);
            self.remove(col, first);
        }
    }

    fn remove(&mut self, col: ColumnIndex, first: RowId) {
        let entries = match self.columns.get_mut(&col) {
            Some(entries) => entries,
            None => return,
        };
        if let Some(entry) = entries.remove(&first) {
            self.lru.remove(&entry.tick);
            self.contents -= entry.blob.size_bytes();
        }
        if entries.is_empty() {
            self.columns.remove(&col);
        }
    }
}
