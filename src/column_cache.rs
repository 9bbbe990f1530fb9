use crate::error::{Error, Result};
use crate::types::CtxId;

/// Two-level sparse map from a `CtxId` to a resolved object. The outer
/// level is indexed by context and allocated on first store; each inner
/// level is indexed by slot within that context.
#[derive(Debug, Clone)]
pub struct ColumnCache<T> {
    contexts: Vec<Option<Vec<Option<T>>>>,
}

impl<T> Default for ColumnCache<T> {
    fn default() -> Self {
        ColumnCache {
            contexts: Vec::new(),
        }
    }
}

impl<T> ColumnCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the object stored under `cid`
    pub fn get(&self, cid: &CtxId) -> Option<&T> {
        self.contexts
            .get(cid.ctx as usize)?
            .as_ref()?
            .get(cid.id as usize)?
            .as_ref()
    }

    pub fn get_mut(&mut self, cid: &CtxId) -> Option<&mut T> {
        self.contexts
            .get_mut(cid.ctx as usize)?
            .as_mut()?
            .get_mut(cid.id as usize)?
            .as_mut()
    }

    /// Store `item` under `cid`, replacing anything already there
    pub fn set(&mut self, cid: CtxId, item: T) -> Result<()> {
        let slot = self.slot_mut(cid)?;
        *slot = Some(item);
        Ok(())
    }

    /// Exchange the object under `cid` for `item`, returning the prior one.
    /// A context with no inner level yet behaves like `set`.
    pub fn swap(&mut self, cid: CtxId, item: Option<T>) -> Result<Option<T>> {
        let inner_exists = matches!(self.contexts.get(cid.ctx as usize), Some(Some(_)));
        if !inner_exists {
            if let Some(item) = item {
                self.set(cid, item)?;
            }
            return Ok(None);
        }
        let slot = self.slot_mut(cid)?;
        Ok(std::mem::replace(slot, item))
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.contexts
            .iter()
            .flatten()
            .map(|inner| inner.iter().filter(|item| item.is_some()).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every inner level, handing each stored object to `whack`
    pub fn whack_with<F>(&mut self, mut whack: F)
    where
        F: FnMut(CtxId, T),
    {
        for (ctx, inner) in self.contexts.drain(..).enumerate() {
            for (id, item) in inner.into_iter().flatten().enumerate() {
                if let Some(item) = item {
                    whack(CtxId::new(ctx as u32, id as u32), item);
                }
            }
        }
    }

    /// Release every inner level, dropping the stored objects
    pub fn whack(&mut self) {
        self.contexts.clear();
    }

    fn slot_mut(&mut self, cid: CtxId) -> Result<&mut Option<T>> {
        let ctx = cid.ctx as usize;
        let id = cid.id as usize;

        if self.contexts.len() <= ctx {
            self.contexts
                .try_reserve(ctx + 1 - self.contexts.len())
                .map_err(|_| Error::ResourceExhausted(format!("column cache context {}", cid.ctx)))?;
            self.contexts.resize_with(ctx + 1, || None);
        }
        let inner = self.contexts[ctx].get_or_insert_with(Vec::new);
        if inner.len() <= id {
            inner
                .try_reserve(id + 1 - inner.len())
                .map_err(|_| Error::ResourceExhausted(format!("column cache slot {}", cid)))?;
            inner.resize_with(id + 1, || None);
        }
        Ok(&mut inner[id])
    }
}
