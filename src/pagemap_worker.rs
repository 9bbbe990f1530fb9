//! Background (de)serialization of page maps.
//!
//! A single worker thread and its requester share one slot under a mutex.
//! The requester posts a request into an idle slot and waits on the
//! condition variable until the worker swaps in the response; the worker
//! sleeps whenever the slot is idle or holds an unclaimed response.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::constants::PAGEMAP_THREAD_NAME;
use crate::error::{Error, Result};
use crate::page_map::PageMap;

/// Observable state of the worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMapState {
    None,
    DeserializeRequested,
    DeserializeDone,
    SerializeRequested,
    SerializeDone,
    Exit,
}

/// Slot contents: the state together with its payload
enum Slot {
    Idle,
    DeserializeRequested { data: Vec<u8>, row_count: u64 },
    DeserializeDone(Result<PageMap>),
    SerializeRequested(PageMap),
    SerializeDone(Vec<u8>),
    Exit,
}

impl Slot {
    fn state(&self) -> PageMapState {
        match self {
            Slot::Idle => PageMapState::None,
            Slot::DeserializeRequested { .. } => PageMapState::DeserializeRequested,
            Slot::DeserializeDone(_) => PageMapState::DeserializeDone,
            Slot::SerializeRequested(_) => PageMapState::SerializeRequested,
            Slot::SerializeDone(_) => PageMapState::SerializeDone,
            Slot::Exit => PageMapState::Exit,
        }
    }
}

struct Shared {
    slot: Mutex<Slot>,
    cond: Condvar,
}

/// Dedicated page-map thread
pub struct PageMapWorker {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl PageMapWorker {
    /// Spawn the worker thread
    pub fn launch() -> Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::Idle),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(PAGEMAP_THREAD_NAME.to_string())
            .spawn(move || run_pagemap_thread(worker_shared))?;

        Ok(PageMapWorker {
            shared,
            thread: Some(thread),
        })
    }

    /// Current slot state
    pub fn state(&self) -> PageMapState {
        self.shared.slot.lock().state()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Deserialize and fully expand a page map on the worker
    pub fn deserialize(&self, data: &[u8], row_count: u64) -> Result<PageMap> {
        let request = Slot::DeserializeRequested {
            data: data.to_vec(),
            row_count,
        };
        match self.request(request)? {
            Slot::DeserializeDone(result) => result,
            _ => Err(Error::InvalidState("unexpected page map response")),
        }
    }

    /// Serialize a page map on the worker
    pub fn serialize(&self, pm: &PageMap) -> Result<Vec<u8>> {
        match self.request(Slot::SerializeRequested(pm.clone()))? {
            Slot::SerializeDone(data) => Ok(data),
            _ => Err(Error::InvalidState("unexpected page map response")),
        }
    }

    /// Post a request and block until the worker answers
    fn request(&self, request: Slot) -> Result<Slot> {
        if self.thread.is_none() {
            return Err(Error::InvalidState("page map worker not running"));
        }

        let mut slot = self.shared.slot.lock();

        // wait for any earlier exchange to be picked up
        while !matches!(*slot, Slot::Idle) {
            if matches!(*slot, Slot::Exit) {
                return Err(Error::InvalidState("page map worker exited"));
            }
            self.shared.cond.wait(&mut slot);
        }

        *slot = request;
        self.shared.cond.notify_all();

        while !matches!(*slot, Slot::DeserializeDone(_) | Slot::SerializeDone(_)) {
            if matches!(*slot, Slot::Exit) {
                return Err(Error::InvalidState("page map worker exited"));
            }
            self.shared.cond.wait(&mut slot);
        }

        let response = mem::replace(&mut *slot, Slot::Idle);
        self.shared.cond.notify_all();
        Ok(response)
    }

    /// Ask the worker to exit and join it. Safe to call more than once.
    pub fn terminate(&mut self) {
        if let Some(thread) = self.thread.take() {
            {
                let mut slot = self.shared.slot.lock();
                *slot = Slot::Exit;
                self.shared.cond.notify_all();
            }
            if thread.join().is_err() {
                warn!("page map worker panicked before exit");
            }
        }
    }
}

impl Drop for PageMapWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_pagemap_thread(shared: Arc<Shared>) {
    let mut slot = shared.slot.lock();
    loop {
        match mem::replace(&mut *slot, Slot::Idle) {
            Slot::Exit => {
                *slot = Slot::Exit;
                debug!("page map worker: exit by request");
                return;
            }
            Slot::DeserializeRequested { data, row_count } => {
                let result = PageMap::deserialize(&data, row_count).map(|mut pm| {
                    pm.expand_full();
                    pm
                });
                *slot = Slot::DeserializeDone(result);
                shared.cond.notify_all();
            }
            Slot::SerializeRequested(pm) => {
                *slot = Slot::SerializeDone(pm.serialize());
                shared.cond.notify_all();
            }
            // idle, or a response waiting for pickup
            other => {
                *slot = other;
                shared.cond.wait(&mut slot);
            }
        }
    }
}

/// Page-map (de)serialization service handed to productions; uses the
/// worker when one was launched and works synchronously otherwise
pub struct PageMapCodec {
    worker: Option<PageMapWorker>,
}

impl PageMapCodec {
    /// Codec without a background thread
    pub fn synchronous() -> Self {
        PageMapCodec { worker: None }
    }

    /// Try to launch a worker; refusal or spawn failure falls back to
    /// synchronous operation
    pub fn launch(enabled: bool) -> Self {
        if !enabled {
            debug!("page map thread disabled; using synchronous page maps");
            return Self::synchronous();
        }
        match PageMapWorker::launch() {
            Ok(worker) => PageMapCodec {
                worker: Some(worker),
            },
            Err(e) => {
                warn!("failed to launch page map thread: {}", e);
                Self::synchronous()
            }
        }
    }

    pub fn has_worker(&self) -> bool {
        self.worker.as_ref().map_or(false, PageMapWorker::is_running)
    }

    pub fn worker_state(&self) -> Option<PageMapState> {
        self.worker.as_ref().map(PageMapWorker::state)
    }

    /// Deserialize and fully expand a page map
    pub fn deserialize(&self, data: &[u8], row_count: u64) -> Result<PageMap> {
        match &self.worker {
            Some(worker) if worker.is_running() => worker.deserialize(data, row_count),
            _ => {
                let mut pm = PageMap::deserialize(data, row_count)?;
                pm.expand_full();
                Ok(pm)
            }
        }
    }

    pub fn serialize(&self, pm: &PageMap) -> Result<Vec<u8>> {
        match &self.worker {
            Some(worker) if worker.is_running() => worker.serialize(pm),
            _ => Ok(pm.serialize()),
        }
    }

    /// Stop the worker, if any; later calls run synchronously
    pub fn terminate(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            worker.terminate();
        }
    }
}
