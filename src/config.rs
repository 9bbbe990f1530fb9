use lazy_static::lazy_static;
use std::env;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::{ManagerFlags, DEFAULT_SIDECAR_CACHE_CAPACITY};

/// Disables the page-map worker for managers built from the default config
pub const ENV_DISABLE_PAGEMAP_THREAD: &str = "VDB_DISABLE_PAGEMAP_THREAD";
/// Blob cache capacity (bytes) of side-car cursors
pub const ENV_SIDECAR_CACHE_CAPACITY: &str = "VDB_SIDECAR_CACHE_CAPACITY";

lazy_static! {
    static ref DEFAULT_CONFIG: ManagerConfig = ManagerConfig::from_env();
}

/// Manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Launch a page-map worker for cached cursors
    pub pagemap_thread: bool,
    /// Blob cache capacity given to side-car cursors
    pub sidecar_cache_capacity: usize,
}

impl ManagerConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Self {
        let pagemap_thread = !env::var(ENV_DISABLE_PAGEMAP_THREAD)
            .map(|v| is_truthy(&v))
            .unwrap_or(false);

        let sidecar_cache_capacity = env::var(ENV_SIDECAR_CACHE_CAPACITY)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_SIDECAR_CACHE_CAPACITY);

        ManagerConfig {
            pagemap_thread,
            sidecar_cache_capacity,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        DEFAULT_CONFIG.clone()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Library manager; owns settings shared by every table it opens
#[derive(Debug)]
pub struct Manager {
    flags: AtomicU32,
    sidecar_cache_capacity: usize,
}

impl Manager {
    /// Create a manager from the process default configuration
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Create a manager from an explicit configuration
    pub fn with_config(config: ManagerConfig) -> Self {
        let mut flags = ManagerFlags::empty();
        if !config.pagemap_thread {
            flags |= ManagerFlags::DISABLE_PAGEMAP_THREAD;
        }

        Manager {
            flags: AtomicU32::new(flags.bits()),
            sidecar_cache_capacity: config.sidecar_cache_capacity,
        }
    }

    /// Current flags
    pub fn flags(&self) -> ManagerFlags {
        ManagerFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    /// Stop launching page-map workers; cursors already created keep theirs
    pub fn disable_pagemap_thread(&self) {
        self.flags
            .fetch_or(ManagerFlags::DISABLE_PAGEMAP_THREAD.bits(), Ordering::SeqCst);
    }

    /// Resume launching page-map workers for cursors created afterwards
    pub fn enable_pagemap_thread(&self) {
        self.flags
            .fetch_and(!ManagerFlags::DISABLE_PAGEMAP_THREAD.bits(), Ordering::SeqCst);
    }

    pub fn pagemap_thread_enabled(&self) -> bool {
        !self.flags().contains(ManagerFlags::DISABLE_PAGEMAP_THREAD)
    }

    pub fn sidecar_cache_capacity(&self) -> usize {
        self.sidecar_cache_capacity
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
