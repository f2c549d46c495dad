// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;

/// Options for the storage [`Engine`](crate::Engine).
#[derive(Clone)]
pub struct StorageOptions {
    /// Root directory holding one subdirectory per column.
    pub path: PathBuf,
    /// Capacity of the pack cache, in entries.
    pub pack_cache_size: u64,
    /// Capacity of the dictionary cache, in entries.
    pub dict_cache_size: u64,
    /// Capacity of the shared rough-filter cache, in entries.
    pub filter_cache_size: u64,
    /// Number of DPN slots pre-allocated per column at `Create`.
    pub dpn_capacity: u32,
    /// Fsync version files after writing them.
    pub sync_buffers: bool,
    /// Master switch for the histogram / character-map / Bloom filters.
    pub enable_filters: bool,
    /// Skip all disk removal in the vacuum loop (used by tests).
    pub disable_vacuum_removal: bool,
}

impl StorageOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pack_cache_size: 4096,
            dict_cache_size: 64,
            filter_cache_size: 256,
            dpn_capacity: 16384,
            sync_buffers: false,
            enable_filters: true,
            disable_vacuum_removal: false,
        }
    }

    pub fn default_for_test(path: impl Into<PathBuf>) -> Self {
        Self {
            pack_cache_size: 128,
            dict_cache_size: 16,
            filter_cache_size: 16,
            dpn_capacity: 256,
            ..Self::new(path)
        }
    }
}
