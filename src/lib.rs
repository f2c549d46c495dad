// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Packlight is a versioned columnar attribute engine: the per-column core
//! of an analytic, MVCC-capable storage system.
//!
//! Each physical column is a sequence of fixed-capacity packs (row groups)
//! described by per-pack metadata records (DPNs) that carry row counts,
//! min/max/sum statistics and an atomic tagged pack pointer combining the
//! load latch and the reference count in a single word. A column version is
//! an immutable snapshot file naming the DPNs visible to one transaction;
//! writers shadow committed DPNs copy-on-write and publish a new snapshot at
//! commit. String columns may be dictionary-encoded; per-pack rough-set
//! filters (histogram, character map, Bloom) prune packs during scans.
//!
//! The central type is [`Attribute`], the per-column controller. It is
//! backed by a process-wide [`Engine`] (object caches and deferred file
//! removal) and a per-column [`ColumnShare`] (immutable meta and the DPN
//! arena).

mod attribute;
mod batch;
mod cache;
mod dict;
mod dpn;
mod engine;
mod error;
mod filter;
mod layout;
mod meta;
mod options;
mod pack;
mod row_filter;
mod share;
mod types;

#[cfg(test)]
mod tests;

pub use attribute::{Attribute, PackOntologicalStatus};
pub use batch::ValueBatch;
pub use cache::{DictCoordinate, FilterCoordinate, PackCoordinate};
pub use dict::Dict;
pub use dpn::{Dpn, DPN_INVALID_ADDR, LOADING_FLAG, TAG_MASK, TAG_ONE};
pub use engine::{Engine, UniqueIndex};
pub use error::{StorageError, StorageResult, TracedStorageError};
pub use filter::{BloomFilter, CMapFilter, FilterKind, HistFilter, RoughFilter};
pub use meta::{ColumnHeader, ColumnMeta};
pub use options::StorageOptions;
pub use pack::Pack;
pub use row_filter::RowFilter;
pub use share::ColumnShare;
pub use types::{
    ColumnKind, ColumnType, Date, PackKind, Timestamp, TxId, Value, INVALID_PACK_INDEX,
    MINUS_INF_64, NULL_VALUE_32, NULL_VALUE_64, PLUS_INF_64,
};
