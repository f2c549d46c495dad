// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Coordinates addressing shared objects in the engine caches. The cache is
//! the arbiter of object identity: one coordinate maps to at most one live
//! pack/dictionary/filter, and `get_or_fetch` serializes the producers per
//! key.

use moka::future::Cache;
use std::sync::Arc;

use crate::dict::Dict;
use crate::filter::{FilterKind, RoughFilter};
use crate::pack::Pack;
use crate::types::{ColumnId, PackIndex, TableId, TxId};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PackCoordinate {
    pub table: TableId,
    pub column: ColumnId,
    pub pack: PackIndex,
}

impl PackCoordinate {
    pub fn new(table: TableId, column: ColumnId, pack: PackIndex) -> Self {
        Self {
            table,
            column,
            pack,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DictCoordinate {
    pub table: TableId,
    pub column: ColumnId,
    pub version: u32,
}

impl DictCoordinate {
    pub fn new(table: TableId, column: ColumnId, version: u32) -> Self {
        Self {
            table,
            column,
            version,
        }
    }
}

/// `(table, column, kind, xid.hi, xid.lo)`: the key the filter creator is
/// invoked with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FilterCoordinate {
    pub table: TableId,
    pub column: ColumnId,
    pub kind: FilterKind,
    pub xid: TxId,
}

impl FilterCoordinate {
    pub fn new(table: TableId, column: ColumnId, kind: FilterKind, xid: TxId) -> Self {
        Self {
            table,
            column,
            kind,
            xid,
        }
    }
}

pub(crate) type PackCache = Cache<PackCoordinate, Arc<Pack>>;
pub(crate) type DictCache = Cache<DictCoordinate, Arc<Dict>>;
pub(crate) type FilterCache = Cache<FilterCoordinate, Arc<RoughFilter>>;
