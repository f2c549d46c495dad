// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! On-disk layout of one column directory:
//!
//! ```plain
//! <col>/
//!   COL_META            immutable column meta
//!   DN                  DPN record array, pre-sized at create
//!   DATA                pack bodies, append-only
//!   VERSION/<xid>       header + pack index list, one file per version
//!   DICT/<n>            dictionary serialization, n >= 1
//!   FILTER/{BLOOM,CMAP,HIST}/<xid>
//! ```

use std::path::{Path, PathBuf};

use crate::filter::FilterKind;
use crate::types::TxId;

pub const COL_META_FILE: &str = "COL_META";
pub const COL_DN_FILE: &str = "DN";
pub const COL_DATA_FILE: &str = "DATA";
pub const COL_VERSION_DIR: &str = "VERSION";
pub const COL_DICT_DIR: &str = "DICT";
pub const COL_FILTER_DIR: &str = "FILTER";

pub fn path_of_meta(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(COL_META_FILE)
}

pub fn path_of_dn(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(COL_DN_FILE)
}

pub fn path_of_data(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(COL_DATA_FILE)
}

pub fn path_of_version(dir: impl AsRef<Path>, xid: TxId) -> PathBuf {
    dir.as_ref().join(COL_VERSION_DIR).join(xid.to_string())
}

pub fn path_of_dict(dir: impl AsRef<Path>, version: u32) -> PathBuf {
    dir.as_ref().join(COL_DICT_DIR).join(version.to_string())
}

pub fn path_of_filter_dir(dir: impl AsRef<Path>, kind: FilterKind) -> PathBuf {
    dir.as_ref().join(COL_FILTER_DIR).join(kind.dir_name())
}

pub fn path_of_filter(dir: impl AsRef<Path>, kind: FilterKind, xid: TxId) -> PathBuf {
    path_of_filter_dir(dir, kind).join(xid.to_string())
}
