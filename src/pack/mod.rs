// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Pack bodies: the materialized row groups.
//!
//! A [`Pack`] wraps one of two body variants (integer codes or binary
//! strings) behind a read-write lock, and carries a back reference to its
//! DPN through the column share (the DPN owns the pack via the tagged
//! pointer; the pack never owns the DPN).

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::batch::ValueBatch;
use crate::cache::PackCoordinate;
use crate::dpn::Dpn;
use crate::error::StorageResult;
use crate::share::ColumnShare;
use crate::types::PackKind;

mod pack_int;
mod pack_str;

pub(crate) use pack_int::PackInt;
pub(crate) use pack_str::PackStr;

pub(crate) enum PackBody {
    Int(PackInt),
    Str(PackStr),
}

/// One materialized pack. 64-byte aligned so the low bits of its address are
/// free for the DPN's tagged pointer.
#[repr(align(64))]
pub struct Pack {
    coord: PackCoordinate,
    share: Weak<ColumnShare>,
    dpn_idx: AtomicU32,
    locks: AtomicU32,
    body: RwLock<PackBody>,
}

impl Pack {
    /// Construct the pack for `dpn_idx`: decoded from the data file, or
    /// synthesized from the DPN statistics when the pack is trivial.
    pub(crate) fn fetch(
        share: &Arc<ColumnShare>,
        coord: PackCoordinate,
        dpn_idx: u32,
    ) -> StorageResult<Pack> {
        let dpn = share.dpn(dpn_idx);
        let real = share.col_type().is_real();
        let body = if dpn.trivial() {
            match share.col_type().pack_kind() {
                PackKind::Int => PackBody::Int(PackInt::from_stats(dpn, real)),
                PackKind::Str => PackBody::Str(PackStr::from_stats(dpn)),
            }
        } else {
            let data = share.read_pack_data(dpn.addr(), dpn.len())?;
            match share.col_type().pack_kind() {
                PackKind::Int => PackBody::Int(PackInt::decode(&data, real)?),
                PackKind::Str => PackBody::Str(PackStr::decode(&data)?),
            }
        };
        Ok(Pack {
            coord,
            share: Arc::downgrade(share),
            dpn_idx: AtomicU32::new(dpn_idx),
            locks: AtomicU32::new(0),
            body: RwLock::new(body),
        })
    }

    pub fn coordinate(&self) -> PackCoordinate {
        self.coord
    }

    pub(crate) fn dpn_index(&self) -> u32 {
        self.dpn_idx.load(Relaxed)
    }

    /// Rebind to a shadow DPN after a copy-on-write clone.
    pub(crate) fn set_dpn(&self, dpn_idx: u32) {
        self.dpn_idx.store(dpn_idx, Relaxed);
    }

    fn share(&self) -> Arc<ColumnShare> {
        self.share.upgrade().expect("column share dropped")
    }

    pub(crate) fn body(&self) -> parking_lot::RwLockReadGuard<'_, PackBody> {
        self.body.read()
    }

    pub fn lock(&self) {
        self.locks.fetch_add(1, Relaxed);
    }

    pub fn unlock(&self) {
        let prev = self.locks.fetch_sub(1, Relaxed);
        assert!(prev > 0, "unlocking an unlocked pack");
    }

    pub fn is_locked(&self) -> bool {
        self.locks.load(Relaxed) > 0
    }

    /// Deep-copy the body under a new coordinate (copy-on-write). The DPN
    /// binding is rebound by the caller via [`Pack::set_dpn`].
    pub(crate) fn clone_for(&self, coord: PackCoordinate) -> Pack {
        let body = match &*self.body.read() {
            PackBody::Int(b) => PackBody::Int(b.clone()),
            PackBody::Str(b) => PackBody::Str(b.clone()),
        };
        Pack {
            coord,
            share: self.share.clone(),
            dpn_idx: AtomicU32::new(self.dpn_index()),
            locks: AtomicU32::new(0),
            body: RwLock::new(body),
        }
    }

    /// Persist the body into the column data file and stamp `addr`/`len`
    /// on the DPN.
    pub(crate) fn save(&self) -> StorageResult<()> {
        let share = self.share();
        let buf = match &*self.body.read() {
            PackBody::Int(b) => b.encode(),
            PackBody::Str(b) => b.encode(),
        };
        let (addr, len) = share.write_pack_data(&buf)?;
        let dpn = share.dpn(self.dpn_index());
        dpn.set_addr(addr);
        dpn.set_len(len);
        dpn.set_synced(true);
        Ok(())
    }

    pub fn is_null(&self, offset: usize) -> bool {
        match &*self.body.read() {
            PackBody::Int(b) => b.is_null(offset),
            PackBody::Str(b) => b.is_null(offset),
        }
    }

    /// Raw 64-bit code at `offset` (integer packs). For real columns the
    /// word is the `f64` bit pattern.
    pub fn get_val_int(&self, offset: usize) -> i64 {
        match &*self.body.read() {
            PackBody::Int(b) => b.value(offset) as i64,
            PackBody::Str(_) => panic!("integer read on a string pack"),
        }
    }

    /// Binary value at `offset` (string packs).
    pub fn get_value_binary(&self, offset: usize) -> Bytes {
        match &*self.body.read() {
            PackBody::Str(b) => b.value(offset),
            PackBody::Int(_) => panic!("binary read on an integer pack"),
        }
    }

    pub fn value_len(&self, offset: usize) -> usize {
        match &*self.body.read() {
            PackBody::Str(b) => b.value(offset).len(),
            PackBody::Int(_) => 8,
        }
    }

    /// Append a batch. `filler` is the raw not-null replacement word for
    /// integer packs (dictionary code of the empty string, zero, or 0.0
    /// bits); `Some` on string packs stores nulls as empty strings.
    pub(crate) fn load_values(&self, batch: &ValueBatch, filler: Option<u64>) {
        {
            let mut body = self.body.write();
            match &mut *body {
                PackBody::Int(b) => b.append_batch(batch, filler),
                PackBody::Str(b) => b.append_batch(batch, filler.is_some()),
            }
        }
        self.refresh_stats();
    }

    /// Point-update of an integer pack with a raw word (`None` = null).
    pub(crate) fn update_value_int(&self, offset: usize, value: Option<u64>) {
        {
            let mut body = self.body.write();
            match &mut *body {
                PackBody::Int(b) => b.update(offset, value),
                PackBody::Str(_) => panic!("integer update on a string pack"),
            }
        }
        self.refresh_stats();
    }

    /// Point-update of a string pack (`None` = null).
    pub(crate) fn update_value_str(&self, offset: usize, value: Option<Bytes>) {
        {
            let mut body = self.body.write();
            match &mut *body {
                PackBody::Str(b) => b.update(offset, value),
                PackBody::Int(_) => panic!("string update on an integer pack"),
            }
        }
        self.refresh_stats();
    }

    /// Recompute the DPN statistics from the body. Any mutation leaves the
    /// DPN out of sync with its on-disk body until the next save.
    fn refresh_stats(&self) {
        let share = self.share();
        let dpn: &Dpn = share.dpn(self.dpn_index());
        match &*self.body.read() {
            PackBody::Int(b) => b.refresh_stats(dpn),
            PackBody::Str(b) => b.refresh_stats(dpn),
        }
        dpn.set_synced(false);
    }
}

// The raw-pointer round trip through the DPN word requires a stable, known
// alignment for the `Arc` payload.
const _: () = assert!(std::mem::align_of::<Pack>() >= 1 << crate::dpn::TAG_BITS);
