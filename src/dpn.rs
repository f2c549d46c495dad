// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Data Pack Node: the fixed-size per-pack control block.
//!
//! Besides counts, min/max/sum and the on-disk address of the pack body, a
//! DPN carries one atomic `pack_ptr` word that merges the load latch and the
//! reference count of the in-memory pack:
//!
//! * `0`: pack not loaded;
//! * [`LOADING_FLAG`]: one thread is fetching the pack;
//! * `ptr | n * TAG_ONE`: pack loaded, `n >= 1` lock holders.
//!
//! The pointer is the raw form of an `Arc<Pack>`; the word itself owns one
//! strong reference while non-zero, independent of the lock count, so the
//! pack body can never be freed under a reader holding a lock.

use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8};
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::pack::Pack;
use crate::types::{PackIndex, TxId, INVALID_PACK_INDEX};

/// Low bits of the tagged word reserved for the lock count; [`Pack`] is
/// 64-byte aligned so the pointer part never intersects them.
pub const TAG_BITS: u32 = 6;
pub const TAG_ONE: u64 = 1;
pub const TAG_MASK: u64 = !((TAG_ONE << TAG_BITS) - 1);
/// Load latch: pointer bits are zero, so this value is never a loaded state.
pub const LOADING_FLAG: u64 = 1;

/// `addr` of a DPN whose pack has no on-disk body.
pub const DPN_INVALID_ADDR: u64 = u64::MAX;

/// Size of one serialized DPN record in the `DN` file.
pub const DPN_RECORD_SIZE: usize = 96;

const FLAG_USED: u8 = 1;
const FLAG_LOCAL: u8 = 1 << 1;
const FLAG_SYNCED: u8 = 1 << 2;

/// Per-pack metadata record, shared through the [`ColumnShare`] arena.
///
/// Statistic fields are atomics for shared visibility, but the writing
/// discipline is MVCC: only the single writer that allocated a *local* DPN
/// mutates it, committed DPNs are immutable apart from `xmax` (stamped once
/// at commit) and the tagged `pack_ptr` word.
///
/// [`ColumnShare`]: crate::ColumnShare
pub struct Dpn {
    flags: AtomicU8,
    nr: AtomicU32,
    nn: AtomicU32,
    len: AtomicU32,
    /// min/max/sum are raw 64-bit words: `i64` for integer packs, `f64` bits
    /// for real columns, an 8-byte NUL-padded prefix for string packs. For
    /// string packs `sum` holds the total body byte size.
    min: AtomicU64,
    max: AtomicU64,
    sum: AtomicU64,
    addr: AtomicU64,
    base: AtomicU32,
    xmin_hi: AtomicU64,
    xmin_lo: AtomicU64,
    xmax_hi: AtomicU64,
    xmax_lo: AtomicU64,
    pack_ptr: AtomicU64,
}

impl Default for Dpn {
    fn default() -> Self {
        Self {
            flags: AtomicU8::new(0),
            nr: AtomicU32::new(0),
            nn: AtomicU32::new(0),
            len: AtomicU32::new(0),
            min: AtomicU64::new(0),
            max: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            addr: AtomicU64::new(DPN_INVALID_ADDR),
            base: AtomicU32::new(INVALID_PACK_INDEX),
            xmin_hi: AtomicU64::new(0),
            xmin_lo: AtomicU64::new(0),
            xmax_hi: AtomicU64::new(TxId::MAX.hi),
            xmax_lo: AtomicU64::new(TxId::MAX.lo),
            pack_ptr: AtomicU64::new(0),
        }
    }
}

impl Dpn {
    fn flag(&self, bit: u8) -> bool {
        self.flags.load(Relaxed) & bit != 0
    }

    fn set_flag(&self, bit: u8, on: bool) {
        if on {
            self.flags.fetch_or(bit, Relaxed);
        } else {
            self.flags.fetch_and(!bit, Relaxed);
        }
    }

    pub fn used(&self) -> bool {
        self.flag(FLAG_USED)
    }

    pub fn set_used(&self, on: bool) {
        self.set_flag(FLAG_USED, on)
    }

    pub fn is_local(&self) -> bool {
        self.flag(FLAG_LOCAL)
    }

    pub fn set_local(&self, on: bool) {
        self.set_flag(FLAG_LOCAL, on)
    }

    pub fn synced(&self) -> bool {
        self.flag(FLAG_SYNCED)
    }

    pub fn set_synced(&self, on: bool) {
        self.set_flag(FLAG_SYNCED, on)
    }

    pub fn nr(&self) -> u32 {
        self.nr.load(Relaxed)
    }

    pub fn set_nr(&self, v: u32) {
        self.nr.store(v, Relaxed)
    }

    pub fn nn(&self) -> u32 {
        self.nn.load(Relaxed)
    }

    pub fn set_nn(&self, v: u32) {
        self.nn.store(v, Relaxed)
    }

    pub fn min_i(&self) -> i64 {
        self.min.load(Relaxed) as i64
    }

    pub fn set_min_i(&self, v: i64) {
        self.min.store(v as u64, Relaxed)
    }

    pub fn max_i(&self) -> i64 {
        self.max.load(Relaxed) as i64
    }

    pub fn set_max_i(&self, v: i64) {
        self.max.store(v as u64, Relaxed)
    }

    pub fn min_d(&self) -> f64 {
        f64::from_bits(self.min.load(Relaxed))
    }

    pub fn set_min_d(&self, v: f64) {
        self.min.store(v.to_bits(), Relaxed)
    }

    pub fn max_d(&self) -> f64 {
        f64::from_bits(self.max.load(Relaxed))
    }

    pub fn set_max_d(&self, v: f64) {
        self.max.store(v.to_bits(), Relaxed)
    }

    pub fn sum_i(&self) -> i64 {
        self.sum.load(Relaxed) as i64
    }

    pub fn set_sum_i(&self, v: i64) {
        self.sum.store(v as u64, Relaxed)
    }

    pub fn sum_d(&self) -> f64 {
        f64::from_bits(self.sum.load(Relaxed))
    }

    pub fn set_sum_d(&self, v: f64) {
        self.sum.store(v.to_bits(), Relaxed)
    }

    /// 8-byte NUL-padded minimum prefix of a string pack.
    pub fn min_s(&self) -> [u8; 8] {
        self.min.load(Relaxed).to_le_bytes()
    }

    pub fn set_min_s(&self, prefix: &[u8]) {
        self.min.store(prefix_word(prefix), Relaxed)
    }

    pub fn max_s(&self) -> [u8; 8] {
        self.max.load(Relaxed).to_le_bytes()
    }

    pub fn set_max_s(&self, prefix: &[u8]) {
        self.max.store(prefix_word(prefix), Relaxed)
    }

    pub fn addr(&self) -> u64 {
        self.addr.load(Relaxed)
    }

    pub fn set_addr(&self, v: u64) {
        self.addr.store(v, Relaxed)
    }

    pub fn len(&self) -> u32 {
        self.len.load(Relaxed)
    }

    pub fn set_len(&self, v: u32) {
        self.len.store(v, Relaxed)
    }

    pub fn base(&self) -> PackIndex {
        self.base.load(Relaxed)
    }

    pub fn set_base(&self, v: PackIndex) {
        self.base.store(v, Relaxed)
    }

    pub fn has_base(&self) -> bool {
        self.base() != INVALID_PACK_INDEX
    }

    pub fn xmin(&self) -> TxId {
        TxId::new(self.xmin_hi.load(Relaxed), self.xmin_lo.load(Relaxed))
    }

    pub fn set_xmin(&self, xid: TxId) {
        self.xmin_hi.store(xid.hi, Relaxed);
        self.xmin_lo.store(xid.lo, Relaxed);
    }

    pub fn xmax(&self) -> TxId {
        TxId::new(self.xmax_hi.load(Relaxed), self.xmax_lo.load(Relaxed))
    }

    pub fn set_xmax(&self, xid: TxId) {
        self.xmax_hi.store(xid.hi, Relaxed);
        self.xmax_lo.store(xid.lo, Relaxed);
    }

    /// Every row is null. An empty DPN is not null-only.
    pub fn null_only(&self) -> bool {
        let nr = self.nr();
        nr > 0 && self.nn() == nr
    }

    /// The pack has no on-disk body; its contents are fully described by
    /// the statistics (all null, or uniform without nulls).
    pub fn trivial(&self) -> bool {
        self.addr() == DPN_INVALID_ADDR
    }

    /// Reinitialize the record in place. The tagged word must already be
    /// drained (see [`Dpn::take_pack`]).
    pub fn reset(&self) {
        debug_assert_eq!(self.pack_ptr.load(Relaxed) & TAG_MASK, 0);
        self.flags.store(0, Relaxed);
        self.nr.store(0, Relaxed);
        self.nn.store(0, Relaxed);
        self.len.store(0, Relaxed);
        self.min.store(0, Relaxed);
        self.max.store(0, Relaxed);
        self.sum.store(0, Relaxed);
        self.addr.store(DPN_INVALID_ADDR, Relaxed);
        self.base.store(INVALID_PACK_INDEX, Relaxed);
        self.set_xmin(TxId::ZERO);
        self.set_xmax(TxId::MAX);
        self.pack_ptr.store(0, Relaxed);
    }

    /// Copy flags, counters and statistics (not the tagged word) from a
    /// shadowed base record.
    pub fn copy_stats_from(&self, other: &Dpn) {
        self.nr.store(other.nr(), Relaxed);
        self.nn.store(other.nn(), Relaxed);
        self.len.store(other.len(), Relaxed);
        self.min.store(other.min.load(Relaxed), Relaxed);
        self.max.store(other.max.load(Relaxed), Relaxed);
        self.sum.store(other.sum.load(Relaxed), Relaxed);
        self.addr.store(other.addr(), Relaxed);
    }

    // --- the tagged pack pointer ---

    pub fn pack_ptr_raw(&self) -> u64 {
        self.pack_ptr.load(Acquire)
    }

    /// Current lock count encoded in the word (0 when unloaded or loading).
    pub fn ref_count(&self) -> u64 {
        let v = self.pack_ptr.load(Acquire);
        if v & TAG_MASK == 0 {
            0
        } else {
            v & !TAG_MASK
        }
    }

    pub(crate) fn cas_ptr(&self, current: u64, new: u64) -> bool {
        self.pack_ptr
            .compare_exchange(current, new, AcqRel, Acquire)
            .is_ok()
    }

    /// Take one more reference if the pack is loaded. Fails when the word is
    /// zero or holds the load latch.
    pub fn inc_ref(&self) -> bool {
        let mut v = self.pack_ptr.load(Acquire);
        loop {
            if v & TAG_MASK == 0 {
                return false;
            }
            assert_ne!(v & !TAG_MASK, !TAG_MASK, "pack lock counter overflow");
            match self
                .pack_ptr
                .compare_exchange_weak(v, v + TAG_ONE, AcqRel, Acquire)
            {
                Ok(_) => return true,
                Err(cur) => v = cur,
            }
        }
    }

    /// Drop one reference. When the last one goes away the word returns to
    /// zero and the strong `Arc` held by the word is handed back to the
    /// caller for release.
    pub fn dec_ref(&self) -> Option<Arc<Pack>> {
        let mut v = self.pack_ptr.load(Acquire);
        loop {
            assert!(
                v & TAG_MASK != 0 && v & !TAG_MASK >= TAG_ONE,
                "unexpected pack lock counter: {:#x}",
                v
            );
            let new = if v & !TAG_MASK == TAG_ONE { 0 } else { v - TAG_ONE };
            match self.pack_ptr.compare_exchange_weak(v, new, AcqRel, Acquire) {
                Ok(_) => {
                    if new == 0 {
                        // SAFETY: the word owned one strong reference; we
                        // just cleared it, so ownership transfers to us.
                        return Some(unsafe { Arc::from_raw((v & TAG_MASK) as *const Pack) });
                    }
                    return None;
                }
                Err(cur) => v = cur,
            }
        }
    }

    /// Writer-side install: stamp `ptr | TAG_ONE` on a local DPN nobody else
    /// can observe yet.
    pub(crate) fn install_pack(&self, pack: Arc<Pack>) {
        let raw = Arc::into_raw(pack) as u64;
        debug_assert_eq!(raw & !TAG_MASK, 0, "pack pointer unaligned");
        let prev = self.pack_ptr.swap(raw | TAG_ONE, Release);
        assert_eq!(prev & TAG_MASK, 0, "installing over a live pack");
    }

    /// Loader-side install: `LOADING_FLAG -> ptr | TAG_ONE`. Any other
    /// transition is a protocol violation.
    pub(crate) fn install_loaded(&self, pack: Arc<Pack>) {
        let raw = Arc::into_raw(pack) as u64;
        debug_assert_eq!(raw & !TAG_MASK, 0, "pack pointer unaligned");
        assert!(
            self.cas_ptr(LOADING_FLAG, raw | TAG_ONE),
            "bad loading flag: {:#x}",
            self.pack_ptr.load(Relaxed)
        );
    }

    /// Roll a failed load back to the unloaded state.
    pub(crate) fn clear_loading(&self) {
        assert!(
            self.cas_ptr(LOADING_FLAG, 0),
            "bad loading flag on load failure"
        );
    }

    /// Drain the word unconditionally and reclaim the owned `Arc`, if any.
    /// Writer-only: used when dropping local packs at save/rollback time.
    pub(crate) fn take_pack(&self) -> Option<Arc<Pack>> {
        let v = self.pack_ptr.swap(0, AcqRel);
        let ptr = v & TAG_MASK;
        if ptr == 0 {
            return None;
        }
        // SAFETY: same ownership transfer as in `dec_ref`.
        Some(unsafe { Arc::from_raw(ptr as *const Pack) })
    }

    /// Borrow the loaded pack.
    ///
    /// # Safety contract
    ///
    /// The returned reference is valid only while the tagged word keeps its
    /// strong reference. Callers must either hold a lock obtained through
    /// `inc_ref`/the load protocol, or be the writer owning this local DPN.
    pub(crate) fn pack(&self) -> Option<&Pack> {
        let ptr = self.pack_ptr.load(Acquire) & TAG_MASK;
        if ptr == 0 {
            return None;
        }
        Some(unsafe { &*(ptr as *const Pack) })
    }

    // --- persistence ---

    pub fn encode(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.put_u8(self.flags.load(Relaxed));
        buf.put_bytes(0, 3);
        buf.put_u32_le(self.nr());
        buf.put_u32_le(self.nn());
        buf.put_u32_le(self.len());
        buf.put_u64_le(self.min.load(Relaxed));
        buf.put_u64_le(self.max.load(Relaxed));
        buf.put_u64_le(self.sum.load(Relaxed));
        buf.put_u64_le(self.addr());
        buf.put_u32_le(self.base());
        buf.put_bytes(0, 4);
        let xmin = self.xmin();
        let xmax = self.xmax();
        buf.put_u64_le(xmin.hi);
        buf.put_u64_le(xmin.lo);
        buf.put_u64_le(xmax.hi);
        buf.put_u64_le(xmax.lo);
        buf.put_bytes(0, DPN_RECORD_SIZE - (buf.len() - start));
    }

    pub fn decode(&self, mut data: &[u8]) {
        debug_assert!(data.len() >= DPN_RECORD_SIZE);
        self.flags.store(data.get_u8(), Relaxed);
        data.advance(3);
        self.nr.store(data.get_u32_le(), Relaxed);
        self.nn.store(data.get_u32_le(), Relaxed);
        self.len.store(data.get_u32_le(), Relaxed);
        self.min.store(data.get_u64_le(), Relaxed);
        self.max.store(data.get_u64_le(), Relaxed);
        self.sum.store(data.get_u64_le(), Relaxed);
        self.addr.store(data.get_u64_le(), Relaxed);
        self.base.store(data.get_u32_le(), Relaxed);
        data.advance(4);
        self.set_xmin(TxId::new(data.get_u64_le(), data.get_u64_le()));
        self.set_xmax(TxId::new(data.get_u64_le(), data.get_u64_le()));
        self.pack_ptr.store(0, Relaxed);
    }
}

impl Drop for Dpn {
    fn drop(&mut self) {
        let v = *self.pack_ptr.get_mut();
        let ptr = v & TAG_MASK;
        if ptr != 0 {
            // SAFETY: the word owned one strong reference.
            unsafe { drop(Arc::from_raw(ptr as *const Pack)) };
        }
    }
}

fn prefix_word(prefix: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    let n = prefix.len().min(8);
    word[..n].copy_from_slice(&prefix[..n]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_reset() {
        let dpn = Dpn::default();
        assert!(!dpn.used() && !dpn.is_local());
        dpn.set_used(true);
        dpn.set_local(true);
        dpn.set_synced(true);
        assert!(dpn.used() && dpn.is_local() && dpn.synced());
        dpn.set_local(false);
        assert!(dpn.used() && !dpn.is_local());

        dpn.set_nr(10);
        dpn.set_nn(10);
        assert!(dpn.null_only());
        dpn.reset();
        assert!(!dpn.null_only() && dpn.trivial());
        assert_eq!(dpn.xmax(), TxId::MAX);
    }

    #[test]
    fn test_string_prefixes() {
        let dpn = Dpn::default();
        dpn.set_min_s(b"ab");
        dpn.set_max_s(b"abcdefghij");
        assert_eq!(&dpn.min_s(), b"ab\0\0\0\0\0\0");
        assert_eq!(&dpn.max_s(), b"abcdefgh");
    }

    #[test]
    fn test_record_roundtrip() {
        let dpn = Dpn::default();
        dpn.set_used(true);
        dpn.set_nr(65536);
        dpn.set_nn(3);
        dpn.set_min_i(-5);
        dpn.set_max_i(70000);
        dpn.set_sum_i(12345);
        dpn.set_addr(4096);
        dpn.set_len(512);
        dpn.set_base(7);
        dpn.set_xmin(TxId::new(0, 9));

        let mut buf = vec![];
        dpn.encode(&mut buf);
        assert_eq!(buf.len(), DPN_RECORD_SIZE);

        let copy = Dpn::default();
        copy.decode(&buf);
        assert_eq!(copy.nr(), 65536);
        assert_eq!(copy.nn(), 3);
        assert_eq!(copy.min_i(), -5);
        assert_eq!(copy.max_i(), 70000);
        assert_eq!(copy.sum_i(), 12345);
        assert_eq!(copy.addr(), 4096);
        assert_eq!(copy.len(), 512);
        assert_eq!(copy.base(), 7);
        assert_eq!(copy.xmin(), TxId::new(0, 9));
        assert_eq!(copy.xmax(), TxId::MAX);
    }

    #[test]
    fn test_loading_latch() {
        let dpn = Dpn::default();
        // inc_ref fails on both the unloaded and the loading state
        assert!(!dpn.inc_ref());
        assert!(dpn.cas_ptr(0, LOADING_FLAG));
        assert!(!dpn.inc_ref());
        // a second loader cannot grab the latch
        assert!(!dpn.cas_ptr(0, LOADING_FLAG));
        dpn.clear_loading();
        assert_eq!(dpn.pack_ptr_raw(), 0);
    }
}
