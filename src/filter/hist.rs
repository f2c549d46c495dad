// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};
use parking_lot::RwLock;

use crate::dpn::Dpn;
use crate::error::{StorageResult, TracedStorageError};
use crate::pack::Pack;

/// Occupancy histogram for integer packs: one 64-bucket bitmap per pack,
/// spread over the pack's `[min_i, max_i]` interval. An unset bucket proves
/// the absence of every value mapping into it.
pub struct HistFilter {
    blocks: RwLock<Vec<u64>>,
}

fn bucket(v: i64, min: i64, max: i64) -> u32 {
    let span = (max as i128 - min as i128) as u128;
    let off = (v as i128 - min as i128) as u128;
    if span < 64 {
        off as u32
    } else {
        (off * 64 / (span + 1)) as u32
    }
}

impl HistFilter {
    pub fn empty() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    /// Rebuild the block of pack `pi` from its current contents. Real
    /// columns are not bucketed; their block is fully occupied.
    pub fn update(&self, pi: usize, dpn: &Dpn, pack: &Pack, real: bool) {
        let mut blocks = self.blocks.write();
        if blocks.len() <= pi {
            blocks.resize(pi + 1, 0);
        }
        if real {
            blocks[pi] = !0;
            return;
        }
        let (min, max) = (dpn.min_i(), dpn.max_i());
        let mut bits = 0u64;
        for offset in 0..dpn.nr() as usize {
            if pack.is_null(offset) {
                continue;
            }
            bits |= 1 << bucket(pack.get_val_int(offset), min, max);
        }
        blocks[pi] = bits;
    }

    /// Whether pack `pi` may contain the value `v`. Conservative: packs
    /// without a block report `true`.
    pub fn may_contain_int(&self, pi: usize, v: i64, dpn: &Dpn) -> bool {
        if dpn.null_only() {
            return false;
        }
        let (min, max) = (dpn.min_i(), dpn.max_i());
        if v < min || v > max {
            return false;
        }
        if min == max {
            return true;
        }
        let blocks = self.blocks.read();
        match blocks.get(pi) {
            Some(bits) => bits & (1 << bucket(v, min, max)) != 0,
            None => true,
        }
    }

    pub(super) fn encode_blocks(&self, buf: &mut Vec<u8>) {
        let blocks = self.blocks.read();
        buf.put_u32_le(blocks.len() as u32);
        for b in blocks.iter() {
            buf.put_u64_le(*b);
        }
    }

    pub(super) fn decode_blocks(mut data: &[u8]) -> StorageResult<Self> {
        if data.remaining() < 4 {
            return Err(TracedStorageError::corrupt("histogram filter", "truncated"));
        }
        let count = data.get_u32_le() as usize;
        if data.remaining() < count * 8 {
            return Err(TracedStorageError::corrupt("histogram filter", "truncated"));
        }
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(data.get_u64_le());
        }
        Ok(Self {
            blocks: RwLock::new(blocks),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_bounds() {
        assert_eq!(bucket(0, 0, 63), 0);
        assert_eq!(bucket(63, 0, 63), 63);
        assert_eq!(bucket(i64::MAX, i64::MIN + 2, i64::MAX), 63);
        assert!(bucket(0, i64::MIN + 2, i64::MAX) < 64);
    }
}
