// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Integer pack body: raw 64-bit words plus a null bitmap. Values are
//! stored min-relative with the narrowest fitting byte width on disk and
//! widened back to absolute words in memory.

use bitvec::prelude::{BitVec, Lsb0};
use bytes::{Buf, BufMut};

use crate::batch::ValueBatch;
use crate::dpn::Dpn;
use crate::error::{StorageResult, TracedStorageError};

#[derive(Clone)]
pub(crate) struct PackInt {
    /// Column is REAL: words are `f64` bit patterns and statistics compare
    /// as doubles.
    real: bool,
    data: Vec<u64>,
    nulls: BitVec<u8, Lsb0>,
}

impl PackInt {
    /// Materialize a trivial pack from its DPN statistics: all-null rows, or
    /// `nr` copies of the uniform value.
    pub fn from_stats(dpn: &Dpn, real: bool) -> Self {
        let nr = dpn.nr() as usize;
        if dpn.null_only() {
            Self {
                real,
                data: vec![0; nr],
                nulls: BitVec::repeat(true, nr),
            }
        } else {
            debug_assert_eq!(dpn.nn(), 0, "trivial pack with mixed nulls");
            Self {
                real,
                data: vec![dpn.min_i() as u64; nr],
                nulls: BitVec::repeat(false, nr),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_null(&self, offset: usize) -> bool {
        self.nulls[offset]
    }

    pub fn value(&self, offset: usize) -> u64 {
        self.data[offset]
    }

    pub fn append_batch(&mut self, batch: &ValueBatch, filler: Option<u64>) {
        match batch {
            ValueBatch::Int(values) => {
                for v in values {
                    match v.map(|x| x as u64).or(filler) {
                        Some(word) => {
                            self.data.push(word);
                            self.nulls.push(false);
                        }
                        None => {
                            self.data.push(0);
                            self.nulls.push(true);
                        }
                    }
                }
            }
            ValueBatch::Real(values) => {
                for v in values {
                    match v.map(f64::to_bits).or(filler) {
                        Some(word) => {
                            self.data.push(word);
                            self.nulls.push(false);
                        }
                        None => {
                            self.data.push(0);
                            self.nulls.push(true);
                        }
                    }
                }
            }
            ValueBatch::Str(_) => panic!("string batch loaded into an integer pack"),
        }
    }

    pub fn update(&mut self, offset: usize, value: Option<u64>) {
        assert!(offset < self.data.len(), "update beyond pack rows");
        self.data[offset] = value.unwrap_or(0);
        self.nulls.set(offset, value.is_none());
    }

    /// Recompute the DPN counters and min/max/sum from the body.
    pub fn refresh_stats(&self, dpn: &Dpn) {
        dpn.set_nr(self.data.len() as u32);
        let nn = self.nulls.count_ones();
        dpn.set_nn(nn as u32);

        if self.real {
            let mut stats: Option<(f64, f64, f64)> = None;
            for (i, word) in self.data.iter().enumerate() {
                if self.nulls[i] {
                    continue;
                }
                let v = f64::from_bits(*word);
                stats = Some(match stats {
                    None => (v, v, v),
                    Some((min, max, sum)) => (min.min(v), max.max(v), sum + v),
                });
            }
            let (min, max, sum) = stats.unwrap_or((0.0, 0.0, 0.0));
            dpn.set_min_d(min);
            dpn.set_max_d(max);
            dpn.set_sum_d(sum);
        } else {
            let mut stats: Option<(i64, i64, i64)> = None;
            for (i, word) in self.data.iter().enumerate() {
                if self.nulls[i] {
                    continue;
                }
                let v = *word as i64;
                stats = Some(match stats {
                    None => (v, v, v),
                    Some((min, max, sum)) => (min.min(v), max.max(v), sum.wrapping_add(v)),
                });
            }
            let (min, max, sum) = stats.unwrap_or((0, 0, 0));
            dpn.set_min_i(min);
            dpn.set_max_i(max);
            dpn.set_sum_i(sum);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let nr = self.data.len();
        let nn = self.nulls.count_ones();

        // min-relative deltas with the narrowest fitting width; reals keep
        // their full bit patterns
        let (base, width) = if self.real || nr == nn {
            (0i64, 8u8)
        } else {
            let mut min = i64::MAX;
            let mut max = i64::MIN;
            for (i, word) in self.data.iter().enumerate() {
                if !self.nulls[i] {
                    min = min.min(*word as i64);
                    max = max.max(*word as i64);
                }
            }
            let span = (max as i128 - min as i128) as u128;
            let width = match span {
                s if s < 1 << 8 => 1,
                s if s < 1 << 16 => 2,
                s if s < 1 << 32 => 4,
                _ => 8,
            };
            (min, width)
        };

        let mut buf = Vec::with_capacity(16 + nr.div_ceil(8) + nr * width as usize);
        buf.put_u32_le(nr as u32);
        buf.put_u32_le(nn as u32);
        buf.put_u8(width);
        buf.put_bytes(0, 3);
        buf.put_i64_le(base);
        buf.extend_from_slice(self.nulls.as_raw_slice());
        for (i, word) in self.data.iter().enumerate() {
            let delta = if self.nulls[i] {
                0u64
            } else if self.real {
                *word
            } else {
                (*word as i128 - base as i128) as u64
            };
            match width {
                1 => buf.put_u8(delta as u8),
                2 => buf.put_u16_le(delta as u16),
                4 => buf.put_u32_le(delta as u32),
                _ => buf.put_u64_le(delta),
            }
        }
        buf
    }

    pub fn decode(mut data: &[u8], real: bool) -> StorageResult<Self> {
        if data.len() < 16 {
            return Err(TracedStorageError::corrupt("integer pack", "truncated"));
        }
        let nr = data.get_u32_le() as usize;
        let nn = data.get_u32_le() as usize;
        let width = data.get_u8() as usize;
        data.advance(3);
        let base = data.get_i64_le();

        let bitmap_len = nr.div_ceil(8);
        if data.remaining() < bitmap_len + nr * width {
            return Err(TracedStorageError::corrupt("integer pack", "truncated body"));
        }
        let mut nulls = BitVec::<u8, Lsb0>::from_slice(&data[..bitmap_len]);
        nulls.truncate(nr);
        data.advance(bitmap_len);

        let mut values = Vec::with_capacity(nr);
        for i in 0..nr {
            let delta = match width {
                1 => data.get_u8() as u64,
                2 => data.get_u16_le() as u64,
                4 => data.get_u32_le() as u64,
                8 => data.get_u64_le(),
                w => {
                    return Err(TracedStorageError::corrupt(
                        "integer pack",
                        format!("bad value width {}", w),
                    ))
                }
            };
            let word = if nulls[i] {
                0
            } else if real {
                delta
            } else {
                (base as i128 + delta as i128) as i64 as u64
            };
            values.push(word);
        }
        if nulls.count_ones() != nn {
            return Err(TracedStorageError::corrupt(
                "integer pack",
                "null count mismatch",
            ));
        }
        Ok(Self {
            real,
            data: values,
            nulls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackInt {
        let mut pack = PackInt {
            real: false,
            data: vec![],
            nulls: BitVec::new(),
        };
        let mut batch = ValueBatch::from_ints([100, -3, 70000]);
        batch.nulls(1);
        pack.append_batch(&batch, None);
        pack
    }

    #[test]
    fn test_append_and_stats() {
        let pack = sample();
        let dpn = Dpn::default();
        pack.refresh_stats(&dpn);
        assert_eq!(dpn.nr(), 4);
        assert_eq!(dpn.nn(), 1);
        assert_eq!(dpn.min_i(), -3);
        assert_eq!(dpn.max_i(), 70000);
        assert_eq!(dpn.sum_i(), 70097);
    }

    #[test]
    fn test_encode_roundtrip() {
        let pack = sample();
        let decoded = PackInt::decode(&pack.encode(), false).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.value(0) as i64, 100);
        assert_eq!(decoded.value(1) as i64, -3);
        assert_eq!(decoded.value(2) as i64, 70000);
        assert!(decoded.is_null(3));
    }

    #[test]
    fn test_update_narrows_stats() {
        let mut pack = sample();
        pack.update(2, Some(5u64));
        let dpn = Dpn::default();
        pack.refresh_stats(&dpn);
        assert_eq!(dpn.max_i(), 100);
        pack.update(3, Some(200i64 as u64));
        pack.refresh_stats(&dpn);
        assert_eq!(dpn.nn(), 0);
        assert_eq!(dpn.max_i(), 200);
    }

    #[test]
    fn test_real_words() {
        let mut pack = PackInt {
            real: true,
            data: vec![],
            nulls: BitVec::new(),
        };
        pack.append_batch(&ValueBatch::from_reals([1.5, -0.25]), None);
        let dpn = Dpn::default();
        pack.refresh_stats(&dpn);
        assert_eq!(dpn.min_d(), -0.25);
        assert_eq!(dpn.max_d(), 1.5);
        assert_eq!(dpn.sum_d(), 1.25);

        let decoded = PackInt::decode(&pack.encode(), true).unwrap();
        assert_eq!(f64::from_bits(decoded.value(0)), 1.5);
    }

    #[test]
    fn test_trivial_uniform_materialization() {
        let dpn = Dpn::default();
        dpn.set_nr(3);
        dpn.set_min_i(7);
        dpn.set_max_i(7);
        let pack = PackInt::from_stats(&dpn, false);
        assert_eq!(pack.len(), 3);
        assert_eq!(pack.value(2) as i64, 7);
        assert!(!pack.is_null(0));
    }
}
