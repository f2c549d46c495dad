// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! String pack body: variable-width binary values plus a null bitmap.

use bitvec::prelude::{BitVec, Lsb0};
use bytes::{Buf, BufMut, Bytes};

use crate::batch::ValueBatch;
use crate::dpn::Dpn;
use crate::error::{StorageResult, TracedStorageError};

#[derive(Clone)]
pub(crate) struct PackStr {
    values: Vec<Bytes>,
    nulls: BitVec<u8, Lsb0>,
}

impl PackStr {
    /// String packs are trivial only when null-only.
    pub fn from_stats(dpn: &Dpn) -> Self {
        debug_assert!(dpn.nr() == 0 || dpn.null_only());
        let nr = dpn.nr() as usize;
        Self {
            values: vec![Bytes::new(); nr],
            nulls: BitVec::repeat(true, nr),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_null(&self, offset: usize) -> bool {
        self.nulls[offset]
    }

    pub fn value(&self, offset: usize) -> Bytes {
        self.values[offset].clone()
    }

    /// `not_null` stores incoming nulls as empty strings instead.
    pub fn append_batch(&mut self, batch: &ValueBatch, not_null: bool) {
        let ValueBatch::Str(values) = batch else {
            panic!("non-string batch loaded into a string pack")
        };
        for v in values {
            match v {
                Some(b) => {
                    self.values.push(b.clone());
                    self.nulls.push(false);
                }
                None => {
                    self.values.push(Bytes::new());
                    self.nulls.push(!not_null);
                }
            }
        }
    }

    pub fn update(&mut self, offset: usize, value: Option<Bytes>) {
        assert!(offset < self.values.len(), "update beyond pack rows");
        match value {
            Some(b) => {
                self.values[offset] = b;
                self.nulls.set(offset, false);
            }
            None => {
                self.values[offset] = Bytes::new();
                self.nulls.set(offset, true);
            }
        }
    }

    /// Recompute counters, the total byte size (kept in `sum`) and the
    /// 8-byte min/max prefixes.
    pub fn refresh_stats(&self, dpn: &Dpn) {
        dpn.set_nr(self.values.len() as u32);
        dpn.set_nn(self.nulls.count_ones() as u32);

        let mut size = 0u64;
        let mut min: Option<&Bytes> = None;
        let mut max: Option<&Bytes> = None;
        for (i, v) in self.values.iter().enumerate() {
            if self.nulls[i] {
                continue;
            }
            size += v.len() as u64;
            if min.map_or(true, |m| v[..] < m[..]) {
                min = Some(v);
            }
            if max.map_or(true, |m| v[..] > m[..]) {
                max = Some(v);
            }
        }
        dpn.set_sum_i(size as i64);
        dpn.set_min_s(min.map_or(&b""[..], |b| &b[..]));
        dpn.set_max_s(max.map_or(&b""[..], |b| &b[..]));
    }

    pub fn encode(&self) -> Vec<u8> {
        let nr = self.values.len();
        let data_size: usize = self.values.iter().map(|v| v.len()).sum();
        let mut buf = Vec::with_capacity(8 + nr.div_ceil(8) + (nr + 1) * 4 + data_size);
        buf.put_u32_le(nr as u32);
        buf.put_u32_le(self.nulls.count_ones() as u32);
        buf.extend_from_slice(self.nulls.as_raw_slice());
        let mut offset = 0u32;
        for v in &self.values {
            buf.put_u32_le(offset);
            offset += v.len() as u32;
        }
        buf.put_u32_le(offset);
        for v in &self.values {
            buf.put_slice(v);
        }
        buf
    }

    pub fn decode(mut data: &[u8]) -> StorageResult<Self> {
        if data.len() < 8 {
            return Err(TracedStorageError::corrupt("string pack", "truncated"));
        }
        let nr = data.get_u32_le() as usize;
        let nn = data.get_u32_le() as usize;
        let bitmap_len = nr.div_ceil(8);
        if data.remaining() < bitmap_len + (nr + 1) * 4 {
            return Err(TracedStorageError::corrupt("string pack", "truncated body"));
        }
        let mut nulls = BitVec::<u8, Lsb0>::from_slice(&data[..bitmap_len]);
        nulls.truncate(nr);
        data.advance(bitmap_len);

        let mut offsets = Vec::with_capacity(nr + 1);
        for _ in 0..=nr {
            offsets.push(data.get_u32_le() as usize);
        }
        let body = Bytes::copy_from_slice(data.chunk());
        if body.len() < *offsets.last().unwrap() {
            return Err(TracedStorageError::corrupt("string pack", "truncated data"));
        }
        let mut values = Vec::with_capacity(nr);
        for i in 0..nr {
            if offsets[i] > offsets[i + 1] {
                return Err(TracedStorageError::corrupt("string pack", "bad offsets"));
            }
            values.push(body.slice(offsets[i]..offsets[i + 1]));
        }
        if nulls.count_ones() != nn {
            return Err(TracedStorageError::corrupt(
                "string pack",
                "null count mismatch",
            ));
        }
        Ok(Self { values, nulls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackStr {
        let mut pack = PackStr {
            values: vec![],
            nulls: BitVec::new(),
        };
        let mut batch = ValueBatch::from_strings(["pear", "apple", "quince"]);
        batch.nulls(1);
        pack.append_batch(&batch, false);
        pack
    }

    #[test]
    fn test_stats_and_prefixes() {
        let pack = sample();
        let dpn = Dpn::default();
        pack.refresh_stats(&dpn);
        assert_eq!(dpn.nr(), 4);
        assert_eq!(dpn.nn(), 1);
        assert_eq!(dpn.sum_i(), 15);
        assert_eq!(&dpn.min_s(), b"apple\0\0\0");
        assert_eq!(&dpn.max_s(), b"quince\0\0");
    }

    #[test]
    fn test_encode_roundtrip() {
        let pack = sample();
        let decoded = PackStr::decode(&pack.encode()).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.value(1), Bytes::from_static(b"apple"));
        assert!(decoded.is_null(3));
        assert!(!decoded.is_null(0));
    }

    #[test]
    fn test_not_null_fills_empty() {
        let mut pack = PackStr {
            values: vec![],
            nulls: BitVec::new(),
        };
        let mut batch = ValueBatch::Str(vec![]);
        batch.nulls(2);
        pack.append_batch(&batch, true);
        assert!(!pack.is_null(0));
        assert_eq!(pack.value(0), Bytes::new());
    }
}
