// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Append input for [`Attribute::load_data`](crate::Attribute::load_data).
//!
//! A batch carries one pack-kind's worth of optional values plus the
//! aggregate accounting (null count, summed byte size, min/max/sum) that the
//! load path folds into the DPN and the column header. Lookup columns load
//! integer batches of dictionary codes; the caller encodes the raw strings
//! first.

use bytes::Bytes;

#[derive(Clone, Debug)]
pub enum ValueBatch {
    Int(Vec<Option<i64>>),
    Real(Vec<Option<f64>>),
    Str(Vec<Option<Bytes>>),
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct IntStats {
    pub min: i64,
    pub max: i64,
    pub sum: i64,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct RealStats {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

impl ValueBatch {
    pub fn from_ints(values: impl IntoIterator<Item = i64>) -> Self {
        Self::Int(values.into_iter().map(Some).collect())
    }

    pub fn from_reals(values: impl IntoIterator<Item = f64>) -> Self {
        Self::Real(values.into_iter().map(Some).collect())
    }

    pub fn from_strings<S: AsRef<[u8]>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::Str(
            values
                .into_iter()
                .map(|s| Some(Bytes::copy_from_slice(s.as_ref())))
                .collect(),
        )
    }

    pub fn nulls(&mut self, n: usize) -> &mut Self {
        match self {
            Self::Int(v) => v.extend(std::iter::repeat(None).take(n)),
            Self::Real(v) => v.extend(std::iter::repeat(None).take(n)),
            Self::Str(v) => v.extend(std::iter::repeat(None).take(n)),
        }
        self
    }

    /// Copy out a sub-range (used to split loads at pack boundaries).
    pub fn slice(&self, range: std::ops::Range<usize>) -> ValueBatch {
        match self {
            Self::Int(v) => Self::Int(v[range].to_vec()),
            Self::Real(v) => Self::Real(v[range].to_vec()),
            Self::Str(v) => Self::Str(v[range].to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Real(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_nulls(&self) -> usize {
        match self {
            Self::Int(v) => v.iter().filter(|x| x.is_none()).count(),
            Self::Real(v) => v.iter().filter(|x| x.is_none()).count(),
            Self::Str(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    /// Uncompressed byte size of the batch, folded into `hdr.natural_size`.
    pub fn summed_size(&self) -> u64 {
        match self {
            Self::Int(v) => 8 * v.iter().filter(|x| x.is_some()).count() as u64,
            Self::Real(v) => 8 * v.iter().filter(|x| x.is_some()).count() as u64,
            Self::Str(v) => v.iter().flatten().map(|b| b.len() as u64).sum(),
        }
    }

    /// Integer min/max/sum with nulls replaced by `filler` (not-null
    /// columns). `None` when no effective value remains.
    pub(crate) fn int_stats(&self, filler: Option<i64>) -> Option<IntStats> {
        let Self::Int(values) = self else {
            panic!("integer statistics on a non-integer batch")
        };
        let mut stats: Option<IntStats> = None;
        for v in values {
            let Some(v) = v.or(filler) else { continue };
            stats = Some(match stats {
                None => IntStats { min: v, max: v, sum: v },
                Some(s) => IntStats {
                    min: s.min.min(v),
                    max: s.max.max(v),
                    sum: s.sum.wrapping_add(v),
                },
            });
        }
        stats
    }

    pub(crate) fn real_stats(&self, filler: Option<f64>) -> Option<RealStats> {
        let Self::Real(values) = self else {
            panic!("real statistics on a non-real batch")
        };
        let mut stats: Option<RealStats> = None;
        for v in values {
            let Some(v) = v.or(filler) else { continue };
            stats = Some(match stats {
                None => RealStats { min: v, max: v, sum: v },
                Some(s) => RealStats {
                    min: s.min.min(v),
                    max: s.max.max(v),
                    sum: s.sum + v,
                },
            });
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_stats_with_filler() {
        let mut batch = ValueBatch::from_ints([3, 9]);
        batch.nulls(2);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.num_nulls(), 2);

        let s = batch.int_stats(None).unwrap();
        assert_eq!((s.min, s.max, s.sum), (3, 9, 12));

        let s = batch.int_stats(Some(0)).unwrap();
        assert_eq!((s.min, s.max, s.sum), (0, 9, 12));
    }

    #[test]
    fn test_all_null_stats() {
        let mut batch = ValueBatch::Int(vec![]);
        batch.nulls(5);
        assert!(batch.int_stats(None).is_none());
        assert_eq!(batch.summed_size(), 0);
    }
}
