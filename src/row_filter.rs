// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Row bitmap aligned to the column's pack grid, used by the filtered
//! aggregate reads (`min_s` / `max_s`). The block count must match the
//! column's pack count for the positions to be meaningful.

use bitvec::prelude::{BitVec, Lsb0};

pub struct RowFilter {
    bits: BitVec<u8, Lsb0>,
    pss: u8,
}

impl RowFilter {
    pub fn new(rows: u64, pss: u8) -> Self {
        Self {
            bits: BitVec::repeat(false, rows as usize),
            pss,
        }
    }

    pub fn full(rows: u64, pss: u8) -> Self {
        Self {
            bits: BitVec::repeat(true, rows as usize),
            pss,
        }
    }

    pub fn set(&mut self, row: u64, on: bool) {
        self.bits.set(row as usize, on);
    }

    pub fn get(&self, row: u64) -> bool {
        self.bits[row as usize]
    }

    pub fn num_rows(&self) -> u64 {
        self.bits.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    fn pack_rows(&self) -> usize {
        1 << self.pss
    }

    /// Number of pack-aligned blocks covered by the bitmap.
    pub fn num_blocks(&self) -> usize {
        self.bits.len().div_ceil(self.pack_rows())
    }

    fn block_range(&self, block: usize) -> std::ops::Range<usize> {
        let start = block * self.pack_rows();
        start..(start + self.pack_rows()).min(self.bits.len())
    }

    /// Every row of `block` is selected.
    pub fn is_full_block(&self, block: usize) -> bool {
        self.bits[self.block_range(block)].all()
    }

    pub fn has_ones_in_block(&self, block: usize) -> bool {
        self.bits[self.block_range(block)].any()
    }

    /// In-pack offsets of the selected rows of `block`.
    pub fn ones_in_block(&self, block: usize) -> impl Iterator<Item = usize> + '_ {
        self.bits[self.block_range(block)].iter_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks() {
        let mut f = RowFilter::new(10, 2); // packs of 4 rows
        assert_eq!(f.num_blocks(), 3);
        assert!(f.is_empty());

        f.set(0, true);
        f.set(5, true);
        f.set(9, true);
        assert!(!f.is_empty());
        assert!(f.has_ones_in_block(0));
        assert!(!f.is_full_block(0));
        assert_eq!(f.ones_in_block(1).collect::<Vec<_>>(), vec![1]);
        assert_eq!(f.ones_in_block(2).collect::<Vec<_>>(), vec![1]);

        for r in 4..8 {
            f.set(r, true);
        }
        assert!(f.is_full_block(1));
    }
}
