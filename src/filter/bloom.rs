// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};
use parking_lot::RwLock;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::dpn::Dpn;
use crate::error::{StorageResult, TracedStorageError};
use crate::pack::{Pack, PackBody};

/// 1024 bits per pack.
const BLOCK_WORDS: usize = 16;
const BLOCK_BITS: u64 = (BLOCK_WORDS * 64) as u64;
const SEEDS: [u64; 3] = [0xb10c, 0x5eed_cafe, 0x9e37_79b9];

type BloomBlock = [u64; BLOCK_WORDS];

/// Per-pack Bloom filter over the binary form of the values; applies to any
/// pack kind. Integer packs hash the little-endian value words.
pub struct BloomFilter {
    blocks: RwLock<Vec<BloomBlock>>,
}

fn probe(block: &mut BloomBlock, value: &[u8]) {
    for seed in SEEDS {
        let bit = xxh3_64_with_seed(value, seed) % BLOCK_BITS;
        block[(bit / 64) as usize] |= 1 << (bit % 64);
    }
}

fn check(block: &BloomBlock, value: &[u8]) -> bool {
    SEEDS.iter().all(|seed| {
        let bit = xxh3_64_with_seed(value, *seed) % BLOCK_BITS;
        block[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    })
}

impl BloomFilter {
    pub fn empty() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    /// Insert one value into the block of pack `pi` (tests / external
    /// loaders).
    pub fn add(&self, pi: usize, value: &[u8]) {
        let mut blocks = self.blocks.write();
        if blocks.len() <= pi {
            blocks.resize(pi + 1, [0; BLOCK_WORDS]);
        }
        probe(&mut blocks[pi], value);
    }

    /// Rebuild the block of pack `pi` from its current contents.
    pub fn update(&self, pi: usize, dpn: &Dpn, pack: &Pack) {
        let mut blocks = self.blocks.write();
        if blocks.len() <= pi {
            blocks.resize(pi + 1, [0; BLOCK_WORDS]);
        }
        let block = &mut blocks[pi];
        *block = [0; BLOCK_WORDS];
        let str_pack = matches!(&*pack.body(), PackBody::Str(_));
        for offset in 0..dpn.nr() as usize {
            if pack.is_null(offset) {
                continue;
            }
            if str_pack {
                probe(block, &pack.get_value_binary(offset));
            } else {
                probe(block, &pack.get_val_int(offset).to_le_bytes());
            }
        }
    }

    pub fn may_contain(&self, pi: usize, value: &[u8]) -> bool {
        let blocks = self.blocks.read();
        match blocks.get(pi) {
            Some(block) => check(block, value),
            None => true,
        }
    }

    pub fn may_contain_int(&self, pi: usize, v: i64) -> bool {
        self.may_contain(pi, &v.to_le_bytes())
    }

    pub(super) fn encode_blocks(&self, buf: &mut Vec<u8>) {
        let blocks = self.blocks.read();
        buf.put_u32_le(blocks.len() as u32);
        for block in blocks.iter() {
            for w in block {
                buf.put_u64_le(*w);
            }
        }
    }

    pub(super) fn decode_blocks(mut data: &[u8]) -> StorageResult<Self> {
        if data.remaining() < 4 {
            return Err(TracedStorageError::corrupt("bloom filter", "truncated"));
        }
        let count = data.get_u32_le() as usize;
        if data.remaining() < count * BLOCK_WORDS * 8 {
            return Err(TracedStorageError::corrupt("bloom filter", "truncated"));
        }
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let mut block = [0u64; BLOCK_WORDS];
            for w in block.iter_mut() {
                *w = data.get_u64_le();
            }
            blocks.push(block);
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
    fn test_no_false_negatives() {
        let bloom = BloomFilter::empty();
        for i in 0..1000i64 {
            bloom.add(0, &i.to_le_bytes());
        }
        for i in 0..1000i64 {
            assert!(bloom.may_contain_int(0, i));
        }
    }

    #[test]
    fn test_some_true_negatives() {
        let bloom = BloomFilter::empty();
        bloom.add(0, b"only-entry");
        let misses = (0..100i64)
            .filter(|i| !bloom.may_contain_int(0, *i))
            .count();
        assert!(misses > 90, "bloom block saturated: {} misses", misses);
    }
}
