// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};
use parking_lot::RwLock;

use crate::dpn::Dpn;
use crate::error::{StorageResult, TracedStorageError};
use crate::pack::Pack;

/// Character positions tracked per pack.
const POSITIONS: usize = 16;
/// 256 bits per position.
const WORDS_PER_POS: usize = 4;
const BLOCK_WORDS: usize = POSITIONS * WORDS_PER_POS;

type CMapBlock = [u64; BLOCK_WORDS];

/// Character map for string packs: for each of the first [`POSITIONS`]
/// byte positions, a 256-bit map of the byte values occurring there. A
/// literal whose byte cannot occur at its position rules the pack out.
///
/// Columns whose collation requires UTF-aware comparison skip this filter
/// entirely; byte positions are meaningless there.
pub struct CMapFilter {
    blocks: RwLock<Vec<CMapBlock>>,
}

fn set_bit(block: &mut CMapBlock, pos: usize, byte: u8) {
    block[pos * WORDS_PER_POS + (byte >> 6) as usize] |= 1 << (byte & 63);
}

fn test_bit(block: &CMapBlock, pos: usize, byte: u8) -> bool {
    block[pos * WORDS_PER_POS + (byte >> 6) as usize] & (1 << (byte & 63)) != 0
}

impl CMapFilter {
    pub fn empty() -> Self {
        Self {
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    /// Rebuild the block of pack `pi` from its current contents.
    pub fn update(&self, pi: usize, dpn: &Dpn, pack: &Pack) {
        let mut blocks = self.blocks.write();
        if blocks.len() <= pi {
            blocks.resize(pi + 1, [0; BLOCK_WORDS]);
        }
        let block = &mut blocks[pi];
        *block = [0; BLOCK_WORDS];
        for offset in 0..dpn.nr() as usize {
            if pack.is_null(offset) {
                continue;
            }
            let value = pack.get_value_binary(offset);
            for (pos, byte) in value.iter().take(POSITIONS).enumerate() {
                set_bit(block, pos, *byte);
            }
        }
    }

    /// Whether pack `pi` may contain a value starting with `prefix`.
    pub fn may_contain_prefix(&self, pi: usize, prefix: &[u8]) -> bool {
        let blocks = self.blocks.read();
        let Some(block) = blocks.get(pi) else {
            return true;
        };
        prefix
            .iter()
            .take(POSITIONS)
            .enumerate()
            .all(|(pos, byte)| test_bit(block, pos, *byte))
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
            return Err(TracedStorageError::corrupt("char-map filter", "truncated"));
        }
        let count = data.get_u32_le() as usize;
        if data.remaining() < count * BLOCK_WORDS * 8 {
            return Err(TracedStorageError::corrupt("char-map filter", "truncated"));
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
    fn test_bits() {
        let mut block = [0u64; BLOCK_WORDS];
        set_bit(&mut block, 0, b'a');
        set_bit(&mut block, 3, 0xff);
        assert!(test_bit(&block, 0, b'a'));
        assert!(!test_bit(&block, 1, b'a'));
        assert!(test_bit(&block, 3, 0xff));
    }
}
