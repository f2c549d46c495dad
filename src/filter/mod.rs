// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Rough-set filters: per-pack acceleration structures consulted during
//! scans to prune packs that cannot satisfy a predicate. A filter answer of
//! "cannot match" is authoritative (no false negatives); "may match" is not.
//!
//! Three kinds exist: an occupancy histogram for integer packs, a character
//! map for string packs and a Bloom filter for any pack kind. Each kind is
//! persisted as one versioned file per column, `FILTER/<KIND>/<xid>`,
//! holding a fixed-size block per pack.

use std::path::Path;

use bytes::{Buf, BufMut};

use crate::error::{StorageResult, TracedStorageError};
use crate::layout;
use crate::types::TxId;

mod bloom;
mod cmap;
mod hist;

pub use bloom::BloomFilter;
pub use cmap::CMapFilter;
pub use hist::HistFilter;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FilterKind {
    Hist,
    CMap,
    Bloom,
}

impl FilterKind {
    pub const ALL: [FilterKind; 3] = [FilterKind::Bloom, FilterKind::CMap, FilterKind::Hist];

    pub fn dir_name(self) -> &'static str {
        match self {
            FilterKind::Hist => "HIST",
            FilterKind::CMap => "CMAP",
            FilterKind::Bloom => "BLOOM",
        }
    }

    fn magic(self) -> u32 {
        match self {
            FilterKind::Hist => 0x504c_4648, // "PLFH"
            FilterKind::CMap => 0x504c_4643, // "PLFC"
            FilterKind::Bloom => 0x504c_4642, // "PLFB"
        }
    }
}

pub enum RoughFilter {
    Hist(HistFilter),
    CMap(CMapFilter),
    Bloom(BloomFilter),
}

impl RoughFilter {
    pub fn kind(&self) -> FilterKind {
        match self {
            RoughFilter::Hist(_) => FilterKind::Hist,
            RoughFilter::CMap(_) => FilterKind::CMap,
            RoughFilter::Bloom(_) => FilterKind::Bloom,
        }
    }

    pub fn as_hist(&self) -> Option<&HistFilter> {
        match self {
            RoughFilter::Hist(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_cmap(&self) -> Option<&CMapFilter> {
        match self {
            RoughFilter::CMap(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bloom(&self) -> Option<&BloomFilter> {
        match self {
            RoughFilter::Bloom(f) => Some(f),
            _ => None,
        }
    }

    fn empty(kind: FilterKind) -> Self {
        match kind {
            FilterKind::Hist => RoughFilter::Hist(HistFilter::empty()),
            FilterKind::CMap => RoughFilter::CMap(CMapFilter::empty()),
            FilterKind::Bloom => RoughFilter::Bloom(BloomFilter::empty()),
        }
    }

    /// Read the filter of `kind` at `version`. A missing file yields an
    /// empty filter: packs without a block always report "may match".
    pub async fn open(dir: &Path, kind: FilterKind, version: TxId) -> StorageResult<Self> {
        let path = layout::path_of_filter(dir, kind, version);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(kind));
            }
            Err(e) => return Err(e.into()),
        };
        Self::decode(kind, &data)
    }

    pub async fn save(&self, dir: &Path, xid: TxId) -> StorageResult<()> {
        let path = layout::path_of_filter(dir, self.kind(), xid);
        tokio::fs::write(&path, self.encode()).await?;
        Ok(())
    }

    fn encode(&self) -> Vec<u8> {
        let kind = self.kind();
        let mut buf = Vec::new();
        buf.put_u32_le(kind.magic());
        match self {
            RoughFilter::Hist(f) => f.encode_blocks(&mut buf),
            RoughFilter::CMap(f) => f.encode_blocks(&mut buf),
            RoughFilter::Bloom(f) => f.encode_blocks(&mut buf),
        }
        buf.put_u32_le(crc32fast::hash(&buf));
        buf
    }

    fn decode(kind: FilterKind, data: &[u8]) -> StorageResult<Self> {
        if data.len() < 12 {
            return Err(TracedStorageError::corrupt("rough filter", "truncated"));
        }
        let body = &data[..data.len() - 4];
        let expected = crc32fast::hash(body) as u64;
        let found = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as u64;
        if found != expected {
            return Err(TracedStorageError::checksum(found, expected));
        }
        let mut body = body;
        if body.get_u32_le() != kind.magic() {
            return Err(TracedStorageError::corrupt("rough filter", "bad magic"));
        }
        Ok(match kind {
            FilterKind::Hist => RoughFilter::Hist(HistFilter::decode_blocks(body)?),
            FilterKind::CMap => RoughFilter::CMap(CMapFilter::decode_blocks(body)?),
            FilterKind::Bloom => RoughFilter::Bloom(BloomFilter::decode_blocks(body)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        for kind in FilterKind::ALL {
            tokio::fs::create_dir_all(layout::path_of_filter_dir(dir.path(), kind))
                .await
                .unwrap();
            let f = RoughFilter::open(dir.path(), kind, TxId::ZERO).await.unwrap();
            assert_eq!(f.kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(layout::path_of_filter_dir(dir.path(), FilterKind::Bloom))
            .await
            .unwrap();

        let bloom = BloomFilter::empty();
        bloom.add(0, b"hello");
        let filter = RoughFilter::Bloom(bloom);
        filter.save(dir.path(), TxId::from(7)).await.unwrap();

        let reloaded = RoughFilter::open(dir.path(), FilterKind::Bloom, TxId::from(7))
            .await
            .unwrap();
        let bloom = reloaded.as_bloom().unwrap();
        assert!(bloom.may_contain(0, b"hello"));
        assert!(!bloom.may_contain(0, b"goodbye"));
    }
}
