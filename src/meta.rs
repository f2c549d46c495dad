// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Binary layout of the immutable column meta and the per-version column
//! header. Both carry a magic word and a crc32 trailer.

use bytes::{Buf, BufMut};

use crate::error::{StorageResult, TracedStorageError};
use crate::types::{ColumnKind, ColumnType, PackIndex};

pub const COL_FILE_MAGIC: u32 = 0x504c_434d; // "PLCM"
pub const COL_FILE_VERSION: u32 = 1;
pub const COL_VERSION_MAGIC: u32 = 0x504c_5652; // "PLVR"

const FLAG_NOT_NULL: u8 = 1;
const FLAG_LOOKUP: u8 = 1 << 1;
const FLAG_UNICODE: u8 = 1 << 2;

/// Immutable column description, written once at `Create`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMeta {
    pub version: u32,
    /// Pack size shift: pack capacity is `1 << pss` rows.
    pub pss: u8,
    pub col_type: ColumnType,
}

impl ColumnMeta {
    pub fn new(pss: u8, col_type: ColumnType) -> Self {
        assert!((1..=24).contains(&pss), "unreasonable pack size shift");
        Self {
            version: COL_FILE_VERSION,
            pss,
            col_type,
        }
    }

    pub fn pack_rows(&self) -> u64 {
        1 << self.pss
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.put_u32_le(COL_FILE_MAGIC);
        buf.put_u32_le(self.version);
        buf.put_u8(self.pss);
        buf.put_u8(self.col_type.kind.as_u8());
        let mut flags = 0u8;
        if !self.col_type.nullable {
            flags |= FLAG_NOT_NULL;
        }
        if self.col_type.lookup {
            flags |= FLAG_LOOKUP;
        }
        if self.col_type.unicode {
            flags |= FLAG_UNICODE;
        }
        buf.put_u8(flags);
        buf.put_u8(self.col_type.scale);
        buf.put_u32_le(self.col_type.precision);
        buf.put_u32_le(crc32fast::hash(&buf));
        buf
    }

    pub fn decode(mut data: &[u8]) -> StorageResult<Self> {
        if data.len() < 20 {
            return Err(TracedStorageError::corrupt("column meta", "truncated"));
        }
        let body = &data[..data.len() - 4];
        let expected = crc32fast::hash(body) as u64;
        let found = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as u64;
        if found != expected {
            return Err(TracedStorageError::checksum(found, expected));
        }
        if data.get_u32_le() != COL_FILE_MAGIC {
            return Err(TracedStorageError::corrupt("column meta", "bad magic"));
        }
        let version = data.get_u32_le();
        if version != COL_FILE_VERSION {
            return Err(TracedStorageError::corrupt(
                "column meta",
                format!("unsupported format version {}", version),
            ));
        }
        let pss = data.get_u8();
        let kind = ColumnKind::from_u8(data.get_u8())
            .ok_or_else(|| TracedStorageError::corrupt("column meta", "bad column kind"))?;
        let flags = data.get_u8();
        let scale = data.get_u8();
        let precision = data.get_u32_le();

        let mut col_type = ColumnType::new(kind)
            .with_precision(precision)
            .with_scale(scale);
        if flags & FLAG_NOT_NULL != 0 {
            col_type = col_type.not_null();
        }
        if flags & FLAG_LOOKUP != 0 {
            col_type = col_type.lookup();
        }
        if flags & FLAG_UNICODE != 0 {
            col_type = col_type.unicode();
        }
        Ok(Self {
            version,
            pss,
            col_type,
        })
    }
}

/// Per-version column header, persisted at the head of `VERSION/<xid>`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnHeader {
    /// Total row count.
    pub nr: u64,
    /// Total null count.
    pub nn: u64,
    /// Pack count; equals the length of the pack index list.
    pub np: u32,
    pub auto_inc_next: u64,
    /// Column-wide minimum in encoded form; meaningless when `nr == nn`.
    pub min: i64,
    pub max: i64,
    /// Dictionary file version; 0 means no dictionary.
    pub dict_ver: u32,
    pub unique: bool,
    pub unique_updated: bool,
    pub natural_size: u64,
    pub compressed_size: u64,
}

impl ColumnHeader {
    const ENCODED_LEN: usize = 66;

    fn put(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.nr);
        buf.put_u64_le(self.nn);
        buf.put_u32_le(self.np);
        buf.put_u64_le(self.auto_inc_next);
        buf.put_i64_le(self.min);
        buf.put_i64_le(self.max);
        buf.put_u32_le(self.dict_ver);
        buf.put_u8(self.unique as u8);
        buf.put_u8(self.unique_updated as u8);
        buf.put_u64_le(self.natural_size);
        buf.put_u64_le(self.compressed_size);
    }

    fn get(data: &mut &[u8]) -> Self {
        Self {
            nr: data.get_u64_le(),
            nn: data.get_u64_le(),
            np: data.get_u32_le(),
            auto_inc_next: data.get_u64_le(),
            min: data.get_i64_le(),
            max: data.get_i64_le(),
            dict_ver: data.get_u32_le(),
            unique: data.get_u8() != 0,
            unique_updated: data.get_u8() != 0,
            natural_size: data.get_u64_le(),
            compressed_size: data.get_u64_le(),
        }
    }

    /// Serialize a whole version file: magic, header, pack indices, crc32.
    pub fn encode_version_file(&self, idx: &[PackIndex]) -> Vec<u8> {
        assert_eq!(self.np as usize, idx.len(), "header np out of sync");
        let mut buf = Vec::with_capacity(8 + Self::ENCODED_LEN + idx.len() * 4);
        buf.put_u32_le(COL_VERSION_MAGIC);
        self.put(&mut buf);
        for pi in idx {
            buf.put_u32_le(*pi);
        }
        buf.put_u32_le(crc32fast::hash(&buf));
        buf
    }

    pub fn decode_version_file(data: &[u8]) -> StorageResult<(Self, Vec<PackIndex>)> {
        if data.len() < 4 + Self::ENCODED_LEN + 4 {
            return Err(TracedStorageError::corrupt("version file", "truncated"));
        }
        let body = &data[..data.len() - 4];
        let expected = crc32fast::hash(body) as u64;
        let found = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as u64;
        if found != expected {
            return Err(TracedStorageError::checksum(found, expected));
        }
        let mut body = body;
        if body.get_u32_le() != COL_VERSION_MAGIC {
            return Err(TracedStorageError::corrupt("version file", "bad magic"));
        }
        let hdr = Self::get(&mut body);
        if body.len() != hdr.np as usize * 4 {
            return Err(TracedStorageError::corrupt(
                "version file",
                "pack index list length mismatch",
            ));
        }
        let mut idx = Vec::with_capacity(hdr.np as usize);
        let mut body = body;
        for _ in 0..hdr.np {
            idx.push(body.get_u32_le());
        }
        Ok((hdr, idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnKind;

    #[test]
    fn test_meta_roundtrip() {
        let meta = ColumnMeta::new(
            16,
            ColumnType::new(ColumnKind::Decimal)
                .not_null()
                .with_precision(10)
                .with_scale(2),
        );
        let buf = meta.encode();
        assert_eq!(ColumnMeta::decode(&buf).unwrap(), meta);
    }

    #[test]
    fn test_meta_bad_magic() {
        let meta = ColumnMeta::new(16, ColumnType::new(ColumnKind::Int));
        let mut buf = meta.encode();
        buf[0] ^= 0xff;
        assert!(ColumnMeta::decode(&buf).is_err());
    }

    #[test]
    fn test_version_file_roundtrip() {
        let hdr = ColumnHeader {
            nr: 70000,
            nn: 3,
            np: 2,
            min: 1,
            max: 70000,
            dict_ver: 0,
            ..Default::default()
        };
        let buf = hdr.encode_version_file(&[0, 7]);
        let (hdr2, idx) = ColumnHeader::decode_version_file(&buf).unwrap();
        assert_eq!(hdr2, hdr);
        assert_eq!(idx, vec![0, 7]);
    }

    #[test]
    fn test_version_file_corrupt() {
        let hdr = ColumnHeader {
            np: 1,
            ..Default::default()
        };
        let mut buf = hdr.encode_version_file(&[0]);
        let n = buf.len();
        buf[n - 6] ^= 1;
        assert!(ColumnHeader::decode_version_file(&buf).is_err());
    }
}
