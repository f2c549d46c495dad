// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Column type descriptors and typed values.

use std::fmt;

use bytes::Bytes;
use rust_decimal::Decimal;

mod datetime;
pub use datetime::{Date, Timestamp};

pub type TableId = u32;
pub type ColumnId = u32;
pub type PackIndex = u32;

pub const INVALID_PACK_INDEX: PackIndex = PackIndex::MAX;

/// 64-bit null sentinel used by the raw read/encode paths.
pub const NULL_VALUE_64: i64 = i64::MIN + 1;
/// 32-bit null sentinel used by dictionary codes.
pub const NULL_VALUE_32: i32 = i32::MIN + 1;
pub const MINUS_INF_64: i64 = i64::MIN;
pub const PLUS_INF_64: i64 = i64::MAX;

pub(crate) const SHORT_MAX: i64 = 32767;

/// 128-bit transaction id. Also names the per-version files on disk.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxId {
    pub hi: u64,
    pub lo: u64,
}

impl TxId {
    pub const ZERO: TxId = TxId { hi: 0, lo: 0 };
    /// Open upper bound of a DPN's visibility interval.
    pub const MAX: TxId = TxId {
        hi: u64::MAX,
        lo: u64::MAX,
    };

    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }
}

impl From<u64> for TxId {
    fn from(lo: u64) -> Self {
        Self { hi: 0, lo }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self)
    }
}

/// Physical representation of a pack body.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PackKind {
    /// 64-bit codes: integers, reals (bit-cast), decimals, date-times and
    /// dictionary codes of lookup columns.
    Int,
    /// Variable-width binary values.
    Str,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ColumnKind {
    Int,
    BigInt,
    Real,
    Decimal,
    Date,
    Timestamp,
    Varchar,
    Blob,
}

impl ColumnKind {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Int,
            1 => Self::BigInt,
            2 => Self::Real,
            3 => Self::Decimal,
            4 => Self::Date,
            5 => Self::Timestamp,
            6 => Self::Varchar,
            7 => Self::Blob,
            _ => return None,
        })
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Int => 0,
            Self::BigInt => 1,
            Self::Real => 2,
            Self::Decimal => 3,
            Self::Date => 4,
            Self::Timestamp => 5,
            Self::Varchar => 6,
            Self::Blob => 7,
        }
    }
}

/// Logical description of one column: kind, nullability, precision/scale and
/// the string-encoding properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnType {
    pub kind: ColumnKind,
    pub nullable: bool,
    /// Max textual/binary length for strings; total digits for decimals.
    pub precision: u32,
    /// Decimal places for decimals; 0 otherwise.
    pub scale: u8,
    /// Dictionary-encoded string column.
    pub lookup: bool,
    /// Collation requires UTF-aware comparison (disables the char map).
    pub unicode: bool,
}

impl ColumnType {
    pub fn new(kind: ColumnKind) -> Self {
        Self {
            kind,
            nullable: true,
            precision: 0,
            scale: 0,
            lookup: false,
            unicode: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    pub fn lookup(mut self) -> Self {
        assert!(
            self.is_string(),
            "only string columns can be dictionary-encoded"
        );
        self.lookup = true;
        self
    }

    pub fn unicode(mut self) -> Self {
        self.unicode = true;
        self
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, ColumnKind::Varchar | ColumnKind::Blob)
    }

    pub fn is_lookup(&self) -> bool {
        self.lookup
    }

    pub fn is_real(&self) -> bool {
        self.kind == ColumnKind::Real
    }

    pub fn is_date_time(&self) -> bool {
        matches!(self.kind, ColumnKind::Date | ColumnKind::Timestamp)
    }

    /// Physical pack representation: lookup columns store dictionary codes
    /// in integer packs.
    pub fn pack_kind(&self) -> PackKind {
        if self.lookup || !self.is_string() {
            PackKind::Int
        } else {
            PackKind::Str
        }
    }

    /// Width of the canonical textual rendering.
    pub fn display_size(&self) -> usize {
        match self.kind {
            ColumnKind::Int => 11,
            ColumnKind::BigInt => 20,
            ColumnKind::Real => 17,
            ColumnKind::Decimal => self.precision as usize + 2,
            ColumnKind::Date => 10,
            ColumnKind::Timestamp => 19,
            ColumnKind::Varchar | ColumnKind::Blob => self.precision as usize,
        }
    }
}

/// A typed value crossing the controller boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Decimal(Decimal),
    Date(Date),
    Timestamp(Timestamp),
    String(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Bytes::copy_from_slice(s.as_ref().as_bytes()))
    }

    /// Binary form used for dictionary lookups and index keys.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            Value::Null => None,
            Value::String(b) => Some(b.clone()),
            Value::Int(v) => Some(Bytes::from(v.to_string())),
            Value::Real(v) => Some(Bytes::from(v.to_string())),
            Value::Decimal(v) => Some(Bytes::from(v.to_string())),
            Value::Date(v) => Some(Bytes::from(v.to_string())),
            Value::Timestamp(v) => Some(Bytes::from(v.to_utc_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txid_rendering() {
        assert_eq!(
            TxId::new(1, 0xdead).to_string(),
            "0000000000000001000000000000dead"
        );
        assert!(TxId::new(0, 5) < TxId::new(1, 0));
    }

    #[test]
    fn test_pack_kind() {
        let ct = ColumnType::new(ColumnKind::Varchar).with_precision(16);
        assert_eq!(ct.pack_kind(), PackKind::Str);
        assert_eq!(ct.clone().lookup().pack_kind(), PackKind::Int);
        assert_eq!(ColumnType::new(ColumnKind::Real).pack_kind(), PackKind::Int);
    }
}
