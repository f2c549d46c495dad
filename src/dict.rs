// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Dictionary for lookup columns: a bidirectional map between string values
//! and 32-bit codes (1-based; [`NULL_VALUE_32`](crate::NULL_VALUE_32) marks
//! null). Dictionaries are shared read-only through the cache; a writer that
//! needs a new code clones the dictionary first and bumps `hdr.dict_ver`, so
//! readers at version `v` never observe codes allocated later.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};

use bytes::{Buf, BufMut, Bytes};
use parking_lot::RwLock;

use crate::error::{StorageResult, TracedStorageError};

const DICT_MAGIC: u32 = 0x504c_4454; // "PLDT"

struct DictInner {
    values: Vec<Bytes>,
    codes: HashMap<Bytes, i32>,
}

pub struct Dict {
    inner: RwLock<DictInner>,
    changed: AtomicBool,
    precision: u32,
}

impl Dict {
    pub fn new(precision: u32) -> Self {
        Self {
            inner: RwLock::new(DictInner {
                values: Vec::new(),
                codes: HashMap::new(),
            }),
            changed: AtomicBool::new(false),
            precision,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Code of `value`, if present.
    pub fn encoded_value(&self, value: &[u8]) -> Option<i32> {
        self.inner.read().codes.get(value).copied()
    }

    /// Insert a new value and return its code. Marks the dictionary changed;
    /// callers are expected to have cloned a shared dictionary first.
    pub fn add(&self, value: &[u8]) -> i32 {
        let mut inner = self.inner.write();
        if let Some(code) = inner.codes.get(value) {
            return *code;
        }
        let value = Bytes::copy_from_slice(value);
        inner.values.push(value.clone());
        let code = inner.values.len() as i32;
        inner.codes.insert(value, code);
        self.changed.store(true, Relaxed);
        code
    }

    /// Original value for a code (`GetRealValue`).
    pub fn value(&self, code: i32) -> Option<Bytes> {
        if code < 1 {
            return None;
        }
        self.inner.read().values.get(code as usize - 1).cloned()
    }

    pub fn value_size(&self, code: i32) -> usize {
        self.value(code).map(|v| v.len()).unwrap_or(0)
    }

    pub fn changed(&self) -> bool {
        self.changed.load(Relaxed)
    }

    /// Clear the changed mark once this dictionary version is published; any
    /// further insertion must go through a fresh clone.
    pub fn mark_saved(&self) {
        self.changed.store(false, Relaxed);
    }

    /// Copy-on-write clone; the clone starts unchanged.
    pub fn clone_dict(&self) -> Dict {
        let inner = self.inner.read();
        Dict {
            inner: RwLock::new(DictInner {
                values: inner.values.clone(),
                codes: inner.codes.clone(),
            }),
            changed: AtomicBool::new(false),
            precision: self.precision,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let inner = self.inner.read();
        let mut buf = Vec::new();
        buf.put_u32_le(DICT_MAGIC);
        buf.put_u32_le(self.precision);
        buf.put_u32_le(inner.values.len() as u32);
        for v in &inner.values {
            buf.put_u32_le(v.len() as u32);
            buf.put_slice(v);
        }
        buf.put_u32_le(crc32fast::hash(&buf));
        buf
    }

    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        if data.len() < 16 {
            return Err(TracedStorageError::corrupt("dictionary", "truncated"));
        }
        let body = &data[..data.len() - 4];
        let expected = crc32fast::hash(body) as u64;
        let found = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as u64;
        if found != expected {
            return Err(TracedStorageError::checksum(found, expected));
        }
        let mut body = body;
        if body.get_u32_le() != DICT_MAGIC {
            return Err(TracedStorageError::corrupt("dictionary", "bad magic"));
        }
        let precision = body.get_u32_le();
        let count = body.get_u32_le() as usize;
        let dict = Dict::new(precision);
        {
            let mut inner = dict.inner.write();
            for _ in 0..count {
                if body.remaining() < 4 {
                    return Err(TracedStorageError::corrupt("dictionary", "truncated entry"));
                }
                let len = body.get_u32_le() as usize;
                if body.remaining() < len {
                    return Err(TracedStorageError::corrupt("dictionary", "truncated entry"));
                }
                let value = Bytes::copy_from_slice(&body[..len]);
                body.advance(len);
                inner.values.push(value.clone());
                let code = inner.values.len() as i32;
                inner.codes.insert(value, code);
            }
        }
        Ok(dict)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        tokio::fs::write(path, self.encode()).await?;
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TracedStorageError::not_found(
                    "dictionary",
                    path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        Self::decode(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let dict = Dict::new(16);
        assert_eq!(dict.encoded_value(b"a"), None);
        assert_eq!(dict.add(b"a"), 1);
        assert_eq!(dict.add(b"b"), 2);
        assert_eq!(dict.add(b"a"), 1);
        assert_eq!(dict.encoded_value(b"b"), Some(2));
        assert_eq!(dict.value(2).unwrap(), Bytes::from_static(b"b"));
        assert!(dict.changed());
    }

    #[test]
    fn test_copy_on_write_clone() {
        let dict = Dict::new(16);
        dict.add(b"a");
        dict.mark_saved();

        let clone = dict.clone_dict();
        assert!(!clone.changed());
        assert_eq!(clone.add(b"b"), 2);
        assert!(clone.changed());
        // the source is unaffected
        assert_eq!(dict.encoded_value(b"b"), None);
        assert!(!dict.changed());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let dict = Dict::new(8);
        dict.add(b"north");
        dict.add(b"south");
        let restored = Dict::decode(&dict.encode()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.encoded_value(b"south"), Some(2));
        assert_eq!(restored.precision(), 8);
        assert!(!restored.changed());
    }
}
