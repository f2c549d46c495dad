// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

use std::backtrace::Backtrace;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("corrupt {0}: {1}")]
    Corrupt(&'static str, String),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("invalid checksum: found {0}, expected {1}")]
    Checksum(u64, u64),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("duplicate entry: {0} for primary key")]
    DuplicateKey(String),
    #[error("DPN arena exhausted ({0} slots)")]
    ArenaFull(u32),
    #[error("{0}")]
    Nested(#[from] Arc<TracedStorageError>),
}

impl From<std::io::Error> for TracedStorageError {
    #[inline]
    fn from(e: std::io::Error) -> TracedStorageError {
        StorageError::Io(e.into()).into()
    }
}

impl From<Arc<TracedStorageError>> for TracedStorageError {
    #[inline]
    fn from(e: Arc<TracedStorageError>) -> TracedStorageError {
        StorageError::Nested(e).into()
    }
}

/// [`StorageError`] with backtrace.
pub struct TracedStorageError {
    source: StorageError,
    trace: Backtrace,
}

impl std::fmt::Display for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for TracedStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl std::fmt::Debug for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.source, self.trace)
    }
}

impl From<StorageError> for TracedStorageError {
    fn from(source: StorageError) -> Self {
        Self {
            source,
            trace: Backtrace::capture(),
        }
    }
}

impl TracedStorageError {
    pub fn not_found(ty: &'static str, item: impl ToString) -> Self {
        StorageError::NotFound(ty, item.to_string()).into()
    }

    pub fn corrupt(ty: &'static str, reason: impl ToString) -> Self {
        StorageError::Corrupt(ty, reason.to_string()).into()
    }

    pub fn decode(message: impl ToString) -> Self {
        StorageError::Decode(message.to_string()).into()
    }

    pub fn checksum(found: u64, expected: u64) -> Self {
        StorageError::Checksum(found, expected).into()
    }

    pub fn duplicate_key(key: impl ToString) -> Self {
        StorageError::DuplicateKey(key.to_string()).into()
    }

    pub fn source(&self) -> &StorageError {
        &self.source
    }
}

pub type StorageResult<T> = std::result::Result<T, TracedStorageError>;
