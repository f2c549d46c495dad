// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Process-wide engine state: the pack / dictionary / filter caches, the
//! committed-transaction high-water mark, deferred file removal with a
//! vacuum task, and the registry of unique-index handlers consumed by
//! point updates.
//!
//! The engine is passed around as an injected `Arc<Engine>` dependency; it
//! owns nothing column-specific.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use moka::future::Cache;
use parking_lot::Mutex as PLMutex;
use tokio::select;
use tokio::sync::oneshot::Sender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{DictCache, FilterCache, PackCache};
use crate::error::StorageResult;
use crate::options::StorageOptions;
use crate::types::{ColumnId, TableId, TxId};

/// Unique-constraint hook consumed by `update_data`. Implemented by the
/// secondary-index subsystem; a key collision surfaces as
/// [`StorageError::DuplicateKey`](crate::StorageError::DuplicateKey).
pub trait UniqueIndex: Send + Sync {
    /// Columns participating in the key.
    fn key_columns(&self) -> Vec<ColumnId>;

    /// Move the key of `row` from `old_key` to `new_key`.
    fn update_index(&self, new_key: &[u8], old_key: &[u8], row: u64) -> StorageResult<()>;
}

pub struct Engine {
    options: Arc<StorageOptions>,
    pub(crate) packs: PackCache,
    pub(crate) dicts: DictCache,
    pub(crate) filters: FilterCache,

    /// Highest committed transaction id; stamps `xmax` on shadowed DPNs.
    max_committed: PLMutex<TxId>,

    /// Files scheduled for removal once the committing version retires them.
    deferred: PLMutex<Vec<(PathBuf, TableId)>>,
    vacuum_tx: tokio::sync::mpsc::UnboundedSender<()>,
    vacuum_rx: PLMutex<Option<tokio::sync::mpsc::UnboundedReceiver<()>>>,
    #[allow(clippy::type_complexity)]
    vacuum_handler: tokio::sync::Mutex<(Option<Sender<()>>, Option<JoinHandle<()>>)>,

    indexes: PLMutex<HashMap<TableId, Arc<dyn UniqueIndex>>>,
}

impl Engine {
    pub fn new(options: StorageOptions) -> Arc<Self> {
        let (vacuum_tx, vacuum_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Self {
            packs: Cache::new(options.pack_cache_size),
            dicts: Cache::new(options.dict_cache_size),
            filters: Cache::new(options.filter_cache_size),
            options: Arc::new(options),
            max_committed: PLMutex::new(TxId::ZERO),
            deferred: PLMutex::new(Vec::new()),
            vacuum_tx,
            vacuum_rx: PLMutex::new(Some(vacuum_rx)),
            vacuum_handler: tokio::sync::Mutex::new((None, None)),
            indexes: PLMutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Highest committed transaction id seen by this engine.
    pub fn max_xid(&self) -> TxId {
        *self.max_committed.lock()
    }

    pub fn note_commit(&self, xid: TxId) {
        let mut max = self.max_committed.lock();
        if xid > *max {
            *max = xid;
        }
    }

    /// Schedule `path` for asynchronous removal.
    pub fn defer_remove(&self, path: PathBuf, table_id: TableId) {
        self.deferred.lock().push((path, table_id));
        // the vacuum may have stopped already; dropping the wakeup is fine
        let _ = self.vacuum_tx.send(());
    }

    pub fn pending_removals(&self) -> Vec<PathBuf> {
        self.deferred.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    /// Apply every pending removal.
    pub async fn do_vacuum(&self) -> StorageResult<()> {
        let deletions = std::mem::take(&mut *self.deferred.lock());
        for (path, table_id) in deletions {
            info!("vacuum table {}: {}", table_id, path.display());
            if self.options.disable_vacuum_removal {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("vacuum: {} already gone", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub async fn run_vacuum(
        self: &Arc<Self>,
        mut stop: tokio::sync::oneshot::Receiver<()>,
    ) -> StorageResult<()> {
        let mut notifier = self.vacuum_rx.lock().take().unwrap();
        loop {
            select! {
                Some(_) = notifier.recv() => self.do_vacuum().await?,
                _ = &mut stop => break,
            }
        }
        Ok(())
    }

    pub async fn spawn_vacuum(self: &Arc<Self>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let engine = self.clone();
        *self.vacuum_handler.lock().await = (
            Some(tx),
            Some(tokio::spawn(async move {
                engine
                    .run_vacuum(rx)
                    .await
                    .expect("vacuum stopped unexpectedly");
            })),
        );
    }

    pub async fn shutdown(self: &Arc<Self>) -> StorageResult<()> {
        let mut handler = self.vacuum_handler.lock().await;
        if let (Some(tx), Some(handle)) = (handler.0.take(), handler.1.take()) {
            info!("shutting down vacuum");
            let _ = tx.send(());
            handle.await.expect("vacuum task panicked");
        }
        Ok(())
    }

    pub fn register_index(&self, table_id: TableId, index: Arc<dyn UniqueIndex>) {
        self.indexes.lock().insert(table_id, index);
    }

    pub fn table_index(&self, table_id: TableId) -> Option<Arc<dyn UniqueIndex>> {
        self.indexes.lock().get(&table_id).cloned()
    }
}
