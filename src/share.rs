// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! Process-wide per-column shared state: the immutable meta, the DPN arena
//! and the append-only data file holding pack bodies.
//!
//! The arena is a fixed slab sized by the pre-allocated `DN` file; DPN
//! records never move, so `&Dpn` handed out here stays valid for the life
//! of the share. Allocation marks a slot used/local for the calling writer;
//! committed slots are only ever mutated by their owning writer (MVCC
//! discipline, see [`Dpn`]).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dpn::{Dpn, DPN_RECORD_SIZE};
use crate::error::{StorageError, StorageResult, TracedStorageError};
use crate::layout;
use crate::meta::ColumnMeta;
use crate::types::{ColumnId, ColumnType, PackIndex, TableId, TxId};

pub struct ColumnShare {
    path: PathBuf,
    table_id: TableId,
    col_id: ColumnId,
    meta: ColumnMeta,
    dpns: Box<[Dpn]>,
    /// Scan hint for the next free slot.
    alloc: Mutex<u32>,
    /// One past the highest slot ever used; bounds `save_dpns`.
    high_water: AtomicU32,
    dn_file: File,
    data_file: File,
    data_tail: AtomicU64,
    pub has_filter_hist: bool,
    pub has_filter_cmap: bool,
    pub has_filter_bloom: bool,
}

impl ColumnShare {
    pub async fn open(
        dir: impl AsRef<Path>,
        table_id: TableId,
        col_id: ColumnId,
    ) -> StorageResult<Arc<Self>> {
        let path = dir.as_ref().to_path_buf();
        let meta_buf = match tokio::fs::read(layout::path_of_meta(&path)).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TracedStorageError::not_found(
                    "column meta",
                    path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let meta = ColumnMeta::decode(&meta_buf)?;

        let dn_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(layout::path_of_dn(&path))?;
        let capacity = (dn_file.metadata()?.len() as usize / DPN_RECORD_SIZE) as u32;

        let dpns: Box<[Dpn]> = (0..capacity).map(|_| Dpn::default()).collect();
        let mut record = vec![0u8; DPN_RECORD_SIZE];
        let mut high_water = 0;
        for (i, dpn) in dpns.iter().enumerate() {
            let offset = (i * DPN_RECORD_SIZE) as u64;
            match dn_file.read_exact_at(&mut record, offset) {
                Ok(()) => dpn.decode(&record),
                // slots past the written prefix of the sparse file are free
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            if dpn.used() {
                high_water = i as u32 + 1;
            }
        }

        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(layout::path_of_data(&path))?;
        let data_tail = data_file.metadata()?.len();

        let has_filter = |kind| layout::path_of_filter_dir(&path, kind).is_dir();
        Ok(Arc::new(Self {
            has_filter_hist: has_filter(crate::filter::FilterKind::Hist),
            has_filter_cmap: has_filter(crate::filter::FilterKind::CMap),
            has_filter_bloom: has_filter(crate::filter::FilterKind::Bloom),
            path,
            table_id,
            col_id,
            meta,
            dpns,
            alloc: Mutex::new(0),
            high_water: AtomicU32::new(high_water),
            dn_file,
            data_file,
            data_tail: AtomicU64::new(data_tail),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn col_id(&self) -> ColumnId {
        self.col_id
    }

    pub fn meta(&self) -> &ColumnMeta {
        &self.meta
    }

    pub fn col_type(&self) -> &ColumnType {
        &self.meta.col_type
    }

    pub fn pss(&self) -> u8 {
        self.meta.pss
    }

    pub fn pack_rows(&self) -> u64 {
        self.meta.pack_rows()
    }

    pub fn capacity(&self) -> u32 {
        self.dpns.len() as u32
    }

    pub fn dpn(&self, idx: PackIndex) -> &Dpn {
        &self.dpns[idx as usize]
    }

    /// Arena index of a DPN reference obtained from this share.
    pub fn dpn_index(&self, dpn: &Dpn) -> PackIndex {
        let base = self.dpns.as_ptr() as usize;
        let at = dpn as *const Dpn as usize;
        debug_assert!(at >= base && (at - base) % std::mem::size_of::<Dpn>() == 0);
        ((at - base) / std::mem::size_of::<Dpn>()) as PackIndex
    }

    /// Allocate a local DPN for the writer `xid`, optionally shadowing
    /// `base` (copy-on-write): counters, statistics and the body address are
    /// carried over so the shadow starts as an exact logical copy.
    pub fn alloc_dpn(&self, xid: TxId, base: Option<PackIndex>) -> StorageResult<PackIndex> {
        let mut hint = self.alloc.lock();
        let capacity = self.dpns.len() as u32;
        for step in 0..capacity {
            let idx = (*hint + step) % capacity;
            let dpn = &self.dpns[idx as usize];
            if dpn.used() {
                continue;
            }
            dpn.reset();
            dpn.set_used(true);
            dpn.set_local(true);
            dpn.set_xmin(xid);
            dpn.set_xmax(TxId::MAX);
            if let Some(base_idx) = base {
                let base_dpn = self.dpn(base_idx);
                dpn.copy_stats_from(base_dpn);
                dpn.set_synced(base_dpn.synced());
                dpn.set_base(base_idx);
            }
            *hint = (idx + 1) % capacity;
            self.high_water.fetch_max(idx + 1, Relaxed);
            return Ok(idx);
        }
        Err(StorageError::ArenaFull(capacity).into())
    }

    /// Append an encoded pack body to the data file.
    pub fn write_pack_data(&self, buf: &[u8]) -> StorageResult<(u64, u32)> {
        let addr = self.data_tail.fetch_add(buf.len() as u64, Relaxed);
        self.data_file.write_all_at(buf, addr)?;
        Ok((addr, buf.len() as u32))
    }

    pub fn read_pack_data(&self, addr: u64, len: u32) -> StorageResult<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.data_file.read_exact_at(&mut buf, addr)?;
        Ok(buf)
    }

    /// Persist every allocated DPN record back into the `DN` file.
    pub fn save_dpns(&self) -> StorageResult<()> {
        let high = self.high_water.load(Relaxed) as usize;
        let mut buf = Vec::with_capacity(high * DPN_RECORD_SIZE);
        for dpn in &self.dpns[..high] {
            dpn.encode(&mut buf);
        }
        self.dn_file.write_all_at(&buf, 0)?;
        Ok(())
    }

    pub fn sync(&self) -> StorageResult<()> {
        self.data_file.sync_data()?;
        self.dn_file.sync_data()?;
        Ok(())
    }
}
