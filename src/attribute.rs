// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! The per-column attribute controller.
//!
//! An [`Attribute`] materializes one consistent view of a column at a given
//! transaction id: the column header, the ordered pack index list, an
//! optional dictionary handle and the dirty rough-filter handles of a
//! writer. All reads go through DPN statistics first; pack bodies are
//! loaded lazily through the engine cache under the DPN's tagged-pointer
//! lock protocol. Writers shadow committed DPNs copy-on-write and publish a
//! new version file at commit.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::FixedOffset;
use itertools::Itertools;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::batch::ValueBatch;
use crate::cache::{DictCoordinate, FilterCoordinate, PackCoordinate};
use crate::dict::Dict;
use crate::dpn::{Dpn, LOADING_FLAG};
use crate::engine::Engine;
use crate::error::{StorageResult, TracedStorageError};
use crate::filter::{FilterKind, RoughFilter};
use crate::layout;
use crate::meta::{ColumnHeader, ColumnMeta};
use crate::pack::Pack;
use crate::row_filter::RowFilter;
use crate::share::ColumnShare;
use crate::types::{
    ColumnId, ColumnKind, ColumnType, PackIndex, PackKind, TableId, TxId, Value, MINUS_INF_64,
    NULL_VALUE_32, NULL_VALUE_64, PLUS_INF_64, SHORT_MAX,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PackOntologicalStatus {
    NullsOnly,
    Uniform,
    UniformAndNulls,
    Normal,
}

pub struct Attribute {
    engine: Arc<Engine>,
    share: Arc<ColumnShare>,
    table_id: TableId,
    col_id: ColumnId,

    /// Version this view was loaded from; advanced by `post_commit`.
    version: TxId,
    /// Writer transaction id; `None` for read-only views.
    tx: Option<TxId>,

    pss: u8,
    ct: ColumnType,
    pack_kind: PackKind,

    hdr: ColumnHeader,
    idx: Vec<PackIndex>,
    dict: Option<Arc<Dict>>,

    filter_hist: Option<Arc<RoughFilter>>,
    filter_cmap: Option<Arc<RoughFilter>>,
    filter_bloom: Option<Arc<RoughFilter>>,

    no_change: bool,
    session_zone: FixedOffset,
}

fn rows2packs(rows: u64, pss: u8) -> u32 {
    rows.div_ceil(1 << pss) as u32
}

fn pow10_f(n: u32) -> f64 {
    10f64.powi(n as i32)
}

impl Attribute {
    /// Create the on-disk layout of a new column: immutable meta, seed
    /// dictionary for lookup columns, the version-0 snapshot covering
    /// `no_rows` all-null rows, the pre-sized DPN file and the filter
    /// directories.
    pub async fn create(
        dir: &Path,
        meta: &ColumnMeta,
        no_rows: u64,
        options: &crate::options::StorageOptions,
    ) -> StorageResult<()> {
        let no_pack = rows2packs(no_rows, meta.pss);
        assert!(
            no_pack <= options.dpn_capacity,
            "initial rows exceed the DPN arena"
        );
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(layout::path_of_meta(dir), meta.encode()).await?;

        let mut hdr = ColumnHeader {
            nr: no_rows,
            nn: no_rows,
            np: no_pack,
            ..Default::default()
        };

        if meta.col_type.is_lookup() {
            // 0 means no dictionary, so versions start at 1
            hdr.dict_ver = 1;
            tokio::fs::create_dir_all(dir.join(layout::COL_DICT_DIR)).await?;
            let dict = Dict::new(meta.col_type.precision);
            dict.save(layout::path_of_dict(dir, 1)).await?;
        }

        tokio::fs::create_dir_all(dir.join(layout::COL_VERSION_DIR)).await?;
        let idx: Vec<PackIndex> = (0..no_pack).collect();
        tokio::fs::write(
            layout::path_of_version(dir, TxId::ZERO),
            hdr.encode_version_file(&idx),
        )
        .await?;

        // all pre-existing rows are null-only DPNs
        let mut buf = Vec::new();
        if no_pack > 0 {
            let pack_rows = meta.pack_rows() as u32;
            let dpn = Dpn::default();
            dpn.set_used(true);
            dpn.set_nr(pack_rows);
            dpn.set_nn(pack_rows);
            for _ in 0..no_pack - 1 {
                dpn.encode(&mut buf);
            }
            let left = (no_rows % meta.pack_rows()) as u32;
            if left != 0 {
                dpn.set_nr(left);
                dpn.set_nn(left);
            }
            dpn.encode(&mut buf);
        }
        tokio::fs::write(layout::path_of_dn(dir), &buf).await?;
        let dn = std::fs::OpenOptions::new()
            .write(true)
            .open(layout::path_of_dn(dir))?;
        dn.set_len(options.dpn_capacity as u64 * crate::dpn::DPN_RECORD_SIZE as u64)?;

        tokio::fs::write(layout::path_of_data(dir), b"").await?;

        for kind in FilterKind::ALL {
            tokio::fs::create_dir_all(layout::path_of_filter_dir(dir, kind)).await?;
        }
        Ok(())
    }

    /// Acquire the controller for `(table, column)` at version `xid`.
    /// A `Some` transaction handle makes this a writer view.
    pub async fn open(
        engine: Arc<Engine>,
        share: Arc<ColumnShare>,
        tx: Option<TxId>,
        xid: TxId,
    ) -> StorageResult<Attribute> {
        let mut attr = Attribute {
            table_id: share.table_id(),
            col_id: share.col_id(),
            version: xid,
            tx,
            pss: share.pss(),
            ct: share.col_type().clone(),
            pack_kind: share.col_type().pack_kind(),
            hdr: ColumnHeader::default(),
            idx: Vec::new(),
            dict: None,
            filter_hist: None,
            filter_cmap: None,
            filter_bloom: None,
            no_change: true,
            session_zone: FixedOffset::east_opt(0).unwrap(),
            engine,
            share,
        };
        attr.load_version(xid).await?;
        Ok(attr)
    }

    pub async fn load_version(&mut self, xid: TxId) -> StorageResult<()> {
        let path = layout::path_of_version(self.share.path(), xid);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TracedStorageError::not_found(
                    "column version",
                    path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let (hdr, idx) = ColumnHeader::decode_version_file(&data)?;
        self.hdr = hdr;
        self.idx = idx;
        self.version = xid;
        if self.hdr.dict_ver != 0 {
            self.dict = Some(self.fetch_dict(self.hdr.dict_ver).await?);
        }
        Ok(())
    }

    /// Session time zone used for TIMESTAMP reads.
    pub fn set_session_zone(&mut self, zone: FixedOffset) {
        self.session_zone = zone;
    }

    // --- small accessors ---

    pub fn version(&self) -> TxId {
        self.version
    }

    pub fn col_type(&self) -> &ColumnType {
        &self.ct
    }

    pub fn num_of_obj(&self) -> u64 {
        self.hdr.nr
    }

    pub fn size_of_pack(&self) -> usize {
        self.idx.len()
    }

    /// Arena index of the DPN at logical pack position `i`.
    pub fn pack_index(&self, i: usize) -> PackIndex {
        self.idx[i]
    }

    pub fn header(&self) -> &ColumnHeader {
        &self.hdr
    }

    pub fn is_unique(&self) -> bool {
        self.hdr.unique
    }

    pub fn set_unique(&mut self, unique: bool) {
        self.hdr.unique = unique;
    }

    pub fn is_unique_updated(&self) -> bool {
        self.hdr.unique_updated
    }

    pub fn set_unique_updated(&mut self, updated: bool) {
        self.hdr.unique_updated = updated;
    }

    pub fn get_auto_inc(&self) -> u64 {
        self.hdr.auto_inc_next
    }

    pub fn set_auto_inc(&mut self, next: u64) {
        self.hdr.auto_inc_next = next;
    }

    pub fn row2pack(&self, row: u64) -> usize {
        (row >> self.pss) as usize
    }

    pub fn row2offset(&self, row: u64) -> usize {
        (row & ((1 << self.pss) - 1)) as usize
    }

    fn dpn(&self, i: usize) -> &Dpn {
        self.share.dpn(self.idx[i])
    }

    fn pack_coord(&self, i: usize) -> PackCoordinate {
        PackCoordinate::new(self.table_id, self.col_id, self.idx[i])
    }

    fn expect_writer(&self) -> TxId {
        self.tx
            .expect("attempt to modify column in a read-only transaction")
    }

    // --- cache producers ---

    /// Pack producer for the engine cache: the fetch-on-miss path of
    /// `lock_pack_for_use` and the copy-on-write paths.
    pub async fn fetch_pack(&self, coord: PackCoordinate) -> StorageResult<Arc<Pack>> {
        let share = Arc::clone(&self.share);
        self.engine
            .packs
            .try_get_with(coord, async move {
                Pack::fetch(&share, coord, coord.pack).map(Arc::new)
            })
            .await
            .map_err(TracedStorageError::from)
    }

    /// Dictionary producer for the engine cache.
    pub async fn fetch_dict(&self, version: u32) -> StorageResult<Arc<Dict>> {
        let coord = DictCoordinate::new(self.table_id, self.col_id, version);
        let path = layout::path_of_dict(self.share.path(), version);
        self.engine
            .dicts
            .try_get_with(coord, async move { Dict::load(path).await.map(Arc::new) })
            .await
            .map_err(TracedStorageError::from)
    }

    /// Shared-filter creator, keyed by `(table, column, kind, xid)`.
    async fn fetch_filter(&self, coord: FilterCoordinate) -> StorageResult<Arc<RoughFilter>> {
        let dir = self.share.path().to_path_buf();
        self.engine
            .filters
            .try_get_with(coord, async move {
                RoughFilter::open(&dir, coord.kind, coord.xid)
                    .await
                    .map(Arc::new)
            })
            .await
            .map_err(TracedStorageError::from)
    }

    /// Idempotent: make sure the dictionary is materialized when the header
    /// names one (it may have been dropped by [`Attribute::collapse`]).
    pub async fn load_pack_info(&mut self) -> StorageResult<()> {
        if self.hdr.dict_ver != 0 && self.dict.is_none() {
            self.dict = Some(self.fetch_dict(self.hdr.dict_ver).await?);
        }
        Ok(())
    }

    /// Drop an unchanged dictionary handle so the cache may evict it.
    pub fn collapse(&mut self) {
        if let Some(dict) = &self.dict {
            if !dict.changed() {
                self.dict = None;
            }
        }
    }

    pub fn release(&mut self) {
        self.collapse();
    }

    // --- pack lock protocol ---

    /// Pin the pack of logical position `pn` into memory. Local DPNs pin
    /// the committed base they shadow; committed trivial packs have no body
    /// and need no pin.
    pub async fn lock_pack_for_use(&self, pn: usize) -> StorageResult<()> {
        let share = Arc::clone(&self.share);
        let mut dpn = share.dpn(self.idx[pn]);
        if dpn.is_local() && dpn.has_base() {
            dpn = share.dpn(dpn.base());
        }
        if dpn.trivial() && !dpn.is_local() {
            return Ok(());
        }

        loop {
            if dpn.inc_ref() {
                return Ok(());
            }

            // either the pack is not loaded yet or another thread is
            // loading it
            if dpn.cas_ptr(0, LOADING_FLAG) {
                let coord = PackCoordinate::new(self.table_id, self.col_id, share.dpn_index(dpn));
                match self.fetch_pack(coord).await {
                    Ok(pack) => {
                        pack.lock();
                        dpn.install_loaded(pack);
                        return Ok(());
                    }
                    Err(e) => {
                        dpn.clear_loading();
                        error!("failed to load pack {:?}: {}", coord, e);
                        return Err(e);
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn unlock_pack_from_use(&self, pn: usize) {
        let share = &self.share;
        let mut dpn = share.dpn(self.idx[pn]);
        if dpn.is_local() && dpn.has_base() {
            dpn = share.dpn(dpn.base());
        }
        if dpn.trivial() {
            return;
        }
        if let Some(pack) = dpn.dec_ref() {
            // last reference: the word is back to zero and the cache is
            // free to evict the object
            pack.unlock();
        }
    }

    fn get_pack(&self, i: usize) -> Option<&Pack> {
        self.dpn(i).pack()
    }

    // --- statistics ---

    pub fn pack_ontological_status(&self, pack: usize) -> PackOntologicalStatus {
        let dpn = self.dpn(pack);
        if dpn.null_only() {
            return PackOntologicalStatus::NullsOnly;
        }
        if self.pack_kind == PackKind::Int && dpn.min_i() == dpn.max_i() && dpn.nr() > 0 {
            if dpn.nn() == 0 {
                return PackOntologicalStatus::Uniform;
            }
            return PackOntologicalStatus::UniformAndNulls;
        }
        PackOntologicalStatus::Normal
    }

    /// Null count of one pack, or of the whole column.
    pub fn num_of_nulls(&self, pack: Option<usize>) -> u64 {
        match pack {
            None => self.hdr.nn,
            Some(p) => self.dpn(p).nn() as u64,
        }
    }

    /// Byte size of the widest value that can occur in `pack`: the declared
    /// precision, or the stored body size for plain string packs.
    pub fn get_actual_size(&self, pack: usize) -> usize {
        if self.pack_ontological_status(pack) == PackOntologicalStatus::NullsOnly {
            return 0;
        }
        if self.ct.is_lookup() || self.pack_kind != PackKind::Str {
            return self.ct.precision as usize;
        }
        self.dpn(pack).sum_i() as usize
    }

    /// Pack sum with a conservative overflow guard; `NULL_VALUE_64` when the
    /// sum is unavailable. The `bool` reports whether every value is
    /// non-negative.
    pub fn get_sum(&self, pack: usize) -> (i64, bool) {
        let dpn = self.dpn(pack);
        if self.pack_ontological_status(pack) == PackOntologicalStatus::NullsOnly
            || self.ct.is_string()
        {
            return (NULL_VALUE_64, false);
        }
        if !self.ct.is_real()
            && (dpn.min_i() < MINUS_INF_64 / (SHORT_MAX + 1)
                || dpn.max_i() > PLUS_INF_64 / (SHORT_MAX + 1))
        {
            // conservative overflow test for ints/decimals
            return (NULL_VALUE_64, false);
        }
        (dpn.sum_i(), dpn.min_i() >= 0)
    }

    pub fn get_min_int64(&self, pack: usize) -> i64 {
        if self.pack_ontological_status(pack) == PackOntologicalStatus::NullsOnly {
            return MINUS_INF_64;
        }
        self.dpn(pack).min_i()
    }

    pub fn get_max_int64(&self, pack: usize) -> i64 {
        if self.pack_ontological_status(pack) == PackOntologicalStatus::NullsOnly {
            return PLUS_INF_64;
        }
        self.dpn(pack).max_i()
    }

    /// Lexicographic minimum prefix of a string pack, trimmed of the NUL
    /// padding (bounded by the pack's actual size).
    pub fn get_min_string(&self, pack: usize) -> Option<Bytes> {
        if self.pack_ontological_status(pack) == PackOntologicalStatus::NullsOnly
            || self.pack_kind != PackKind::Str
        {
            return None;
        }
        let s = self.dpn(pack).min_s();
        let mut len = self.get_actual_size(pack).min(8);
        while len > 0 && s[len - 1] == 0 {
            len -= 1;
        }
        Some(Bytes::copy_from_slice(&s[..len]))
    }

    /// Maximum prefix. The stored prefix carries no length, so the cut-off
    /// scans for the rightmost NUL within the actual-size bound; a prefix
    /// with no NUL keeps the full bound.
    pub fn get_max_string(&self, pack: usize) -> Option<Bytes> {
        if self.pack_ontological_status(pack) == PackOntologicalStatus::NullsOnly
            || self.pack_kind != PackKind::Str
        {
            return None;
        }
        let s = self.dpn(pack).max_s();
        let bound = self.get_actual_size(pack).min(8);
        let mut i = bound as i64 - 1;
        while i >= 0 && s[i as usize] != 0 {
            i -= 1;
        }
        let len = if i >= 0 { i as usize } else { bound };
        Some(Bytes::copy_from_slice(&s[..len]))
    }

    /// Length of the common prefix of the pack's min/max strings, a quick
    /// literal-mismatch filter.
    pub fn get_prefix_length(&self, pack: usize) -> usize {
        if self.pack_ontological_status(pack) == PackOntologicalStatus::NullsOnly {
            return 0;
        }
        let dpn = self.dpn(pack);
        let (min_s, max_s) = (dpn.min_s(), dpn.max_s());
        (0..8)
            .take_while(|&i| min_s[i] != 0 && min_s[i] == max_s[i])
            .count()
    }

    /// Byte length of the value at `row` (0 for null).
    pub fn get_length(&self, row: u64) -> usize {
        let pn = self.row2pack(row);
        let dpn = self.dpn(pn);
        if dpn.null_only() {
            return 0;
        }
        if self.pack_kind != PackKind::Str {
            return self.ct.display_size();
        }
        let pack = self.get_pack(pn).expect("string pack read while unloaded");
        debug_assert!(pack.is_locked());
        pack.value_len(self.row2offset(row))
    }

    pub fn compute_natural_size(&self) -> u64 {
        let nr = self.hdr.nr;
        let mut size = if self.ct.nullable { nr / 8 } else { 0 };
        size += match self.ct.kind {
            ColumnKind::Int => 4 * nr,
            ColumnKind::BigInt | ColumnKind::Real => 8 * nr,
            ColumnKind::Decimal => {
                (self.ct.precision as u64 + (self.ct.scale > 0) as u64) * nr
            }
            ColumnKind::Date | ColumnKind::Timestamp => self.ct.display_size() as u64 * nr,
            ColumnKind::Varchar | ColumnKind::Blob => self.hdr.natural_size,
        };
        size
    }

    // --- value read ---

    pub fn is_null(&self, row: u64) -> bool {
        let pn = self.row2pack(row);
        let dpn = self.dpn(pn);
        if dpn.null_only() {
            return true;
        }
        if dpn.nn() == 0 {
            return false;
        }
        match self.get_pack(pn) {
            Some(pack) => pack.is_null(self.row2offset(row)),
            None => {
                assert!(dpn.trivial(), "pack {} read while unloaded", pn);
                false
            }
        }
    }

    /// Raw 64-bit code at `row`: dictionary code, encoded date-time, real
    /// bit pattern or plain integer. `NULL_VALUE_64` for nulls.
    pub fn get_value_int64(&self, row: u64) -> i64 {
        debug_assert!(row < self.hdr.nr);
        let pn = self.row2pack(row);
        let dpn = self.dpn(pn);
        if dpn.null_only() {
            return NULL_VALUE_64;
        }
        match self.get_pack(pn) {
            Some(pack) => {
                let offset = self.row2offset(row);
                if pack.is_null(offset) {
                    NULL_VALUE_64
                } else {
                    pack.get_val_int(offset)
                }
            }
            None => {
                // trivial uniform pack: fully described by its statistics
                assert!(dpn.trivial(), "pack {} read while unloaded", pn);
                dpn.min_i()
            }
        }
    }

    pub fn get_not_null_value_int64(&self, row: u64) -> i64 {
        debug_assert!(!self.is_null(row));
        self.get_value_int64(row)
    }

    /// Textual/binary value at `row`; `None` for nulls.
    pub fn get_value_string(&self, row: u64) -> Option<Bytes> {
        let pn = self.row2pack(row);
        if self.pack_kind == PackKind::Str {
            let dpn = self.dpn(pn);
            if dpn.null_only() {
                return None;
            }
            let pack = match self.get_pack(pn) {
                Some(pack) => pack,
                None => {
                    assert!(dpn.trivial(), "pack {} read while unloaded", pn);
                    return None;
                }
            };
            debug_assert!(pack.is_locked());
            let offset = self.row2offset(row);
            if pack.is_null(offset) {
                return None;
            }
            return Some(pack.get_value_binary(offset));
        }
        self.decode_value_s(self.get_value_int64(row))
    }

    pub fn get_not_null_value_string(&self, row: u64) -> Bytes {
        if self.pack_kind == PackKind::Str {
            let pn = self.row2pack(row);
            let pack = self.get_pack(pn).expect("string pack read while unloaded");
            debug_assert!(pack.is_locked());
            return pack.get_value_binary(self.row2offset(row));
        }
        self.decode_value_s(self.get_not_null_value_int64(row))
            .unwrap_or_default()
    }

    /// Raw binary form: variable-width bytes for strings, fixed 4/8 bytes
    /// (little endian, NUL-terminated) for numeric and date-time kinds.
    pub fn get_value_bin(&self, row: u64) -> Option<Bytes> {
        let pn = self.row2pack(row);
        if self.dpn(pn).null_only() {
            return None;
        }
        if self.ct.is_string() {
            if self.pack_kind == PackKind::Int {
                let code = self.get_value_int64(row);
                if code == NULL_VALUE_64 {
                    return None;
                }
                let dict = self.dict.as_ref().expect("dictionary not materialized");
                return dict.value(code as i32);
            }
            return self.get_value_string(row);
        }
        let v = self.get_value_int64(row);
        if v == NULL_VALUE_64 {
            return None;
        }
        let mut buf = Vec::with_capacity(9);
        if self.ct.kind == ColumnKind::Int {
            buf.extend_from_slice(&(v as i32).to_le_bytes());
        } else {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.push(0);
        Some(Bytes::from(buf))
    }

    /// Typed value object at `row`. `lookup_to_num` suppresses dictionary
    /// expansion and yields the raw code of lookup columns.
    pub fn get_value(&self, row: u64, lookup_to_num: bool) -> Value {
        if self.is_null(row) {
            return Value::Null;
        }
        match self.ct.kind {
            ColumnKind::Varchar | ColumnKind::Blob => {
                if self.ct.is_lookup() && lookup_to_num {
                    Value::Int(self.get_not_null_value_int64(row))
                } else {
                    Value::String(self.get_not_null_value_string(row))
                }
            }
            ColumnKind::Int | ColumnKind::BigInt => {
                Value::Int(self.get_not_null_value_int64(row))
            }
            ColumnKind::Real => Value::Real(f64::from_bits(
                self.get_not_null_value_int64(row) as u64,
            )),
            ColumnKind::Decimal => Value::Decimal(Decimal::from_i128_with_scale(
                self.get_not_null_value_int64(row) as i128,
                self.ct.scale as u32,
            )),
            ColumnKind::Date => Value::Date(crate::types::Date::from_code(
                self.get_not_null_value_int64(row),
            )),
            ColumnKind::Timestamp => {
                // stored UTC, surfaced as wall-clock time in the session zone
                let utc = self.get_not_null_value_int64(row);
                let shifted = utc + self.session_zone.local_minus_utc() as i64 * 1_000_000;
                Value::Timestamp(crate::types::Timestamp::from_code(shifted))
            }
        }
    }

    // --- encode / decode ---

    /// Canonical text of a 64-bit code; `None` for the null sentinel.
    pub fn decode_value_s(&self, code: i64) -> Option<Bytes> {
        if code == NULL_VALUE_64 {
            return None;
        }
        if self.ct.is_lookup() {
            debug_assert_eq!(self.pack_kind, PackKind::Int);
            let dict = self.dict.as_ref().expect("dictionary not materialized");
            return dict.value(code as i32);
        }
        let text = match self.ct.kind {
            ColumnKind::Int | ColumnKind::BigInt => code.to_string(),
            ColumnKind::Real => f64::from_bits(code as u64).to_string(),
            ColumnKind::Decimal => {
                Decimal::from_i128_with_scale(code as i128, self.ct.scale as u32).to_string()
            }
            ColumnKind::Date => crate::types::Date::from_code(code).to_string(),
            ColumnKind::Timestamp => {
                crate::types::Timestamp::from_code(code).to_zoned_string(&self.session_zone)
            }
            ColumnKind::Varchar | ColumnKind::Blob => return None,
        };
        Some(Bytes::from(text))
    }

    /// Dictionary code (or parsed numeric) for a textual value. With
    /// `new_val` a missing dictionary entry triggers the dictionary
    /// copy-on-write and is inserted; without it the miss yields
    /// `NULL_VALUE_32`.
    pub async fn encode_value_t(
        &mut self,
        value: Option<&[u8]>,
        new_val: bool,
    ) -> StorageResult<i32> {
        let Some(value) = value else {
            return Ok(NULL_VALUE_32);
        };
        if self.ct.is_string() {
            debug_assert_eq!(self.pack_kind, PackKind::Int);
            self.load_pack_info().await?;
            let dict = self.dict.as_ref().expect("dictionary not materialized");
            if let Some(code) = dict.encoded_value(value) {
                return Ok(code);
            }
            if !new_val {
                return Ok(NULL_VALUE_32);
            }
            self.expect_writer();
            self.dict_for_write().await?;
            return Ok(self.dict.as_ref().unwrap().add(value));
        }
        assert!(
            !self.ct.is_date_time() && self.ct.kind != ColumnKind::BigInt,
            "wrong data type for textual encode: {:?}",
            self.ct.kind
        );
        let text = std::str::from_utf8(value)
            .map_err(|_| TracedStorageError::decode("non-utf8 numeric literal"))?;
        let mut parsed: Decimal = text
            .trim()
            .parse()
            .map_err(|e| TracedStorageError::decode(format!("bad numeric literal: {}", e)))?;
        parsed.rescale(self.ct.scale as u32);
        Ok(parsed.mantissa() as i32)
    }

    /// Clone the dictionary on first modification in this transaction and
    /// install the clone in the cache under the bumped version, before any
    /// new code is emitted.
    async fn dict_for_write(&mut self) -> StorageResult<()> {
        let dict = self.dict.as_ref().expect("dictionary not materialized");
        if dict.changed() {
            return Ok(());
        }
        let clone = Arc::new(dict.clone_dict());
        self.hdr.dict_ver += 1;
        info!(
            "column {}/{}: dictionary copy-on-write to version {}",
            self.table_id, self.col_id, self.hdr.dict_ver
        );
        self.engine
            .dicts
            .insert(
                DictCoordinate::new(self.table_id, self.col_id, self.hdr.dict_ver),
                clone.clone(),
            )
            .await;
        self.dict = Some(clone);
        Ok(())
    }

    /// 64-bit wire form of a typed value, reconciling the value's scale
    /// with the column scale. Overflow saturates to the infinity sentinels;
    /// `rounded` reports dropped precision.
    pub fn encode_value64(&self, v: &Value, rounded: &mut bool) -> i64 {
        *rounded = false;
        if v.is_null() {
            return NULL_VALUE_64;
        }

        if self.ct.is_lookup() && !matches!(v, Value::Int(_) | Value::Decimal(_)) {
            let bytes = v.as_bytes().unwrap();
            let dict = self.dict.as_ref().expect("dictionary not materialized");
            return match dict.encoded_value(&bytes) {
                Some(code) => code as i64,
                None => NULL_VALUE_32 as i64,
            };
        }

        if self.ct.is_date_time() {
            return match v {
                Value::Date(d) => d.code(),
                Value::Timestamp(t) => t.code(),
                Value::Int(i) => *i,
                other => panic!("cannot encode {:?} into a date-time column", other),
            };
        }

        assert_eq!(self.pack_kind, PackKind::Int, "pack type must be numeric");

        // source value and its scale
        let (vv, vp, is_real) = match v {
            Value::Int(i) => (*i, 0u32, false),
            Value::Decimal(d) => {
                let mantissa = d.mantissa();
                let clamped = if mantissa > PLUS_INF_64 as i128 {
                    PLUS_INF_64
                } else if mantissa < MINUS_INF_64 as i128 {
                    MINUS_INF_64
                } else {
                    mantissa as i64
                };
                (clamped, d.scale(), false)
            }
            Value::Real(d) => (d.to_bits() as i64, 0, true),
            other => panic!("cannot encode {:?} into a numeric column", other),
        };

        if self.ct.is_real() {
            if is_real {
                return vv; // already stored as a double
            }
            let res = vv as f64 / pow10_f(vp);
            return res.to_bits() as i64;
        }

        if is_real {
            // double into an integer/decimal column
            let vd = f64::from_bits(vv as u64) * pow10_f(self.ct.scale as u32);
            if vd > PLUS_INF_64 as f64 {
                return PLUS_INF_64;
            }
            if vd < MINUS_INF_64 as f64 {
                return MINUS_INF_64;
            }
            let res = vd as i64;
            if (vd - res as f64).abs() > 0.01 {
                // ignore errors two digits below the declared precision
                *rounded = true;
            }
            return res;
        }

        let mut vv = vv;
        let mut vp = vp;
        let dplaces = self.ct.scale as u32;
        while vp < dplaces {
            if vv < MINUS_INF_64 / 10 {
                return MINUS_INF_64;
            }
            if vv > PLUS_INF_64 / 10 {
                return PLUS_INF_64;
            }
            vv *= 10;
            vp += 1;
        }
        while vp > dplaces {
            if vv % 10 != 0 {
                *rounded = true;
            }
            vv /= 10;
            vp -= 1;
        }
        vv
    }

    // --- append ---

    /// Allocate a fresh DPN when the column is empty or the last pack is
    /// full; otherwise shadow the last pack for writing.
    async fn prepare_pack_for_load(&mut self) -> StorageResult<()> {
        let tx = self.expect_writer();
        let last_full = self
            .idx
            .last()
            .map(|pi| self.share.dpn(*pi).nr() as u64 == self.share.pack_rows());
        match last_full {
            None | Some(true) => {
                let pos = self.share.alloc_dpn(tx, None)?;
                self.idx.push(pos);
            }
            Some(false) => {
                self.copy_pack_for_write(self.idx.len() - 1).await?;
            }
        }
        Ok(())
    }

    /// Append a batch of values to the column tail, splitting it at pack
    /// boundaries.
    pub async fn load_data(&mut self, batch: &ValueBatch) -> StorageResult<()> {
        self.expect_writer();
        if batch.is_empty() {
            return Ok(());
        }
        self.no_change = false;

        let pack_rows = self.share.pack_rows();
        let mut start = 0;
        while start < batch.len() {
            self.prepare_pack_for_load().await?;
            let pi = self.idx.len() - 1;
            let share = Arc::clone(&self.share);
            let dpn = share.dpn(self.idx[pi]);

            let room = (pack_rows - dpn.nr() as u64) as usize;
            let end = batch.len().min(start + room);
            let chunk = batch.slice(start..end);
            match self.pack_kind {
                PackKind::Int => self.load_data_pack_n(pi, &chunk).await?,
                PackKind::Str => self.load_data_pack_s(pi, &chunk).await?,
            }

            let dpn = share.dpn(self.idx[pi]);
            if !dpn.trivial() {
                dpn.pack().expect("pack not materialized").save()?;
            }

            self.hdr.nr += chunk.len() as u64;
            if self.ct.nullable {
                self.hdr.nn += chunk.num_nulls() as u64;
            }
            self.hdr.natural_size += chunk.summed_size();
            start = end;
        }
        Ok(())
    }

    async fn load_data_pack_n(&mut self, pi: usize, batch: &ValueBatch) -> StorageResult<()> {
        // not-null columns replace incoming nulls with a filler value: the
        // dictionary code of the empty string for lookup columns, else zero
        let filler: Option<u64> = if !self.ct.nullable {
            Some(if self.ct.is_string() {
                self.encode_value_t(Some(b""), true).await? as i64 as u64
            } else if self.ct.is_real() {
                0f64.to_bits()
            } else {
                0
            })
        } else {
            None
        };

        let share = Arc::clone(&self.share);
        let dpn = share.dpn(self.idx[pi]);
        let load_values = batch.len() as u32;
        let load_nulls = if filler.is_some() {
            0
        } else {
            batch.num_nulls() as u32
        };

        // nulls only
        if load_nulls == load_values && (dpn.nr() == 0 || dpn.null_only()) {
            dpn.set_nr(dpn.nr() + load_values);
            dpn.set_nn(dpn.nn() + load_values);
            return Ok(());
        }

        // a batch with no effective value (nulls into a mixed pack) can
        // never keep the pack uniform; it only extends the null bitmap
        let is_real = self.ct.is_real();
        let uniform = if !is_real {
            match batch.int_stats(filler.map(|w| w as i64)) {
                None => false,
                Some(stats) => {
                    let keeps_uniform = dpn.nn() + load_nulls == 0
                        && stats.min == stats.max
                        && (dpn.nr() == 0
                            || (dpn.min_i() == stats.min && dpn.max_i() == stats.max));
                    if keeps_uniform {
                        dpn.set_min_i(stats.min);
                        dpn.set_max_i(stats.max);
                        dpn.set_sum_i(dpn.sum_i().wrapping_add(stats.sum));
                        dpn.set_nr(dpn.nr() + load_values);
                    }
                    keeps_uniform
                }
            }
        } else {
            match batch.real_stats(filler.map(f64::from_bits)) {
                None => false,
                Some(stats) => {
                    let keeps_uniform = dpn.nn() + load_nulls == 0
                        && stats.min.to_bits() == stats.max.to_bits()
                        && (dpn.nr() == 0
                            || (dpn.min_d().to_bits() == stats.min.to_bits()
                                && dpn.max_d().to_bits() == stats.max.to_bits()));
                    if keeps_uniform {
                        dpn.set_min_d(stats.min);
                        dpn.set_max_d(stats.max);
                        dpn.set_sum_d(dpn.sum_d() + stats.sum);
                        dpn.set_nr(dpn.nr() + load_values);
                    }
                    keeps_uniform
                }
            }
        };

        if !uniform {
            // materialize the so-far-trivial pack, then load the batch
            if dpn.pack().is_none() {
                let pack = self.fetch_pack(self.pack_coord(pi)).await?;
                pack.lock();
                // no synchronization needed: the DPN is local
                dpn.install_pack(pack);
            }
            dpn.pack().unwrap().load_values(batch, filler);
        }

        // widen the column-level statistics
        if batch.num_nulls() != batch.len() {
            if self.hdr.nr == 0 {
                self.hdr.min = dpn.min_i();
                self.hdr.max = dpn.max_i();
            } else if !is_real {
                self.hdr.min = self.hdr.min.min(dpn.min_i());
                self.hdr.max = self.hdr.max.max(dpn.max_i());
            } else {
                if f64::from_bits(self.hdr.min as u64) > dpn.min_d() {
                    self.hdr.min = dpn.min_i();
                }
                if f64::from_bits(self.hdr.max as u64) < dpn.max_d() {
                    self.hdr.max = dpn.max_i();
                }
            }
        }
        Ok(())
    }

    async fn load_data_pack_s(&mut self, pi: usize, batch: &ValueBatch) -> StorageResult<()> {
        let share = Arc::clone(&self.share);
        let dpn = share.dpn(self.idx[pi]);
        let not_null = !self.ct.nullable;
        let cnt = batch.len() as u32;
        let load_nulls = if not_null { 0 } else { batch.num_nulls() as u32 };

        // uniform (null-only) package
        if load_nulls == cnt && (dpn.nr() == 0 || dpn.null_only()) {
            dpn.set_nr(dpn.nr() + cnt);
            dpn.set_nn(dpn.nn() + cnt);
            return Ok(());
        }

        // new package, or expanding a so-far-null one
        if dpn.pack().is_none() {
            let pack = self.fetch_pack(self.pack_coord(pi)).await?;
            pack.lock();
            dpn.install_pack(pack);
        }
        dpn.pack()
            .unwrap()
            .load_values(batch, not_null.then_some(0));
        Ok(())
    }

    // --- point update ---

    /// Update one row in place (copy-on-write on the pack and, for lookup
    /// columns, the dictionary). Duplicate-key violations from the unique
    /// index abort this update but leave the transaction usable.
    pub async fn update_data(&mut self, row: u64, value: Value) -> StorageResult<()> {
        self.expect_writer();
        self.no_change = false;

        let pn = self.row2pack(row);
        self.lock_pack_for_use(pn).await?;
        let result = self.update_data_inner(pn, row, value).await;
        self.unlock_pack_from_use(pn);
        result
    }

    async fn update_data_inner(&mut self, pn: usize, row: u64, value: Value) -> StorageResult<()> {
        // primary-key enforcement is delegated to the index subsystem
        self.update_if_index(row, &value).await?;

        self.copy_pack_for_write(pn).await?;

        let share = Arc::clone(&self.share);
        let dpn = share.dpn(self.idx[pn]);
        let nn_before = dpn.nn();
        let offset = self.row2offset(row);

        if self.pack_kind == PackKind::Str {
            let bytes = match &value {
                Value::Null => None,
                other => other.as_bytes(),
            };
            dpn.pack()
                .expect("pack not materialized")
                .update_value_str(offset, bytes);
        } else {
            let word: Option<u64> = if value.is_null() {
                None
            } else if self.ct.is_lookup() {
                let bytes = value.as_bytes().unwrap();
                let code = self.encode_value_t(Some(&bytes), true).await?;
                Some(code as i64 as u64)
            } else {
                let mut rounded = false;
                Some(self.encode_value64(&value, &mut rounded) as u64)
            };
            dpn.pack()
                .expect("pack not materialized")
                .update_value_int(offset, word);
        }
        dpn.set_synced(false);

        // fold the pack's null delta into the column counter
        self.hdr.nn = self.hdr.nn + dpn.nn() as u64 - nn_before as u64;

        if self.pack_kind == PackKind::Int {
            // extend the column range directly, or rescan all packs
            if dpn.min_i() < self.hdr.min {
                self.hdr.min = dpn.min_i();
            } else {
                self.hdr.min = i64::MAX;
                for i in 0..self.idx.len() {
                    let d = share.dpn(self.idx[i]);
                    if !d.null_only() {
                        self.hdr.min = self.hdr.min.min(d.min_i());
                    }
                }
            }
            if dpn.max_i() > self.hdr.max {
                self.hdr.max = dpn.max_i();
            } else {
                self.hdr.max = i64::MIN;
                for i in 0..self.idx.len() {
                    let d = share.dpn(self.idx[i]);
                    if !d.null_only() {
                        self.hdr.max = self.hdr.max.max(d.max_i());
                    }
                }
            }
        }
        Ok(())
    }

    async fn update_if_index(&mut self, row: u64, value: &Value) -> StorageResult<()> {
        let Some(index) = self.engine.table_index(self.table_id) else {
            return Ok(());
        };
        if !index.key_columns().contains(&self.col_id) {
            return Ok(());
        }
        let Some(new_bytes) = value.as_bytes() else {
            return Err(TracedStorageError::decode(
                "primary key does not support null",
            ));
        };

        if self.pack_kind == PackKind::Str {
            let old = self.get_value_string(row).unwrap_or_default();
            index.update_index(&new_bytes, &old, row)?;
        } else {
            let mut rounded = false;
            let new_v = self.encode_value64(value, &mut rounded);
            let old_v = self.get_value_int64(row);
            index.update_index(&new_v.to_le_bytes(), &old_v.to_le_bytes(), row)?;
        }
        Ok(())
    }

    /// Shadow the committed DPN at position `pi` with a local copy owned by
    /// this writer. A cache-resident pack is cloned in memory to avoid the
    /// disk round trip; otherwise the body is fetched under the new
    /// coordinate.
    async fn copy_pack_for_write(&mut self, pi: usize) -> StorageResult<()> {
        let share = Arc::clone(&self.share);
        if share.dpn(self.idx[pi]).is_local() {
            return Ok(());
        }
        let tx = self.expect_writer();

        let old_idx = self.idx[pi];
        let pos = share.alloc_dpn(tx, Some(old_idx))?;
        // update the current view
        self.idx[pi] = pos;
        let dpn = share.dpn(pos);

        let pc_old = PackCoordinate::new(self.table_id, self.col_id, old_idx);
        let pc_new = self.pack_coord(pi);

        let new_pack = if let Some(pack) = self.engine.packs.get(&pc_old).await {
            let cloned = Arc::new(pack.clone_for(pc_new));
            cloned.set_dpn(pos);
            self.engine.packs.insert(pc_new, cloned.clone()).await;
            cloned
        } else {
            self.fetch_pack(pc_new).await?
        };
        new_pack.lock();
        // the writer holds the initial reference
        dpn.install_pack(new_pack);
        Ok(())
    }

    // --- rough filters ---

    async fn dirty_or_shared_filter(
        &self,
        kind: FilterKind,
    ) -> StorageResult<Arc<RoughFilter>> {
        if self.tx.is_some() {
            // dirty handle bound to the column's filter directory at the
            // current version
            let filter = RoughFilter::open(self.share.path(), kind, self.version).await?;
            Ok(Arc::new(filter))
        } else {
            self.fetch_filter(FilterCoordinate::new(
                self.table_id,
                self.col_id,
                kind,
                self.version,
            ))
            .await
        }
    }

    pub async fn get_filter_hist(&mut self) -> StorageResult<Option<Arc<RoughFilter>>> {
        if !self.engine.options().enable_filters || !self.share.has_filter_hist {
            return Ok(None);
        }
        if self.filter_hist.is_none() {
            self.filter_hist = Some(self.dirty_or_shared_filter(FilterKind::Hist).await?);
        }
        Ok(self.filter_hist.clone())
    }

    pub async fn get_filter_cmap(&mut self) -> StorageResult<Option<Arc<RoughFilter>>> {
        if !self.engine.options().enable_filters || !self.share.has_filter_cmap {
            return Ok(None);
        }
        if self.filter_cmap.is_none() {
            self.filter_cmap = Some(self.dirty_or_shared_filter(FilterKind::CMap).await?);
        }
        Ok(self.filter_cmap.clone())
    }

    pub async fn get_filter_bloom(&mut self) -> StorageResult<Option<Arc<RoughFilter>>> {
        if !self.engine.options().enable_filters || !self.share.has_filter_bloom {
            return Ok(None);
        }
        if self.filter_bloom.is_none() {
            self.filter_bloom = Some(self.dirty_or_shared_filter(FilterKind::Bloom).await?);
        }
        Ok(self.filter_bloom.clone())
    }

    async fn update_rsi_hist(&mut self, pi: usize) -> StorageResult<()> {
        if self.pack_kind != PackKind::Int || self.hdr.nr == 0 {
            return Ok(());
        }
        let Some(filter) = self.get_filter_hist().await? else {
            return Ok(());
        };
        let share = Arc::clone(&self.share);
        let dpn = share.dpn(self.idx[pi]);
        if let Some(pack) = dpn.pack() {
            filter
                .as_hist()
                .unwrap()
                .update(pi, dpn, pack, self.ct.is_real());
        }
        Ok(())
    }

    async fn update_rsi_cmap(&mut self, pi: usize) -> StorageResult<()> {
        if self.pack_kind != PackKind::Str || self.hdr.nr == 0 || self.ct.unicode {
            return Ok(());
        }
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly {
            return Ok(());
        }
        let Some(filter) = self.get_filter_cmap().await? else {
            return Ok(());
        };
        let share = Arc::clone(&self.share);
        let dpn = share.dpn(self.idx[pi]);
        if let Some(pack) = dpn.pack() {
            filter.as_cmap().unwrap().update(pi, dpn, pack);
        }
        Ok(())
    }

    async fn update_rsi_bloom(&mut self, pi: usize) -> StorageResult<()> {
        if self.hdr.nr == 0 {
            return Ok(());
        }
        if self.pack_ontological_status(pi) == PackOntologicalStatus::NullsOnly {
            return Ok(());
        }
        let Some(filter) = self.get_filter_bloom().await? else {
            return Ok(());
        };
        let share = Arc::clone(&self.share);
        let dpn = share.dpn(self.idx[pi]);
        if let Some(pack) = dpn.pack() {
            filter.as_bloom().unwrap().update(pi, dpn, pack);
        }
        Ok(())
    }

    /// Refresh every applicable rough filter for pack `pi`.
    pub async fn refresh_filter(&mut self, pi: usize) -> StorageResult<()> {
        self.update_rsi_bloom(pi).await?;
        self.update_rsi_cmap(pi).await?;
        self.update_rsi_hist(pi).await?;
        Ok(())
    }

    /// Persist the dirty filter handles under the writer's xid and drop
    /// them.
    async fn save_filters(&mut self) -> StorageResult<()> {
        let tx = self.expect_writer();
        for filter in [
            self.filter_hist.take(),
            self.filter_cmap.take(),
            self.filter_bloom.take(),
        ]
        .into_iter()
        .flatten()
        {
            filter.save(self.share.path(), tx).await?;
        }
        Ok(())
    }

    // --- persist / finalize ---

    /// Save all modified state (packs, filters, dictionary, DPNs) and write
    /// the new version file under the writer's xid. This is the prepare
    /// phase of commit. Returns `false` when the transaction changed
    /// nothing.
    pub async fn save_version(&mut self) -> StorageResult<bool> {
        let tx = self.expect_writer();
        let share = Arc::clone(&self.share);

        for i in 0..self.idx.len() {
            let dpn = share.dpn(self.idx[i]);
            if !dpn.is_local() {
                continue;
            }
            self.no_change = false;
            self.refresh_filter(i).await?;

            let dpn = share.dpn(self.idx[i]);
            if dpn.trivial() || dpn.synced() {
                // trivial, or already saved to disk
                if let Some(pack) = dpn.take_pack() {
                    pack.unlock();
                    self.engine.packs.invalidate(&self.pack_coord(i)).await;
                }
                continue;
            }

            {
                let pack = dpn.pack().expect("local pack not materialized");
                pack.save()?;
                // now the cache is free to release it
                pack.unlock();
            }
            drop(dpn.take_pack());
        }

        if self.no_change {
            return Ok(false);
        }

        // truncated table?
        if !self.idx.is_empty() {
            self.save_filters().await?;

            if let Some(dict) = &self.dict {
                if dict.changed() {
                    dict.save(layout::path_of_dict(share.path(), self.hdr.dict_ver))
                        .await?;
                }
            }

            self.hdr.np = self.idx.len() as u32;
            self.hdr.compressed_size = self
                .idx
                .iter()
                .map(|pi| {
                    let dpn = share.dpn(*pi);
                    if dpn.trivial() {
                        0
                    } else {
                        dpn.len() as u64
                    }
                })
                .sum1()
                .unwrap_or(0);
        }

        share.save_dpns()?;

        let path = layout::path_of_version(share.path(), tx);
        tokio::fs::write(&path, self.hdr.encode_version_file(&self.idx)).await?;
        if self.engine.options().sync_buffers {
            share.sync()?;
            let f = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
            f.sync_data().await?;
        }
        Ok(true)
    }

    /// Finalize the commit: local DPNs become committed, shadowed bases get
    /// their `xmax` stamped, and the previous version's files are scheduled
    /// for removal.
    pub async fn post_commit(&mut self) -> StorageResult<()> {
        if !self.no_change {
            let tx = self.expect_writer();
            self.engine.note_commit(tx);
            let share = Arc::clone(&self.share);

            for pi in &self.idx {
                let dpn = share.dpn(*pi);
                if dpn.is_local() {
                    dpn.set_local(false);
                    if dpn.has_base() {
                        share.dpn(dpn.base()).set_xmax(self.engine.max_xid());
                    }
                }
            }
            share.save_dpns()?;

            // the published dictionary version is copy-on-write from now on
            if let Some(dict) = &self.dict {
                dict.mark_saved();
            }

            let dir = share.path();
            self.engine
                .defer_remove(layout::path_of_version(dir, self.version), self.table_id);
            if share.has_filter_bloom {
                self.engine.defer_remove(
                    layout::path_of_filter(dir, FilterKind::Bloom, self.version),
                    self.table_id,
                );
            }
            if share.has_filter_cmap {
                self.engine.defer_remove(
                    layout::path_of_filter(dir, FilterKind::CMap, self.version),
                    self.table_id,
                );
            }
            if share.has_filter_hist {
                self.engine.defer_remove(
                    layout::path_of_filter(dir, FilterKind::Hist, self.version),
                    self.table_id,
                );
            }

            info!(
                "column {}/{}: version {} -> {}",
                self.table_id, self.col_id, self.version, tx
            );
            self.version = tx;
        }
        self.tx = None;
        Ok(())
    }

    /// Drop every local pack object and reset the local DPNs in place.
    pub async fn rollback(&mut self) {
        let share = Arc::clone(&self.share);
        for i in 0..self.idx.len() {
            let dpn = share.dpn(self.idx[i]);
            if dpn.is_local() {
                self.engine.packs.invalidate(&self.pack_coord(i)).await;
                if let Some(pack) = dpn.take_pack() {
                    pack.unlock();
                }
                dpn.reset();
            }
        }
        self.tx = None;
    }

    /// Reset the column to empty; lookup columns are reseeded with a fresh
    /// dictionary at version 1.
    pub async fn truncate(&mut self) -> StorageResult<()> {
        self.expect_writer();
        self.no_change = false;
        self.hdr = ColumnHeader::default();
        self.idx.clear();
        if self.ct.is_lookup() {
            self.hdr.dict_ver = 1;
            let dict = Arc::new(Dict::new(self.ct.precision));
            dict.save(layout::path_of_dict(self.share.path(), 1)).await?;
            self.engine
                .dicts
                .insert(
                    DictCoordinate::new(self.table_id, self.col_id, 1),
                    dict.clone(),
                )
                .await;
            self.dict = Some(dict);
        } else {
            self.dict = None;
        }
        Ok(())
    }

    // --- filtered aggregates ---

    /// Minimum string value among the rows selected by `f`.
    pub async fn min_s(&mut self, f: &RowFilter) -> StorageResult<Option<Bytes>> {
        self.filtered_extreme(f, false).await
    }

    /// Maximum string value among the rows selected by `f`.
    pub async fn max_s(&mut self, f: &RowFilter) -> StorageResult<Option<Bytes>> {
        self.filtered_extreme(f, true).await
    }

    async fn filtered_extreme(
        &mut self,
        f: &RowFilter,
        want_max: bool,
    ) -> StorageResult<Option<Bytes>> {
        if f.is_empty() || !self.ct.is_string() || self.hdr.nr == 0 || self.hdr.nr == self.hdr.nn
        {
            return Ok(None);
        }
        if f.num_blocks() != self.idx.len() {
            return Err(TracedStorageError::decode(
                "data integrity error, query cannot be evaluated (min_s/max_s)",
            ));
        }
        self.load_pack_info().await?;

        let mut best: Option<Bytes> = None;
        let mut better = |candidate: Bytes, best: &mut Option<Bytes>| match best {
            None => *best = Some(candidate),
            Some(cur) => {
                let wins = if want_max {
                    candidate[..] > cur[..]
                } else {
                    candidate[..] < cur[..]
                };
                if wins {
                    *best = Some(candidate);
                }
            }
        };

        for b in 0..self.idx.len() {
            if !f.has_ones_in_block(b) {
                continue;
            }
            let status = self.pack_ontological_status(b);
            if status == PackOntologicalStatus::NullsOnly {
                continue;
            }

            // uniform lookup packs decode straight from the statistics
            if self.pack_kind == PackKind::Int
                && (status == PackOntologicalStatus::Uniform
                    || (status == PackOntologicalStatus::UniformAndNulls && f.is_full_block(b)))
            {
                let code = self.dpn(b).min_i();
                if let Some(v) = self.decode_value_s(code) {
                    better(v, &mut best);
                }
                continue;
            }

            self.lock_pack_for_use(b).await?;
            {
                let share = Arc::clone(&self.share);
                let dpn = share.dpn(self.idx[b]);
                if let Some(pack) = dpn.pack() {
                    for offset in f.ones_in_block(b) {
                        if offset >= dpn.nr() as usize || pack.is_null(offset) {
                            continue;
                        }
                        let candidate = if self.pack_kind == PackKind::Str {
                            Some(pack.get_value_binary(offset))
                        } else {
                            self.decode_value_s(pack.get_val_int(offset))
                        };
                        if let Some(v) = candidate {
                            better(v, &mut best);
                        }
                    }
                }
            }
            self.unlock_pack_from_use(b);
        }
        Ok(best)
    }
}
