// Copyright 2024 Packlight Project Authors. Licensed under Apache-2.0.

//! End-to-end tests of the attribute controller: append/read, uniform pack
//! widening, dictionary copy-on-write, commit/defer, lock contention,
//! duplicate keys and rollback.

use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use crate::batch::ValueBatch;
use crate::engine::{Engine, UniqueIndex};
use crate::error::{StorageError, StorageResult, TracedStorageError};
use crate::meta::ColumnMeta;
use crate::options::StorageOptions;
use crate::row_filter::RowFilter;
use crate::types::{
    ColumnKind, ColumnType, Date, Timestamp, TxId, Value, MINUS_INF_64, NULL_VALUE_32,
    NULL_VALUE_64, PLUS_INF_64,
};
use crate::{Attribute, PackOntologicalStatus};

struct Fixture {
    _dir: TempDir,
    engine: Arc<Engine>,
    share: Arc<crate::ColumnShare>,
}

async fn setup(ct: ColumnType, pss: u8, no_rows: u64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let col_dir = dir.path().join("1_1");
    let options = StorageOptions::default_for_test(dir.path());
    let meta = ColumnMeta::new(pss, ct);
    Attribute::create(&col_dir, &meta, no_rows, &options)
        .await
        .unwrap();
    let engine = Engine::new(options);
    let share = crate::ColumnShare::open(&col_dir, 1, 1).await.unwrap();
    Fixture {
        _dir: dir,
        engine,
        share,
    }
}

impl Fixture {
    async fn writer(&self, xid: u64, from: TxId) -> Attribute {
        Attribute::open(
            self.engine.clone(),
            self.share.clone(),
            Some(TxId::from(xid)),
            from,
        )
        .await
        .unwrap()
    }

    async fn reader(&self, at: TxId) -> Attribute {
        self.try_reader(at).await.unwrap()
    }

    async fn try_reader(&self, at: TxId) -> StorageResult<Attribute> {
        Attribute::open(self.engine.clone(), self.share.clone(), None, at).await
    }
}

async fn read_int(attr: &Attribute, row: u64) -> i64 {
    let pn = attr.row2pack(row);
    attr.lock_pack_for_use(pn).await.unwrap();
    let v = attr.get_value_int64(row);
    attr.unlock_pack_from_use(pn);
    v
}

async fn read_string(attr: &Attribute, row: u64) -> Option<Bytes> {
    let pn = attr.row2pack(row);
    attr.lock_pack_for_use(pn).await.unwrap();
    let v = attr.get_value_string(row);
    attr.unlock_pack_from_use(pn);
    v
}

fn int_column() -> ColumnType {
    ColumnType::new(ColumnKind::Int).not_null().with_precision(11)
}

fn lookup_column() -> ColumnType {
    ColumnType::new(ColumnKind::Varchar)
        .with_precision(16)
        .lookup()
}

#[tokio::test]
async fn test_s1_append_and_read() {
    let fx = setup(int_column(), 16, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;

    attr.load_data(&ValueBatch::from_ints(1..=65536)).await.unwrap();
    attr.load_data(&ValueBatch::from_ints(65537..=70000))
        .await
        .unwrap();
    assert!(attr.save_version().await.unwrap());
    attr.post_commit().await.unwrap();

    let attr = fx.reader(TxId::from(1)).await;
    assert_eq!(attr.header().np, 2);
    assert_eq!(attr.num_of_obj(), 70000);
    assert_eq!(fx.share.dpn(attr.pack_index(0)).nr(), 65536);
    assert_eq!(fx.share.dpn(attr.pack_index(1)).nr(), 4464);
    assert_eq!(attr.header().min, 1);
    assert_eq!(attr.header().max, 70000);

    // row address decomposition: row 65537 is pack 1, offset 1
    assert_eq!(read_int(&attr, 0).await, 1);
    assert_eq!(read_int(&attr, 1).await, 2);
    assert_eq!(read_int(&attr, 65535).await, 65536);
    assert_eq!(read_int(&attr, 65537).await, 65538);
    assert_eq!(read_int(&attr, 69999).await, 70000);
}

#[tokio::test]
async fn test_pack_boundaries_over_many_loads() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;

    for chunk in [5u32, 7, 9] {
        attr.load_data(&ValueBatch::from_ints((0..chunk).map(i64::from)))
            .await
            .unwrap();
    }
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let attr = fx.reader(TxId::from(1)).await;
    assert_eq!(attr.num_of_obj(), 21);
    assert_eq!(attr.header().np, 2);
    // every pack but the last is full
    assert_eq!(fx.share.dpn(attr.pack_index(0)).nr(), 16);
    assert_eq!(fx.share.dpn(attr.pack_index(1)).nr(), 5);
}

#[tokio::test]
async fn test_s2_uniform_then_widen() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;

    attr.load_data(&ValueBatch::from_ints([7, 7, 7])).await.unwrap();
    assert_eq!(
        attr.pack_ontological_status(0),
        PackOntologicalStatus::Uniform
    );
    assert!(fx.share.dpn(attr.pack_index(0)).trivial());
    assert_eq!(attr.get_value_int64(1), 7);

    attr.load_data(&ValueBatch::from_ints([7, 8])).await.unwrap();
    assert_eq!(
        attr.pack_ontological_status(0),
        PackOntologicalStatus::Normal
    );
    assert_eq!(fx.share.dpn(attr.pack_index(0)).max_i(), 8);
    assert_eq!(fx.share.dpn(attr.pack_index(0)).nr(), 5);
    assert_eq!(attr.get_value_int64(4), 8);
    assert_eq!(attr.get_sum(0), (36, true));
}

#[tokio::test]
async fn test_trivial_uniform_read_without_body() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_ints([7, 7, 7])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let attr = fx.reader(TxId::from(1)).await;
    // locking a committed trivial pack is a no-op; the value comes from
    // the statistics
    assert_eq!(read_int(&attr, 2).await, 7);
    assert_eq!(attr.get_min_int64(0), 7);
    assert_eq!(attr.get_max_int64(0), 7);
}

#[tokio::test]
async fn test_s3_dictionary_copy_on_write() {
    let fx = setup(lookup_column(), 4, 0).await;

    // seed the dictionary with "a" in the first transaction
    let mut attr = fx.writer(1, TxId::ZERO).await;
    let code = attr.encode_value_t(Some(b"a"), true).await.unwrap();
    assert_eq!(code, 1);
    let seeded_ver = attr.header().dict_ver;
    attr.load_data(&ValueBatch::from_ints([code as i64])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    // a second writer updates row 0 to a brand-new value
    let mut attr = fx.writer(2, TxId::from(1)).await;
    attr.update_data(0, Value::string("b")).await.unwrap();
    assert_eq!(attr.header().dict_ver, seeded_ver + 1);
    assert_eq!(attr.get_value_int64(0), 2, "code allocated for \"b\"");
    attr.save_version().await.unwrap();

    // a concurrent reader at the previous version still sees the old
    // dictionary and the old value
    let reader = fx.reader(TxId::from(1)).await;
    assert_eq!(reader.header().dict_ver, seeded_ver);
    assert_eq!(read_int(&reader, 0).await, 1);
    assert_eq!(reader.decode_value_s(1).unwrap(), Bytes::from_static(b"a"));
    assert_eq!(reader.decode_value_s(2), None, "new code not visible here");

    attr.post_commit().await.unwrap();
    let reader = fx.reader(TxId::from(2)).await;
    let code = read_int(&reader, 0).await;
    assert_eq!(reader.decode_value_s(code).unwrap(), Bytes::from_static(b"b"));
}

#[tokio::test]
async fn test_s4_commit_defers_previous_version_files() {
    let fx = setup(int_column(), 4, 0).await;

    let mut attr = fx.writer(3, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_ints([1, 2])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();
    fx.engine.do_vacuum().await.unwrap();

    let mut attr = fx.writer(5, TxId::from(3)).await;
    attr.load_data(&ValueBatch::from_ints([3])).await.unwrap();
    assert!(attr.save_version().await.unwrap());
    attr.post_commit().await.unwrap();
    assert_eq!(attr.version(), TxId::from(5));

    let pending = fx.engine.pending_removals();
    let v3 = TxId::from(3).to_string();
    // the version file plus one file per filter kind
    assert_eq!(pending.len(), 4);
    assert!(pending.iter().all(|p| p.ends_with(&v3)));

    let version_path = crate::layout::path_of_version(fx.share.path(), TxId::from(3));
    assert!(version_path.exists());
    fx.engine.do_vacuum().await.unwrap();
    assert!(!version_path.exists());
    assert!(fx.engine.pending_removals().is_empty());

    // the new version remains readable
    let attr = fx.reader(TxId::from(5)).await;
    assert_eq!(attr.num_of_obj(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_s5_lock_contention_loads_once() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_ints([1, 2, 3])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let attr = Arc::new(fx.reader(TxId::from(1)).await);
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let attr = attr.clone();
        tasks.push(tokio::spawn(async move {
            attr.lock_pack_for_use(0).await.unwrap();
            attr.get_value_int64(1)
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 2);
    }

    let dpn = fx.share.dpn(attr.pack_index(0));
    assert_eq!(dpn.ref_count(), 2, "both callers hold a reference");

    attr.unlock_pack_from_use(0);
    assert_eq!(dpn.ref_count(), 1);
    attr.unlock_pack_from_use(0);
    assert_eq!(dpn.ref_count(), 0);
    assert_eq!(dpn.pack_ptr_raw(), 0, "word back to the unloaded state");
}

struct OneKeyIndex {
    taken: Vec<u8>,
}

impl UniqueIndex for OneKeyIndex {
    fn key_columns(&self) -> Vec<u32> {
        vec![1]
    }

    fn update_index(&self, new_key: &[u8], _old_key: &[u8], _row: u64) -> StorageResult<()> {
        if new_key == self.taken {
            return Err(TracedStorageError::duplicate_key(format!("{:?}", new_key)));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_s6_duplicate_key_aborts_update() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_ints([10, 20, 30])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    fx.engine.register_index(
        1,
        Arc::new(OneKeyIndex {
            taken: 30i64.to_le_bytes().to_vec(),
        }),
    );

    let mut attr = fx.writer(2, TxId::from(1)).await;
    let hdr_before = attr.header().clone();

    let err = attr.update_data(0, Value::Int(30)).await.unwrap_err();
    assert!(matches!(err.source(), StorageError::DuplicateKey(_)));
    assert_eq!(attr.header(), &hdr_before, "counters unchanged");
    assert_eq!(read_int(&attr, 0).await, 10);

    // the transaction stays usable
    attr.update_data(0, Value::Int(40)).await.unwrap();
    assert_eq!(attr.get_value_int64(0), 40);
}

#[tokio::test]
async fn test_copy_on_write_isolation() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_ints([1, 2, 3])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let mut writer = fx.writer(2, TxId::from(1)).await;
    writer.update_data(1, Value::Int(99)).await.unwrap();
    writer.save_version().await.unwrap();

    // a reader at the old version still sees the old value
    let reader = fx.reader(TxId::from(1)).await;
    assert_eq!(read_int(&reader, 1).await, 2);

    writer.post_commit().await.unwrap();

    let reader = fx.reader(TxId::from(2)).await;
    assert_eq!(read_int(&reader, 1).await, 99);
    assert_eq!(reader.header().max, 99);
}

#[tokio::test]
async fn test_rollback_is_total() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_ints([1, 2, 3])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let mut attr = fx.writer(2, TxId::from(1)).await;
    attr.load_data(&ValueBatch::from_ints([4, 5])).await.unwrap();
    attr.update_data(0, Value::Int(7)).await.unwrap();
    attr.rollback().await;

    for i in 0..fx.share.capacity() {
        assert!(!fx.share.dpn(i).is_local(), "local DPN {} after rollback", i);
    }
    // version 2 was never published
    let err = fx.try_reader(TxId::from(2)).await.err().unwrap();
    assert!(matches!(err.source(), StorageError::NotFound(..)));

    let reader = fx.reader(TxId::from(1)).await;
    assert_eq!(reader.num_of_obj(), 3);
    assert_eq!(read_int(&reader, 0).await, 1);
}

#[tokio::test]
async fn test_nulls_and_sentinels() {
    let fx = setup(ColumnType::new(ColumnKind::Int).with_precision(11), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;

    let mut batch = ValueBatch::from_ints([5]);
    batch.nulls(2);
    attr.load_data(&batch).await.unwrap();

    assert_eq!(attr.num_of_obj(), 3);
    assert_eq!(attr.num_of_nulls(None), 2);
    assert_eq!(attr.num_of_nulls(Some(0)), 2);
    assert!(attr.is_null(1));
    assert_eq!(attr.get_value_int64(1), NULL_VALUE_64);
    assert_eq!(attr.get_value_int64(0), 5);
    assert_eq!(attr.get_value(1, false), Value::Null);

    // a nulls-only pack answers with the infinity sentinels
    let mut batch = ValueBatch::Int(vec![]);
    batch.nulls(16);
    attr.load_data(&batch).await.unwrap();
    assert_eq!(
        attr.pack_ontological_status(1),
        PackOntologicalStatus::NullsOnly
    );
    assert_eq!(attr.get_min_int64(1), MINUS_INF_64);
    assert_eq!(attr.get_max_int64(1), PLUS_INF_64);
    assert_eq!(attr.get_sum(1).0, NULL_VALUE_64);
}

#[tokio::test]
async fn test_create_with_existing_rows() {
    let fx = setup(ColumnType::new(ColumnKind::Int), 4, 40).await;
    let attr = fx.reader(TxId::ZERO).await;
    assert_eq!(attr.num_of_obj(), 40);
    assert_eq!(attr.num_of_nulls(None), 40);
    assert_eq!(attr.header().np, 3);
    assert_eq!(fx.share.dpn(attr.pack_index(2)).nr(), 8, "last pack partial");
    assert!(fx.share.dpn(attr.pack_index(0)).null_only());
    assert_eq!(read_int(&attr, 17).await, NULL_VALUE_64);
}

#[tokio::test]
async fn test_string_pack_stats_and_filtered_extremes() {
    let fx = setup(ColumnType::new(ColumnKind::Varchar).with_precision(16), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_strings(["pear", "apple", "quince", "peach"]))
        .await
        .unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let mut attr = fx.reader(TxId::from(1)).await;
    assert_eq!(read_string(&attr, 1).await.unwrap(), Bytes::from_static(b"apple"));

    attr.lock_pack_for_use(0).await.unwrap();
    assert_eq!(attr.get_length(2), 6);
    attr.unlock_pack_from_use(0);

    assert_eq!(attr.get_actual_size(0), 20, "total body bytes");
    assert_eq!(attr.get_min_string(0).unwrap(), Bytes::from_static(b"apple"));
    assert_eq!(attr.get_prefix_length(0), 0);

    let full = RowFilter::full(4, 4);
    assert_eq!(
        attr.min_s(&full).await.unwrap().unwrap(),
        Bytes::from_static(b"apple")
    );
    assert_eq!(
        attr.max_s(&full).await.unwrap().unwrap(),
        Bytes::from_static(b"quince")
    );

    // restrict the filter to two rows
    let mut partial = RowFilter::new(4, 4);
    partial.set(0, true);
    partial.set(3, true);
    assert_eq!(
        attr.min_s(&partial).await.unwrap().unwrap(),
        Bytes::from_static(b"peach")
    );
    assert_eq!(
        attr.max_s(&partial).await.unwrap().unwrap(),
        Bytes::from_static(b"pear")
    );
}

#[tokio::test]
async fn test_filters_persisted_and_consulted() {
    let fx = setup(int_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    attr.load_data(&ValueBatch::from_ints([10, 20, 30, 40, 50]))
        .await
        .unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let mut reader = fx.reader(TxId::from(1)).await;
    let bloom = reader.get_filter_bloom().await.unwrap().unwrap();
    let bloom = bloom.as_bloom().unwrap();
    for v in [10i64, 20, 30, 40, 50] {
        assert!(bloom.may_contain_int(0, v), "false negative for {}", v);
    }

    let hist = reader.get_filter_hist().await.unwrap().unwrap();
    let hist = hist.as_hist().unwrap();
    let dpn = fx.share.dpn(reader.pack_index(0));
    assert!(hist.may_contain_int(0, 30, dpn));
    assert!(!hist.may_contain_int(0, 60, dpn), "out of range");
}

#[tokio::test]
async fn test_encode_scale_reconciliation() {
    let fx = setup(
        ColumnType::new(ColumnKind::Decimal)
            .with_precision(10)
            .with_scale(2),
        4,
        0,
    )
    .await;
    let attr = fx.reader(TxId::ZERO).await;

    let mut rounded = false;
    assert_eq!(attr.encode_value64(&Value::Int(5), &mut rounded), 500);
    assert!(!rounded);

    let d: rust_decimal::Decimal = "1.234".parse().unwrap();
    assert_eq!(attr.encode_value64(&Value::Decimal(d), &mut rounded), 123);
    assert!(rounded, "dropped digit must be reported");

    assert_eq!(attr.encode_value64(&Value::Real(2.5), &mut rounded), 250);
    assert_eq!(
        attr.encode_value64(&Value::Int(PLUS_INF_64 / 5), &mut rounded),
        PLUS_INF_64,
        "scale-up saturates"
    );
    assert_eq!(attr.encode_value64(&Value::Null, &mut rounded), NULL_VALUE_64);
}

#[tokio::test]
async fn test_decode_roundtrip() {
    let fx = setup(
        ColumnType::new(ColumnKind::Decimal)
            .with_precision(10)
            .with_scale(2),
        4,
        0,
    )
    .await;
    let mut attr = fx.writer(1, TxId::ZERO).await;

    let code = attr.encode_value_t(Some(b"3.14"), false).await.unwrap();
    assert_eq!(code, 314);
    assert_eq!(
        attr.decode_value_s(code as i64).unwrap(),
        Bytes::from_static(b"3.14")
    );

    let date_fx = setup(ColumnType::new(ColumnKind::Date), 4, 0).await;
    let date_attr = date_fx.reader(TxId::ZERO).await;
    let d = Date::from_ymd(2024, 2, 29).unwrap();
    let mut rounded = false;
    let code = date_attr.encode_value64(&Value::Date(d), &mut rounded);
    assert_eq!(
        date_attr.decode_value_s(code).unwrap(),
        Bytes::from_static(b"2024-02-29")
    );
}

#[tokio::test]
async fn test_timestamp_session_zone() {
    let fx = setup(ColumnType::new(ColumnKind::Timestamp), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;

    let ts = Timestamp::from_ymd_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let mut rounded = false;
    let code = attr.encode_value64(&Value::Timestamp(ts), &mut rounded);
    attr.load_data(&ValueBatch::from_ints([code])).await.unwrap();

    assert_eq!(
        attr.decode_value_s(code).unwrap(),
        Bytes::from_static(b"2024-01-01 12:00:00")
    );

    attr.set_session_zone(chrono::FixedOffset::east_opt(8 * 3600).unwrap());
    assert_eq!(
        attr.decode_value_s(code).unwrap(),
        Bytes::from_static(b"2024-01-01 20:00:00")
    );
    match attr.get_value(0, false) {
        Value::Timestamp(t) => assert_eq!(t.to_utc_string(), "2024-01-01 20:00:00"),
        other => panic!("unexpected value {:?}", other),
    }
}

#[tokio::test]
async fn test_truncate_reseeds_dictionary() {
    let fx = setup(lookup_column(), 4, 0).await;
    let mut attr = fx.writer(1, TxId::ZERO).await;
    let code = attr.encode_value_t(Some(b"x"), true).await.unwrap();
    attr.load_data(&ValueBatch::from_ints([code as i64])).await.unwrap();
    attr.save_version().await.unwrap();
    attr.post_commit().await.unwrap();

    let mut attr = fx.writer(2, TxId::from(1)).await;
    attr.truncate().await.unwrap();
    assert_eq!(attr.num_of_obj(), 0);
    assert_eq!(attr.size_of_pack(), 0);
    assert_eq!(attr.header().dict_ver, 1);
    assert_eq!(
        attr.encode_value_t(Some(b"x"), false).await.unwrap(),
        NULL_VALUE_32,
        "fresh dictionary does not know the old values"
    );
    assert!(attr.save_version().await.unwrap());
    attr.post_commit().await.unwrap();

    let reader = fx.reader(TxId::from(2)).await;
    assert_eq!(reader.num_of_obj(), 0);
}

#[tokio::test]
async fn test_missing_version_is_not_found() {
    let fx = setup(int_column(), 4, 0).await;
    let err = fx.try_reader(TxId::from(42)).await.err().unwrap();
    assert!(matches!(err.source(), StorageError::NotFound(..)));
}
