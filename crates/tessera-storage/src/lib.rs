//! Storage manager: schema adoption, guardrails, checkpointing, and
//! WAL-driven recovery over the columnar tables.

pub mod manager;
pub mod name;
pub mod recovery;

pub use manager::{StorageManager, WriteOutcome};
pub use name::CollectionFullName;
pub use recovery::{IndexReplay, RecoveryReport, recover};

#[cfg(test)]
mod tests {
    use tessera_table::Transaction;
    use tessera_types::{
        ColumnDefinition, ComplexLogicalType, DataChunk, LogicalType, Value, VECTOR_CAPACITY,
    };
    use tessera_wal::{WalReader, WalRecord, WalWriter};

    use crate::manager::StorageManager;
    use crate::name::CollectionFullName;
    use crate::recovery::recover;

    fn users() -> CollectionFullName {
        CollectionFullName::new("db", "users")
    }

    fn chunk_of(columns: &[(&str, Vec<Value>)]) -> DataChunk {
        let types: Vec<ComplexLogicalType> = columns
            .iter()
            .map(|(name, values)| {
                let t = values
                    .iter()
                    .find(|v| !v.is_null())
                    .map_or(LogicalType::Na, Value::tag);
                ComplexLogicalType::from(t).with_alias(*name)
            })
            .collect();
        let n = columns.first().map_or(0, |(_, v)| v.len());
        let mut chunk = DataChunk::new(&types, VECTOR_CAPACITY.max(n));
        for row in 0..n {
            let values: Vec<Value> = columns.iter().map(|(_, v)| v[row].clone()).collect();
            chunk.append_row(&values).unwrap();
        }
        chunk
    }

    fn scan_all(manager: &StorageManager, name: &CollectionFullName) -> DataChunk {
        let types = manager.storage_types(name).unwrap();
        let mut out = DataChunk::new(&types, VECTOR_CAPACITY);
        manager
            .storage_scan(name, &mut out, None, usize::MAX, &Transaction::latest())
            .unwrap();
        out
    }

    #[test]
    fn dedup_on_id_rejects_duplicate_chunk() {
        let mut manager = StorageManager::new();
        manager.create_storage(users()).unwrap();

        let first = manager
            .storage_append(
                &users(),
                &chunk_of(&[
                    ("_id", vec![Value::string("a")]),
                    ("x", vec![Value::integer(1)]),
                ]),
                None,
            )
            .unwrap();
        assert_eq!(first.count, 1);

        let second = manager
            .storage_append(
                &users(),
                &chunk_of(&[
                    ("_id", vec![Value::string("a")]),
                    ("x", vec![Value::integer(2)]),
                ]),
                None,
            )
            .unwrap();
        assert_eq!((second.first_row_id, second.count), (0, 0));
        assert_eq!(manager.storage_total_rows(&users()).unwrap(), 1);

        let out = scan_all(&manager, &users());
        assert_eq!(out.cardinality(), 1);
        let x_col = out.column_index("x").unwrap();
        assert_eq!(out.value(x_col, 0).as_i64(), Some(1));
    }

    #[test]
    fn dedup_treats_non_string_ids_by_string_view() {
        let mut manager = StorageManager::new();
        manager.create_storage(users()).unwrap();
        manager
            .storage_append(&users(), &chunk_of(&[("_id", vec![Value::bigint(7)])]), None)
            .unwrap();
        // "7" as a string view collides with bigint 7.
        let out = manager
            .storage_append(
                &users(),
                &chunk_of(&[("_id", vec![Value::string("7")])]),
                None,
            )
            .unwrap();
        assert_eq!(out.count, 0);
    }

    #[test]
    fn not_null_rejects_whole_chunk() {
        let mut manager = StorageManager::new();
        let columns = vec![
            ColumnDefinition::new("_id", LogicalType::BigInt.into()).not_null(),
            ColumnDefinition::new("name", LogicalType::StringLiteral.into()),
        ];
        manager
            .create_storage_with_columns(users(), columns)
            .unwrap();

        let outcome = manager
            .storage_append(
                &users(),
                &chunk_of(&[
                    ("_id", vec![Value::null(), Value::bigint(2)]),
                    ("name", vec![Value::string("a"), Value::string("b")]),
                ]),
                None,
            )
            .unwrap();
        assert_eq!((outcome.first_row_id, outcome.count), (0, 0));
        assert_eq!(manager.storage_total_rows(&users()).unwrap(), 0);
    }

    #[test]
    fn expansion_reorders_fills_defaults_and_drops_extras() {
        let mut manager = StorageManager::new();
        let columns = vec![
            ColumnDefinition::new("a", LogicalType::Integer.into()),
            ColumnDefinition::new("b", LogicalType::Integer.into())
                .with_default(Value::integer(42)),
            ColumnDefinition::new("c", LogicalType::StringLiteral.into()),
        ];
        manager
            .create_storage_with_columns(users(), columns)
            .unwrap();

        // Reordered, missing b, extra column z.
        let outcome = manager
            .storage_append(
                &users(),
                &chunk_of(&[
                    ("c", vec![Value::string("s")]),
                    ("z", vec![Value::integer(9)]),
                    ("a", vec![Value::integer(1)]),
                ]),
                None,
            )
            .unwrap();
        assert_eq!(outcome.count, 1);

        let out = scan_all(&manager, &users());
        assert_eq!(out.column_count(), 3);
        assert_eq!(out.value(0, 0).as_i64(), Some(1));
        assert_eq!(out.value(1, 0).as_i64(), Some(42));
        assert_eq!(out.value(2, 0).as_str(), Some("s"));
    }

    #[test]
    fn missing_column_without_default_fills_null() {
        let mut manager = StorageManager::new();
        let columns = vec![
            ColumnDefinition::new("a", LogicalType::Integer.into()),
            ColumnDefinition::new("b", LogicalType::Integer.into()),
        ];
        manager
            .create_storage_with_columns(users(), columns)
            .unwrap();
        manager
            .storage_append(&users(), &chunk_of(&[("a", vec![Value::integer(1)])]), None)
            .unwrap();
        let out = scan_all(&manager, &users());
        assert!(out.value(1, 0).is_null());
    }

    #[test]
    fn promotion_casts_and_nulls_invalid_rows() {
        let mut manager = StorageManager::new();
        let columns = vec![ColumnDefinition::new("x", LogicalType::BigInt.into())];
        manager
            .create_storage_with_columns(users(), columns)
            .unwrap();
        manager
            .storage_append(
                &users(),
                &chunk_of(&[(
                    "x",
                    vec![Value::string("12"), Value::string("junk")],
                )]),
                None,
            )
            .unwrap();
        let out = scan_all(&manager, &users());
        assert_eq!(out.value(0, 0).as_i64(), Some(12));
        assert_eq!(out.value(0, 0).tag(), LogicalType::BigInt);
        assert!(out.value(0, 1).is_null());
    }

    #[test]
    fn schema_expansion_preserves_data_modulo_order() {
        let mut manager = StorageManager::new();
        let columns = vec![
            ColumnDefinition::new("a", LogicalType::Integer.into()),
            ColumnDefinition::new("b", LogicalType::StringLiteral.into()),
        ];
        manager
            .create_storage_with_columns(users(), columns)
            .unwrap();
        manager
            .storage_append(
                &users(),
                &chunk_of(&[
                    ("b", vec![Value::string("x"), Value::string("y")]),
                    ("a", vec![Value::integer(1), Value::integer(2)]),
                ]),
                None,
            )
            .unwrap();
        let out = scan_all(&manager, &users());
        assert_eq!(out.cardinality(), 2);
        assert_eq!(out.value(0, 0).as_i64(), Some(1));
        assert_eq!(out.value(1, 1).as_str(), Some("y"));
    }

    #[test]
    fn computing_table_adopts_first_chunk_schema() {
        let mut manager = StorageManager::new();
        manager.create_storage(users()).unwrap();
        assert!(!manager.storage_has_schema(&users()).unwrap());
        manager
            .storage_append(
                &users(),
                &chunk_of(&[("x", vec![Value::integer(1)])]),
                None,
            )
            .unwrap();
        assert!(manager.storage_has_schema(&users()).unwrap());
        let columns = manager.storage_columns(&users()).unwrap();
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name(), "x");
        assert_eq!(columns[0].logical_type().tag(), LogicalType::Integer);
    }

    #[test]
    fn maybe_cleanup_trips_on_deleted_ratio() {
        let mut manager = StorageManager::new();
        manager.create_storage(users()).unwrap();
        manager
            .storage_append(
                &users(),
                &chunk_of(&[(
                    "x",
                    (0..10).map(Value::integer).collect(),
                )]),
                None,
            )
            .unwrap();
        // Nothing deleted yet: no cleanup.
        assert!(!manager.maybe_cleanup(&users(), u64::MAX).unwrap());

        manager
            .storage_delete_rows(&users(), &[0, 1, 2, 3], 0)
            .unwrap();
        assert!(manager.maybe_cleanup(&users(), u64::MAX).unwrap());
        assert_eq!(manager.storage_total_rows(&users()).unwrap(), 6);
    }

    #[test]
    fn disk_create_append_checkpoint_reload() {
        let dir = tempfile::tempdir().unwrap();
        let columns = vec![
            ColumnDefinition::new("_id", LogicalType::BigInt.into()),
            ColumnDefinition::new("x", LogicalType::Integer.into()),
        ];
        {
            let mut manager = StorageManager::new();
            manager
                .create_storage_disk(users(), columns.clone(), dir.path())
                .unwrap();
            manager
                .storage_append(
                    &users(),
                    &chunk_of(&[
                        ("_id", vec![Value::bigint(1)]),
                        ("x", vec![Value::integer(10)]),
                    ]),
                    None,
                )
                .unwrap();
            manager.checkpoint_all(5, None).unwrap();
        }
        let mut manager = StorageManager::new();
        manager.load_storage_disk(users(), dir.path()).unwrap();
        assert_eq!(manager.storage_total_rows(&users()).unwrap(), 1);
        let out = scan_all(&manager, &users());
        assert_eq!(out.value(1, 0).as_i64(), Some(10));
    }

    #[test]
    fn checkpoint_advances_wal_only_when_all_disk() {
        let dir = tempfile::tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        let wal = WalWriter::open(&wal_dir).unwrap();

        let mut manager = StorageManager::new();
        manager
            .create_storage_disk(
                users(),
                vec![ColumnDefinition::new("x", LogicalType::Integer.into())],
                dir.path(),
            )
            .unwrap();
        // One in-memory table forces WAL retention.
        manager
            .create_storage(CollectionFullName::new("db", "scratch"))
            .unwrap();
        assert!(!manager.checkpoint_all(9, Some(&wal)).unwrap());
        assert_eq!(wal.persisted_id(), 0);

        manager
            .drop_storage(&CollectionFullName::new("db", "scratch"))
            .unwrap();
        assert!(manager.checkpoint_all(9, Some(&wal)).unwrap());
        assert_eq!(wal.persisted_id(), 9);
    }

    #[test]
    fn recovery_replays_appends_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalWriter::open(dir.path()).unwrap();
        for i in 0..3 {
            wal.append(&WalRecord::Append {
                database: "db".into(),
                collection: "users".into(),
                chunk: chunk_of(&[("x", vec![Value::integer(i)])]),
            })
            .unwrap();
        }
        wal.flush().unwrap();

        let mut manager = StorageManager::new();
        manager.create_storage(users()).unwrap();
        let report = recover(&WalReader::new(dir.path()), &mut manager).unwrap();
        assert_eq!(report.applied, 3);
        assert_eq!(report.last_replayed, 3);
        assert_eq!(manager.storage_total_rows(&users()).unwrap(), 3);
    }

    #[test]
    fn recovery_skips_guardrails() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalWriter::open(dir.path()).unwrap();
        // Two records carrying the same _id: both must apply, because
        // replay bypasses dedup.
        for x in [1, 2] {
            wal.append(&WalRecord::Append {
                database: "db".into(),
                collection: "users".into(),
                chunk: chunk_of(&[
                    ("_id", vec![Value::string("a")]),
                    ("x", vec![Value::integer(x)]),
                ]),
            })
            .unwrap();
        }
        wal.flush().unwrap();

        let mut manager = StorageManager::new();
        manager.create_storage(users()).unwrap();
        recover(&WalReader::new(dir.path()), &mut manager).unwrap();
        assert_eq!(manager.storage_total_rows(&users()).unwrap(), 2);
    }

    #[test]
    fn recovery_applies_ddl_and_reports_index_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WalWriter::open(dir.path()).unwrap();
        wal.append(&WalRecord::CreateCollection {
            database: "db".into(),
            collection: "fresh".into(),
            columns: vec![ColumnDefinition::new("x", LogicalType::Integer.into())],
        })
        .unwrap();
        wal.append(&WalRecord::CreateIndex {
            database: "db".into(),
            collection: "fresh".into(),
            name: "x_idx".into(),
            keys: vec!["x".into()],
        })
        .unwrap();
        wal.flush().unwrap();

        let mut manager = StorageManager::new();
        let report = recover(&WalReader::new(dir.path()), &mut manager).unwrap();
        assert!(manager.has_storage(&CollectionFullName::new("db", "fresh")));
        assert_eq!(report.index_ops.len(), 1);
    }

    #[test]
    fn update_goes_through_expansion_and_promotion() {
        let mut manager = StorageManager::new();
        let columns = vec![
            ColumnDefinition::new("_id", LogicalType::BigInt.into()),
            ColumnDefinition::new("x", LogicalType::BigInt.into()),
        ];
        manager
            .create_storage_with_columns(users(), columns)
            .unwrap();
        manager
            .storage_append(
                &users(),
                &chunk_of(&[
                    ("_id", vec![Value::bigint(7)]),
                    ("x", vec![Value::bigint(1)]),
                ]),
                None,
            )
            .unwrap();

        let txn = Transaction::active(4, 10);
        // Update delivers columns out of order with an INT32 x.
        let outcome = manager
            .storage_update(
                &users(),
                &[0],
                &chunk_of(&[
                    ("x", vec![Value::integer(2)]),
                    ("_id", vec![Value::bigint(7)]),
                ]),
                &txn,
            )
            .unwrap();
        assert_eq!(outcome.count, 1);
        manager
            .storage_commit_append(&users(), 20, outcome.first_slot, outcome.count)
            .unwrap();
        manager.storage_commit_delete(&users(), txn.id, 20).unwrap();

        let out = scan_all(&manager, &users());
        assert_eq!(out.cardinality(), 1);
        assert_eq!(out.row_ids(), &[0]);
        assert_eq!(out.value(1, 0).as_i64(), Some(2));
        assert_eq!(out.value(1, 0).tag(), LogicalType::BigInt);
    }
}
