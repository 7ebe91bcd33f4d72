use std::collections::HashMap;
use std::fs::File;
use std::io::Cursor;
use std::sync::Arc;

use arrow::datatypes::Schema as ArrowSchema;
use arrow::json::ReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rstest::rstest;
use tempfile::TempDir;
use url::Url;

use super::extractors::CheckpointFieldExtractor;
use super::page_source::ParquetReaderOptions;
use super::schema_manager::{CheckpointSchemaManager, DeltaCheckpointSchemaManager};
use super::CheckpointEntryIterator;
use crate::actions::{ActionKind, CheckpointEntry, Format, Metadata, Protocol};
use crate::expressions::{ColumnDomain, ColumnName, Domain, Scalar, TupleDomain};
use crate::schema::{DataType, StructField, StructType};
use crate::{DeltaResult, Error, FileMeta};

const TABLE_SCHEMA_STRING: &str = r#"{"type":"struct","fields":[{"name":"id","type":"long","nullable":true,"metadata":{}},{"name":"event_time","type":"timestamp","nullable":true,"metadata":{}},{"name":"country","type":"string","nullable":true,"metadata":{}}]}"#;

fn test_metadata() -> Metadata {
    Metadata {
        id: "t1".to_string(),
        name: Some("t".to_string()),
        description: Some(String::new()),
        format: Format::default(),
        schema_string: TABLE_SCHEMA_STRING.to_string(),
        partition_columns: vec!["country".to_string()],
        configuration: HashMap::new(),
        created_time: Some(0),
    }
}

fn dv_metadata() -> Metadata {
    let mut metadata = test_metadata();
    metadata.configuration.insert(
        "delta.enableDeletionVectors".to_string(),
        "true".to_string(),
    );
    metadata
}

fn test_protocol() -> Protocol {
    Protocol {
        min_reader_version: 1,
        min_writer_version: 2,
        reader_features: None,
        writer_features: None,
    }
}

/// The full union row schema of a checkpoint file for the test table, built from the same
/// schema manager the iterator uses.
fn checkpoint_file_schema(metadata: &Metadata, protocol: &Protocol) -> StructType {
    let manager = DeltaCheckpointSchemaManager;
    let all_columns = |_: &str| true;
    StructType::new([
        StructField::nullable("txn", manager.txn_entry_type()),
        StructField::nullable(
            "add",
            manager
                .add_entry_type(metadata, protocol, &all_columns, true, true, true)
                .unwrap(),
        ),
        StructField::nullable("remove", manager.remove_entry_type()),
        StructField::nullable("metadata", manager.metadata_entry_type()),
        StructField::nullable("protocol", manager.protocol_entry_type(true, true)),
        StructField::nullable("sidecar", manager.sidecar_entry_type()),
    ])
}

/// Write one checkpoint parquet file from newline-delimited JSON rows.
fn write_checkpoint(
    dir: &TempDir,
    schema: &StructType,
    rows: &[&str],
    max_row_group_size: usize,
) -> FileMeta {
    let arrow_schema = Arc::new(ArrowSchema::try_from(schema).unwrap());
    let json = rows.join("\n");
    let mut reader = ReaderBuilder::new(arrow_schema.clone())
        .build(Cursor::new(json.into_bytes()))
        .unwrap();
    let batch = reader.next().unwrap().unwrap();
    assert_eq!(batch.num_rows(), rows.len());

    let path = dir.path().join("00000000000000000010.checkpoint.parquet");
    let file = File::create(&path).unwrap();
    let properties = WriterProperties::builder()
        .set_max_row_group_size(max_row_group_size)
        .build();
    let mut writer = ArrowWriter::try_new(file, arrow_schema, Some(properties)).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();

    let size = std::fs::metadata(&path).unwrap().len();
    FileMeta::new(Url::from_file_path(&path).unwrap(), 0, size)
}

fn open_iterator(
    checkpoint: &FileMeta,
    kinds: &[ActionKind],
    metadata: Option<&Metadata>,
    protocol: Option<&Protocol>,
    partition_constraint: TupleDomain,
    options: &ParquetReaderOptions,
) -> DeltaResult<CheckpointEntryIterator> {
    let all_columns = |_: &str| true;
    CheckpointEntryIterator::try_new(
        checkpoint,
        &DeltaCheckpointSchemaManager,
        kinds,
        metadata,
        protocol,
        options,
        false,
        100,
        partition_constraint,
        Some(&all_columns),
    )
}

fn read_entries(
    checkpoint: &FileMeta,
    kinds: &[ActionKind],
    metadata: Option<&Metadata>,
    protocol: Option<&Protocol>,
    partition_constraint: TupleDomain,
) -> DeltaResult<Vec<CheckpointEntry>> {
    let mut iterator = open_iterator(
        checkpoint,
        kinds,
        metadata,
        protocol,
        partition_constraint,
        &ParquetReaderOptions::default(),
    )?;
    iterator.by_ref().collect()
}

fn country_constraint(value: &str) -> TupleDomain {
    TupleDomain::new(vec![ColumnDomain::new(
        ColumnName::new(["country"]),
        DataType::STRING,
        Domain::single_value(Scalar::String(value.to_string())),
    )])
}

const METADATA_ROW: &str = r#"{"metadata":{"id":"t1","name":"t","description":"","format":{"provider":"parquet","options":{}},"schemaString":"{\"type\":\"struct\",\"fields\":[{\"name\":\"id\",\"type\":\"long\",\"nullable\":true,\"metadata\":{}},{\"name\":\"event_time\",\"type\":\"timestamp\",\"nullable\":true,\"metadata\":{}},{\"name\":\"country\",\"type\":\"string\",\"nullable\":true,\"metadata\":{}}]}","partitionColumns":["country"],"configuration":{},"createdTime":0}}"#;

fn add_row(country: &str) -> String {
    format!(
        r#"{{"add":{{"path":"c={country}/part-0001.snappy.parquet","partitionValues":{{"country":"{country}"}},"size":452,"modificationTime":1670892998135,"dataChange":true,"partitionvalues_parsed":{{"country":"{country}"}}}}}}"#
    )
}

#[test]
fn test_read_single_metadata_entry() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = test_metadata();
    let schema = checkpoint_file_schema(&metadata, &test_protocol());
    let checkpoint = write_checkpoint(&dir, &schema, &[METADATA_ROW], 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Metadata],
        None,
        None,
        TupleDomain::all(),
    )?;
    assert_eq!(entries.len(), 1);
    let CheckpointEntry::Metadata(parsed) = &entries[0] else {
        panic!("expected a metadata entry, got {:?}", entries[0]);
    };
    assert_eq!(parsed, &metadata);
    Ok(())
}

#[test]
fn test_txn_entry_roundtrip() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    let row = r#"{"txn":{"appId":"app-1","version":7,"lastUpdated":1670892998135}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Txn],
        None,
        None,
        TupleDomain::all(),
    )?;
    assert_eq!(entries.len(), 1);
    let CheckpointEntry::Txn(txn) = &entries[0] else {
        panic!("expected a txn entry");
    };
    assert_eq!(txn.app_id, "app-1");
    assert_eq!(txn.version, 7);
    assert_eq!(txn.last_updated, 1670892998135);
    Ok(())
}

#[test]
fn test_partition_constraint_prunes_add_entries() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = test_metadata();
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let rows = [add_row("US"), add_row("DE")];
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let checkpoint = write_checkpoint(&dir, &schema, &rows, 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Add],
        Some(&metadata),
        Some(&protocol),
        country_constraint("US"),
    )?;
    assert_eq!(entries.len(), 1);
    let add = entries[0].as_add().unwrap();
    assert_eq!(add.path, "c=US/part-0001.snappy.parquet");
    assert_eq!(
        add.canonical_partition_values["country"],
        Some("US".to_string())
    );

    // without a constraint both entries surface
    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Add],
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
    )?;
    assert_eq!(entries.len(), 2);
    Ok(())
}

#[rstest]
#[case::enabled(true)]
#[case::disabled(false)]
fn test_add_deletion_vector(#[case] enabled: bool) -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = if enabled { dv_metadata() } else { test_metadata() };
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let row = r#"{"add":{"path":"part-0001.snappy.parquet","partitionValues":{"country":"US"},"size":635,"modificationTime":1677811178336,"dataChange":true,"deletionVector":{"storageType":"u","pathOrInlineDv":"ab^-aqEH.-t@S}K{vb[*k^","offset":4,"sizeInBytes":40,"cardinality":6}}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Add],
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
    )?;
    assert_eq!(entries.len(), 1);
    let add = entries[0].as_add().unwrap();
    match enabled {
        true => {
            let dv = add.deletion_vector.as_ref().unwrap();
            assert_eq!(dv.storage_type, "u");
            assert_eq!(dv.path_or_inline_dv, "ab^-aqEH.-t@S}K{vb[*k^");
            assert_eq!(dv.offset, Some(4));
            assert_eq!(dv.size_in_bytes, 40);
            assert_eq!(dv.cardinality, 6);
        }
        false => assert!(add.deletion_vector.is_none()),
    }
    Ok(())
}

#[test]
fn test_remove_entry() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = dv_metadata();
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let rows = [
        add_row("US"),
        r#"{"remove":{"path":"part-0000.snappy.parquet","partitionValues":{"country":"US"},"deletionTimestamp":1670892998135,"dataChange":true}}"#.to_string(),
    ];
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let checkpoint = write_checkpoint(&dir, &schema, &rows, 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Add, ActionKind::Remove],
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
    )?;
    assert_eq!(entries.len(), 2);
    let CheckpointEntry::Remove(remove) = &entries[1] else {
        panic!("expected a remove entry");
    };
    assert_eq!(remove.path, "part-0000.snappy.parquet");
    assert_eq!(remove.partition_values["country"], "US");
    assert_eq!(remove.deletion_timestamp, 1670892998135);
    assert!(remove.data_change);
    // the remove row type carries no deletionVector field, so none is materialized even though
    // the table has deletion vectors enabled
    assert!(remove.deletion_vector.is_none());
    Ok(())
}

#[test]
fn test_protocol_without_feature_lists() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    let row = r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Protocol],
        None,
        None,
        TupleDomain::all(),
    )?;
    assert_eq!(entries.len(), 1);
    let CheckpointEntry::Protocol(protocol) = &entries[0] else {
        panic!("expected a protocol entry");
    };
    assert_eq!(protocol.min_reader_version, 1);
    assert_eq!(protocol.min_writer_version, 2);
    assert!(protocol.reader_features.is_none());
    assert!(protocol.writer_features.is_none());
    Ok(())
}

#[test]
fn test_protocol_with_feature_lists() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    let row = r#"{"protocol":{"minReaderVersion":3,"minWriterVersion":7,"readerFeatures":["deletionVectors"],"writerFeatures":["deletionVectors"]}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Protocol],
        None,
        None,
        TupleDomain::all(),
    )?;
    let CheckpointEntry::Protocol(protocol) = &entries[0] else {
        panic!("expected a protocol entry");
    };
    assert!(protocol.has_reader_feature("deletionVectors"));
    assert!(protocol.has_writer_feature("deletionVectors"));
    Ok(())
}

#[test]
fn test_sidecar_entry() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    let row = r#"{"sidecar":{"path":"00000000000000000010.checkpoint.0000000001.parquet","sizeInBytes":2048,"modificationTime":1677811178336,"tags":{"origin":"compaction"}}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Sidecar],
        None,
        None,
        TupleDomain::all(),
    )?;
    let CheckpointEntry::Sidecar(sidecar) = &entries[0] else {
        panic!("expected a sidecar entry");
    };
    assert_eq!(
        sidecar.path,
        "00000000000000000010.checkpoint.0000000001.parquet"
    );
    assert_eq!(sidecar.size_in_bytes, 2048);
    assert_eq!(
        sidecar.tags.as_ref().unwrap()["origin"],
        "compaction".to_string()
    );
    Ok(())
}

#[test]
fn test_entries_follow_row_then_kind_order() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    // the first row carries two actions; entries within a row follow the caller-specified
    // kind order
    let rows = [
        r#"{"txn":{"appId":"app-1","version":1,"lastUpdated":1},"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#,
        METADATA_ROW,
    ];
    let checkpoint = write_checkpoint(&dir, &schema, &rows, 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Protocol, ActionKind::Txn, ActionKind::Metadata],
        None,
        None,
        TupleDomain::all(),
    )?;
    let kinds: Vec<ActionKind> = entries.iter().map(CheckpointEntry::kind).collect();
    assert_eq!(
        kinds,
        vec![ActionKind::Protocol, ActionKind::Txn, ActionKind::Metadata]
    );
    Ok(())
}

#[test]
fn test_row_count_conservation() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = test_metadata();
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let add_us = add_row("US");
    let add_de = add_row("DE");
    let rows = [
        METADATA_ROW,
        r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#,
        add_us.as_str(),
        add_de.as_str(),
        r#"{"txn":{"appId":"app-1","version":1,"lastUpdated":1}}"#,
    ];
    let checkpoint = write_checkpoint(&dir, &schema, &rows, 1024);

    let all_kinds = [
        ActionKind::Txn,
        ActionKind::Add,
        ActionKind::Remove,
        ActionKind::Metadata,
        ActionKind::Protocol,
        ActionKind::Sidecar,
    ];
    // every non-null action cell becomes one entry
    let entries = read_entries(
        &checkpoint,
        &all_kinds,
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
    )?;
    assert_eq!(entries.len(), 5);

    // minus the add rows pruned by the partition constraint
    let entries = read_entries(
        &checkpoint,
        &all_kinds,
        Some(&metadata),
        Some(&protocol),
        country_constraint("US"),
    )?;
    assert_eq!(entries.len(), 4);
    Ok(())
}

#[test]
fn test_row_group_pruning_skips_uninteresting_groups() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = test_metadata();
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let add_us = add_row("US");
    let add_de = add_row("DE");
    let rows = [
        add_us.as_str(),
        add_de.as_str(),
        r#"{"remove":{"path":"part-0000.snappy.parquet","partitionValues":{},"deletionTimestamp":1,"dataChange":true}}"#,
        r#"{"remove":{"path":"part-0001.snappy.parquet","partitionValues":{},"deletionTimestamp":2,"dataChange":true}}"#,
    ];
    // two row groups: one of adds, one of removes
    let checkpoint = write_checkpoint(&dir, &schema, &rows, 2);

    let mut iterator = open_iterator(
        &checkpoint,
        &[ActionKind::Remove],
        None,
        None,
        TupleDomain::all(),
        &ParquetReaderOptions::default(),
    )?;
    let entries: Vec<CheckpointEntry> = iterator.by_ref().collect::<DeltaResult<_>>()?;
    assert_eq!(entries.len(), 2);
    // the add-only row group was eliminated by the not-null disjunction
    assert_eq!(iterator.completed_positions(), 2);
    assert!(iterator.completed_bytes() > 0);
    Ok(())
}

#[test]
fn test_requested_column_missing_from_file() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    // a checkpoint written without the sidecar column at all
    let manager = DeltaCheckpointSchemaManager;
    let schema = StructType::new([
        StructField::nullable("txn", manager.txn_entry_type()),
        StructField::nullable("metadata", manager.metadata_entry_type()),
    ]);
    let rows = [r#"{"txn":{"appId":"app-1","version":1,"lastUpdated":1}}"#];
    let checkpoint = write_checkpoint(&dir, &schema, &rows, 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Txn, ActionKind::Sidecar],
        None,
        None,
        TupleDomain::all(),
    )?;
    let kinds: Vec<ActionKind> = entries.iter().map(CheckpointEntry::kind).collect();
    assert_eq!(kinds, vec![ActionKind::Txn]);
    Ok(())
}

#[test]
fn test_parsed_stats_and_modern_era_cutoff() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = test_metadata();
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    // event_time = 9_000_000_000 microseconds = epoch day 0
    let row = r#"{"add":{"path":"part-0001.snappy.parquet","partitionValues":{"country":"US"},"size":635,"modificationTime":1677811178336,"dataChange":true,"stats_parsed":{"numRecords":10,"minValues":{"id":5,"event_time":"1970-01-01T02:30:00Z"},"maxValues":{"id":9,"event_time":"1970-01-01T02:30:00Z"},"nullCount":{"id":0,"event_time":1,"country":0}}}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    // default cutoff (1900-01-01): the value is trusted
    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Add],
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
    )?;
    let add = entries[0].as_add().unwrap();
    let stats = add.parsed_stats.as_ref().unwrap();
    assert_eq!(stats.num_records, 10);
    let min_values = stats.min_values.as_ref().unwrap();
    assert_eq!(min_values["id"], Scalar::Long(5));
    assert_eq!(min_values["event_time"], Scalar::Timestamp(9_000_000_000));
    let max_values = stats.max_values.as_ref().unwrap();
    assert_eq!(max_values["id"], Scalar::Long(9));
    let null_count = stats.null_count.as_ref().unwrap();
    assert_eq!(null_count["event_time"], Scalar::Long(1));
    assert_eq!(null_count["country"], Scalar::Long(0));
    // parsed statistics win over the raw JSON string
    assert!(add.stats.is_none());

    // a cutoff after epoch day 0: the timestamp is dropped, the row survives
    let options = ParquetReaderOptions {
        modern_era_cutoff_epoch_day: 1,
        ..Default::default()
    };
    let mut iterator = open_iterator(
        &checkpoint,
        &[ActionKind::Add],
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
        &options,
    )?;
    let entries: Vec<CheckpointEntry> = iterator.by_ref().collect::<DeltaResult<_>>()?;
    let add = entries[0].as_add().unwrap();
    let min_values = add.parsed_stats.as_ref().unwrap().min_values.as_ref().unwrap();
    assert!(!min_values.contains_key("event_time"));
    assert_eq!(min_values["id"], Scalar::Long(5));
    Ok(())
}

#[test]
fn test_sub_millisecond_timestamp_stat_is_rejected() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = test_metadata();
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let row = r#"{"add":{"path":"part-0001.snappy.parquet","partitionValues":{"country":"US"},"size":635,"modificationTime":1677811178336,"dataChange":true,"stats_parsed":{"numRecords":10,"minValues":{"event_time":"1970-01-01T00:00:00.000500Z"},"maxValues":{},"nullCount":{}}}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let result = read_entries(
        &checkpoint,
        &[ActionKind::Add],
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
    );
    assert!(matches!(result, Err(Error::UnexpectedColumnType(_))));
    Ok(())
}

#[test]
fn test_raw_stats_string_fallback() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let metadata = test_metadata();
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let row = r#"{"add":{"path":"part-0001.snappy.parquet","partitionValues":{"country":"US"},"size":635,"modificationTime":1677811178336,"dataChange":true,"stats":"{\"numRecords\":10}"}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let entries = read_entries(
        &checkpoint,
        &[ActionKind::Add],
        Some(&metadata),
        Some(&protocol),
        TupleDomain::all(),
    )?;
    let add = entries[0].as_add().unwrap();
    assert!(add.parsed_stats.is_none());
    assert_eq!(add.stats.as_deref(), Some(r#"{"numRecords":10}"#));
    Ok(())
}

#[test]
fn test_add_without_metadata_is_a_configuration_error() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    let row = add_row("US");
    let checkpoint = write_checkpoint(&dir, &schema, &[row.as_str()], 1024);

    let result = read_entries(
        &checkpoint,
        &[ActionKind::Add],
        None,
        None,
        TupleDomain::all(),
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
    Ok(())
}

#[test]
fn test_empty_kinds_is_a_configuration_error() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    let checkpoint = write_checkpoint(&dir, &schema, &[METADATA_ROW], 1024);

    let result = read_entries(&checkpoint, &[], None, None, TupleDomain::all());
    assert!(matches!(result, Err(Error::Configuration(_))));
    Ok(())
}

#[test]
fn test_close_is_idempotent_and_stops_iteration() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    let schema = checkpoint_file_schema(&test_metadata(), &test_protocol());
    let rows = [
        METADATA_ROW,
        r#"{"protocol":{"minReaderVersion":1,"minWriterVersion":2}}"#,
    ];
    let checkpoint = write_checkpoint(&dir, &schema, &rows, 1024);

    let mut iterator = open_iterator(
        &checkpoint,
        &[ActionKind::Metadata, ActionKind::Protocol],
        None,
        None,
        TupleDomain::all(),
        &ParquetReaderOptions::default(),
    )?;
    let first = iterator.next().unwrap()?;
    assert_eq!(first.kind(), ActionKind::Metadata);

    iterator.close();
    iterator.close();
    assert!(iterator.next().is_none());
    assert!(iterator.next().is_none());
    Ok(())
}

#[test]
fn test_protocol_row_with_five_fields_is_a_schema_violation() {
    // exercised against the extractor directly: the page source normalizes file layouts to the
    // declared row type, so an oversized row can only come from a misbehaving schema manager
    let five_fields = StructType::new([
        StructField::not_null("minReaderVersion", DataType::INTEGER),
        StructField::not_null("minWriterVersion", DataType::INTEGER),
        StructField::nullable("readerFeatures", crate::schema::ArrayType::new(DataType::STRING, false)),
        StructField::nullable("writerFeatures", crate::schema::ArrayType::new(DataType::STRING, false)),
        StructField::nullable("extra", DataType::STRING),
    ]);
    let block = json_block(
        &five_fields,
        r#"{"minReaderVersion":1,"minWriterVersion":2,"extra":"x"}"#,
    );
    let extractor = CheckpointFieldExtractor::protocol(five_fields);
    let result = extractor.extract(0, &block);
    assert!(matches!(result, Err(Error::Schema(_))));
}

#[test]
fn test_txn_row_with_wrong_field_count_is_a_schema_violation() {
    let two_fields = StructType::new([
        StructField::not_null("appId", DataType::STRING),
        StructField::not_null("version", DataType::LONG),
    ]);
    let block = json_block(&two_fields, r#"{"appId":"app-1","version":1}"#);
    let extractor = CheckpointFieldExtractor::txn(two_fields);
    let result = extractor.extract(0, &block);
    assert!(matches!(result, Err(Error::Schema(_))));
}

/// Build a single-row struct block of the given row type from one JSON object.
fn json_block(row_type: &StructType, json: &str) -> arrow::array::ArrayRef {
    let wrapper = StructType::new([StructField::nullable(
        "row",
        DataType::Struct(Box::new(row_type.clone())),
    )]);
    let arrow_schema = Arc::new(ArrowSchema::try_from(&wrapper).unwrap());
    let mut reader = ReaderBuilder::new(arrow_schema)
        .build(Cursor::new(format!(r#"{{"row":{json}}}"#).into_bytes()))
        .unwrap();
    let batch = reader.next().unwrap().unwrap();
    batch.column(0).clone()
}

#[test]
fn test_row_statistics_write_through() -> DeltaResult<()> {
    let dir = TempDir::new()?;
    // a table with a row-typed column; its statistics are only materialized when write-through
    // is requested
    let mut metadata = test_metadata();
    metadata.schema_string = r#"{"type":"struct","fields":[{"name":"nested","type":{"type":"struct","fields":[{"name":"inner","type":"long","nullable":true,"metadata":{}}]},"nullable":true,"metadata":{}}]}"#.to_string();
    metadata.partition_columns = vec![];
    let protocol = test_protocol();
    let schema = checkpoint_file_schema(&metadata, &protocol);
    let row = r#"{"add":{"path":"part-0001.snappy.parquet","partitionValues":{},"size":635,"modificationTime":1677811178336,"dataChange":true,"stats_parsed":{"numRecords":10,"minValues":{"nested":{"inner":3}},"maxValues":{"nested":{"inner":9}},"nullCount":{"nested":{"inner":0}}}}}"#;
    let checkpoint = write_checkpoint(&dir, &schema, &[row], 1024);

    let all_columns = |_: &str| true;
    let open = |write_through: bool| {
        CheckpointEntryIterator::try_new(
            &checkpoint,
            &DeltaCheckpointSchemaManager,
            &[ActionKind::Add],
            Some(&metadata),
            Some(&protocol),
            &ParquetReaderOptions::default(),
            write_through,
            100,
            TupleDomain::all(),
            Some(&all_columns),
        )
    };

    let entries: Vec<CheckpointEntry> = open(true)?.collect::<DeltaResult<_>>()?;
    let stats = entries[0].as_add().unwrap().parsed_stats.as_ref().unwrap().clone();
    let min_values = stats.min_values.unwrap();
    let Scalar::Struct(nested) = &min_values["nested"] else {
        panic!("expected a struct statistic");
    };
    assert_eq!(nested.values()[0], Scalar::Long(3));
    let null_count = stats.null_count.unwrap();
    assert!(matches!(null_count["nested"], Scalar::Struct(_)));

    let entries: Vec<CheckpointEntry> = open(false)?.collect::<DeltaResult<_>>()?;
    let stats = entries[0].as_add().unwrap().parsed_stats.as_ref().unwrap().clone();
    assert!(stats.min_values.unwrap().is_empty());
    assert!(stats.null_count.unwrap().is_empty());
    assert_eq!(stats.num_records, 10);
    Ok(())
}
