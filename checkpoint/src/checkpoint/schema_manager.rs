//! Produces the logical row type the parquet reader should project for each action kind.
//!
//! The row types track the table's protocol features: whether deletion vectors are enabled,
//! whether a typed `stats_parsed` column is expected and which columns it covers, and whether
//! the protocol row carries reader/writer feature lists. The manager's output drives both the
//! projected column list and the schema handed to the per-row field reader.

use crate::actions::stats::{
    columns_with_min_max_stats, columns_with_null_count_stats, null_count_type,
};
use crate::actions::{Metadata, Protocol};
use crate::schema::{ArrayType, DataType, MapType, StructField, StructType};
use crate::DeltaResult;

/// A predicate selecting the columns for which min/max statistics should be projected.
pub type StatsColumnPredicate = dyn Fn(&str) -> bool + Send + Sync;

/// Resolves the logical row type to project for each requested action kind.
pub trait CheckpointSchemaManager {
    /// The row type of the `txn` action
    fn txn_entry_type(&self) -> StructType;

    /// The row type of the `add` action for the table described by `metadata` and `protocol`.
    ///
    /// `stats_column_filter` selects the table columns whose min/max statistics are projected
    /// inside `stats_parsed`; the flags control whether the `stats_parsed`, `deletionVector`,
    /// and `partitionvalues_parsed` fields are part of the row at all.
    fn add_entry_type(
        &self,
        metadata: &Metadata,
        protocol: &Protocol,
        stats_column_filter: &StatsColumnPredicate,
        with_parsed_stats: bool,
        with_deletion_vector: bool,
        with_partition_values_parsed: bool,
    ) -> DeltaResult<StructType>;

    /// The row type of the `remove` action
    fn remove_entry_type(&self) -> StructType;

    /// The row type of the `metadata` action
    fn metadata_entry_type(&self) -> StructType;

    /// The row type of the `protocol` action
    fn protocol_entry_type(&self, with_reader_features: bool, with_writer_features: bool)
        -> StructType;

    /// The row type of the `sidecar` action
    fn sidecar_entry_type(&self) -> StructType;
}

/// The default schema manager, building row types straight from the Delta protocol field
/// definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeltaCheckpointSchemaManager;

fn string_map(value_contains_null: bool) -> DataType {
    MapType::new(DataType::STRING, DataType::STRING, value_contains_null).into()
}

fn deletion_vector_field() -> StructField {
    StructField::nullable(
        "deletionVector",
        DataType::struct_type([
            StructField::not_null("storageType", DataType::STRING),
            StructField::not_null("pathOrInlineDv", DataType::STRING),
            StructField::nullable("offset", DataType::INTEGER),
            StructField::not_null("sizeInBytes", DataType::INTEGER),
            StructField::not_null("cardinality", DataType::LONG),
        ]),
    )
}

impl CheckpointSchemaManager for DeltaCheckpointSchemaManager {
    fn txn_entry_type(&self) -> StructType {
        StructType::new([
            StructField::not_null("appId", DataType::STRING),
            StructField::not_null("version", DataType::LONG),
            StructField::nullable("lastUpdated", DataType::LONG),
        ])
    }

    fn add_entry_type(
        &self,
        metadata: &Metadata,
        _protocol: &Protocol,
        stats_column_filter: &StatsColumnPredicate,
        with_parsed_stats: bool,
        with_deletion_vector: bool,
        with_partition_values_parsed: bool,
    ) -> DeltaResult<StructType> {
        let table_schema = metadata.parse_schema()?;

        let mut fields = vec![
            StructField::not_null("path", DataType::STRING),
            StructField::not_null("partitionValues", string_map(true)),
            StructField::not_null("size", DataType::LONG),
            StructField::not_null("modificationTime", DataType::LONG),
            StructField::not_null("dataChange", DataType::BOOLEAN),
            StructField::nullable("stats", DataType::STRING),
            StructField::nullable("tags", string_map(true)),
        ];
        if with_deletion_vector {
            fields.push(deletion_vector_field());
        }
        if with_partition_values_parsed && !metadata.partition_columns.is_empty() {
            let partition_fields = metadata
                .partition_columns
                .iter()
                .filter_map(|name| table_schema.field(name))
                .map(|field| {
                    StructField::nullable(field.physical_name(), field.data_type().clone())
                });
            fields.push(StructField::nullable(
                "partitionvalues_parsed",
                DataType::struct_type(partition_fields),
            ));
        }
        if with_parsed_stats {
            let min_max_columns =
                columns_with_min_max_stats(&table_schema, &metadata.partition_columns)
                    .into_iter()
                    .filter(|column| stats_column_filter(&column.name))
                    .collect::<Vec<_>>();
            let mut stats_fields = vec![StructField::not_null("numRecords", DataType::LONG)];
            if !min_max_columns.is_empty() {
                let min_max_type = DataType::struct_type(min_max_columns.iter().map(|column| {
                    StructField::nullable(&column.physical_name, column.data_type.clone())
                }));
                stats_fields.push(StructField::nullable("minValues", min_max_type.clone()));
                stats_fields.push(StructField::nullable("maxValues", min_max_type));
            }
            let null_count_fields = columns_with_null_count_stats(&table_schema)
                .into_iter()
                .map(|column| {
                    StructField::nullable(
                        column.physical_name,
                        null_count_type(&column.data_type),
                    )
                });
            stats_fields.push(StructField::nullable(
                "nullCount",
                DataType::struct_type(null_count_fields),
            ));
            fields.push(StructField::nullable(
                "stats_parsed",
                DataType::struct_type(stats_fields),
            ));
        }
        Ok(StructType::new(fields))
    }

    fn remove_entry_type(&self) -> StructType {
        StructType::new([
            StructField::not_null("path", DataType::STRING),
            StructField::nullable("partitionValues", string_map(true)),
            StructField::nullable("deletionTimestamp", DataType::LONG),
            StructField::not_null("dataChange", DataType::BOOLEAN),
        ])
    }

    fn metadata_entry_type(&self) -> StructType {
        StructType::new([
            StructField::not_null("id", DataType::STRING),
            StructField::nullable("name", DataType::STRING),
            StructField::nullable("description", DataType::STRING),
            StructField::not_null(
                "format",
                DataType::struct_type([
                    StructField::not_null("provider", DataType::STRING),
                    StructField::nullable("options", string_map(true)),
                ]),
            ),
            StructField::not_null("schemaString", DataType::STRING),
            StructField::not_null(
                "partitionColumns",
                ArrayType::new(DataType::STRING, false),
            ),
            StructField::nullable("configuration", string_map(true)),
            StructField::nullable("createdTime", DataType::LONG),
        ])
    }

    fn protocol_entry_type(
        &self,
        with_reader_features: bool,
        with_writer_features: bool,
    ) -> StructType {
        let mut fields = vec![
            StructField::not_null("minReaderVersion", DataType::INTEGER),
            StructField::not_null("minWriterVersion", DataType::INTEGER),
        ];
        if with_reader_features {
            fields.push(StructField::nullable(
                "readerFeatures",
                ArrayType::new(DataType::STRING, false),
            ));
        }
        if with_writer_features {
            fields.push(StructField::nullable(
                "writerFeatures",
                ArrayType::new(DataType::STRING, false),
            ));
        }
        StructType::new(fields)
    }

    fn sidecar_entry_type(&self) -> StructType {
        StructType::new([
            StructField::not_null("path", DataType::STRING),
            StructField::not_null("sizeInBytes", DataType::LONG),
            StructField::not_null("modificationTime", DataType::LONG),
            StructField::nullable("tags", string_map(true)),
        ])
    }
}
