//! One extractor per action kind.
//!
//! An extractor consumes one row position of one column block and produces either a typed
//! [`CheckpointEntry`] or `None`. `None` means either "this row carries a different action kind"
//! (the block is null at the position) or, for `add`, "the row was pruned by the partition
//! constraint". The extractors are plain values dispatched through a sum type, mirroring the
//! one-of-N shape of the on-disk row.

use std::collections::HashMap;

use arrow::array::{Array, ArrayRef, StructArray};
use tracing::debug;

use crate::actions::deletion_vector::DeletionVectorDescriptor;
use crate::actions::stats::{
    null_count_type, ColumnStats, ParquetFileStatistics, MICROSECONDS_PER_MILLISECOND,
    MILLISECONDS_PER_DAY,
};
use crate::actions::{
    canonicalize_partition_values, materialize_string_map, Add, CheckpointEntry, Metadata,
    Protocol, Remove, SetTransaction, Sidecar,
};
use crate::checkpoint::field_reader::{scalar_from_array, CheckpointFieldReader};
use crate::expressions::{partition_matches_predicate, Scalar, TupleDomain};
use crate::schema::{DataType, StructType};
use crate::utils::require;
use crate::{DeltaResult, Error};

/// The nested row type of the named field of `row_type`, when declared.
fn optional_field_type(row_type: &StructType, name: &str) -> Option<StructType> {
    row_type
        .field(name)
        .and_then(|field| field.data_type().as_struct_opt())
        .cloned()
}

/// Extracts the entries of one action kind from a column block, one row position at a time.
pub(crate) enum CheckpointFieldExtractor {
    Txn {
        row_type: StructType,
    },
    Add(Box<AddFileExtractor>),
    Remove {
        row_type: StructType,
        deletion_vector_type: Option<StructType>,
        deletion_vectors_enabled: bool,
    },
    Metadata {
        row_type: StructType,
        format_type: StructType,
    },
    Protocol {
        row_type: StructType,
    },
    Sidecar {
        row_type: StructType,
    },
}

impl CheckpointFieldExtractor {
    pub(crate) fn txn(row_type: StructType) -> Self {
        CheckpointFieldExtractor::Txn { row_type }
    }

    pub(crate) fn metadata(row_type: StructType) -> DeltaResult<Self> {
        let format_type = optional_field_type(&row_type, "format")
            .ok_or_else(|| Error::schema("metadata entry type has no format row"))?;
        Ok(CheckpointFieldExtractor::Metadata {
            row_type,
            format_type,
        })
    }

    pub(crate) fn protocol(row_type: StructType) -> Self {
        CheckpointFieldExtractor::Protocol { row_type }
    }

    pub(crate) fn sidecar(row_type: StructType) -> Self {
        CheckpointFieldExtractor::Sidecar { row_type }
    }

    pub(crate) fn remove(row_type: StructType, deletion_vectors_enabled: bool) -> Self {
        let deletion_vector_type = optional_field_type(&row_type, "deletionVector");
        CheckpointFieldExtractor::Remove {
            row_type,
            deletion_vector_type,
            deletion_vectors_enabled,
        }
    }

    /// Returns the typed entry for the requested row position of the block, or `None` when the
    /// block carries no entry of this extractor's kind at that position.
    pub(crate) fn extract(
        &self,
        position: usize,
        block: &ArrayRef,
    ) -> DeltaResult<Option<CheckpointEntry>> {
        let row = block.as_any().downcast_ref::<StructArray>().ok_or_else(|| {
            Error::unexpected_column_type(format!(
                "Expected a row block, but found {}",
                block.data_type()
            ))
        })?;
        if row.is_null(position) {
            return Ok(None);
        }
        match self {
            CheckpointFieldExtractor::Txn { row_type } => {
                build_txn_entry(row, position, row_type).map(Some)
            }
            CheckpointFieldExtractor::Add(extractor) => extractor.extract(row, position),
            CheckpointFieldExtractor::Remove {
                row_type,
                deletion_vector_type,
                deletion_vectors_enabled,
            } => build_remove_entry(
                row,
                position,
                row_type,
                deletion_vector_type.as_ref(),
                *deletion_vectors_enabled,
            )
            .map(Some),
            CheckpointFieldExtractor::Metadata {
                row_type,
                format_type,
            } => build_metadata_entry(row, position, row_type, format_type).map(Some),
            CheckpointFieldExtractor::Protocol { row_type } => {
                build_protocol_entry(row, position, row_type).map(Some)
            }
            CheckpointFieldExtractor::Sidecar { row_type } => {
                build_sidecar_entry(row, position, row_type).map(Some)
            }
        }
    }
}

fn build_txn_entry(
    row: &StructArray,
    position: usize,
    row_type: &StructType,
) -> DeltaResult<CheckpointEntry> {
    debug!("Building txn entry at position {position}");
    let txn_fields = 3;
    require!(
        row.num_columns() == txn_fields,
        Error::schema(format!(
            "Expected txn block to have {txn_fields} children, but found {}",
            row.num_columns()
        ))
    );
    let txn = CheckpointFieldReader::new(row, position, row_type);
    Ok(CheckpointEntry::Txn(SetTransaction {
        app_id: txn.get_string("appId")?,
        version: txn.get_long("version")?,
        last_updated: txn.get_long("lastUpdated")?,
    }))
}

fn build_protocol_entry(
    row: &StructArray,
    position: usize,
    row_type: &StructType,
) -> DeltaResult<CheckpointEntry> {
    debug!("Building protocol entry at position {position}");
    let min_protocol_fields = 2;
    let max_protocol_fields = 4;
    let field_count = row.num_columns();
    require!(
        (min_protocol_fields..=max_protocol_fields).contains(&field_count),
        Error::schema(format!(
            "Expected protocol block to have between {min_protocol_fields} and \
             {max_protocol_fields} children, but found {field_count}"
        ))
    );
    let protocol = CheckpointFieldReader::new(row, position, row_type);
    Ok(CheckpointEntry::Protocol(Protocol {
        min_reader_version: protocol.get_int("minReaderVersion")?,
        min_writer_version: protocol.get_int("minWriterVersion")?,
        reader_features: protocol.get_optional_set("readerFeatures")?,
        writer_features: protocol.get_optional_set("writerFeatures")?,
    }))
}

fn build_metadata_entry(
    row: &StructArray,
    position: usize,
    row_type: &StructType,
    format_type: &StructType,
) -> DeltaResult<CheckpointEntry> {
    debug!("Building metadata entry at position {position}");
    let metadata_fields = 8;
    let format_fields = 2;
    require!(
        row.num_columns() == metadata_fields,
        Error::schema(format!(
            "Expected metadata block to have {metadata_fields} children, but found {}",
            row.num_columns()
        ))
    );
    let metadata = CheckpointFieldReader::new(row, position, row_type);
    let format_row = metadata
        .get_row("format")?
        .ok_or_else(|| Error::missing_data("Data missing for field format"))?;
    require!(
        format_row.num_columns() == format_fields,
        Error::schema(format!(
            "Expected format block to have {format_fields} children, but found {}",
            format_row.num_columns()
        ))
    );
    let format = CheckpointFieldReader::new(format_row, position, format_type);
    Ok(CheckpointEntry::Metadata(Metadata {
        id: metadata.get_string("id")?,
        name: metadata.get_optional_string("name")?,
        description: metadata.get_optional_string("description")?,
        format: crate::actions::Format {
            provider: format.get_string("provider")?,
            options: materialize_string_map(format.get_optional_map("options")?.unwrap_or_default()),
        },
        schema_string: metadata.get_string("schemaString")?,
        partition_columns: metadata.get_list("partitionColumns")?,
        configuration: materialize_string_map(
            metadata.get_optional_map("configuration")?.unwrap_or_default(),
        ),
        created_time: metadata.get_optional_long("createdTime")?,
    }))
}

fn build_remove_entry(
    row: &StructArray,
    position: usize,
    row_type: &StructType,
    deletion_vector_type: Option<&StructType>,
    deletion_vectors_enabled: bool,
) -> DeltaResult<CheckpointEntry> {
    debug!("Building remove entry at position {position}");
    let remove_fields = 4;
    require!(
        row.num_columns() == remove_fields,
        Error::schema(format!(
            "Expected remove block to have {remove_fields} children, but found {}",
            row.num_columns()
        ))
    );
    let remove = CheckpointFieldReader::new(row, position, row_type);
    let mut deletion_vector = None;
    if deletion_vectors_enabled {
        // the remove row carries a deletionVector field only when the schema manager declares one
        if let Some(deletion_vector_type) = deletion_vector_type {
            deletion_vector = remove
                .get_row("deletionVector")?
                .map(|dv_row| {
                    parse_deletion_vector_from_parquet(dv_row, position, deletion_vector_type)
                })
                .transpose()?;
        }
    }
    Ok(CheckpointEntry::Remove(Remove {
        path: remove.get_string("path")?,
        partition_values: materialize_string_map(
            remove.get_optional_map("partitionValues")?.unwrap_or_default(),
        ),
        deletion_timestamp: remove.get_long("deletionTimestamp")?,
        data_change: remove.get_boolean("dataChange")?,
        deletion_vector,
    }))
}

fn build_sidecar_entry(
    row: &StructArray,
    position: usize,
    row_type: &StructType,
) -> DeltaResult<CheckpointEntry> {
    debug!("Building sidecar entry at position {position}");
    let sidecar_fields = 4;
    require!(
        row.num_columns() == sidecar_fields,
        Error::schema(format!(
            "Expected sidecar block to have {sidecar_fields} children, but found {}",
            row.num_columns()
        ))
    );
    let sidecar = CheckpointFieldReader::new(row, position, row_type);
    Ok(CheckpointEntry::Sidecar(Sidecar {
        path: sidecar.get_string("path")?,
        size_in_bytes: sidecar.get_long("sizeInBytes")?,
        modification_time: sidecar.get_long("modificationTime")?,
        tags: sidecar
            .get_optional_map("tags")?
            .map(materialize_string_map),
    }))
}

/// The `add` extractor carries the most context of all the extractors: the partition constraint
/// it prunes rows with, the statistics column lists, and the feature flags of the table.
pub(crate) struct AddFileExtractor {
    row_type: StructType,
    deletion_vector_type: Option<StructType>,
    parsed_stats_type: Option<StructType>,
    deletion_vectors_enabled: bool,
    partition_constraint: TupleDomain,
    min_max_columns: Vec<ColumnStats>,
    null_count_columns: Vec<ColumnStats>,
    write_through_row_stats: bool,
    modern_era_cutoff_epoch_day: i64,
}

impl AddFileExtractor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        row_type: StructType,
        deletion_vectors_enabled: bool,
        partition_constraint: TupleDomain,
        min_max_columns: Vec<ColumnStats>,
        null_count_columns: Vec<ColumnStats>,
        write_through_row_stats: bool,
        modern_era_cutoff_epoch_day: i64,
    ) -> CheckpointFieldExtractor {
        let deletion_vector_type = optional_field_type(&row_type, "deletionVector");
        let parsed_stats_type = optional_field_type(&row_type, "stats_parsed");
        CheckpointFieldExtractor::Add(Box::new(AddFileExtractor {
            row_type,
            deletion_vector_type,
            parsed_stats_type,
            deletion_vectors_enabled,
            partition_constraint,
            min_max_columns,
            null_count_columns,
            write_through_row_stats,
            modern_era_cutoff_epoch_day,
        }))
    }

    fn extract(
        &self,
        row: &StructArray,
        position: usize,
    ) -> DeltaResult<Option<CheckpointEntry>> {
        debug!("Building add entry at position {position}");
        let add = CheckpointFieldReader::new(row, position, &self.row_type);

        // Partition values come first: a non-trivial partition constraint prunes the row before
        // any other field is touched.
        let raw_partition_values = add.get_map("partitionValues")?;
        let canonical_partition_values = canonicalize_partition_values(&raw_partition_values);
        if !self.partition_constraint.is_all()
            && !partition_matches_predicate(
                &canonical_partition_values,
                &self.partition_constraint,
            )?
        {
            return Ok(None);
        }

        let path = add.get_string("path")?;
        let size = add.get_long("size")?;
        let modification_time = add.get_long("modificationTime")?;
        let data_change = add.get_boolean("dataChange")?;

        let mut deletion_vector = None;
        if self.deletion_vectors_enabled {
            let deletion_vector_type = self
                .deletion_vector_type
                .as_ref()
                .ok_or_else(|| Error::schema("add entry type has no deletionVector row"))?;
            deletion_vector = add
                .get_row("deletionVector")?
                .map(|dv_row| {
                    parse_deletion_vector_from_parquet(dv_row, position, deletion_vector_type)
                })
                .transpose()?;
        }

        let parsed_stats = match (&self.parsed_stats_type, add.get_row("stats_parsed")?) {
            (Some(stats_type), Some(stats_row)) => Some(self.parse_statistics_from_parquet(
                stats_row,
                position,
                stats_type,
            )?),
            _ => None,
        };
        // the raw JSON stats string is only a fallback for rows without parsed statistics
        let stats = match parsed_stats {
            Some(_) => None,
            None => add.get_optional_string("stats")?,
        };

        let tags = materialize_string_map(add.get_optional_map("tags")?.unwrap_or_default());
        let result = Add {
            path,
            partition_values: materialize_string_map(raw_partition_values),
            canonical_partition_values,
            size,
            modification_time,
            data_change,
            stats,
            parsed_stats,
            tags,
            deletion_vector,
        };
        Ok(Some(CheckpointEntry::Add(Box::new(result))))
    }

    fn parse_statistics_from_parquet(
        &self,
        stats_row: &StructArray,
        position: usize,
        stats_type: &StructType,
    ) -> DeltaResult<ParquetFileStatistics> {
        let stats = CheckpointFieldReader::new(stats_row, position, stats_type);
        let num_records = stats.get_long("numRecords")?;

        let mut min_values = None;
        let mut max_values = None;
        if !self.min_max_columns.is_empty() {
            min_values = Some(self.parse_min_max(stats.get_row("minValues")?, position)?);
            max_values = Some(self.parse_min_max(stats.get_row("maxValues")?, position)?);
        }
        let null_count = Some(self.parse_null_count(stats.get_row("nullCount")?, position)?);

        Ok(ParquetFileStatistics {
            num_records,
            min_values,
            max_values,
            null_count,
        })
    }

    fn parse_min_max(
        &self,
        row: Option<&StructArray>,
        position: usize,
    ) -> DeltaResult<HashMap<String, Scalar>> {
        let Some(row) = row else {
            // statistics were not collected
            return Ok(HashMap::new());
        };
        let mut values = HashMap::new();
        for column in &self.min_max_columns {
            let Some(field) = row.column_by_name(&column.physical_name) else {
                continue;
            };
            if field.is_null(position) {
                continue;
            }
            match &column.data_type {
                DataType::Struct(_) => {
                    // Row-typed column statistics are not used for pruning, but need to be
                    // copied when writing out new checkpoint files.
                    if self.write_through_row_stats {
                        values.insert(
                            column.physical_name.clone(),
                            scalar_from_array(field, position, &column.data_type)?,
                        );
                    }
                }
                DataType::Primitive(crate::schema::PrimitiveType::Timestamp) => {
                    let micros = match scalar_from_array(field, position, &column.data_type)? {
                        Scalar::Timestamp(micros) => micros,
                        other => {
                            return Err(Error::unexpected_column_type(format!(
                                "Expected a timestamp statistic for {}, but found {other:?}",
                                column.physical_name
                            )))
                        }
                    };
                    require!(
                        micros % MICROSECONDS_PER_MILLISECOND == 0,
                        Error::unexpected_column_type(format!(
                            "Timestamp statistic for {} is not a whole millisecond: {micros}",
                            column.physical_name
                        ))
                    );
                    let epoch_millis = micros / MICROSECONDS_PER_MILLISECOND;
                    if epoch_millis.div_euclid(MILLISECONDS_PER_DAY)
                        >= self.modern_era_cutoff_epoch_day
                    {
                        values.insert(
                            column.physical_name.clone(),
                            Scalar::Timestamp(epoch_millis * MICROSECONDS_PER_MILLISECOND),
                        );
                    }
                }
                _ => {
                    values.insert(
                        column.physical_name.clone(),
                        scalar_from_array(field, position, &column.data_type)?,
                    );
                }
            }
        }
        Ok(values)
    }

    fn parse_null_count(
        &self,
        row: Option<&StructArray>,
        position: usize,
    ) -> DeltaResult<HashMap<String, Scalar>> {
        let Some(row) = row else {
            // statistics were not collected
            return Ok(HashMap::new());
        };
        let mut values = HashMap::new();
        for column in &self.null_count_columns {
            let Some(field) = row.column_by_name(&column.physical_name) else {
                continue;
            };
            if field.is_null(position) {
                continue;
            }
            if let DataType::Struct(_) = &column.data_type {
                if self.write_through_row_stats {
                    let declared = null_count_type(&column.data_type);
                    values.insert(
                        column.physical_name.clone(),
                        scalar_from_array(field, position, &declared)?,
                    );
                }
                continue;
            }
            values.insert(
                column.physical_name.clone(),
                scalar_from_array(field, position, &DataType::LONG)?,
            );
        }
        Ok(values)
    }
}

/// Decode the fixed 5-field deletion vector sub-row.
fn parse_deletion_vector_from_parquet(
    row: &StructArray,
    position: usize,
    deletion_vector_type: &StructType,
) -> DeltaResult<DeletionVectorDescriptor> {
    require!(
        row.num_columns() == 5,
        Error::schema(format!(
            "Deletion vector entry must have 5 fields, but found {}",
            row.num_columns()
        ))
    );
    let deletion_vector = CheckpointFieldReader::new(row, position, deletion_vector_type);
    Ok(DeletionVectorDescriptor {
        storage_type: deletion_vector.get_string("storageType")?,
        path_or_inline_dv: deletion_vector.get_string("pathOrInlineDv")?,
        offset: deletion_vector.get_optional_int("offset")?,
        size_in_bytes: deletion_vector.get_int("sizeInBytes")?,
        cardinality: deletion_vector.get_long("cardinality")?,
    })
}
