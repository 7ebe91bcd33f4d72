//! Typed per-file statistics decoded from the `stats_parsed` column of an `add` action, and the
//! column metadata describing which table columns carry statistics.

use std::collections::HashMap;

use crate::expressions::Scalar;
use crate::schema::{DataType, PrimitiveType, StructType};

/// The epoch day of 1900-01-01. Timestamp min/max statistics for dates before this cutoff are
/// considered untrusted and dropped from the decoded statistics, while the row itself is kept.
pub const START_OF_MODERN_ERA_EPOCH_DAY: i64 = -25567;

pub(crate) const MICROSECONDS_PER_MILLISECOND: i64 = 1_000;
pub(crate) const MILLISECONDS_PER_DAY: i64 = 86_400_000;

/// Fully-typed per-file statistics from a checkpoint's `stats_parsed` column.
///
/// The maps are keyed by the *physical* column name. Minimum and maximum values are only decoded
/// when the caller's stats-column filter selected at least one column; null counts are always
/// decoded. Row-typed columns appear in the maps (as [`Scalar::Struct`]) only when row-statistics
/// write-through was requested, since they are needed solely to preserve unmodified bytes when
/// rewriting a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ParquetFileStatistics {
    /// The number of records in the data file
    pub num_records: i64,
    /// Minimum value per column
    pub min_values: Option<HashMap<String, Scalar>>,
    /// Maximum value per column
    pub max_values: Option<HashMap<String, Scalar>>,
    /// Null count per column; a leaf column maps to a long, a row-typed column to a nested row
    /// of per-leaf counts
    pub null_count: Option<HashMap<String, Scalar>>,
}

/// Metadata for one top-level table column as far as statistics decoding is concerned.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnStats {
    /// The logical column name
    pub(crate) name: String,
    /// The physical column name, which keys the statistics rows
    pub(crate) physical_name: String,
    /// The declared type of the column
    pub(crate) data_type: DataType,
}

/// The type under which a column's null count is stored: a long for leaf columns, a nested row
/// of per-leaf counts for row-typed columns.
pub(crate) fn null_count_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Struct(fields) => DataType::struct_type(fields.fields().map(|field| {
            crate::schema::StructField::nullable(
                field.physical_name(),
                null_count_type(field.data_type()),
            )
        })),
        _ => DataType::LONG,
    }
}

/// Whether min/max statistics exist for a column of the given type. Maps and arrays carry no
/// statistics at all; booleans and binary columns carry null counts but no min/max.
fn is_min_max_eligible(data_type: &DataType) -> bool {
    match data_type {
        DataType::Struct(_) => true,
        DataType::Map(_) | DataType::Array(_) => false,
        DataType::Primitive(p) => !matches!(p, PrimitiveType::Boolean | PrimitiveType::Binary),
    }
}

/// The columns of `schema` that can carry min/max statistics: every non-partition column whose
/// type is eligible. Row-typed columns are included; their values are only materialized for
/// checkpoint rewriting.
pub(crate) fn columns_with_min_max_stats(
    schema: &StructType,
    partition_columns: &[String],
) -> Vec<ColumnStats> {
    schema
        .fields()
        .filter(|field| !partition_columns.contains(&field.name().to_string()))
        .filter(|field| is_min_max_eligible(field.data_type()))
        .map(|field| ColumnStats {
            name: field.name().to_string(),
            physical_name: field.physical_name().to_string(),
            data_type: field.data_type().clone(),
        })
        .collect()
}

/// The columns of `schema` that can carry null-count statistics: everything but maps and arrays.
pub(crate) fn columns_with_null_count_stats(schema: &StructType) -> Vec<ColumnStats> {
    schema
        .fields()
        .filter(|field| {
            !matches!(field.data_type(), DataType::Map(_) | DataType::Array(_))
        })
        .map(|field| ColumnStats {
            name: field.name().to_string(),
            physical_name: field.physical_name().to_string(),
            data_type: field.data_type().clone(),
        })
        .collect()
}
