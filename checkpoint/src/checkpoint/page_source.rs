//! The block-oriented page stream the iterator core consumes, and its parquet implementation.
//!
//! A [`Page`] is one batch of checkpoint rows with one channel (block) per requested action
//! kind, in the caller-specified kind order. [`ParquetPageSource`] produces pages from a local
//! checkpoint file: it projects the declared sub-fields of the requested action columns by name,
//! applies the row-group disjunction filter, and normalizes every block to its declared row
//! layout, synthesizing all-null columns for declared fields the file does not carry. The
//! channel layout and per-row field counts therefore never depend on the file's column set.

use std::fs::File;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, RecordBatch, StructArray};
use arrow::datatypes::{DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema};
use itertools::Itertools;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ProjectionMask;
use tracing::debug;

use crate::actions::stats::START_OF_MODERN_ERA_EPOCH_DAY;
use crate::actions::ActionKind;
use crate::checkpoint::pushdown::CheckpointRowGroupSkipping;
use crate::expressions::TupleDomain;
use crate::schema::{DataType, StructField, StructType};
use crate::{DeltaResult, Error, FileMeta};

/// Options governing how the checkpoint parquet file is scanned.
#[derive(Debug, Clone)]
pub struct ParquetReaderOptions {
    /// The maximum number of rows per page
    pub batch_size: usize,
    /// Timestamp min/max statistics whose epoch day lies before this cutoff are dropped as
    /// untrusted during stats decoding
    pub modern_era_cutoff_epoch_day: i64,
}

impl Default for ParquetReaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1024,
            modern_era_cutoff_epoch_day: START_OF_MODERN_ERA_EPOCH_DAY,
        }
    }
}

/// One batch of checkpoint rows, with one block per requested action kind.
pub struct Page {
    batch: RecordBatch,
}

impl Page {
    pub(crate) fn new(batch: RecordBatch) -> Self {
        Page { batch }
    }

    /// The number of blocks in this page
    pub fn channel_count(&self) -> usize {
        self.batch.num_columns()
    }

    /// The number of rows in this page
    pub fn position_count(&self) -> usize {
        self.batch.num_rows()
    }

    /// The block at the given channel index
    pub fn block(&self, channel: usize) -> &ArrayRef {
        self.batch.column(channel)
    }
}

/// A pull-based source of checkpoint [`Page`]s. The iterator core owns its page source
/// exclusively and closes it on end-of-stream, explicit close, and every failure path.
pub trait PageSource {
    /// The next page, or `None` once the source is exhausted
    fn next_page(&mut self) -> DeltaResult<Option<Page>>;

    /// Whether the source has been exhausted or closed
    fn is_finished(&self) -> bool;

    /// The number of rows produced so far
    fn completed_positions(&self) -> u64;

    /// The decoded size of the batches produced so far, in bytes
    fn completed_bytes(&self) -> u64;

    /// Release the underlying resources. Idempotent.
    fn close(&mut self);
}

pub(crate) struct ParquetPageSource {
    reader: Option<ParquetRecordBatchReader>,
    /// The declared arrow field per requested action kind, in caller order
    output_fields: Vec<ArrowField>,
    completed_positions: u64,
    completed_bytes: u64,
}

impl ParquetPageSource {
    pub(crate) fn try_new(
        checkpoint: &FileMeta,
        columns: &[(ActionKind, StructType)],
        disjunct_domains: &[TupleDomain],
        options: &ParquetReaderOptions,
    ) -> DeltaResult<Self> {
        let path = checkpoint.location.to_file_path().map_err(|_| {
            Error::invalid_checkpoint_location(format!(
                "Only local checkpoint files can be read: {}",
                checkpoint.location
            ))
        })?;
        let file = File::open(path)?;
        let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        // Project a leaf when its root is a requested action column and its first sub-field is
        // declared by that action's row type. Undeclared sub-fields stay unread; declared but
        // absent ones are filled with nulls during normalization.
        let leaves: Vec<usize> = builder
            .parquet_schema()
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(index, column)| {
                let parts = column.path().parts();
                let root = parts.first()?;
                let (_, row_type) = columns
                    .iter()
                    .find(|(kind, _)| kind.column_name() == root)?;
                match parts.get(1) {
                    Some(sub_field) if row_type.field(sub_field).is_none() => None,
                    _ => Some(index),
                }
            })
            .collect();
        debug!(
            "projecting {} of {} leaf columns from {}",
            leaves.len(),
            builder.parquet_schema().num_columns(),
            checkpoint.location
        );
        let mask = ProjectionMask::leaves(builder.parquet_schema(), leaves);
        builder = builder
            .with_projection(mask)
            .with_batch_size(options.batch_size)
            .with_checkpoint_row_group_filter(disjunct_domains);

        let output_fields: Vec<ArrowField> = columns
            .iter()
            .map(|(kind, row_type)| {
                let field = StructField::nullable(
                    kind.column_name(),
                    DataType::Struct(Box::new(row_type.clone())),
                );
                ArrowField::try_from(&field)
            })
            .try_collect()?;

        Ok(ParquetPageSource {
            reader: Some(builder.build()?),
            output_fields,
            completed_positions: 0,
            completed_bytes: 0,
        })
    }

    /// Reorder the batch's columns into the requested kind order and normalize every block to
    /// its declared row layout.
    fn into_page(&self, batch: RecordBatch) -> DeltaResult<Page> {
        let num_rows = batch.num_rows();
        let mut fields = Vec::with_capacity(self.output_fields.len());
        let mut blocks: Vec<ArrayRef> = Vec::with_capacity(self.output_fields.len());
        for declared in &self.output_fields {
            let block = match batch.column_by_name(declared.name()) {
                Some(column) => normalize_to_declared(column, declared)?,
                None => new_null_array(declared.data_type(), num_rows),
            };
            fields.push(ArrowField::new(
                declared.name(),
                block.data_type().clone(),
                true,
            ));
            blocks.push(block);
        }
        let batch = RecordBatch::try_new(Arc::new(ArrowSchema::new(fields)), blocks)?;
        Ok(Page::new(batch))
    }
}

/// Rebuild a struct column so that its children are exactly the declared fields, in declared
/// order, with all-null columns standing in for declared fields the file does not carry.
/// Struct-typed children are normalized recursively; the per-row null buffer is preserved.
fn normalize_to_declared(column: &ArrayRef, declared: &ArrowField) -> DeltaResult<ArrayRef> {
    let ArrowDataType::Struct(declared_fields) = declared.data_type() else {
        // only struct layouts need normalizing; leaf and container columns are used as-is
        return Ok(column.clone());
    };
    if column.data_type() == declared.data_type() {
        return Ok(column.clone());
    }
    let row = column
        .as_any()
        .downcast_ref::<StructArray>()
        .ok_or_else(|| {
            Error::unexpected_column_type(format!(
                "Column {} is not a row column (found {})",
                declared.name(),
                column.data_type()
            ))
        })?;
    let mut fields = Vec::with_capacity(declared_fields.len());
    let mut children: Vec<ArrayRef> = Vec::with_capacity(declared_fields.len());
    for declared_child in declared_fields {
        let child = match row.column_by_name(declared_child.name()) {
            Some(child) => normalize_to_declared(child, declared_child)?,
            None => new_null_array(declared_child.data_type(), row.len()),
        };
        fields.push(Arc::new(ArrowField::new(
            declared_child.name(),
            child.data_type().clone(),
            true,
        )));
        children.push(child);
    }
    let normalized = StructArray::try_new(fields.into(), children, row.nulls().cloned())?;
    Ok(Arc::new(normalized))
}

impl PageSource for ParquetPageSource {
    fn next_page(&mut self) -> DeltaResult<Option<Page>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next() {
            None => {
                self.close();
                Ok(None)
            }
            Some(Err(e)) => {
                self.close();
                Err(e.into())
            }
            Some(Ok(batch)) => {
                self.completed_positions += batch.num_rows() as u64;
                self.completed_bytes += batch.get_array_memory_size() as u64;
                match self.into_page(batch) {
                    Ok(page) => Ok(Some(page)),
                    Err(e) => {
                        self.close();
                        Err(e)
                    }
                }
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.reader.is_none()
    }

    fn completed_positions(&self) -> u64 {
        self.completed_positions
    }

    fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    fn close(&mut self) {
        self.reader = None;
    }
}
