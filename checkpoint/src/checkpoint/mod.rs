//! Streaming iteration over the typed log entries of a Delta Lake checkpoint file.
//!
//! A checkpoint is a columnar snapshot of a table's transaction log: a single parquet file (or a
//! set of sidecar parquet files) whose top-level schema has one nullable row-typed column per
//! action kind (`txn`, `add`, `remove`, `metadata`, `protocol`, `sidecar`). In any row at most
//! one action column is populated.
//!
//! [`CheckpointEntryIterator`] projects a caller-specified subset of action kinds, walks the
//! file page by page, fans each row out across one extractor per requested kind, prunes `add`
//! rows against the caller's partition constraint, and yields the surviving entries lazily.
//! Entries are emitted in row order and, within a row, in the caller-specified kind order. The
//! iterator owns its page source exclusively and closes it on end-of-stream, explicit
//! [`close`](CheckpointEntryIterator::close), and every construction or iteration failure.

use std::collections::VecDeque;

use itertools::Itertools;
use tracing::debug;

use crate::actions::stats::{columns_with_min_max_stats, columns_with_null_count_stats, ColumnStats};
use crate::actions::{is_deletion_vector_enabled, ActionKind, CheckpointEntry, Metadata, Protocol};
use crate::checkpoint::extractors::{AddFileExtractor, CheckpointFieldExtractor};
use crate::checkpoint::page_source::{Page, PageSource, ParquetPageSource, ParquetReaderOptions};
use crate::checkpoint::pushdown::checkpoint_disjunct_domains;
use crate::checkpoint::schema_manager::{CheckpointSchemaManager, StatsColumnPredicate};
use crate::expressions::TupleDomain;
use crate::schema::StructType;
use crate::utils::require;
use crate::{DeltaResult, Error, FileMeta};

pub(crate) mod extractors;
pub(crate) mod field_reader;
pub mod page_source;
pub(crate) mod pushdown;
pub mod schema_manager;

#[cfg(test)]
mod tests;

/// A lazy, finite, non-restartable iterator over the typed log entries of one checkpoint file.
pub struct CheckpointEntryIterator {
    checkpoint_path: String,
    page_source: Box<dyn PageSource>,
    next_entries: VecDeque<CheckpointEntry>,
    extractors: Vec<CheckpointFieldExtractor>,
    page: Option<Page>,
    page_position: usize,
    done: bool,
}

impl CheckpointEntryIterator {
    /// Open a checkpoint file for iteration.
    ///
    /// `fields` names the action kinds to project, in the order entries should be emitted
    /// within a row; it must not be empty. Reading `add` entries additionally requires the
    /// table's `metadata` and `protocol` entries (the `add` row type cannot be resolved without
    /// them) and a stats-column filter. Any failure after the page source has been opened
    /// closes it before propagating.
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        checkpoint: &FileMeta,
        schema_manager: &dyn CheckpointSchemaManager,
        fields: &[ActionKind],
        metadata: Option<&Metadata>,
        protocol: Option<&Protocol>,
        options: &ParquetReaderOptions,
        row_statistics_write_through: bool,
        domain_compaction_threshold: usize,
        partition_constraint: TupleDomain,
        stats_column_filter: Option<&StatsColumnPredicate>,
    ) -> DeltaResult<Self> {
        let kinds: Vec<ActionKind> = fields.iter().copied().unique().collect();
        require!(
            !kinds.is_empty(),
            Error::configuration("requested action kinds must not be empty")
        );

        // Reading add entries requires knowing the table metadata in order to resolve the
        // parquet row type.
        let mut deletion_vectors_enabled = false;
        let mut min_max_columns: Vec<ColumnStats> = Vec::new();
        let mut null_count_columns: Vec<ColumnStats> = Vec::new();
        let mut add_context: Option<(&Metadata, &Protocol, &StatsColumnPredicate)> = None;
        if kinds.contains(&ActionKind::Add) {
            let metadata = metadata.ok_or_else(|| {
                Error::configuration(
                    "Metadata entry must be provided when reading add entries from checkpoint files",
                )
            })?;
            let protocol = protocol.ok_or_else(|| {
                Error::configuration(
                    "Protocol entry must be provided when reading add entries from checkpoint files",
                )
            })?;
            let stats_filter = stats_column_filter.ok_or_else(|| {
                Error::configuration(
                    "Stats column filter must be provided when reading add entries from checkpoint files",
                )
            })?;
            deletion_vectors_enabled = is_deletion_vector_enabled(metadata, protocol);
            let table_schema = metadata.parse_schema()?;
            min_max_columns =
                columns_with_min_max_stats(&table_schema, &metadata.partition_columns)
                    .into_iter()
                    .filter(|column| stats_filter(&column.name))
                    .collect();
            null_count_columns = columns_with_null_count_stats(&table_schema);
            add_context = Some((metadata, protocol, stats_filter));
        }

        let mut columns: Vec<(ActionKind, StructType)> = Vec::with_capacity(kinds.len());
        for kind in &kinds {
            let row_type = match kind {
                ActionKind::Txn => schema_manager.txn_entry_type(),
                ActionKind::Add => {
                    let (metadata, protocol, stats_filter) = add_context
                        .ok_or_else(|| Error::configuration("add context missing"))?;
                    schema_manager
                        .add_entry_type(metadata, protocol, stats_filter, true, true, true)?
                }
                ActionKind::Remove => schema_manager.remove_entry_type(),
                ActionKind::Metadata => schema_manager.metadata_entry_type(),
                ActionKind::Protocol => schema_manager.protocol_entry_type(true, true),
                ActionKind::Sidecar => schema_manager.sidecar_entry_type(),
            };
            columns.push((*kind, row_type));
        }

        let disjunct_domains =
            checkpoint_disjunct_domains(&kinds, &partition_constraint, domain_compaction_threshold);
        let mut page_source =
            ParquetPageSource::try_new(checkpoint, &columns, &disjunct_domains, options)?;

        // From here on the page source is an owned resource: close it before surfacing any error.
        let extractors = build_extractors(
            columns,
            deletion_vectors_enabled,
            &partition_constraint,
            &min_max_columns,
            &null_count_columns,
            row_statistics_write_through,
            options.modern_era_cutoff_epoch_day,
        );
        let extractors = match extractors {
            Ok(extractors) => extractors,
            Err(e) => {
                page_source.close();
                return Err(e);
            }
        };

        Ok(CheckpointEntryIterator {
            checkpoint_path: checkpoint.location.to_string(),
            page_source: Box::new(page_source),
            next_entries: VecDeque::new(),
            extractors,
            page: None,
            page_position: 0,
            done: false,
        })
    }

    fn compute_next(&mut self) -> DeltaResult<Option<CheckpointEntry>> {
        if let Some(entry) = self.next_entries.pop_front() {
            return Ok(Some(entry));
        }
        self.fill_next_entries()?;
        if let Some(entry) = self.next_entries.pop_front() {
            return Ok(Some(entry));
        }
        self.page_source.close();
        Ok(None)
    }

    fn fill_next_entries(&mut self) -> DeltaResult<()> {
        while self.next_entries.is_empty() {
            // grab the next page if needed
            loop {
                match &self.page {
                    Some(page) if self.page_position < page.position_count() => break,
                    _ => {
                        if !self.try_advance_page()? {
                            return Ok(());
                        }
                    }
                }
            }

            // process one row: fan out across the extractors in the caller-specified kind order
            let Some(page) = &self.page else {
                return Ok(());
            };
            for (channel, extractor) in self.extractors.iter().enumerate() {
                if let Some(entry) = extractor.extract(self.page_position, page.block(channel))? {
                    self.next_entries.push_back(entry);
                }
            }
            self.page_position += 1;
        }
        Ok(())
    }

    fn try_advance_page(&mut self) -> DeltaResult<bool> {
        if self.page_source.is_finished() {
            self.page_source.close();
            return Ok(false);
        }
        let is_first_page = self.page.is_none();
        self.page = self.page_source.next_page()?;
        let Some(page) = &self.page else {
            return Ok(false);
        };
        if is_first_page {
            let required_extractor_channels = self.extractors.len();
            require!(
                page.channel_count() == required_extractor_channels,
                Error::schema(format!(
                    "Expected page in {} to contain {required_extractor_channels} channels, \
                     but found {}",
                    self.checkpoint_path,
                    page.channel_count()
                ))
            );
        }
        self.page_position = 0;
        Ok(true)
    }

    /// Release the underlying page source. Idempotent; iteration after close yields nothing.
    pub fn close(&mut self) {
        self.done = true;
        self.page_source.close();
    }

    /// The number of checkpoint rows read so far
    pub fn completed_positions(&self) -> u64 {
        self.page_source.completed_positions()
    }

    /// The decoded size of the pages read so far, in bytes
    pub fn completed_bytes(&self) -> u64 {
        self.page_source.completed_bytes()
    }
}

impl Iterator for CheckpointEntryIterator {
    type Item = DeltaResult<CheckpointEntry>;

    /// Entries are yielded in row order and, within a row, in the caller-specified kind order.
    /// The first error fuses the iterator and closes the page source.
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.compute_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                debug!("terminating checkpoint iteration on error: {e}");
                self.close();
                Some(Err(e))
            }
        }
    }
}

impl Drop for CheckpointEntryIterator {
    fn drop(&mut self) {
        self.page_source.close();
    }
}

#[allow(clippy::too_many_arguments)]
fn build_extractors(
    columns: Vec<(ActionKind, StructType)>,
    deletion_vectors_enabled: bool,
    partition_constraint: &TupleDomain,
    min_max_columns: &[ColumnStats],
    null_count_columns: &[ColumnStats],
    row_statistics_write_through: bool,
    modern_era_cutoff_epoch_day: i64,
) -> DeltaResult<Vec<CheckpointFieldExtractor>> {
    columns
        .into_iter()
        .map(|(kind, row_type)| {
            Ok(match kind {
                ActionKind::Txn => CheckpointFieldExtractor::txn(row_type),
                ActionKind::Add => AddFileExtractor::new(
                    row_type,
                    deletion_vectors_enabled,
                    partition_constraint.clone(),
                    min_max_columns.to_vec(),
                    null_count_columns.to_vec(),
                    row_statistics_write_through,
                    modern_era_cutoff_epoch_day,
                ),
                ActionKind::Remove => {
                    CheckpointFieldExtractor::remove(row_type, deletion_vectors_enabled)
                }
                ActionKind::Metadata => CheckpointFieldExtractor::metadata(row_type)?,
                ActionKind::Protocol => CheckpointFieldExtractor::protocol(row_type),
                ActionKind::Sidecar => CheckpointFieldExtractor::sidecar(row_type),
            })
        })
        .try_collect()
}
