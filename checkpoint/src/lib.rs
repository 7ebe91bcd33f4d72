//! # delta-checkpoint
//!
//! A streaming reader for Delta Lake checkpoint files: columnar snapshots of a table's
//! transaction log, stored as parquet files whose union-style row schema has one nullable
//! row-typed column per action kind (`txn`, `add`, `remove`, `metadata`, `protocol`,
//! `sidecar`).
//!
//! The entry point is [`CheckpointEntryIterator`], which:
//!
//! - projects a caller-specified subset of action kinds,
//! - pushes a disjunction of per-action "required field is not null" domains — plus the
//!   caller's partition-value domains for `add` — into the parquet reader so that row groups
//!   carrying no interesting rows are skipped before decode,
//! - decodes the surviving rows into typed log-entry records ([`CheckpointEntry`]), pruning
//!   `add` rows row-by-row against the partition constraint, and
//! - yields the entries lazily, in row order and caller-specified kind order.
//!
//! The per-action row types are resolved through a
//! [`CheckpointSchemaManager`](checkpoint::schema_manager::CheckpointSchemaManager), which
//! accounts for the protocol features the table has enabled (deletion vectors, parsed
//! statistics, reader/writer feature lists).

#![warn(
    unreachable_pub,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    rust_2018_idioms,
    rust_2021_compatibility
)]

use url::Url;

pub mod actions;
pub mod checkpoint;
pub mod error;
pub mod expressions;
pub mod schema;

pub(crate) mod utils;

pub use actions::deletion_vector::DeletionVectorDescriptor;
pub use actions::stats::{ParquetFileStatistics, START_OF_MODERN_ERA_EPOCH_DAY};
pub use actions::{
    Add, ActionKind, CheckpointEntry, Format, Metadata, Protocol, Remove, SetTransaction, Sidecar,
};
pub use checkpoint::page_source::{Page, PageSource, ParquetReaderOptions};
pub use checkpoint::schema_manager::{
    CheckpointSchemaManager, DeltaCheckpointSchemaManager, StatsColumnPredicate,
};
pub use checkpoint::CheckpointEntryIterator;
pub use error::{DeltaResult, Error};
pub use expressions::{ColumnDomain, ColumnName, Domain, Scalar, TupleDomain};

/// Delta table version is 8 byte unsigned int
pub type Version = u64;

/// The metadata that describes an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// The fully qualified path to the object
    pub location: Url,
    /// The last modified time as milliseconds since unix epoch
    pub last_modified: i64,
    /// The size in bytes of the object
    pub size: u64,
}

impl FileMeta {
    /// Create a new [`FileMeta`]
    pub fn new(location: Url, last_modified: i64, size: u64) -> Self {
        Self {
            location,
            last_modified,
            size,
        }
    }
}
