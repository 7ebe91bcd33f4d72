//! Defines [`Error`], the crate-wide error type, and the [`DeltaResult`] alias.

/// A [`std::result::Result`] that has the checkpoint [`Error`] as the error variant
pub type DeltaResult<T, E = Error> = std::result::Result<T, E>;

/// All the errors the checkpoint reader can surface.
///
/// The variants fall into four groups: schema-shape violations discovered while decoding a
/// checkpoint row, type mismatches between a declared field and the materialized data,
/// failures bubbling up from the underlying readers, and configuration errors raised before
/// any page is read.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error performing operations on arrow data
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error performing operations on parquet data
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    /// An IO error from the underlying file system
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A JSON string (the table schema string or a raw stats string) failed to parse
    #[error("{0}")]
    MalformedJson(#[from] serde_json::Error),

    /// The shape of a checkpoint row does not match what the Delta protocol requires, for
    /// example an unexpected field count or channel count
    #[error("Invalid checkpoint schema: {0}")]
    Schema(String),

    /// A field's value could not be read as its declared type
    #[error("Unexpected column type: {0}")]
    UnexpectedColumnType(String),

    /// A required field was null or absent
    #[error("Data missing: {0}")]
    MissingData(String),

    /// The iterator was constructed with an invalid combination of arguments
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A checkpoint location that the reader cannot open
    #[error("Invalid checkpoint location: {0}")]
    InvalidCheckpointLocation(String),

    /// An uncategorized error with a message
    #[error("Generic delta checkpoint error: {0}")]
    Generic(String),
}

impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    pub fn schema(msg: impl ToString) -> Self {
        Self::Schema(msg.to_string())
    }

    pub fn unexpected_column_type(msg: impl ToString) -> Self {
        Self::UnexpectedColumnType(msg.to_string())
    }

    pub fn missing_data(msg: impl ToString) -> Self {
        Self::MissingData(msg.to_string())
    }

    pub fn configuration(msg: impl ToString) -> Self {
        Self::Configuration(msg.to_string())
    }

    pub fn invalid_checkpoint_location(msg: impl ToString) -> Self {
        Self::InvalidCheckpointLocation(msg.to_string())
    }
}
