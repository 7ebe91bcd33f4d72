//! The action records a checkpoint row can carry, as defined in the [Delta
//! specification](https://github.com/delta-io/delta/blob/master/PROTOCOL.md), and the
//! [`CheckpointEntry`] sum type the reader emits.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::actions::deletion_vector::DeletionVectorDescriptor;
use crate::actions::stats::ParquetFileStatistics;
use crate::schema::StructType;
use crate::DeltaResult;

pub mod deletion_vector;
pub mod stats;

pub(crate) const TXN_NAME: &str = "txn";
pub(crate) const ADD_NAME: &str = "add";
pub(crate) const REMOVE_NAME: &str = "remove";
pub(crate) const METADATA_NAME: &str = "metadata";
pub(crate) const PROTOCOL_NAME: &str = "protocol";
pub(crate) const SIDECAR_NAME: &str = "sidecar";

/// The table property that activates deletion vectors.
pub(crate) const ENABLE_DELETION_VECTORS_KEY: &str = "delta.enableDeletionVectors";
/// The reader feature a client must support to read a table with deletion vectors.
pub(crate) const DELETION_VECTORS_FEATURE_NAME: &str = "deletionVectors";

/// The kinds of action a checkpoint row can carry. Each kind corresponds to one nullable
/// row-typed column of the checkpoint parquet schema; for any row at most one of those columns
/// is expected to be populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Txn,
    Add,
    Remove,
    Metadata,
    Protocol,
    Sidecar,
}

impl ActionKind {
    /// The name of the checkpoint column holding this action kind
    pub fn column_name(&self) -> &'static str {
        match self {
            ActionKind::Txn => TXN_NAME,
            ActionKind::Add => ADD_NAME,
            ActionKind::Remove => REMOVE_NAME,
            ActionKind::Metadata => METADATA_NAME,
            ActionKind::Protocol => PROTOCOL_NAME,
            ActionKind::Sidecar => SIDECAR_NAME,
        }
    }

    /// The primitive sub-field the Delta protocol requires to be populated whenever this action
    /// is present in a row. Predicate pushdown filters on this field being non-null.
    pub(crate) fn required_field(&self) -> (&'static str, crate::schema::DataType) {
        use crate::schema::DataType;
        match self {
            ActionKind::Txn => ("version", DataType::LONG),
            ActionKind::Add | ActionKind::Remove | ActionKind::Sidecar => {
                ("path", DataType::STRING)
            }
            ActionKind::Metadata => ("id", DataType::STRING),
            ActionKind::Protocol => ("minReaderVersion", DataType::LONG),
        }
    }
}

/// One typed log entry decoded from a checkpoint row. The variants mirror the one-of-N shape of
/// the on-disk row: a tagged union over the action kinds rather than a class hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointEntry {
    Txn(SetTransaction),
    Add(Box<Add>),
    Remove(Remove),
    Metadata(Metadata),
    Protocol(Protocol),
    Sidecar(Sidecar),
}

impl CheckpointEntry {
    /// The action kind of this entry
    pub fn kind(&self) -> ActionKind {
        match self {
            CheckpointEntry::Txn(_) => ActionKind::Txn,
            CheckpointEntry::Add(_) => ActionKind::Add,
            CheckpointEntry::Remove(_) => ActionKind::Remove,
            CheckpointEntry::Metadata(_) => ActionKind::Metadata,
            CheckpointEntry::Protocol(_) => ActionKind::Protocol,
            CheckpointEntry::Sidecar(_) => ActionKind::Sidecar,
        }
    }

    /// This entry's [`Add`], if it is one
    pub fn as_add(&self) -> Option<&Add> {
        match self {
            CheckpointEntry::Add(add) => Some(add),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Format {
    /// Name of the encoding for files in this table
    pub provider: String,
    /// A map containing configuration options for the format
    pub options: HashMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: String::from("parquet"),
            options: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Unique identifier for this table
    pub id: String,
    /// User-provided identifier for this table
    pub name: Option<String>,
    /// User-provided description for this table
    pub description: Option<String>,
    /// Specification of the encoding for the files stored in the table
    pub format: Format,
    /// Schema of the table, serialized as a JSON string
    pub schema_string: String,
    /// Column names by which the data should be partitioned
    pub partition_columns: Vec<String>,
    /// Configuration options for the metadata action
    pub configuration: HashMap<String, String>,
    /// The time when this metadata action is created, in milliseconds since the Unix epoch
    pub created_time: Option<i64>,
}

impl Metadata {
    /// Parse the table schema embedded in this metadata action
    pub fn parse_schema(&self) -> DeltaResult<StructType> {
        Ok(serde_json::from_str(&self.schema_string)?)
    }
}

/// True when the table described by `metadata` and `protocol` has deletion vectors active,
/// either through the table property or through the reader feature list.
pub fn is_deletion_vector_enabled(metadata: &Metadata, protocol: &Protocol) -> bool {
    metadata
        .configuration
        .get(ENABLE_DELETION_VECTORS_KEY)
        .is_some_and(|v| v == "true")
        || protocol.has_reader_feature(DELETION_VECTORS_FEATURE_NAME)
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// The minimum version of the Delta read protocol that a client must implement
    /// in order to correctly read this table
    pub min_reader_version: i32,
    /// The minimum version of the Delta write protocol that a client must implement
    /// in order to correctly write this table
    pub min_writer_version: i32,
    /// A collection of features that a client must implement in order to correctly
    /// read this table (exist only when minReaderVersion is set to 3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<HashSet<String>>,
    /// A collection of features that a client must implement in order to correctly
    /// write this table (exist only when minWriterVersion is set to 7)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<HashSet<String>>,
}

impl Protocol {
    /// True if this protocol has the requested reader feature
    pub fn has_reader_feature(&self, feature: &str) -> bool {
        self.reader_features
            .as_ref()
            .is_some_and(|features| features.contains(feature))
    }

    /// True if this protocol has the requested writer feature
    pub fn has_writer_feature(&self, feature: &str) -> bool {
        self.writer_features
            .as_ref()
            .is_some_and(|features| features.contains(feature))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Add {
    /// A relative path to a data file from the root of the table or an absolute path to a file
    /// that should be added to the table. The path is a URI as specified by
    /// [RFC 2396 URI Generic Syntax], which needs to be decoded to get the data file path.
    ///
    /// [RFC 2396 URI Generic Syntax]: https://www.ietf.org/rfc/rfc2396.txt
    pub path: String,

    /// A map from partition column to value for this logical file. Entries whose value is null
    /// are dropped from this map; see [`Add::canonical_partition_values`] for the null-preserving
    /// form.
    pub partition_values: HashMap<String, String>,

    /// The partition values of this file in canonical form: empty and null raw values both
    /// canonicalize to `None`. This is the map the partition constraint is evaluated against.
    pub canonical_partition_values: HashMap<String, Option<String>>,

    /// The size of this data file in bytes
    pub size: i64,

    /// The time this logical file was created, as milliseconds since the epoch
    pub modification_time: i64,

    /// When `false` the logical file must already be present in the table or the records
    /// in the added file must be contained in one or more remove actions in the same version
    pub data_change: bool,

    /// Per-file statistics encoded as a JSON string. Only populated when the checkpoint carries
    /// no `stats_parsed` column for this file.
    pub stats: Option<String>,

    /// Fully-typed per-file statistics decoded from the `stats_parsed` checkpoint column
    pub parsed_stats: Option<ParquetFileStatistics>,

    /// Map containing metadata about this logical file
    pub tags: HashMap<String, String>,

    /// Information about the deletion vector (DV) associated with this add action, parsed only
    /// when the table has deletion vectors enabled
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Remove {
    /// A relative path to a data file from the root of the table or an absolute path to a file
    /// that should be removed from the table
    pub path: String,

    /// A map from partition column to value for this logical file
    pub partition_values: HashMap<String, String>,

    /// The time the deletion occurred, as milliseconds since the epoch
    pub deletion_timestamp: i64,

    /// When `false` the records in the removed file must be contained in one or more add actions
    /// in the same version
    pub data_change: bool,

    /// Information about the deletion vector (DV) associated with this remove action, parsed only
    /// when the table has deletion vectors enabled
    pub deletion_vector: Option<DeletionVectorDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sidecar {
    /// The path of the sidecar file, relative to the `_delta_log/_sidecars` directory
    pub path: String,

    /// The size of the sidecar file in bytes
    pub size_in_bytes: i64,

    /// The time this sidecar file was last modified, as milliseconds since the epoch
    pub modification_time: i64,

    /// Map containing metadata about this sidecar file
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetTransaction {
    /// A unique identifier for the application performing the transaction
    pub app_id: String,

    /// An application-specific numeric identifier for this transaction
    pub version: i64,

    /// The time when this transaction action was created, in milliseconds since the Unix epoch
    pub last_updated: i64,
}

/// Canonicalize raw partition values: empty and null raw values both map to `None`, everything
/// else is kept as-is. This is the form partition constraints are evaluated against.
pub fn canonicalize_partition_values(
    partition_values: &HashMap<String, Option<String>>,
) -> HashMap<String, Option<String>> {
    partition_values
        .iter()
        .map(|(key, value)| {
            let canonical = value.as_ref().filter(|v| !v.is_empty()).cloned();
            (key.clone(), canonical)
        })
        .collect()
}

/// Materialize a raw string map into one without null values, dropping entries whose value
/// is null.
pub(crate) fn materialize_string_map(
    map: HashMap<String, Option<String>>,
) -> HashMap<String, String> {
    map.into_iter()
        .filter_map(|(key, value)| Some((key, value?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_partition_values() {
        let raw = HashMap::from([
            ("a".to_string(), Some("1".to_string())),
            ("b".to_string(), Some(String::new())),
            ("c".to_string(), None),
        ]);
        let canonical = canonicalize_partition_values(&raw);
        assert_eq!(canonical["a"], Some("1".to_string()));
        assert_eq!(canonical["b"], None);
        assert_eq!(canonical["c"], None);

        let materialized = materialize_string_map(raw);
        assert_eq!(
            materialized,
            HashMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), String::new())])
        );
    }

    #[test]
    fn test_deletion_vector_enabled() {
        let mut metadata = Metadata::default();
        let mut protocol = Protocol {
            min_reader_version: 1,
            min_writer_version: 2,
            ..Default::default()
        };
        assert!(!is_deletion_vector_enabled(&metadata, &protocol));

        metadata.configuration.insert(
            ENABLE_DELETION_VECTORS_KEY.to_string(),
            "true".to_string(),
        );
        assert!(is_deletion_vector_enabled(&metadata, &protocol));

        metadata.configuration.clear();
        protocol.min_reader_version = 3;
        protocol.reader_features = Some(HashSet::from([DELETION_VECTORS_FEATURE_NAME.to_string()]));
        assert!(is_deletion_vector_enabled(&metadata, &protocol));
    }

    #[test]
    fn test_parse_schema() {
        let metadata = Metadata {
            id: "testId".to_string(),
            schema_string: r#"{"type":"struct","fields":[{"name":"value","type":"integer","nullable":true,"metadata":{}}]}"#.to_string(),
            ..Default::default()
        };
        let schema = metadata.parse_schema().unwrap();
        assert_eq!(schema.num_fields(), 1);
        assert!(schema.field("value").is_some());
    }
}
