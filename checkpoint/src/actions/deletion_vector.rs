//! The deletion vector descriptor carried by `add` and `remove` actions.

/// Describes where a deletion vector is stored and how large it is. Decoding the vector's
/// content is the concern of a table reader, not of the checkpoint log; only the descriptor
/// row is materialized here. The descriptor sub-row always has exactly these five fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionVectorDescriptor {
    /// A single character to indicate how to access the DV. Legal options are: `['u', 'i', 'p']`.
    pub storage_type: String,

    /// Either the (possibly prefixed) base85-encoded file id of the DV file, the inline encoded
    /// DV data, or an absolute DV file path, depending on `storage_type`.
    pub path_or_inline_dv: String,

    /// Start of the data for this DV in number of bytes from the beginning of the file it is
    /// stored in. Always absent when the DV is stored inline.
    pub offset: Option<i32>,

    /// Size of the serialized DV in bytes
    pub size_in_bytes: i32,

    /// Number of rows the given DV logically removes from the file
    pub cardinality: i64,
}

impl DeletionVectorDescriptor {
    /// A string that uniquely identifies the deletion vector within the table
    pub fn unique_id(&self) -> String {
        match self.offset {
            Some(offset) => format!("{}{}@{offset}", self.storage_type, self.path_or_inline_dv),
            None => format!("{}{}", self.storage_type, self.path_or_inline_dv),
        }
    }
}
