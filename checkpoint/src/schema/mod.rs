//! Definitions and functions to create and manipulate checkpoint row schemas.
//!
//! The types here model the subset of the Delta logical type system that can appear inside a
//! checkpoint row: primitives, structs, arrays, and maps. [`StructType`] keeps its fields in an
//! insertion-ordered map so that field lookup is by *name* with a precomputed name→ordinal index,
//! never by position. The serde implementations speak the Delta table schema-string JSON
//! (`{"type":"struct","fields":[...]}`), which is how [`crate::actions::Metadata::parse_schema`]
//! recovers the table schema embedded in a `metadata` action.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{DeltaResult, Error};

pub(crate) mod arrow;

/// A reference counted [`StructType`]
pub type SchemaRef = Arc<StructType>;

/// Convenient name for a top-level row schema
pub type Schema = StructType;

/// The metadata key under which column mapping stores the physical column name.
pub(crate) const COLUMN_MAPPING_PHYSICAL_NAME_KEY: &str = "delta.columnMapping.physicalName";

/// A value that can appear in the `metadata` attribute of a [`StructField`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Number(i64),
    String(String),
    Boolean(bool),
    Other(serde_json::Value),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Number(n) => write!(f, "{n}"),
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Boolean(b) => write!(f, "{b}"),
            MetadataValue::Other(v) => write!(f, "{v}"),
        }
    }
}

/// Represents a struct field defined in a row schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructField {
    /// Name of this (possibly nested) column
    pub name: String,
    /// The data type of this field
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Denotes whether this field can be null
    pub nullable: bool,
    /// A JSON map containing information about this column
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
}

impl StructField {
    /// Creates a new nullable field
    pub fn nullable(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        StructField {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            metadata: HashMap::new(),
        }
    }

    /// Creates a new non-nullable field
    pub fn not_null(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        StructField {
            name: name.into(),
            data_type: data_type.into(),
            nullable: false,
            metadata: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn metadata(&self) -> &HashMap<String, MetadataValue> {
        &self.metadata
    }

    /// The physical name of the column: the column-mapping name when the table has one in the
    /// field metadata, the logical name otherwise.
    pub fn physical_name(&self) -> &str {
        match self.metadata.get(COLUMN_MAPPING_PHYSICAL_NAME_KEY) {
            Some(MetadataValue::String(name)) => name,
            _ => &self.name,
        }
    }
}

/// A struct is used to represent both the top-level schema of the table as well as struct columns
/// that contain nested columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    #[serde(rename = "type")]
    type_name: SchemaTypeName,
    /// The fields of this struct, in declaration order. An [`IndexMap`] preserves that order
    /// while providing O(1) by-name lookup, so field access never depends on ordinals.
    #[serde(
        serialize_with = "serialize_struct_fields",
        deserialize_with = "deserialize_struct_fields"
    )]
    fields: IndexMap<String, StructField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum SchemaTypeName {
    #[serde(rename = "struct")]
    Struct,
}

fn serialize_struct_fields<S: Serializer>(
    fields: &IndexMap<String, StructField>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(fields.values())
}

fn deserialize_struct_fields<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<IndexMap<String, StructField>, D::Error> {
    let fields = Vec::<StructField>::deserialize(deserializer)?;
    Ok(fields.into_iter().map(|f| (f.name.clone(), f)).collect())
}

impl StructType {
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        StructType {
            type_name: SchemaTypeName::Struct,
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }

    /// Get a [`StructField`] by name
    pub fn field(&self, name: impl AsRef<str>) -> Option<&StructField> {
        self.fields.get(name.as_ref())
    }

    /// Get a [`StructField`] by name, or a schema error naming the missing field
    pub fn field_or_err(&self, name: impl AsRef<str>) -> DeltaResult<&StructField> {
        let name = name.as_ref();
        self.field(name)
            .ok_or_else(|| Error::schema(format!("No field named {name}")))
    }

    /// The ordinal of the named field in declaration order, if present
    pub fn index_of(&self, name: impl AsRef<str>) -> Option<usize> {
        self.fields.get_index_of(name.as_ref())
    }

    /// An iterator over the fields of this struct in declaration order
    pub fn fields(&self) -> impl Iterator<Item = &StructField> {
        self.fields.values()
    }

    /// The number of fields declared by this struct
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }
}

/// An array stores a variable length collection of items of some type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayType {
    #[serde(rename = "type")]
    type_name: ArrayTypeName,
    /// The type of element stored in this array
    pub element_type: DataType,
    /// Denoting whether this array can contain one or more null values
    pub contains_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ArrayTypeName {
    #[serde(rename = "array")]
    Array,
}

impl ArrayType {
    pub fn new(element_type: DataType, contains_null: bool) -> Self {
        ArrayType {
            type_name: ArrayTypeName::Array,
            element_type,
            contains_null,
        }
    }
}

/// A map stores an arbitrary length collection of key-value pairs with a single key type and a
/// single value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapType {
    #[serde(rename = "type")]
    type_name: MapTypeName,
    /// The type of element used for the key of this map
    pub key_type: DataType,
    /// The type of element used for the value of this map
    pub value_type: DataType,
    /// Denoting whether this map can contain one or more null values
    #[serde(default = "default_true")]
    pub value_contains_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum MapTypeName {
    #[serde(rename = "map")]
    Map,
}

fn default_true() -> bool {
    true
}

impl MapType {
    pub fn new(key_type: DataType, value_type: DataType, value_contains_null: bool) -> Self {
        MapType {
            type_name: MapTypeName::Map,
            key_type,
            value_type,
            value_contains_null,
        }
    }
}

/// Primitive non-nested types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrimitiveType {
    /// UTF-8 encoded string of characters
    String,
    /// 8-byte signed integer
    Long,
    /// 4-byte signed integer
    Integer,
    /// 2-byte signed integer
    Short,
    /// 1-byte signed integer
    Byte,
    /// 4-byte single-precision floating-point number
    Float,
    /// 8-byte double-precision floating-point number
    Double,
    /// `true` or `false`
    Boolean,
    /// A sequence of binary data
    Binary,
    /// A calendar date, represented as a year-month-day triple without a timezone
    Date,
    /// Microsecond precision timestamp, adjusted to UTC
    Timestamp,
    /// Microsecond precision timestamp with no timezone
    #[serde(rename = "timestamp_ntz")]
    TimestampNtz,
    /// Fixed precision decimal, with the given precision and scale
    #[serde(
        serialize_with = "serialize_decimal",
        deserialize_with = "deserialize_decimal",
        untagged
    )]
    Decimal(u8, u8),
}

fn serialize_decimal<S: Serializer>(
    precision: &u8,
    scale: &u8,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("decimal({precision},{scale})"))
}

fn deserialize_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<(u8, u8), D::Error> {
    let str_value = String::deserialize(deserializer)?;
    parse_decimal(&str_value).map_err(serde::de::Error::custom)
}

fn parse_decimal(value: &str) -> Result<(u8, u8), String> {
    let content = value
        .strip_prefix("decimal(")
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| format!("Invalid decimal type: {value}"))?;
    let mut parts = content.split(',');
    let parse_part = |part: Option<&str>| {
        part.and_then(|p| u8::from_str(p.trim()).ok())
            .ok_or_else(|| format!("Invalid decimal type: {value}"))
    };
    let precision = parse_part(parts.next())?;
    let scale = parse_part(parts.next())?;
    if parts.next().is_some() || precision < scale || precision > 38 {
        return Err(format!("Invalid decimal type: {value}"));
    }
    Ok((precision, scale))
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Integer => write!(f, "integer"),
            PrimitiveType::Short => write!(f, "short"),
            PrimitiveType::Byte => write!(f, "byte"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Binary => write!(f, "binary"),
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::TimestampNtz => write!(f, "timestamp_ntz"),
            PrimitiveType::Decimal(precision, scale) => {
                write!(f, "decimal({precision},{scale})")
            }
        }
    }
}

/// The data type of a column in a checkpoint row or a table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum DataType {
    /// UTF-8 encoded string of characters, numeric types, dates and timestamps
    Primitive(PrimitiveType),
    /// An array of elements
    Array(Box<ArrayType>),
    /// A nested row
    Struct(Box<StructType>),
    /// A map of keys to values
    Map(Box<MapType>),
}

impl From<PrimitiveType> for DataType {
    fn from(value: PrimitiveType) -> Self {
        DataType::Primitive(value)
    }
}

impl From<ArrayType> for DataType {
    fn from(value: ArrayType) -> Self {
        DataType::Array(Box::new(value))
    }
}

impl From<StructType> for DataType {
    fn from(value: StructType) -> Self {
        DataType::Struct(Box::new(value))
    }
}

impl From<MapType> for DataType {
    fn from(value: MapType) -> Self {
        DataType::Map(Box::new(value))
    }
}

impl DataType {
    pub const STRING: Self = DataType::Primitive(PrimitiveType::String);
    pub const LONG: Self = DataType::Primitive(PrimitiveType::Long);
    pub const INTEGER: Self = DataType::Primitive(PrimitiveType::Integer);
    pub const SHORT: Self = DataType::Primitive(PrimitiveType::Short);
    pub const BYTE: Self = DataType::Primitive(PrimitiveType::Byte);
    pub const FLOAT: Self = DataType::Primitive(PrimitiveType::Float);
    pub const DOUBLE: Self = DataType::Primitive(PrimitiveType::Double);
    pub const BOOLEAN: Self = DataType::Primitive(PrimitiveType::Boolean);
    pub const BINARY: Self = DataType::Primitive(PrimitiveType::Binary);
    pub const DATE: Self = DataType::Primitive(PrimitiveType::Date);
    pub const TIMESTAMP: Self = DataType::Primitive(PrimitiveType::Timestamp);
    pub const TIMESTAMP_NTZ: Self = DataType::Primitive(PrimitiveType::TimestampNtz);

    /// Create a new struct data type from the given fields
    pub fn struct_type(fields: impl IntoIterator<Item = StructField>) -> Self {
        StructType::new(fields).into()
    }

    /// This type as a [`PrimitiveType`], if it is one
    pub fn as_primitive_opt(&self) -> Option<&PrimitiveType> {
        match self {
            DataType::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// This type as a [`StructType`], if it is one
    pub fn as_struct_opt(&self) -> Option<&StructType> {
        match self {
            DataType::Struct(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Primitive(p) => write!(f, "{p}"),
            DataType::Array(a) => write!(f, "array<{}>", a.element_type),
            DataType::Struct(s) => {
                write!(f, "struct<")?;
                for (i, field) in s.fields().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, ">")
            }
            DataType::Map(m) => write!(f, "map<{}, {}>", m.key_type, m.value_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_data_types() {
        let data = r#"
        {
            "name": "a",
            "type": "integer",
            "nullable": false,
            "metadata": {}
        }
        "#;
        let field: StructField = serde_json::from_str(data).unwrap();
        assert!(matches!(
            field.data_type,
            DataType::Primitive(PrimitiveType::Integer)
        ));

        let data = r#"
        {
            "name": "c",
            "type": {
                "type": "array",
                "elementType": "integer",
                "containsNull": false
            },
            "nullable": true,
            "metadata": {}
        }
        "#;
        let field: StructField = serde_json::from_str(data).unwrap();
        assert!(matches!(field.data_type, DataType::Array(_)));

        let data = r#"
        {
            "name": "e",
            "type": {
                "type": "map",
                "keyType": "string",
                "valueType": "string",
                "valueContainsNull": true
            },
            "nullable": true,
            "metadata": {}
        }
        "#;
        let field: StructField = serde_json::from_str(data).unwrap();
        assert!(matches!(field.data_type, DataType::Map(_)));
    }

    #[test]
    fn test_roundtrip_schema_string() {
        let data = r#"{"type":"struct","fields":[{"name":"event_time","type":"timestamp","nullable":true,"metadata":{}},{"name":"country","type":"string","nullable":true,"metadata":{}}]}"#;
        let schema: StructType = serde_json::from_str(data).unwrap();
        assert_eq!(schema.num_fields(), 2);
        assert_eq!(
            schema.field("event_time").unwrap().data_type,
            DataType::TIMESTAMP
        );
        assert_eq!(schema.index_of("country"), Some(1));

        let serialized = serde_json::to_string(&schema).unwrap();
        assert_eq!(serialized, data);
    }

    #[test]
    fn test_decimal_serde() {
        let data = r#"{"name":"d","type":"decimal(10,2)","nullable":true,"metadata":{}}"#;
        let field: StructField = serde_json::from_str(data).unwrap();
        assert_eq!(
            field.data_type,
            DataType::Primitive(PrimitiveType::Decimal(10, 2))
        );
        assert_eq!(serde_json::to_string(&field).unwrap(), data);

        assert!(serde_json::from_str::<StructField>(
            r#"{"name":"d","type":"decimal(2,10)","nullable":true,"metadata":{}}"#
        )
        .is_err());
    }

    #[test]
    fn test_physical_name() {
        let mut field = StructField::nullable("logical", DataType::STRING);
        assert_eq!(field.physical_name(), "logical");
        field.metadata.insert(
            COLUMN_MAPPING_PHYSICAL_NAME_KEY.to_string(),
            MetadataValue::String("col-1234".to_string()),
        );
        assert_eq!(field.physical_name(), "col-1234");
    }
}
