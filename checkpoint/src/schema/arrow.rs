//! Conversions from checkpoint schema types to arrow schema types.

use std::sync::Arc;

use arrow::datatypes::{
    DataType as ArrowDataType, Field as ArrowField, Fields, Schema as ArrowSchema, TimeUnit,
};
use arrow::error::ArrowError;
use itertools::Itertools;

use super::{ArrayType, DataType, MapType, PrimitiveType, StructField, StructType};

pub(crate) const LIST_ARRAY_ROOT: &str = "element";
pub(crate) const MAP_ROOT_DEFAULT: &str = "key_value";
pub(crate) const MAP_KEY_DEFAULT: &str = "key";
pub(crate) const MAP_VALUE_DEFAULT: &str = "value";

impl TryFrom<&StructType> for ArrowSchema {
    type Error = ArrowError;

    fn try_from(s: &StructType) -> Result<Self, ArrowError> {
        let fields: Vec<ArrowField> = s.fields().map(TryInto::try_into).try_collect()?;
        Ok(ArrowSchema::new(fields))
    }
}

impl TryFrom<&StructField> for ArrowField {
    type Error = ArrowError;

    fn try_from(f: &StructField) -> Result<Self, ArrowError> {
        let metadata = f
            .metadata()
            .iter()
            .map(|(key, val)| (key.clone(), val.to_string()))
            .collect();
        let field = ArrowField::new(f.name(), ArrowDataType::try_from(f.data_type())?, f.nullable)
            .with_metadata(metadata);
        Ok(field)
    }
}

impl TryFrom<&ArrayType> for ArrowField {
    type Error = ArrowError;

    fn try_from(a: &ArrayType) -> Result<Self, ArrowError> {
        Ok(ArrowField::new(
            LIST_ARRAY_ROOT,
            ArrowDataType::try_from(&a.element_type)?,
            a.contains_null,
        ))
    }
}

impl TryFrom<&MapType> for ArrowField {
    type Error = ArrowError;

    fn try_from(m: &MapType) -> Result<Self, ArrowError> {
        let entries = ArrowField::new(
            MAP_ROOT_DEFAULT,
            ArrowDataType::Struct(Fields::from(vec![
                ArrowField::new(
                    MAP_KEY_DEFAULT,
                    ArrowDataType::try_from(&m.key_type)?,
                    false,
                ),
                ArrowField::new(
                    MAP_VALUE_DEFAULT,
                    ArrowDataType::try_from(&m.value_type)?,
                    m.value_contains_null,
                ),
            ])),
            false,
        );
        Ok(entries)
    }
}

impl TryFrom<&DataType> for ArrowDataType {
    type Error = ArrowError;

    fn try_from(t: &DataType) -> Result<Self, ArrowError> {
        match t {
            DataType::Primitive(p) => Ok(match p {
                PrimitiveType::String => ArrowDataType::Utf8,
                PrimitiveType::Long => ArrowDataType::Int64,
                PrimitiveType::Integer => ArrowDataType::Int32,
                PrimitiveType::Short => ArrowDataType::Int16,
                PrimitiveType::Byte => ArrowDataType::Int8,
                PrimitiveType::Float => ArrowDataType::Float32,
                PrimitiveType::Double => ArrowDataType::Float64,
                PrimitiveType::Boolean => ArrowDataType::Boolean,
                PrimitiveType::Binary => ArrowDataType::Binary,
                PrimitiveType::Date => ArrowDataType::Date32,
                // Delta timestamps are stored as microseconds since epoch, UTC-adjusted
                PrimitiveType::Timestamp => {
                    ArrowDataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
                }
                PrimitiveType::TimestampNtz => {
                    ArrowDataType::Timestamp(TimeUnit::Microsecond, None)
                }
                PrimitiveType::Decimal(precision, scale) => {
                    ArrowDataType::Decimal128(*precision, *scale as i8)
                }
            }),
            DataType::Struct(s) => {
                let fields: Vec<ArrowField> = s.fields().map(TryInto::try_into).try_collect()?;
                Ok(ArrowDataType::Struct(fields.into()))
            }
            DataType::Array(a) => Ok(ArrowDataType::List(Arc::new(a.as_ref().try_into()?))),
            DataType::Map(m) => Ok(ArrowDataType::Map(Arc::new(m.as_ref().try_into()?), false)),
        }
    }
}
