//! By-name typed field access over one materialized checkpoint row.
//!
//! A [`CheckpointFieldReader`] wraps a row position of a [`StructArray`] together with the row's
//! declared schema. Every accessor looks fields up by *name*: asking for a field the declared
//! schema does not know is a schema error, while a field that is declared but physically absent
//! from the file reads as null. Ordinal changes in the parquet layout are therefore tolerated.

use std::collections::{HashMap, HashSet};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, ListArray, MapArray, StringArray, StructArray,
    TimestampMicrosecondArray,
};

use crate::expressions::{Scalar, StructData};
use crate::schema::{DataType, PrimitiveType, StructType};
use crate::{DeltaResult, Error};

pub(crate) struct CheckpointFieldReader<'a> {
    row: &'a StructArray,
    position: usize,
    schema: &'a StructType,
}

fn downcast<'a, T: Array + 'static>(array: &'a dyn Array, field_name: &str) -> DeltaResult<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::unexpected_column_type(format!(
            "Field {field_name} is not of the expected type (found {})",
            array.data_type()
        ))
    })
}

impl<'a> CheckpointFieldReader<'a> {
    pub(crate) fn new(row: &'a StructArray, position: usize, schema: &'a StructType) -> Self {
        CheckpointFieldReader {
            row,
            position,
            schema,
        }
    }

    /// Look up the named column. The name must exist in the declared schema; a declared field
    /// that is physically absent from the materialized row reads as `None`.
    fn column(&self, name: &str) -> DeltaResult<Option<&'a ArrayRef>> {
        self.schema.field_or_err(name)?;
        Ok(self
            .row
            .column_by_name(name)
            .filter(|column| !column.is_null(self.position)))
    }

    fn required(&self, name: &str) -> DeltaResult<&'a ArrayRef> {
        self.column(name)?
            .ok_or_else(|| Error::missing_data(format!("Data missing for field {name}")))
    }

    pub(crate) fn get_string(&self, name: &str) -> DeltaResult<String> {
        let column = downcast::<StringArray>(self.required(name)?, name)?;
        Ok(column.value(self.position).to_string())
    }

    pub(crate) fn get_optional_string(&self, name: &str) -> DeltaResult<Option<String>> {
        match self.column(name)? {
            Some(column) => {
                let column = downcast::<StringArray>(column, name)?;
                Ok(Some(column.value(self.position).to_string()))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn get_long(&self, name: &str) -> DeltaResult<i64> {
        let column = downcast::<Int64Array>(self.required(name)?, name)?;
        Ok(column.value(self.position))
    }

    pub(crate) fn get_optional_long(&self, name: &str) -> DeltaResult<Option<i64>> {
        match self.column(name)? {
            Some(column) => Ok(Some(downcast::<Int64Array>(column, name)?.value(self.position))),
            None => Ok(None),
        }
    }

    pub(crate) fn get_int(&self, name: &str) -> DeltaResult<i32> {
        let column = downcast::<Int32Array>(self.required(name)?, name)?;
        Ok(column.value(self.position))
    }

    pub(crate) fn get_optional_int(&self, name: &str) -> DeltaResult<Option<i32>> {
        match self.column(name)? {
            Some(column) => Ok(Some(downcast::<Int32Array>(column, name)?.value(self.position))),
            None => Ok(None),
        }
    }

    pub(crate) fn get_boolean(&self, name: &str) -> DeltaResult<bool> {
        let column = downcast::<BooleanArray>(self.required(name)?, name)?;
        Ok(column.value(self.position))
    }

    /// Read a `map<string, string>` field, preserving null values. Fails when the field is null.
    pub(crate) fn get_map(&self, name: &str) -> DeltaResult<HashMap<String, Option<String>>> {
        self.get_optional_map(name)?
            .ok_or_else(|| Error::missing_data(format!("Data missing for field {name}")))
    }

    /// Read a `map<string, string>` field, preserving null values; `None` when the field is null.
    pub(crate) fn get_optional_map(
        &self,
        name: &str,
    ) -> DeltaResult<Option<HashMap<String, Option<String>>>> {
        let Some(column) = self.column(name)? else {
            return Ok(None);
        };
        let map = downcast::<MapArray>(column, name)?;
        let keys = downcast::<StringArray>(map.keys().as_ref(), name)?;
        let values = downcast::<StringArray>(map.values().as_ref(), name)?;
        let start = map.value_offsets()[self.position] as usize;
        let end = map.value_offsets()[self.position + 1] as usize;
        let mut result = HashMap::with_capacity(end - start);
        for i in start..end {
            let value = (!values.is_null(i)).then(|| values.value(i).to_string());
            result.insert(keys.value(i).to_string(), value);
        }
        Ok(Some(result))
    }

    /// Read a `list<string>` field. Fails when the field is null.
    pub(crate) fn get_list(&self, name: &str) -> DeltaResult<Vec<String>> {
        let column = downcast::<ListArray>(self.required(name)?, name)?;
        let values = column.value(self.position);
        let values = downcast::<StringArray>(values.as_ref(), name)?;
        Ok(values.iter().flatten().map(ToString::to_string).collect())
    }

    /// Read a `list<string>` field into a set; `None` when the field is null.
    pub(crate) fn get_optional_set(&self, name: &str) -> DeltaResult<Option<HashSet<String>>> {
        let Some(column) = self.column(name)? else {
            return Ok(None);
        };
        let column = downcast::<ListArray>(column, name)?;
        let values = column.value(self.position);
        let values = downcast::<StringArray>(values.as_ref(), name)?;
        Ok(Some(
            values.iter().flatten().map(ToString::to_string).collect(),
        ))
    }

    /// Read a nested row field; `None` when the field is null or physically absent.
    pub(crate) fn get_row(&self, name: &str) -> DeltaResult<Option<&'a StructArray>> {
        match self.column(name)? {
            Some(column) => Ok(Some(downcast::<StructArray>(column, name)?)),
            None => Ok(None),
        }
    }
}

/// Copy the value of a primitive or nested-row column at `position` into a [`Scalar`], matching
/// the declared type. Nested rows are copied verbatim, nulls included.
pub(crate) fn scalar_from_array(
    array: &dyn Array,
    position: usize,
    data_type: &DataType,
) -> DeltaResult<Scalar> {
    if array.is_null(position) {
        return Ok(Scalar::Null(data_type.clone()));
    }
    let type_err = || {
        Error::unexpected_column_type(format!(
            "Cannot read {} as {data_type}",
            array.data_type()
        ))
    };
    let value = match data_type {
        DataType::Primitive(p) => match p {
            PrimitiveType::String => Scalar::String(
                downcast::<StringArray>(array, "value")?
                    .value(position)
                    .to_string(),
            ),
            PrimitiveType::Long => {
                Scalar::Long(downcast::<Int64Array>(array, "value")?.value(position))
            }
            PrimitiveType::Integer => {
                Scalar::Integer(downcast::<Int32Array>(array, "value")?.value(position))
            }
            PrimitiveType::Short => {
                Scalar::Short(downcast::<Int16Array>(array, "value")?.value(position))
            }
            PrimitiveType::Byte => {
                Scalar::Byte(downcast::<Int8Array>(array, "value")?.value(position))
            }
            PrimitiveType::Float => {
                Scalar::Float(downcast::<Float32Array>(array, "value")?.value(position))
            }
            PrimitiveType::Double => {
                Scalar::Double(downcast::<Float64Array>(array, "value")?.value(position))
            }
            PrimitiveType::Boolean => {
                Scalar::Boolean(downcast::<BooleanArray>(array, "value")?.value(position))
            }
            PrimitiveType::Date => {
                Scalar::Date(downcast::<Date32Array>(array, "value")?.value(position))
            }
            PrimitiveType::Timestamp => Scalar::Timestamp(
                downcast::<TimestampMicrosecondArray>(array, "value")?.value(position),
            ),
            PrimitiveType::TimestampNtz => Scalar::TimestampNtz(
                downcast::<TimestampMicrosecondArray>(array, "value")?.value(position),
            ),
            PrimitiveType::Decimal(precision, scale) => Scalar::Decimal(
                downcast::<Decimal128Array>(array, "value")?.value(position),
                *precision,
                *scale,
            ),
            PrimitiveType::Binary => return Err(type_err()),
        },
        DataType::Struct(declared) => {
            let row = downcast::<StructArray>(array, "value")?;
            let mut values = Vec::with_capacity(declared.num_fields());
            for field in declared.fields() {
                let value = match row.column_by_name(field.physical_name()) {
                    Some(child) => scalar_from_array(child, position, field.data_type())?,
                    None => Scalar::Null(field.data_type().clone()),
                };
                values.push(value);
            }
            Scalar::Struct(StructData::new(declared.fields().cloned().collect(), values))
        }
        DataType::Map(_) | DataType::Array(_) => return Err(type_err()),
    };
    Ok(value)
}
