//! Scalar values, column names, and the value-domain types used to prune checkpoint rows.
//!
//! A [`TupleDomain`] is a conjunction of per-column [`Domain`]s. The checkpoint reader uses tuple
//! domains in two places: a disjunction of per-action tuple domains is pushed into the parquet
//! reader to skip whole row groups, and the caller's partition constraint is re-evaluated row by
//! row against the canonical partition values of each `add` entry, because footer statistics can
//! only reject entire row groups.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Formatter;

use chrono::{NaiveDate, NaiveDateTime};

use crate::schema::{DataType, PrimitiveType, StructField};
use crate::{DeltaResult, Error};

/// A (possibly nested) column name, stored as the path of field names from the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnName {
    path: Vec<String>,
}

impl ColumnName {
    pub fn new(path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ColumnName {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The leaf (last) segment of this column path
    pub fn leaf(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for ColumnName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.join("."))
    }
}

/// A single value, used for partition-value domains and decoded file statistics.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// A string value
    String(String),
    /// A 64bit integer
    Long(i64),
    /// A 32bit integer
    Integer(i32),
    /// A 16bit integer
    Short(i16),
    /// An 8bit integer
    Byte(i8),
    /// A 32bit floating point number
    Float(f32),
    /// A 64bit floating point number
    Double(f64),
    /// A boolean value
    Boolean(bool),
    /// Binary data
    Binary(Vec<u8>),
    /// Days since the unix epoch
    Date(i32),
    /// Microseconds since the unix epoch, adjusted to UTC
    Timestamp(i64),
    /// Microseconds since the unix epoch, with no timezone
    TimestampNtz(i64),
    /// A decimal value with unscaled value, precision, and scale
    Decimal(i128, u8, u8),
    /// A nested row value, copied verbatim from the checkpoint (row-typed statistics carried
    /// through for checkpoint rewriting)
    Struct(StructData),
    /// A null value with its type
    Null(DataType),
}

/// The data for a [`Scalar::Struct`] value: the declared fields and one value per field.
#[derive(Debug, Clone, PartialEq)]
pub struct StructData {
    fields: Vec<StructField>,
    values: Vec<Scalar>,
}

impl StructData {
    pub(crate) fn new(fields: Vec<StructField>, values: Vec<Scalar>) -> Self {
        StructData { fields, values }
    }

    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null(_))
    }

    /// Compare two scalars of the same variant. Returns `None` for mismatched variants, nulls,
    /// and values without a total order.
    fn partial_cmp_same_type(&self, other: &Scalar) -> Option<Ordering> {
        use Scalar::*;
        match (self, other) {
            (String(a), String(b)) => a.partial_cmp(b),
            (Long(a), Long(b)) => a.partial_cmp(b),
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Short(a), Short(b)) => a.partial_cmp(b),
            (Byte(a), Byte(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Binary(a), Binary(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (TimestampNtz(a), TimestampNtz(b)) => a.partial_cmp(b),
            (Decimal(a, _, sa), Decimal(b, _, sb)) if sa == sb => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.partial_cmp_same_type(other)
    }
}

/// Parse a raw partition value string into a typed [`Scalar`].
///
/// Follows the Delta protocol's partition value serialization: a missing value is null, and an
/// empty string is null for every type but `string`.
pub fn parse_partition_value(raw: Option<&str>, data_type: &DataType) -> DeltaResult<Scalar> {
    let Some(raw) = raw else {
        return Ok(Scalar::Null(data_type.clone()));
    };
    let Some(primitive) = data_type.as_primitive_opt() else {
        return Err(Error::unexpected_column_type(format!(
            "Unsupported partition column type: {data_type}"
        )));
    };
    if raw.is_empty() && *primitive != PrimitiveType::String {
        return Ok(Scalar::Null(data_type.clone()));
    }
    let parse_err =
        |raw: &str| Error::unexpected_column_type(format!("Invalid {primitive} value: '{raw}'"));
    let value = match primitive {
        PrimitiveType::String => Scalar::String(raw.to_string()),
        PrimitiveType::Long => Scalar::Long(raw.parse().map_err(|_| parse_err(raw))?),
        PrimitiveType::Integer => Scalar::Integer(raw.parse().map_err(|_| parse_err(raw))?),
        PrimitiveType::Short => Scalar::Short(raw.parse().map_err(|_| parse_err(raw))?),
        PrimitiveType::Byte => Scalar::Byte(raw.parse().map_err(|_| parse_err(raw))?),
        PrimitiveType::Float => Scalar::Float(raw.parse().map_err(|_| parse_err(raw))?),
        PrimitiveType::Double => Scalar::Double(raw.parse().map_err(|_| parse_err(raw))?),
        PrimitiveType::Boolean => match raw {
            "true" => Scalar::Boolean(true),
            "false" => Scalar::Boolean(false),
            _ => return Err(parse_err(raw)),
        },
        PrimitiveType::Date => {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| parse_err(raw))?;
            let days = date
                .signed_duration_since(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default())
                .num_days();
            Scalar::Date(i32::try_from(days).map_err(|_| parse_err(raw))?)
        }
        PrimitiveType::Timestamp | PrimitiveType::TimestampNtz => {
            let timestamp = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map_err(|_| parse_err(raw))?;
            let micros = timestamp
                .and_utc()
                .timestamp_micros();
            match primitive {
                PrimitiveType::TimestampNtz => Scalar::TimestampNtz(micros),
                _ => Scalar::Timestamp(micros),
            }
        }
        PrimitiveType::Decimal(precision, scale) => {
            let mut parts = raw.splitn(2, '.');
            let whole = parts.next().unwrap_or_default();
            let fraction = parts.next().unwrap_or_default();
            if fraction.len() > *scale as usize {
                return Err(parse_err(raw));
            }
            let padded = format!("{whole}{fraction:0<width$}", width = *scale as usize);
            let unscaled: i128 = padded.parse().map_err(|_| parse_err(raw))?;
            Scalar::Decimal(unscaled, *precision, *scale)
        }
        PrimitiveType::Binary => {
            return Err(Error::unexpected_column_type(
                "Binary partition columns are not supported",
            ));
        }
    };
    Ok(value)
}

/// The set of values a single column may take.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    /// Any value, including null
    All,
    /// Only the null value
    OnlyNull,
    /// Any non-null value
    NotNull,
    /// One of the given non-null values, plus null when `nullable` is set
    Values { values: Vec<Scalar>, nullable: bool },
}

impl Domain {
    /// A domain containing exactly the given non-null value
    pub fn single_value(value: Scalar) -> Self {
        Domain::Values {
            values: vec![value],
            nullable: false,
        }
    }

    /// A domain containing the given non-null values, plus null when `nullable` is set
    pub fn multiple_values(values: Vec<Scalar>, nullable: bool) -> Self {
        Domain::Values { values, nullable }
    }

    /// Whether the domain admits the given value. [`Scalar::Null`] stands for the null value.
    pub fn contains(&self, value: &Scalar) -> bool {
        match self {
            Domain::All => true,
            Domain::OnlyNull => value.is_null(),
            Domain::NotNull => !value.is_null(),
            Domain::Values { values, nullable } => {
                if value.is_null() {
                    *nullable
                } else {
                    values.contains(value)
                }
            }
        }
    }

    /// Whether the domain admits the null value
    pub(crate) fn contains_null(&self) -> bool {
        match self {
            Domain::All | Domain::OnlyNull => true,
            Domain::NotNull => false,
            Domain::Values { nullable, .. } => *nullable,
        }
    }

    /// How many discrete values the domain enumerates; zero for the open-ended domains
    pub(crate) fn value_count(&self) -> usize {
        match self {
            Domain::Values { values, .. } => values.len(),
            _ => 0,
        }
    }
}

/// The domain of one column, tagged with the column's declared type so that raw partition values
/// can be parsed before the containment check.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDomain {
    pub column: ColumnName,
    pub data_type: DataType,
    pub domain: Domain,
}

impl ColumnDomain {
    pub fn new(column: ColumnName, data_type: DataType, domain: Domain) -> Self {
        ColumnDomain {
            column,
            data_type,
            domain,
        }
    }
}

/// A conjunction of per-column domains. An empty tuple domain admits every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleDomain {
    column_domains: Vec<ColumnDomain>,
}

impl TupleDomain {
    /// The tuple domain that admits every row
    pub fn all() -> Self {
        TupleDomain::default()
    }

    pub fn new(column_domains: Vec<ColumnDomain>) -> Self {
        TupleDomain { column_domains }
    }

    pub fn is_all(&self) -> bool {
        self.column_domains.is_empty()
    }

    pub fn column_domains(&self) -> &[ColumnDomain] {
        &self.column_domains
    }

    pub(crate) fn push(&mut self, column_domain: ColumnDomain) {
        self.column_domains.push(column_domain);
    }
}

/// Evaluate a partition constraint against the canonical partition values of one `add` entry.
///
/// A partition column missing from the map counts as null. Returns an error only when a raw
/// partition value cannot be parsed as the constraint column's type.
pub fn partition_matches_predicate(
    canonical_values: &HashMap<String, Option<String>>,
    constraint: &TupleDomain,
) -> DeltaResult<bool> {
    for column_domain in constraint.column_domains() {
        let raw = canonical_values
            .get(column_domain.column.leaf())
            .and_then(|v| v.as_deref());
        let value = parse_partition_value(raw, &column_domain.data_type)?;
        if !column_domain.domain.contains(&value) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partition_value() {
        assert_eq!(
            parse_partition_value(Some("US"), &DataType::STRING).unwrap(),
            Scalar::String("US".to_string())
        );
        assert_eq!(
            parse_partition_value(Some("42"), &DataType::LONG).unwrap(),
            Scalar::Long(42)
        );
        assert_eq!(
            parse_partition_value(Some("2024-02-29"), &DataType::DATE).unwrap(),
            Scalar::Date(19782)
        );
        assert_eq!(
            parse_partition_value(Some("1970-01-01 00:00:01"), &DataType::TIMESTAMP).unwrap(),
            Scalar::Timestamp(1_000_000)
        );
        // empty string is null for every type but string
        assert_eq!(
            parse_partition_value(Some(""), &DataType::LONG).unwrap(),
            Scalar::Null(DataType::LONG)
        );
        assert_eq!(
            parse_partition_value(Some(""), &DataType::STRING).unwrap(),
            Scalar::String(String::new())
        );
        assert!(parse_partition_value(None, &DataType::STRING)
            .unwrap()
            .is_null());
        assert!(parse_partition_value(Some("nope"), &DataType::INTEGER).is_err());
    }

    #[test]
    fn test_domain_contains() {
        let domain = Domain::single_value(Scalar::String("US".to_string()));
        assert!(domain.contains(&Scalar::String("US".to_string())));
        assert!(!domain.contains(&Scalar::String("DE".to_string())));
        assert!(!domain.contains(&Scalar::Null(DataType::STRING)));

        let nullable = Domain::multiple_values(vec![Scalar::Long(1), Scalar::Long(2)], true);
        assert!(nullable.contains(&Scalar::Null(DataType::LONG)));
        assert!(nullable.contains(&Scalar::Long(2)));
        assert!(!nullable.contains(&Scalar::Long(3)));

        assert!(Domain::NotNull.contains(&Scalar::Boolean(false)));
        assert!(!Domain::NotNull.contains(&Scalar::Null(DataType::BOOLEAN)));
        assert!(Domain::OnlyNull.contains(&Scalar::Null(DataType::BOOLEAN)));
    }

    #[test]
    fn test_partition_matches_predicate() {
        let constraint = TupleDomain::new(vec![ColumnDomain::new(
            ColumnName::new(["country"]),
            DataType::STRING,
            Domain::single_value(Scalar::String("US".to_string())),
        )]);

        let us = HashMap::from([("country".to_string(), Some("US".to_string()))]);
        let de = HashMap::from([("country".to_string(), Some("DE".to_string()))]);
        let missing = HashMap::new();

        assert!(partition_matches_predicate(&us, &constraint).unwrap());
        assert!(!partition_matches_predicate(&de, &constraint).unwrap());
        // a partition column missing from the map is null
        assert!(!partition_matches_predicate(&missing, &constraint).unwrap());
        assert!(partition_matches_predicate(&de, &TupleDomain::all()).unwrap());
    }

    #[test]
    fn test_scalar_ordering() {
        assert!(Scalar::Long(1) < Scalar::Long(2));
        assert!(Scalar::String("a".to_string()) < Scalar::String("b".to_string()));
        // mismatched variants have no order
        assert_eq!(
            Scalar::Long(1).partial_cmp(&Scalar::Integer(1)),
            None
        );
        assert_eq!(
            Scalar::Null(DataType::LONG).partial_cmp(&Scalar::Long(1)),
            None
        );
    }
}
