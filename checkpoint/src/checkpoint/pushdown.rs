//! Predicate pushdown for checkpoint scans: row group skipping driven by a disjunction of
//! per-action tuple domains over footer statistics.
//!
//! For every requested action kind the planner emits one tuple domain asserting that the kind's
//! required primitive sub-field is not null; for `add` the caller's partition-value domains are
//! AND-ed in, projected onto the `partitionvalues_parsed` sub-row. A row group survives when at
//! least one disjunct could be satisfied by its statistics. Statistics can only reject whole row
//! groups, so `add` rows surviving this filter are pruned again row by row.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use parquet::arrow::arrow_reader::ArrowReaderBuilder;
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::statistics::Statistics;
use tracing::debug;

use crate::actions::{ActionKind, ADD_NAME};
use crate::expressions::{ColumnDomain, ColumnName, Domain, Scalar, TupleDomain};
use crate::schema::{DataType, PrimitiveType};

/// The name of the typed partition-values sub-row of the `add` action.
pub(crate) const PARTITION_VALUES_PARSED_NAME: &str = "partitionvalues_parsed";

/// Build the per-action tuple domains that are pushed to the parquet reader as a disjunction.
///
/// Partition-value domains enumerating more values than `domain_compaction_threshold` are not
/// pushed down (they behave as [`Domain::All`] at the file level); the row-level constraint
/// still applies them exactly.
pub(crate) fn checkpoint_disjunct_domains(
    kinds: &[ActionKind],
    partition_constraint: &TupleDomain,
    domain_compaction_threshold: usize,
) -> Vec<TupleDomain> {
    kinds
        .iter()
        .map(|kind| {
            let (field, data_type) = kind.required_field();
            let mut tuple_domain = TupleDomain::new(vec![ColumnDomain::new(
                ColumnName::new([kind.column_name(), field]),
                data_type,
                Domain::NotNull,
            )]);
            if *kind == ActionKind::Add {
                for column_domain in partition_constraint.column_domains() {
                    if column_domain.domain.value_count() > domain_compaction_threshold {
                        continue;
                    }
                    tuple_domain.push(ColumnDomain::new(
                        ColumnName::new([
                            ADD_NAME,
                            PARTITION_VALUES_PARSED_NAME,
                            column_domain.column.leaf(),
                        ]),
                        column_domain.data_type.clone(),
                        column_domain.domain.clone(),
                    ));
                }
            }
            tuple_domain
        })
        .collect()
}

/// An extension trait for [`ArrowReaderBuilder`] that injects checkpoint row group skipping.
pub(crate) trait CheckpointRowGroupSkipping {
    /// Instructs the parquet reader to eliminate any row group whose footer statistics prove
    /// that none of the disjunct tuple domains can be satisfied by any of the group's rows.
    fn with_checkpoint_row_group_filter(self, disjunct_domains: &[TupleDomain]) -> Self;
}

impl<T> CheckpointRowGroupSkipping for ArrowReaderBuilder<T> {
    fn with_checkpoint_row_group_filter(self, disjunct_domains: &[TupleDomain]) -> Self {
        if disjunct_domains.is_empty() {
            return self;
        }
        let ordinals: Vec<_> = self
            .metadata()
            .row_groups()
            .iter()
            .enumerate()
            .filter_map(|(ordinal, row_group)| {
                RowGroupFilter::apply(row_group, disjunct_domains).then_some(ordinal)
            })
            .collect();
        debug!("with_checkpoint_row_group_filter = {ordinals:?}");
        self.with_row_groups(ordinals)
    }
}

/// Evaluates the disjunct tuple domains against one row group's footer statistics. Pre-computes
/// the mapping of each referenced column path to its leaf-column ordinal for O(1) stats lookups.
struct RowGroupFilter<'a> {
    row_group: &'a RowGroupMetaData,
    field_indices: HashMap<ColumnName, usize>,
}

impl<'a> RowGroupFilter<'a> {
    /// Applies the disjunction to a row group. Return value false means to skip it.
    fn apply(row_group: &'a RowGroupMetaData, disjunct_domains: &[TupleDomain]) -> bool {
        let mut filter = RowGroupFilter {
            row_group,
            field_indices: HashMap::new(),
        };
        filter.prepare_stats(disjunct_domains);
        disjunct_domains
            .iter()
            .any(|tuple_domain| filter.may_match(tuple_domain))
    }

    /// Build the column path → leaf ordinal mapping for every column the disjunction references,
    /// so that the total lookup cost stays linear in the parquet leaf count.
    fn prepare_stats(&mut self, disjunct_domains: &[TupleDomain]) {
        let requested: HashSet<&[String]> = disjunct_domains
            .iter()
            .flat_map(|tuple_domain| tuple_domain.column_domains())
            .map(|column_domain| column_domain.column.path())
            .collect();
        for (index, column) in self.row_group.schema_descr().columns().iter().enumerate() {
            let parts = column.path().parts();
            if requested.contains(parts) {
                self.field_indices
                    .insert(ColumnName::new(parts.iter().cloned()), index);
            }
        }
    }

    /// A tuple domain may match when every one of its column domains is possibly satisfied.
    fn may_match(&self, tuple_domain: &TupleDomain) -> bool {
        tuple_domain
            .column_domains()
            .iter()
            .all(|column_domain| self.column_may_satisfy(column_domain))
    }

    fn column_may_satisfy(&self, column_domain: &ColumnDomain) -> bool {
        let Some(&index) = self.field_indices.get(&column_domain.column) else {
            // A referenced column absent from the file is implied all-null.
            return column_domain.domain.contains_null();
        };
        let row_count = self.row_group.num_rows();
        let stats = self.row_group.column(index).statistics();
        match &column_domain.domain {
            Domain::All | Domain::OnlyNull => true,
            Domain::NotNull => {
                // Skip only when the stats prove every row is null.
                stats.and_then(Statistics::null_count_opt) != Some(row_count as u64)
                    || row_count == 0
            }
            Domain::Values { values, nullable } => {
                // WARNING: parquet footer decoding forces missing null counts to Some(0), so a
                // zero null count must be treated as unknown rather than as "no nulls".
                let known_nulls = stats
                    .and_then(Statistics::null_count_opt)
                    .filter(|n| *n > 0);
                if *nullable && known_nulls != Some(0) {
                    return true;
                }
                let min = stats.and_then(|s| stat_scalar(s, &column_domain.data_type, true));
                let max = stats.and_then(|s| stat_scalar(s, &column_domain.data_type, false));
                values.iter().any(|value| {
                    min.as_ref().is_none_or(|min| lte(min, value))
                        && max.as_ref().is_none_or(|max| lte(value, max))
                })
            }
        }
    }
}

/// Conservative "less than or equal": mismatched or unordered scalars compare as true so that
/// uncertainty never prunes a row group.
fn lte(a: &Scalar, b: &Scalar) -> bool {
    !matches!(a.partial_cmp(b), Some(Ordering::Greater))
}

/// Extracts a min or max stat value, converting from its physical type to the requested logical
/// type. Types without a usable footer representation yield `None`, which disables pruning on
/// that column.
fn stat_scalar(stats: &Statistics, data_type: &DataType, min: bool) -> Option<Scalar> {
    use PrimitiveType::*;
    let value = match (data_type.as_primitive_opt()?, stats) {
        (String, Statistics::ByteArray(s)) => Scalar::String(
            (if min { s.min_opt() } else { s.max_opt() })?
                .as_utf8()
                .ok()?
                .to_string(),
        ),
        (Long, Statistics::Int64(s)) => {
            Scalar::Long(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        (Long, Statistics::Int32(s)) => {
            Scalar::Long(*(if min { s.min_opt() } else { s.max_opt() })? as i64)
        }
        (Integer, Statistics::Int32(s)) => {
            Scalar::Integer(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        (Short, Statistics::Int32(s)) => {
            Scalar::Short(*(if min { s.min_opt() } else { s.max_opt() })? as i16)
        }
        (Byte, Statistics::Int32(s)) => {
            Scalar::Byte(*(if min { s.min_opt() } else { s.max_opt() })? as i8)
        }
        (Float, Statistics::Float(s)) => {
            Scalar::Float(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        (Double, Statistics::Double(s)) => {
            Scalar::Double(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        (Boolean, Statistics::Boolean(s)) => {
            Scalar::Boolean(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        (Date, Statistics::Int32(s)) => {
            Scalar::Date(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        (Timestamp, Statistics::Int64(s)) => {
            Scalar::Timestamp(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        (TimestampNtz, Statistics::Int64(s)) => {
            Scalar::TimestampNtz(*(if min { s.min_opt() } else { s.max_opt() })?)
        }
        _ => return None,
    };
    Some(value)
}
