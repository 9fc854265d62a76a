//! Entity-level aggregation.
//!
//! Groups by an arbitrary caller-supplied dimension (e.g. city) crossed with
//! `(period, cohort_type)`, evaluating a heterogeneous list of
//! `(metric, function)` pairs in one pass per slice. Output cardinality is
//! capped by reproducible rate sampling, never by truncation.

use crate::data::{DateRange, Dataset, StrColumn};
use crate::error::{MetricsError, Result};
use crate::optimize::{
    grouped_fold, sample_to_ceiling, ExecPolicy, Slice, OUTPUT_ROW_CEILING,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Aggregation functions available per metric in an entity-level request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityAgg {
    Sum,
    Mean,
    Count,
    Nunique,
    Median,
    Std,
    Min,
    Max,
}

impl EntityAgg {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityAgg::Sum => "sum",
            EntityAgg::Mean => "mean",
            EntityAgg::Count => "count",
            EntityAgg::Nunique => "nunique",
            EntityAgg::Median => "median",
            EntityAgg::Std => "std",
            EntityAgg::Min => "min",
            EntityAgg::Max => "max",
        }
    }
}

impl std::str::FromStr for EntityAgg {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(EntityAgg::Sum),
            "mean" => Ok(EntityAgg::Mean),
            "count" => Ok(EntityAgg::Count),
            "nunique" => Ok(EntityAgg::Nunique),
            "median" => Ok(EntityAgg::Median),
            "std" => Ok(EntityAgg::Std),
            "min" => Ok(EntityAgg::Min),
            "max" => Ok(EntityAgg::Max),
            other => Err(MetricsError::UnsupportedAggregation(other.to_string())),
        }
    }
}

impl TryFrom<String> for EntityAgg {
    type Error = MetricsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<EntityAgg> for String {
    fn from(agg: EntityAgg) -> Self {
        agg.as_str().to_string()
    }
}

impl std::fmt::Display for EntityAgg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(metric column, aggregation function)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricAgg {
    pub column: String,
    pub agg: EntityAgg,
}

/// Which request period a row belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Pre,
    Post,
}

/// Which requested cohort a row belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CohortType {
    Test,
    Control,
}

/// An entity-level aggregation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRequest {
    #[serde(default)]
    pub pre_period: DateRange,
    #[serde(default)]
    pub post_period: DateRange,
    pub test_cohort: String,
    pub control_cohort: String,
    pub group_by: String,
    pub metric_aggregations: Vec<MetricAgg>,
    /// Retain the date dimension (one row per group per date) instead of
    /// collapsing each period into one row per group.
    #[serde(default)]
    pub include_dates: bool,
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
}

fn default_sample_seed() -> u64 {
    42
}

/// One aggregate row per `(period, cohort_type[, date], group value)`.
///
/// Aggregation keys are `"column_agg"` (e.g. `"trips_mean"`); a `None` value
/// means the statistic is undefined for the group (no non-null observations,
/// or fewer than two for `std`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub period: Period,
    pub cohort_type: CohortType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    pub group_value: String,
    pub aggregations: BTreeMap<String, Option<f64>>,
}

/// Entity-level aggregation output, with explicit sampling disclosure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResult {
    pub rows: Vec<EntityRow>,
    pub sampled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    pub total_rows: usize,
}

/// Single-pass accumulator for one `(group, metric, agg)` cell.
///
/// Raw values are retained only when the function needs them (`median`);
/// `nunique` keeps distinct bit patterns, everything else folds into scalars.
#[derive(Debug, Clone)]
struct MetricAcc {
    agg: EntityAgg,
    sum: f64,
    sum_sq: f64,
    non_null: u64,
    min: f64,
    max: f64,
    values: Vec<f64>,
    distinct: HashSet<u64>,
}

impl MetricAcc {
    fn new(agg: EntityAgg) -> Self {
        Self {
            agg,
            sum: 0.0,
            sum_sq: 0.0,
            non_null: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            values: Vec::new(),
            distinct: HashSet::new(),
        }
    }

    fn add(&mut self, value: Option<f64>) {
        let Some(v) = value else { return };
        self.non_null += 1;
        match self.agg {
            EntityAgg::Sum | EntityAgg::Mean => self.sum += v,
            EntityAgg::Std => {
                self.sum += v;
                self.sum_sq += v * v;
            }
            EntityAgg::Min => self.min = self.min.min(v),
            EntityAgg::Max => self.max = self.max.max(v),
            EntityAgg::Median => self.values.push(v),
            EntityAgg::Nunique => {
                // Collapse -0.0 onto 0.0 so they count as one value.
                let v = if v == 0.0 { 0.0 } else { v };
                self.distinct.insert(v.to_bits());
            }
            EntityAgg::Count => {}
        }
    }

    fn finish(mut self) -> Option<f64> {
        match self.agg {
            EntityAgg::Count => Some(self.non_null as f64),
            EntityAgg::Nunique => Some(self.distinct.len() as f64),
            EntityAgg::Sum => Some(self.sum),
            _ if self.non_null == 0 => None,
            EntityAgg::Mean => Some(self.sum / self.non_null as f64),
            EntityAgg::Min => Some(self.min),
            EntityAgg::Max => Some(self.max),
            EntityAgg::Median => {
                self.values
                    .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let n = self.values.len();
                if n % 2 == 1 {
                    Some(self.values[n / 2])
                } else {
                    Some((self.values[n / 2 - 1] + self.values[n / 2]) / 2.0)
                }
            }
            EntityAgg::Std => {
                if self.non_null < 2 {
                    return None;
                }
                let n = self.non_null as f64;
                let var = (self.sum_sq - self.sum * self.sum / n) / (n - 1.0);
                Some(var.max(0.0).sqrt())
            }
        }
    }
}

/// Run an entity-level aggregation with the policy picked from the row count.
pub fn compute_entity(dataset: Arc<Dataset>, request: &EntityRequest) -> Result<EntityResult> {
    let policy = ExecPolicy::for_rows(dataset.n_rows());
    compute_entity_with_policy(dataset, request, policy)
}

/// Run an entity-level aggregation under an explicit execution policy.
pub fn compute_entity_with_policy(
    dataset: Arc<Dataset>,
    request: &EntityRequest,
    policy: ExecPolicy,
) -> Result<EntityResult> {
    request.pre_period.validate()?;
    request.post_period.validate()?;
    if request.metric_aggregations.is_empty() {
        return Err(MetricsError::InvalidParameter(
            "metric_aggregations must not be empty".to_string(),
        ));
    }
    dataset.column(&request.group_by)?.as_text()?;
    for pair in &request.metric_aggregations {
        dataset.metric(&pair.column)?;
    }

    let base = Slice::new(dataset, policy);
    let test_slice = filter_cohort(&base, &request.test_cohort)?;
    let control_slice = filter_cohort(&base, &request.control_cohort)?;
    if test_slice.is_empty() {
        return Err(MetricsError::EmptyData(format!(
            "test cohort '{}' has no rows",
            request.test_cohort
        )));
    }
    if control_slice.is_empty() {
        return Err(MetricsError::EmptyData(format!(
            "control cohort '{}' has no rows",
            request.control_cohort
        )));
    }

    // Four independent (period, cohort_type) aggregations.
    let tasks = [
        (Period::Pre, CohortType::Test, &test_slice, &request.pre_period),
        (Period::Post, CohortType::Test, &test_slice, &request.post_period),
        (
            Period::Pre,
            CohortType::Control,
            &control_slice,
            &request.pre_period,
        ),
        (
            Period::Post,
            CohortType::Control,
            &control_slice,
            &request.post_period,
        ),
    ];
    let per_slice: Vec<Result<Vec<EntityRow>>> = {
        use rayon::prelude::*;
        tasks
            .par_iter()
            .map(|(period, cohort_type, slice, range)| {
                let sliced = filter_period(slice, range)?;
                aggregate_slice(&sliced, request, *period, *cohort_type)
            })
            .collect()
    };

    let mut rows = Vec::new();
    for slice_rows in per_slice {
        rows.extend(slice_rows?);
    }
    rows.sort_by(|a, b| {
        (a.period, a.cohort_type, a.date, &a.group_value)
            .cmp(&(b.period, b.cohort_type, b.date, &b.group_value))
    });

    let (rows, report) = sample_to_ceiling(rows, OUTPUT_ROW_CEILING, request.sample_seed);
    debug!(
        rows = rows.len(),
        sampled = report.sampled,
        group_by = %request.group_by,
        "entity aggregation complete"
    );
    Ok(EntityResult {
        rows,
        sampled: report.sampled,
        sample_rate: report.rate,
        total_rows: report.total_before,
    })
}

fn filter_cohort(base: &Slice, cohort_name: &str) -> Result<Slice> {
    let cohort = base.dataset().cohort();
    let code = cohort.code_of(cohort_name);
    base.filter(|row| code.is_some() && cohort.codes()[row] == code)
}

fn filter_period(slice: &Slice, period: &DateRange) -> Result<Slice> {
    let dates = slice.dataset().dates();
    slice.filter(|row| period.contains(dates[row]))
}

/// Aggregate one `(period, cohort_type)` slice in a single grouped pass.
///
/// Rows with a null group value are excluded; only observed
/// `([date, ]group value)` combinations produce rows.
fn aggregate_slice(
    slice: &Slice,
    request: &EntityRequest,
    period: Period,
    cohort_type: CohortType,
) -> Result<Vec<EntityRow>> {
    let ds = slice.dataset();
    let group_col: &StrColumn = ds.column(&request.group_by)?.as_text()?;
    let dates = ds.dates();
    let metric_values: Vec<&[Option<f64>]> = request
        .metric_aggregations
        .iter()
        .map(|pair| ds.metric(&pair.column))
        .collect::<Result<_>>()?;
    let include_dates = request.include_dates;

    let groups = grouped_fold(
        slice.iter_rows(),
        |row| {
            let group_code = group_col.codes()[row]?;
            let date = include_dates.then(|| dates[row]);
            Some((date, group_code))
        },
        || {
            request
                .metric_aggregations
                .iter()
                .map(|pair| MetricAcc::new(pair.agg))
                .collect::<Vec<_>>()
        },
        |accs, row| {
            for (acc, values) in accs.iter_mut().zip(&metric_values) {
                acc.add(values[row]);
            }
        },
    );

    Ok(groups
        .into_iter()
        .map(|((date, group_code), accs)| {
            let aggregations = request
                .metric_aggregations
                .iter()
                .zip(accs)
                .map(|(pair, acc)| (format!("{}_{}", pair.column, pair.agg), acc.finish()))
                .collect();
            EntityRow {
                period,
                cohort_type,
                date,
                group_value: group_col.value(group_code).to_string(),
                aggregations,
            }
        })
        .collect())
}
