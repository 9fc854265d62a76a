//! The time-series aggregator.

use super::derive::{percent_change, rolling_mean, LinePoint};
use crate::data::{DateRange, Dataset, StrColumn};
use crate::error::{MetricsError, Result};
use crate::optimize::{grouped_fold, ExecPolicy, Slice};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Aggregation functions for time-series requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AggFunc {
    Sum,
    Mean,
    Count,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Mean => "mean",
            AggFunc::Count => "count",
        }
    }
}

impl std::str::FromStr for AggFunc {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(AggFunc::Sum),
            "mean" => Ok(AggFunc::Mean),
            "count" => Ok(AggFunc::Count),
            other => Err(MetricsError::UnsupportedAggregation(other.to_string())),
        }
    }
}

impl TryFrom<String> for AggFunc {
    type Error = MetricsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<AggFunc> for String {
    fn from(agg: AggFunc) -> Self {
        agg.as_str().to_string()
    }
}

impl std::fmt::Display for AggFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-series aggregation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesRequest {
    #[serde(default)]
    pub pre_period: DateRange,
    #[serde(default)]
    pub post_period: DateRange,
    pub test_cohort: String,
    pub control_cohort: String,
    pub metric: String,
    #[serde(default = "default_agg")]
    pub agg: AggFunc,
    #[serde(default)]
    pub series_breakout: Option<String>,
    #[serde(default = "default_rolling_windows")]
    pub rolling_windows: Vec<usize>,
    #[serde(default)]
    pub baseline_date: Option<NaiveDate>,
    #[serde(default = "default_summary_aggs")]
    pub summary_aggs: Vec<AggFunc>,
}

fn default_agg() -> AggFunc {
    AggFunc::Sum
}

fn default_rolling_windows() -> Vec<usize> {
    vec![7, 30]
}

fn default_summary_aggs() -> Vec<AggFunc> {
    vec![AggFunc::Sum, AggFunc::Mean, AggFunc::Count]
}

/// One aggregated observation. For a fixed request there is at most one point
/// per `(date, cohort, series_value)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationPoint {
    pub date: NaiveDate,
    pub cohort: String,
    pub metric: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_value: Option<String>,
}

/// One observation of a derived (rolling or percent-change) series.
///
/// `value` is `None` while a rolling window is still filling, or when a
/// percent-change baseline is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedPoint {
    pub date: NaiveDate,
    pub cohort: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_value: Option<String>,
    pub value: Option<f64>,
}

/// Scalar rollup of one aggregation kind over a period's emitted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStat {
    pub agg: AggFunc,
    pub test_value: f64,
    pub control_value: f64,
    pub difference: f64,
    /// `None` exactly when the control value is zero.
    pub pct_difference: Option<f64>,
}

/// Full time-series aggregation output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesResult {
    pub pre_series: Vec<AggregationPoint>,
    pub post_series: Vec<AggregationPoint>,
    /// Rolling-mean series keyed by window size.
    pub rolling: BTreeMap<usize, Vec<DerivedPoint>>,
    pub pct_change: Vec<DerivedPoint>,
    pub pre_summary: Vec<SummaryStat>,
    pub post_summary: Vec<SummaryStat>,
}

/// Running aggregate over one group; nulls are ignored for sum and mean and
/// excluded from count.
#[derive(Debug, Default, Clone, Copy)]
struct Acc {
    sum: f64,
    non_null: u64,
}

impl Acc {
    #[inline]
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.non_null += 1;
        }
    }

    fn finish(&self, agg: AggFunc) -> f64 {
        match agg {
            AggFunc::Sum => self.sum,
            AggFunc::Mean => {
                if self.non_null > 0 {
                    self.sum / self.non_null as f64
                } else {
                    0.0
                }
            }
            AggFunc::Count => self.non_null as f64,
        }
    }
}

/// Run a time-series aggregation with the policy picked from the row count.
pub fn compute_time_series(
    dataset: Arc<Dataset>,
    request: &TimeSeriesRequest,
) -> Result<TimeSeriesResult> {
    let policy = ExecPolicy::for_rows(dataset.n_rows());
    compute_time_series_with_policy(dataset, request, policy)
}

/// Run a time-series aggregation under an explicit execution policy.
pub fn compute_time_series_with_policy(
    dataset: Arc<Dataset>,
    request: &TimeSeriesRequest,
    policy: ExecPolicy,
) -> Result<TimeSeriesResult> {
    request.pre_period.validate()?;
    request.post_period.validate()?;
    if request.rolling_windows.iter().any(|&w| w == 0) {
        return Err(MetricsError::InvalidParameter(
            "rolling window size must be at least 1".to_string(),
        ));
    }
    // Fail fast on bad column references before any filtering work.
    dataset.metric(&request.metric)?;
    if let Some(breakout) = &request.series_breakout {
        dataset.column(breakout)?.as_text()?;
    }

    let base = Slice::new(dataset, policy);
    let cohort_slice = filter_cohorts(
        &base,
        &request.test_cohort,
        &request.control_cohort,
    )?;
    debug!(
        rows = cohort_slice.len(),
        test = %request.test_cohort,
        control = %request.control_cohort,
        "filtered to requested cohorts"
    );

    let pre_slice = filter_period(&cohort_slice, &request.pre_period)?;
    let post_slice = filter_period(&cohort_slice, &request.post_period)?;

    let breakout = request.series_breakout.as_deref();
    let (pre_series, post_series) = rayon::join(
        || aggregate_slice(&pre_slice, &request.metric, breakout, request.agg),
        || aggregate_slice(&post_slice, &request.metric, breakout, request.agg),
    );
    let pre_series = pre_series?;
    let post_series = post_series?;

    // Derived series run over the cohort-filtered, date-unfiltered range so
    // windows and baselines see the whole plotting range.
    let full_series = aggregate_slice(&cohort_slice, &request.metric, breakout, request.agg)?;
    let lines = build_lines(&full_series);

    let mut rolling = BTreeMap::new();
    for &window in &request.rolling_windows {
        rolling.insert(window, derive_over_lines(&lines, |line| rolling_mean(line, window)));
    }
    let pct_change = derive_over_lines(&lines, |line| {
        percent_change(line, request.baseline_date)
    });

    let pre_summary = summarize(
        &pre_series,
        &request.summary_aggs,
        &request.test_cohort,
        &request.control_cohort,
    );
    let post_summary = summarize(
        &post_series,
        &request.summary_aggs,
        &request.test_cohort,
        &request.control_cohort,
    );

    Ok(TimeSeriesResult {
        pre_series,
        post_series,
        rolling,
        pct_change,
        pre_summary,
        post_summary,
    })
}

/// Keep only rows belonging to the test or control cohort.
///
/// Rows outside both cohorts are excluded from the whole computation even
/// when they satisfy the date filters.
fn filter_cohorts(base: &Slice, test_cohort: &str, control_cohort: &str) -> Result<Slice> {
    let cohort = base.dataset().cohort();
    let test_code = cohort.code_of(test_cohort);
    let control_code = cohort.code_of(control_cohort);
    base.filter(|row| {
        let code = cohort.codes()[row];
        code.is_some() && (code == test_code || code == control_code)
    })
}

fn filter_period(slice: &Slice, period: &DateRange) -> Result<Slice> {
    let dates = slice.dataset().dates();
    slice.filter(|row| period.contains(dates[row]))
}

/// Group a slice by `(date, cohort[, series])` and aggregate the metric.
///
/// Only combinations observed in the slice are materialized; rows with a null
/// breakout value are excluded from the breakout grouping.
fn aggregate_slice(
    slice: &Slice,
    metric: &str,
    breakout: Option<&str>,
    agg: AggFunc,
) -> Result<Vec<AggregationPoint>> {
    let ds = slice.dataset();
    let values = ds.metric(metric)?;
    let dates = ds.dates();
    let cohort = ds.cohort();
    let series_col: Option<&StrColumn> = match breakout {
        Some(name) => Some(ds.column(name)?.as_text()?),
        None => None,
    };

    let groups = grouped_fold(
        slice.iter_rows(),
        |row| {
            let cohort_code = cohort.codes()[row]?;
            let series_code = match series_col {
                Some(col) => Some(col.codes()[row]?),
                None => None,
            };
            Some((dates[row], cohort_code, series_code))
        },
        Acc::default,
        |acc, row| acc.add(values[row]),
    );

    let mut points: Vec<AggregationPoint> = groups
        .into_iter()
        .map(|((date, cohort_code, series_code), acc)| {
            let series_value = match (series_code, series_col) {
                (Some(code), Some(col)) => Some(col.value(code).to_string()),
                _ => None,
            };
            AggregationPoint {
                date,
                cohort: cohort.value(cohort_code).to_string(),
                metric: metric.to_string(),
                value: acc.finish(agg),
                series_value,
            }
        })
        .collect();
    sort_points(&mut points);
    Ok(points)
}

/// Deterministic output ordering: date, then cohort, then series value.
fn sort_points(points: &mut [AggregationPoint]) {
    points.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.cohort.cmp(&b.cohort))
            .then_with(|| a.series_value.cmp(&b.series_value))
    });
}

/// Split date-sorted points into per-`(cohort, series)` lines.
fn build_lines(
    points: &[AggregationPoint],
) -> BTreeMap<(String, Option<String>), Vec<LinePoint>> {
    let mut lines: BTreeMap<(String, Option<String>), Vec<LinePoint>> = BTreeMap::new();
    for point in points {
        lines
            .entry((point.cohort.clone(), point.series_value.clone()))
            .or_default()
            .push(LinePoint {
                date: point.date,
                value: point.value,
            });
    }
    lines
}

fn derive_over_lines<F>(
    lines: &BTreeMap<(String, Option<String>), Vec<LinePoint>>,
    derive: F,
) -> Vec<DerivedPoint>
where
    F: Fn(&[LinePoint]) -> Vec<Option<f64>>,
{
    let mut out = Vec::new();
    for ((cohort, series_value), line) in lines {
        let derived = derive(line);
        for (point, value) in line.iter().zip(derived) {
            out.push(DerivedPoint {
                date: point.date,
                cohort: cohort.clone(),
                series_value: series_value.clone(),
                value,
            });
        }
    }
    out.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.cohort.cmp(&b.cohort))
            .then_with(|| a.series_value.cmp(&b.series_value))
    });
    out
}

/// Re-aggregate an emitted series into test/control scalars per aggregation
/// kind. This is the contract summaries are tested against: summaries are
/// consistent with the points as emitted, not with the raw rows.
fn summarize(
    points: &[AggregationPoint],
    aggs: &[AggFunc],
    test_cohort: &str,
    control_cohort: &str,
) -> Vec<SummaryStat> {
    aggs.iter()
        .map(|&agg| {
            let mut test_acc = Acc::default();
            let mut control_acc = Acc::default();
            for point in points {
                if point.cohort == test_cohort {
                    test_acc.add(Some(point.value));
                }
                if point.cohort == control_cohort {
                    control_acc.add(Some(point.value));
                }
            }
            let test_value = test_acc.finish(agg);
            let control_value = control_acc.finish(agg);
            let difference = test_value - control_value;
            let pct_difference = if control_value == 0.0 {
                None
            } else {
                Some(difference / control_value * 100.0)
            };
            SummaryStat {
                agg,
                test_value,
                control_value,
                difference,
                pct_difference,
            }
        })
        .collect()
}
