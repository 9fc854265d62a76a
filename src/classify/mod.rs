//! Column classification: turning a raw table into a typed dataset.
//!
//! Roles are assigned exactly once here and carried in the session metadata;
//! downstream components never re-infer column types.

use crate::data::{Column, ColumnRole, ColumnValues, Dataset, RawTable, StrColumn};
use crate::error::{MetricsError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Synthetic cohort assigned to every row when no cohort column exists.
pub const DEFAULT_COHORT: &str = "all_captains";

/// Cell contents treated as null.
const NULL_TOKENS: [&str; 6] = ["", "NA", "na", "null", "NULL", "NaN"];

/// Configuration for the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Maximum fraction of null cells a column may have and still count as a
    /// metric.
    pub max_null_fraction: f64,
    /// Columns excluded from metrics and categoricals by name (entity ids and
    /// the like). They remain addressable as grouping dimensions.
    pub identifier_columns: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_null_fraction: 0.25,
            identifier_columns: vec![
                "captain_id".to_string(),
                "mobile_number".to_string(),
                "city".to_string(),
            ],
        }
    }
}

/// Session metadata derived at classification time.
///
/// This is also the payload of the read-only metadata query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Distinct cohort values, sorted.
    pub cohorts: Vec<String>,
    pub date_min: NaiveDate,
    pub date_max: NaiveDate,
    /// Metric column names, in column order.
    pub metrics: Vec<String>,
    /// Categorical column names, sorted.
    pub categorical_columns: Vec<String>,
}

/// Output of classification: the typed dataset plus its metadata.
#[derive(Debug, Clone)]
pub struct Classified {
    pub dataset: Dataset,
    pub meta: SessionMeta,
    /// Rows dropped because their date could not be parsed.
    pub dropped_rows: usize,
}

#[inline]
fn is_null(cell: &str) -> bool {
    NULL_TOKENS.contains(&cell.trim())
}

fn parse_date_cell(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    NaiveDate::parse_from_str(cell, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(cell, "%Y/%m/%d"))
        .ok()
}

/// Parse a `time` cell in `YYYYMMDD` numeric or string form.
fn parse_time_cell(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    // Tolerate a numeric export artifact like "20250101.0".
    let digits = cell.strip_suffix(".0").unwrap_or(cell);
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// Classify a raw table into a typed dataset and session metadata.
///
/// Rows whose date cannot be parsed are dropped; the drop count is reported
/// on the result. A table with no `date` or `time` column fails with a schema
/// error, as does one where every row's date is unparsable.
pub fn classify(table: &RawTable, config: &ClassifierConfig) -> Result<Classified> {
    if table.n_rows() == 0 {
        return Err(MetricsError::EmptyData("table has no rows".to_string()));
    }

    let date_idx = table.column_index_ignore_case("date");
    let time_idx = table.column_index_ignore_case("time");
    let (axis_idx, axis_is_time) = match (date_idx, time_idx) {
        (Some(idx), _) => (idx, false),
        (None, Some(idx)) => (idx, true),
        (None, None) => {
            return Err(MetricsError::Schema(
                "no usable date column: expected 'date' (YYYY-MM-DD) or 'time' (YYYYMMDD)"
                    .to_string(),
            ));
        }
    };
    let cohort_idx = table.column_index_ignore_case("cohort");

    // Resolve the date axis first; rows that fail to parse are dropped from
    // every column.
    let mut dates = Vec::with_capacity(table.n_rows());
    let mut kept_rows: Vec<u32> = Vec::with_capacity(table.n_rows());
    for (row_idx, row) in table.rows().enumerate() {
        let cell = &row[axis_idx];
        let parsed = if axis_is_time {
            parse_time_cell(cell)
        } else {
            parse_date_cell(cell)
        };
        if let Some(date) = parsed {
            dates.push(date);
            kept_rows.push(row_idx as u32);
        }
    }
    let dropped_rows = table.n_rows() - kept_rows.len();
    if dropped_rows > 0 {
        warn!(
            dropped = dropped_rows,
            total = table.n_rows(),
            "dropped rows with unparsable dates"
        );
    }
    if kept_rows.is_empty() {
        return Err(MetricsError::Schema(format!(
            "all {} rows had unparsable dates",
            table.n_rows()
        )));
    }

    let mut cohort = StrColumn::new();
    match cohort_idx {
        Some(idx) => {
            for &row in &kept_rows {
                let cell = table.cell(row as usize, idx);
                if is_null(cell) {
                    cohort.push(DEFAULT_COHORT);
                } else {
                    cohort.push(cell.trim());
                }
            }
        }
        None => {
            for _ in &kept_rows {
                cohort.push(DEFAULT_COHORT);
            }
        }
    }

    let mut columns = Vec::new();
    for (col_idx, name) in table.headers().iter().enumerate() {
        if col_idx == axis_idx || Some(col_idx) == cohort_idx || Some(col_idx) == time_idx {
            continue;
        }
        let is_identifier = config
            .identifier_columns
            .iter()
            .any(|id| id.eq_ignore_ascii_case(name));
        let role = if is_identifier {
            ColumnRole::Identifier
        } else {
            infer_role(table, col_idx, &kept_rows, config.max_null_fraction)
        };
        let values = match role {
            ColumnRole::Metric => {
                let mut out = Vec::with_capacity(kept_rows.len());
                for &row in &kept_rows {
                    let cell = table.cell(row as usize, col_idx);
                    if is_null(cell) {
                        out.push(None);
                    } else {
                        // infer_role already proved every non-null cell parses
                        out.push(cell.trim().parse::<f64>().ok());
                    }
                }
                ColumnValues::Numeric(out)
            }
            _ => {
                let mut out = StrColumn::new();
                for &row in &kept_rows {
                    let cell = table.cell(row as usize, col_idx);
                    if is_null(cell) {
                        out.push_null();
                    } else {
                        out.push(cell.trim());
                    }
                }
                ColumnValues::Text(out)
            }
        };
        columns.push(Column {
            name: name.clone(),
            role,
            values,
        });
    }

    let dataset = Dataset::new(dates, cohort, columns)?;
    let (date_min, date_max) = dataset
        .date_bounds()
        .ok_or_else(|| MetricsError::EmptyData("no rows after classification".to_string()))?;

    let metrics: Vec<String> = dataset
        .columns()
        .iter()
        .filter(|c| c.role == ColumnRole::Metric)
        .map(|c| c.name.clone())
        .collect();
    let mut categorical_columns: Vec<String> = dataset
        .columns()
        .iter()
        .filter(|c| c.role == ColumnRole::Categorical)
        .map(|c| c.name.clone())
        .collect();
    categorical_columns.sort();

    let meta = SessionMeta {
        cohorts: dataset.cohort().distinct_sorted(),
        date_min,
        date_max,
        metrics,
        categorical_columns,
    };
    debug!(
        rows = dataset.n_rows(),
        cohorts = meta.cohorts.len(),
        metrics = meta.metrics.len(),
        categoricals = meta.categorical_columns.len(),
        "classified dataset"
    );

    Ok(Classified {
        dataset,
        meta,
        dropped_rows,
    })
}

/// Decide between metric and categorical for a non-identifier column.
fn infer_role(
    table: &RawTable,
    col_idx: usize,
    kept_rows: &[u32],
    max_null_fraction: f64,
) -> ColumnRole {
    let mut nulls = 0usize;
    let mut numeric = 0usize;
    for &row in kept_rows {
        let cell = table.cell(row as usize, col_idx);
        if is_null(cell) {
            nulls += 1;
        } else if cell.trim().parse::<f64>().is_ok() {
            numeric += 1;
        } else {
            return ColumnRole::Categorical;
        }
    }
    let null_fraction = nulls as f64 / kept_rows.len() as f64;
    if numeric > 0 && null_fraction <= max_null_fraction {
        ColumnRole::Metric
    } else {
        ColumnRole::Categorical
    }
}
