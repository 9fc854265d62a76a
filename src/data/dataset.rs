//! Typed, immutable columnar datasets.
//!
//! A [`Dataset`] is produced once by the column classifier and never mutated
//! afterwards. Filtering yields a [`RowSelection`] over the shared table (or a
//! compacted copy via [`Dataset::take`]); which of the two is used is decided
//! by the execution policy in `crate::optimize`.

use crate::error::{MetricsError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role of a column, assigned once at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Identifier,
    Date,
    Cohort,
    Categorical,
    Metric,
}

/// A dictionary-coded string column.
///
/// Codes index into `dict`; `None` marks a null cell. The dictionary keeps
/// first-occurrence order so re-encoding is stable.
#[derive(Debug, Clone, Default)]
pub struct StrColumn {
    codes: Vec<Option<u32>>,
    dict: Vec<String>,
    lookup: HashMap<String, u32>,
}

impl StrColumn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, interning it in the dictionary.
    pub fn push(&mut self, value: &str) {
        let code = match self.lookup.get(value) {
            Some(&c) => c,
            None => {
                let c = self.dict.len() as u32;
                self.dict.push(value.to_string());
                self.lookup.insert(value.to_string(), c);
                c
            }
        };
        self.codes.push(Some(code));
    }

    /// Append a null cell.
    pub fn push_null(&mut self) {
        self.codes.push(None);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    #[inline]
    pub fn codes(&self) -> &[Option<u32>] {
        &self.codes
    }

    /// Dictionary code for a value, if the value occurs in the column.
    pub fn code_of(&self, value: &str) -> Option<u32> {
        self.lookup.get(value).copied()
    }

    /// Decoded value for a dictionary code.
    #[inline]
    pub fn value(&self, code: u32) -> &str {
        &self.dict[code as usize]
    }

    /// Decoded value at a row, if non-null.
    #[inline]
    pub fn get(&self, row: usize) -> Option<&str> {
        self.codes[row].map(|c| self.value(c))
    }

    /// Distinct non-null values, sorted.
    pub fn distinct_sorted(&self) -> Vec<String> {
        let mut values = self.dict.clone();
        values.sort();
        values
    }

    /// Number of distinct values in the dictionary.
    pub fn cardinality(&self) -> usize {
        self.dict.len()
    }

    /// Subset the column to the given rows.
    pub fn take(&self, rows: &[u32]) -> Self {
        let mut out = Self::new();
        for &row in rows {
            match self.get(row as usize) {
                Some(v) => out.push(v),
                None => out.push_null(),
            }
        }
        out
    }
}

/// Typed storage for a non-date column.
#[derive(Debug, Clone)]
pub enum ColumnValues {
    /// Numeric metric values; `None` marks a null cell.
    Numeric(Vec<Option<f64>>),
    /// Dictionary-coded text values (cohort, categorical, identifier).
    Text(StrColumn),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.len(),
            ColumnValues::Text(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named, typed column with its classified role.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub role: ColumnRole,
    pub values: ColumnValues,
}

impl Column {
    /// Numeric values, or an error for text columns.
    pub fn as_numeric(&self) -> Result<&[Option<f64>]> {
        match &self.values {
            ColumnValues::Numeric(v) => Ok(v),
            ColumnValues::Text(_) => Err(MetricsError::InvalidParameter(format!(
                "column '{}' is not numeric",
                self.name
            ))),
        }
    }

    /// Text values, or an error for numeric columns.
    pub fn as_text(&self) -> Result<&StrColumn> {
        match &self.values {
            ColumnValues::Text(c) => Ok(c),
            ColumnValues::Numeric(_) => Err(MetricsError::InvalidParameter(format!(
                "column '{}' is not categorical",
                self.name
            ))),
        }
    }
}

/// An immutable columnar table with a date axis and a cohort column.
///
/// Rows with unparsable dates never make it into a `Dataset`; the classifier
/// drops them and reports the count.
#[derive(Debug, Clone)]
pub struct Dataset {
    n_rows: usize,
    dates: Vec<NaiveDate>,
    cohort: StrColumn,
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
}

impl Dataset {
    /// Assemble a dataset from classified parts.
    pub fn new(dates: Vec<NaiveDate>, cohort: StrColumn, columns: Vec<Column>) -> Result<Self> {
        let n_rows = dates.len();
        if cohort.len() != n_rows {
            return Err(MetricsError::Schema(format!(
                "cohort column has {} rows, date axis has {}",
                cohort.len(),
                n_rows
            )));
        }
        let mut by_name = HashMap::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            if col.values.len() != n_rows {
                return Err(MetricsError::Schema(format!(
                    "column '{}' has {} rows, date axis has {}",
                    col.name,
                    col.values.len(),
                    n_rows
                )));
            }
            by_name.insert(col.name.clone(), idx);
        }
        Ok(Self {
            n_rows,
            dates,
            cohort,
            columns,
            by_name,
        })
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Per-row date axis.
    #[inline]
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// The cohort column.
    #[inline]
    pub fn cohort(&self) -> &StrColumn {
        &self.cohort
    }

    /// All non-date, non-cohort columns.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// A column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.by_name
            .get(name)
            .map(|&idx| &self.columns[idx])
            .ok_or_else(|| MetricsError::MissingColumn(name.to_string()))
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Numeric values of a metric column.
    pub fn metric(&self, name: &str) -> Result<&[Option<f64>]> {
        self.column(name)?.as_numeric()
    }

    /// Earliest and latest dates, if the dataset is non-empty.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.dates.iter().min()?;
        let max = self.dates.iter().max()?;
        Some((*min, *max))
    }

    /// Materialize a compacted copy containing only the given rows.
    pub fn take(&self, rows: &[u32]) -> Result<Self> {
        let dates = rows.iter().map(|&r| self.dates[r as usize]).collect();
        let cohort = self.cohort.take(rows);
        let columns = self
            .columns
            .iter()
            .map(|col| Column {
                name: col.name.clone(),
                role: col.role,
                values: match &col.values {
                    ColumnValues::Numeric(v) => {
                        ColumnValues::Numeric(rows.iter().map(|&r| v[r as usize]).collect())
                    }
                    ColumnValues::Text(c) => ColumnValues::Text(c.take(rows)),
                },
            })
            .collect();
        Self::new(dates, cohort, columns)
    }
}

/// A non-owning selection of rows over a dataset.
#[derive(Debug, Clone)]
pub enum RowSelection {
    /// Every row.
    All,
    /// An explicit, ascending list of row indices.
    Indices(Vec<u32>),
}

impl RowSelection {
    /// Number of selected rows for a dataset of `n_rows`.
    pub fn len(&self, n_rows: usize) -> usize {
        match self {
            RowSelection::All => n_rows,
            RowSelection::Indices(idx) => idx.len(),
        }
    }

    pub fn is_empty(&self, n_rows: usize) -> bool {
        self.len(n_rows) == 0
    }

    /// Iterate over selected row indices in ascending order.
    pub fn iter(&self, n_rows: usize) -> RowIter<'_> {
        match self {
            RowSelection::All => RowIter::All(0..n_rows),
            RowSelection::Indices(idx) => RowIter::Indices(idx.iter()),
        }
    }

    /// Narrow this selection with a per-row predicate.
    pub fn filter<F>(&self, n_rows: usize, mut keep: F) -> RowSelection
    where
        F: FnMut(usize) -> bool,
    {
        let mut out = Vec::new();
        for row in self.iter(n_rows) {
            if keep(row) {
                out.push(row as u32);
            }
        }
        RowSelection::Indices(out)
    }
}

/// Iterator over selected row indices.
pub enum RowIter<'a> {
    All(std::ops::Range<usize>),
    Indices(std::slice::Iter<'a, u32>),
}

impl Iterator for RowIter<'_> {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        match self {
            RowIter::All(range) => range.next(),
            RowIter::Indices(iter) => iter.next().map(|&r| r as usize),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            RowIter::All(range) => range.size_hint(),
            RowIter::Indices(iter) => iter.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn small_dataset() -> Dataset {
        let dates = vec![d("2025-01-01"), d("2025-01-01"), d("2025-01-02")];
        let mut cohort = StrColumn::new();
        cohort.push("A");
        cohort.push("B");
        cohort.push("A");
        let columns = vec![Column {
            name: "metric".to_string(),
            role: ColumnRole::Metric,
            values: ColumnValues::Numeric(vec![Some(10.0), Some(20.0), None]),
        }];
        Dataset::new(dates, cohort, columns).unwrap()
    }

    #[test]
    fn test_dimensions_and_lookup() {
        let ds = small_dataset();
        assert_eq!(ds.n_rows(), 3);
        assert!(ds.has_column("metric"));
        assert!(!ds.has_column("missing"));
        assert!(matches!(
            ds.column("missing"),
            Err(MetricsError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_cohort_dictionary() {
        let ds = small_dataset();
        assert_eq!(ds.cohort().cardinality(), 2);
        assert_eq!(ds.cohort().code_of("A"), Some(0));
        assert_eq!(ds.cohort().code_of("C"), None);
        assert_eq!(ds.cohort().get(2), Some("A"));
        assert_eq!(ds.cohort().distinct_sorted(), vec!["A", "B"]);
    }

    #[test]
    fn test_date_bounds() {
        let ds = small_dataset();
        assert_eq!(ds.date_bounds(), Some((d("2025-01-01"), d("2025-01-02"))));
    }

    #[test]
    fn test_take_compacts_rows() {
        let ds = small_dataset();
        let sub = ds.take(&[0, 2]).unwrap();
        assert_eq!(sub.n_rows(), 2);
        assert_eq!(sub.dates(), &[d("2025-01-01"), d("2025-01-02")]);
        assert_eq!(sub.cohort().get(1), Some("A"));
        assert_eq!(sub.metric("metric").unwrap(), &[Some(10.0), None]);
    }

    #[test]
    fn test_row_selection_filter() {
        let ds = small_dataset();
        let sel = RowSelection::All.filter(ds.n_rows(), |row| ds.cohort().get(row) == Some("A"));
        let rows: Vec<usize> = sel.iter(ds.n_rows()).collect();
        assert_eq!(rows, vec![0, 2]);

        let narrowed = sel.filter(ds.n_rows(), |row| ds.dates()[row] == d("2025-01-02"));
        let rows: Vec<usize> = narrowed.iter(ds.n_rows()).collect();
        assert_eq!(rows, vec![2]);
    }

    #[test]
    fn test_mismatched_column_length_rejected() {
        let dates = vec![d("2025-01-01")];
        let mut cohort = StrColumn::new();
        cohort.push("A");
        let columns = vec![Column {
            name: "m".to_string(),
            role: ColumnRole::Metric,
            values: ColumnValues::Numeric(vec![Some(1.0), Some(2.0)]),
        }];
        assert!(Dataset::new(dates, cohort, columns).is_err());
    }
}
