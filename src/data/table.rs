//! Untyped rectangular input tables.
//!
//! A [`RawTable`] is the shape in which data arrives from the upstream query
//! layer or a CSV file: named columns, string cells, no types. The column
//! classifier turns it into a typed [`super::Dataset`].

use crate::error::{MetricsError, Result};
use std::io::Read;
use std::path::Path;

/// A rectangular table of named string columns.
#[derive(Debug, Clone)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Create a table from headers and rows.
    ///
    /// Short rows are padded with empty cells; long rows are an error.
    pub fn new(headers: Vec<String>, mut rows: Vec<Vec<String>>) -> Result<Self> {
        let width = headers.len();
        if width == 0 {
            return Err(MetricsError::EmptyData("table has no columns".to_string()));
        }
        for (idx, row) in rows.iter_mut().enumerate() {
            if row.len() > width {
                return Err(MetricsError::Schema(format!(
                    "row {} has {} cells but the header has {} columns",
                    idx,
                    row.len(),
                    width
                )));
            }
            while row.len() < width {
                row.push(String::new());
            }
        }
        Ok(Self { headers, rows })
    }

    /// Load a table from a CSV file.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Load a table from any CSV reader.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }
        Self::new(headers, rows)
    }

    /// Column names in order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of data rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.headers.len()
    }

    /// Index of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of a column by case-insensitive name.
    pub fn column_index_ignore_case(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    }

    /// Cell at (row, col).
    #[inline]
    pub fn cell(&self, row: usize, col: usize) -> &str {
        &self.rows[row][col]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(|r| r.as_slice())
    }
}
