//! Core data structures: raw tables, typed datasets, date ranges.

mod dataset;
mod range;
mod table;

pub use dataset::{Column, ColumnRole, ColumnValues, Dataset, RowSelection, StrColumn};
pub use range::DateRange;
pub use table::RawTable;
