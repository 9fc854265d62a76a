//! Inclusive date ranges with optional bounds.

use crate::error::{MetricsError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// An inclusive date range; an absent bound means unbounded in that direction.
///
/// Pre and post ranges of one request may overlap. That is accepted so a
/// baseline can be compared against itself as a sanity check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, alias = "start_date")]
    pub start: Option<NaiveDate>,
    #[serde(default, alias = "end_date")]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Range covering all dates.
    pub fn unbounded() -> Self {
        Self { start: None, end: None }
    }

    /// Range with both bounds set.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Reject ranges whose end precedes their start.
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                return Err(MetricsError::InvalidRange { start, end });
            }
        }
        Ok(())
    }

    /// Whether `date` falls inside the range (inclusive bounds).
    #[inline]
    pub fn contains(&self, date: NaiveDate) -> bool {
        if let Some(start) = self.start {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if date > end {
                return false;
            }
        }
        true
    }
}
