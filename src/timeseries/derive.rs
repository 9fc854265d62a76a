//! Derived series: trailing rolling means and percent change vs a baseline.

use chrono::NaiveDate;

/// One observation of a `(cohort[, series_value])` time line, sorted by date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Trailing rolling mean over a line.
///
/// A value is emitted only once the window holds `window` observations;
/// earlier positions carry `None`. Windows count observations, not calendar
/// days, and never look ahead.
pub fn rolling_mean(line: &[LinePoint], window: usize) -> Vec<Option<f64>> {
    debug_assert!(window >= 1);
    let mut out = Vec::with_capacity(line.len());
    let mut running = 0.0;
    for (idx, point) in line.iter().enumerate() {
        running += point.value;
        if idx + 1 >= window {
            if idx >= window {
                running -= line[idx - window].value;
            }
            out.push(Some(running / window as f64));
        } else {
            out.push(None);
        }
    }
    out
}

/// Percent change of each observation relative to a baseline value.
///
/// The baseline is the line's value at `baseline_date` when that date exists
/// in the line, otherwise the first observation. The result is `None` exactly
/// when the baseline is zero; never an error, never infinity.
pub fn percent_change(line: &[LinePoint], baseline_date: Option<NaiveDate>) -> Vec<Option<f64>> {
    let Some(first) = line.first() else {
        return Vec::new();
    };
    let baseline = baseline_date
        .and_then(|date| line.iter().find(|p| p.date == date))
        .unwrap_or(first)
        .value;
    line.iter()
        .map(|p| {
            if baseline == 0.0 {
                None
            } else {
                Some((p.value - baseline) / baseline * 100.0)
            }
        })
        .collect()
}
