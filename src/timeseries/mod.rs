//! Time-series aggregation: per-date, per-cohort metric lines with derived
//! rolling and growth series plus pre/post summary rollups.

mod aggregate;
mod derive;

pub use aggregate::{
    compute_time_series, compute_time_series_with_policy, AggFunc, AggregationPoint,
    DerivedPoint, SummaryStat, TimeSeriesRequest, TimeSeriesResult,
};
pub use derive::{percent_change, rolling_mean, LinePoint};
