//! Cohort Metrics: a session-scoped aggregation and statistics engine.
//!
//! The library ingests large per-entity, per-day tabular datasets (captain
//! activity metrics) and answers two classes of questions: how a metric
//! evolves over time for a test cohort versus a control cohort around a
//! cutoff, and whether the observed difference is statistically significant.
//!
//! # Overview
//!
//! The engine is organized into composable modules:
//!
//! - **data**: Core structures (RawTable, Dataset, DateRange, row selections)
//! - **classify**: Column classification into identifier/date/cohort/
//!   categorical/metric roles, producing session metadata
//! - **session**: In-memory session store with create/replace/destroy
//! - **optimize**: Execution policy for large datasets (view vs copy,
//!   observed-combination grouping, output sampling)
//! - **timeseries**: Per-date, per-cohort aggregation with rolling and
//!   percent-change derived series and pre/post summaries
//! - **entity**: Grouped aggregation by an arbitrary dimension crossed with
//!   `(period, cohort_type)`, heterogeneous functions in one pass
//! - **stats**: The statistical test catalog (paired, group comparison,
//!   effect size, distribution, power, confidence intervals)
//! - **engine**: The session-scoped facade
//!
//! # Example
//!
//! ```no_run
//! use cohort_metrics::prelude::*;
//! use std::path::Path;
//!
//! let engine = Engine::new();
//! let upload = engine.upload_csv(Path::new("activity.csv")).unwrap();
//!
//! let request = TimeSeriesRequest {
//!     pre_period: DateRange::new(
//!         "2025-01-01".parse().unwrap(),
//!         "2025-01-31".parse().unwrap(),
//!     ),
//!     post_period: DateRange::new(
//!         "2025-02-01".parse().unwrap(),
//!         "2025-02-28".parse().unwrap(),
//!     ),
//!     test_cohort: "treatment".into(),
//!     control_cohort: "holdout".into(),
//!     metric: "net_orders".into(),
//!     agg: AggFunc::Sum,
//!     series_breakout: None,
//!     rolling_windows: vec![7, 30],
//!     baseline_date: None,
//!     summary_aggs: vec![AggFunc::Sum, AggFunc::Mean],
//! };
//! let result = engine.time_series(&upload.session_id, &request).unwrap();
//! println!("{} post points", result.post_series.len());
//! ```

pub mod classify;
pub mod data;
pub mod engine;
pub mod entity;
pub mod error;
pub mod optimize;
pub mod session;
pub mod stats;
pub mod timeseries;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::classify::{classify, ClassifierConfig, Classified, SessionMeta};
    pub use crate::data::{ColumnRole, Dataset, DateRange, RawTable};
    pub use crate::engine::{Engine, UploadSummary};
    pub use crate::entity::{
        compute_entity, CohortType, EntityAgg, EntityRequest, EntityResult, EntityRow,
        MetricAgg, Period,
    };
    pub use crate::error::{MetricsError, Result};
    pub use crate::optimize::{ExecPolicy, OUTPUT_ROW_CEILING, VIEW_THRESHOLD_ROWS};
    pub use crate::session::{Session, SessionStore};
    pub use crate::stats::{
        run_test, Samples, StatTestRequest, StatTestResult,
    };
    pub use crate::timeseries::{
        compute_time_series, AggFunc, AggregationPoint, DerivedPoint, SummaryStat,
        TimeSeriesRequest, TimeSeriesResult,
    };
}
