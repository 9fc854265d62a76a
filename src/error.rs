//! Error types for the cohort-metrics engine.

use thiserror::Error;

/// Main error type for the engine.
///
/// Every variant is a stable, caller-facing error kind; none of them are
/// retried internally.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Classification could not establish a usable schema (e.g. no date axis).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Unknown or expired session id; the caller must re-upload.
    #[error("Session '{0}' not found. Upload data first.")]
    SessionNotFound(String),

    /// A date range whose end precedes its start.
    #[error("Invalid date range: end {end} precedes start {start}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// Too few observations for the chosen statistical test.
    #[error("Insufficient data for {test}: requires at least {required} observations, got {actual}")]
    InsufficientData {
        test: String,
        required: usize,
        actual: usize,
    },

    /// Paired samples of unequal length.
    #[error("Shape mismatch in {test}: pre has {pre_len} observations, post has {post_len}")]
    ShapeMismatch {
        test: String,
        pre_len: usize,
        post_len: usize,
    },

    /// Unknown (category, test_name) combination.
    #[error("Unknown statistical test '{test_name}' in category '{category}'")]
    UnknownTest { category: String, test_name: String },

    /// Unknown aggregation function string.
    #[error("Unsupported aggregation function '{0}'")]
    UnsupportedAggregation(String),

    #[error("Missing column '{0}' in dataset")]
    MissingColumn(String),

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Numerical error: {0}")]
    Numerical(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, MetricsError>;
