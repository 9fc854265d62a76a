//! Statistical test catalog.
//!
//! The engine is a pure function from `(category, test_name, parameters,
//! samples)` to a [`StatTestResult`]. It never touches the session store; it
//! operates on already-extracted numeric samples so statistics stay decoupled
//! from data access.

mod distribution;
mod effect;
mod groups;
mod interval;
mod paired;
mod power;

use crate::error::{MetricsError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub use distribution::{brown_forsythe, ks_two_sample};
pub use effect::{cliffs_delta, cohens_d, hedges_g};
pub use groups::{difference_in_differences, mixed_effects, two_way_anova};
pub use interval::{bootstrap_ci, paired_mean_ci};
pub use paired::{paired_t, sign_test, wilcoxon_signed_rank};
pub use power::{achieved_power, required_sample_size};

/// The four sample slots a test may draw from. Families that need only two
/// samples leave the others empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Samples {
    #[serde(default)]
    pub pre_test: Vec<f64>,
    #[serde(default)]
    pub post_test: Vec<f64>,
    #[serde(default)]
    pub pre_control: Vec<f64>,
    #[serde(default)]
    pub post_control: Vec<f64>,
}

/// A statistics request: test selection plus free-form parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatTestRequest {
    pub category: String,
    pub test_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub samples: Samples,
}

/// A statistics result. Numeric fields are optional because different test
/// families populate different subsets; `summary` is always populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatTestResult {
    pub test_name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    pub summary: String,
    pub parameters_used: Value,
}

impl StatTestResult {
    /// Empty result shell for a given request; tests fill in their fields.
    fn base(request: &StatTestRequest) -> Self {
        Self {
            test_name: request.test_name.clone(),
            category: request.category.clone(),
            statistic: None,
            p_value: None,
            effect_size: None,
            confidence_interval: None,
            sample_size: None,
            power: None,
            summary: String::new(),
            parameters_used: Value::Null,
        }
    }
}

/// Run one test from the catalog.
///
/// Unknown `(category, test_name)` combinations fail with
/// [`MetricsError::UnknownTest`]; sample-shape problems fail with the
/// dedicated error kinds. Nothing is retried.
pub fn run_test(request: &StatTestRequest) -> Result<StatTestResult> {
    match request.category.as_str() {
        "paired" => paired::run(request),
        "group_comparison" => groups::run(request),
        "effect_size" => effect::run(request),
        "distribution" => distribution::run(request),
        "power" => power::run(request),
        "confidence_interval" => interval::run(request),
        _ => Err(unknown_test(request)),
    }
}

pub(crate) fn unknown_test(request: &StatTestRequest) -> MetricsError {
    MetricsError::UnknownTest {
        category: request.category.clone(),
        test_name: request.test_name.clone(),
    }
}

/// Typed access to the free-form parameter map, with defaults.
pub(crate) struct Params<'a> {
    map: &'a HashMap<String, Value>,
}

impl<'a> Params<'a> {
    pub fn new(request: &'a StatTestRequest) -> Self {
        Self {
            map: &request.parameters,
        }
    }

    pub fn f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.map.get(key) {
            None => Ok(default),
            Some(value) => value.as_f64().ok_or_else(|| {
                MetricsError::InvalidParameter(format!("parameter '{key}' must be a number"))
            }),
        }
    }

    pub fn required_f64(&self, key: &str) -> Result<f64> {
        let value = self.map.get(key).ok_or_else(|| {
            MetricsError::InvalidParameter(format!("parameter '{key}' is required"))
        })?;
        value.as_f64().ok_or_else(|| {
            MetricsError::InvalidParameter(format!("parameter '{key}' must be a number"))
        })
    }

    pub fn usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.map.get(key) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| {
                    MetricsError::InvalidParameter(format!(
                        "parameter '{key}' must be a non-negative integer"
                    ))
                }),
        }
    }

    pub fn u64(&self, key: &str, default: u64) -> Result<u64> {
        match self.map.get(key) {
            None => Ok(default),
            Some(value) => value.as_u64().ok_or_else(|| {
                MetricsError::InvalidParameter(format!(
                    "parameter '{key}' must be a non-negative integer"
                ))
            }),
        }
    }

    pub fn str(&self, key: &str, default: &str) -> Result<String> {
        match self.map.get(key) {
            None => Ok(default.to_string()),
            Some(value) => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    MetricsError::InvalidParameter(format!("parameter '{key}' must be a string"))
                }),
        }
    }
}

/// Test vs control samples for one period.
pub(crate) fn period_samples<'a>(
    samples: &'a Samples,
    period: &str,
) -> Result<(&'a [f64], &'a [f64])> {
    match period {
        "pre" => Ok((&samples.pre_test, &samples.pre_control)),
        "post" => Ok((&samples.post_test, &samples.post_control)),
        other => Err(MetricsError::InvalidParameter(format!(
            "parameter 'period' must be 'pre' or 'post', got '{other}'"
        ))),
    }
}

/// Pre/post samples for one cohort, for paired tests.
pub(crate) fn cohort_samples<'a>(
    samples: &'a Samples,
    cohort: &str,
) -> Result<(&'a [f64], &'a [f64])> {
    match cohort {
        "test" => Ok((&samples.pre_test, &samples.post_test)),
        "control" => Ok((&samples.pre_control, &samples.post_control)),
        other => Err(MetricsError::InvalidParameter(format!(
            "parameter 'cohort' must be 'test' or 'control', got '{other}'"
        ))),
    }
}

pub(crate) fn require_min(test: &str, actual: usize, required: usize) -> Result<()> {
    if actual < required {
        return Err(MetricsError::InsufficientData {
            test: test.to_string(),
            required,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn require_paired(test: &str, pre: &[f64], post: &[f64]) -> Result<()> {
    if pre.len() != post.len() {
        return Err(MetricsError::ShapeMismatch {
            test: test.to_string(),
            pre_len: pre.len(),
            post_len: post.len(),
        });
    }
    Ok(())
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased (n-1) sample variance.
pub(crate) fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub(crate) fn sample_std(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Decision phrase shared by all p-value-producing summaries.
pub(crate) fn decision(p_value: f64, alpha: f64) -> &'static str {
    if p_value < alpha {
        "reject the null hypothesis"
    } else {
        "fail to reject the null hypothesis"
    }
}
