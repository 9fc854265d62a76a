//! Confidence intervals: parametric on the paired mean difference, bootstrap
//! on the test-vs-control mean difference.

use super::{
    cohort_samples, mean, period_samples, require_min, require_paired, sample_std,
    unknown_test, Params, StatTestRequest, StatTestResult,
};
use crate::error::{MetricsError, Result};
use crate::optimize::SimpleRng;
use serde_json::json;
use statrs::distribution::{ContinuousCDF, StudentsT};

pub(crate) fn run(request: &StatTestRequest) -> Result<StatTestResult> {
    let params = Params::new(request);
    let confidence_level = params.f64("confidence_level", 0.95)?;
    if !(0.0..1.0).contains(&confidence_level) || confidence_level <= 0.0 {
        return Err(MetricsError::InvalidParameter(
            "confidence_level must lie in (0, 1)".to_string(),
        ));
    }

    let mut result = StatTestResult::base(request);
    let (interval, estimate, label) = match request.test_name.as_str() {
        "paired_mean_ci" => {
            let cohort = params.str("cohort", "test")?;
            let (pre, post) = cohort_samples(&request.samples, &cohort)?;
            let (interval, estimate) = paired_mean_ci(pre, post, confidence_level)?;
            result.parameters_used = json!({
                "confidence_level": confidence_level,
                "cohort": cohort,
            });
            (interval, estimate, "paired mean difference")
        }
        "bootstrap_ci" => {
            let period = params.str("period", "post")?;
            let n_resamples = params.usize("n_resamples", 1000)?;
            let seed = params.u64("seed", 42)?;
            let (test, control) = period_samples(&request.samples, &period)?;
            let (interval, estimate) =
                bootstrap_ci(test, control, confidence_level, n_resamples, seed)?;
            result.parameters_used = json!({
                "confidence_level": confidence_level,
                "period": period,
                "n_resamples": n_resamples,
                "seed": seed,
            });
            (interval, estimate, "bootstrap mean difference")
        }
        _ => return Err(unknown_test(request)),
    };

    let zero_position = if interval[0] > 0.0 || interval[1] < 0.0 {
        "excludes zero"
    } else {
        "contains zero"
    };
    result.statistic = Some(estimate);
    result.confidence_interval = Some(interval);
    result.summary = format!(
        "{:.0}% CI for the {label}: [{:.4}, {:.4}] around {estimate:.4}; the interval {zero_position}",
        confidence_level * 100.0,
        interval[0],
        interval[1],
    );
    Ok(result)
}

/// Parametric t-interval on the mean of the paired differences.
pub fn paired_mean_ci(
    pre: &[f64],
    post: &[f64],
    confidence_level: f64,
) -> Result<([f64; 2], f64)> {
    require_paired("paired_mean_ci", pre, post)?;
    require_min("paired_mean_ci", pre.len(), 2)?;
    let diffs: Vec<f64> = post.iter().zip(pre).map(|(a, b)| a - b).collect();
    let n = diffs.len() as f64;
    let m = mean(&diffs);
    let se = sample_std(&diffs) / n.sqrt();
    if se == 0.0 {
        return Ok(([m, m], m));
    }
    let dist = StudentsT::new(0.0, 1.0, n - 1.0)
        .map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let t = dist.inverse_cdf(0.5 + confidence_level / 2.0);
    Ok(([m - t * se, m + t * se], m))
}

/// Percentile bootstrap interval on the difference of sample means, with a
/// seeded generator for reproducible resampling.
pub fn bootstrap_ci(
    test: &[f64],
    control: &[f64],
    confidence_level: f64,
    n_resamples: usize,
    seed: u64,
) -> Result<([f64; 2], f64)> {
    require_min("bootstrap_ci", test.len(), 2)?;
    require_min("bootstrap_ci", control.len(), 2)?;
    if n_resamples < 100 {
        return Err(MetricsError::InvalidParameter(
            "n_resamples must be at least 100".to_string(),
        ));
    }

    let estimate = mean(test) - mean(control);
    let mut rng = SimpleRng::new(seed);
    let mut stats = Vec::with_capacity(n_resamples);
    for _ in 0..n_resamples {
        let t = resampled_mean(test, &mut rng);
        let c = resampled_mean(control, &mut rng);
        stats.push(t - c);
    }
    stats.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let tail = (1.0 - confidence_level) / 2.0;
    let lo = quantile_index(n_resamples, tail);
    let hi = quantile_index(n_resamples, 1.0 - tail);
    Ok(([stats[lo], stats[hi]], estimate))
}

fn resampled_mean(values: &[f64], rng: &mut SimpleRng) -> f64 {
    let sum: f64 = (0..values.len())
        .map(|_| values[rng.next_index(values.len())])
        .sum();
    sum / values.len() as f64
}

fn quantile_index(n: usize, q: f64) -> usize {
    (((n - 1) as f64 * q).round() as usize).min(n - 1)
}
