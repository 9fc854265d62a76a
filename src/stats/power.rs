//! Power analysis for the independent two-sample t-test.

use super::{unknown_test, Params, StatTestRequest, StatTestResult};
use crate::error::{MetricsError, Result};
use serde_json::json;
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

pub(crate) fn run(request: &StatTestRequest) -> Result<StatTestResult> {
    let params = Params::new(request);
    let effect_size = params.required_f64("effect_size")?;
    let alpha = params.f64("alpha", 0.05)?;

    let mut result = StatTestResult::base(request);
    match request.test_name.as_str() {
        "sample_size" => {
            let target_power = params.f64("power", 0.8)?;
            let n = required_sample_size(effect_size, alpha, target_power)?;
            let achieved = achieved_power(effect_size, alpha, n)?;
            result.sample_size = Some(n);
            result.power = Some(achieved);
            result.parameters_used = json!({
                "effect_size": effect_size,
                "alpha": alpha,
                "power": target_power,
            });
            result.summary = format!(
                "Required sample size: {n} per group to detect d = {effect_size} at alpha = {alpha} with power {target_power} (achieved {achieved:.4})"
            );
        }
        "achieved_power" => {
            let n = match request.parameters.get("sample_size") {
                Some(_) => params.usize("sample_size", 0)?,
                None if !request.samples.post_test.is_empty() => {
                    request.samples.post_test.len()
                }
                None => {
                    return Err(MetricsError::InvalidParameter(
                        "parameter 'sample_size' is required when no samples are given"
                            .to_string(),
                    ))
                }
            };
            let power = achieved_power(effect_size, alpha, n)?;
            result.sample_size = Some(n);
            result.power = Some(power);
            result.parameters_used = json!({
                "effect_size": effect_size,
                "alpha": alpha,
                "sample_size": n,
            });
            result.summary = format!(
                "Achieved power: {power:.4} for d = {effect_size} with {n} per group at alpha = {alpha}"
            );
        }
        _ => return Err(unknown_test(request)),
    }
    Ok(result)
}

fn validate(effect_size: f64, alpha: f64) -> Result<()> {
    if effect_size <= 0.0 || !effect_size.is_finite() {
        return Err(MetricsError::InvalidParameter(
            "effect_size must be positive".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&alpha) || alpha <= 0.0 {
        return Err(MetricsError::InvalidParameter(
            "alpha must lie in (0, 1)".to_string(),
        ));
    }
    Ok(())
}

/// Power of a two-sided, two-sample t-test with `n` subjects per group, via
/// the normal approximation to the noncentral t-distribution.
pub fn achieved_power(effect_size: f64, alpha: f64, n: usize) -> Result<f64> {
    validate(effect_size, alpha)?;
    if n < 2 {
        return Err(MetricsError::InsufficientData {
            test: "achieved_power".to_string(),
            required: 2,
            actual: n,
        });
    }
    let df = (2 * n - 2) as f64;
    let t_dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let t_crit = t_dist.inverse_cdf(1.0 - alpha / 2.0);
    let noncentrality = effect_size * (n as f64 / 2.0).sqrt();
    let normal = Normal::new(0.0, 1.0).map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let power =
        1.0 - normal.cdf(t_crit - noncentrality) + normal.cdf(-t_crit - noncentrality);
    Ok(power.clamp(0.0, 1.0))
}

/// Smallest per-group sample size reaching `target_power`.
pub fn required_sample_size(effect_size: f64, alpha: f64, target_power: f64) -> Result<usize> {
    validate(effect_size, alpha)?;
    if !(0.0..1.0).contains(&target_power) || target_power <= 0.0 {
        return Err(MetricsError::InvalidParameter(
            "power must lie in (0, 1)".to_string(),
        ));
    }
    const MAX_N: usize = 1_000_000;
    for n in 2..=MAX_N {
        if achieved_power(effect_size, alpha, n)? >= target_power {
            return Ok(n);
        }
    }
    Err(MetricsError::Numerical(format!(
        "required sample size exceeds {MAX_N} per group"
    )))
}
