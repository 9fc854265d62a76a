//! Effect sizes: standardized, scale-free magnitudes of group differences.

use super::{
    mean, period_samples, require_min, sample_variance, unknown_test, Params,
    StatTestRequest, StatTestResult,
};
use crate::error::{MetricsError, Result};
use serde_json::json;

pub(crate) fn run(request: &StatTestRequest) -> Result<StatTestResult> {
    let params = Params::new(request);
    let period = params.str("period", "post")?;
    let (test, control) = period_samples(&request.samples, &period)?;

    let mut result = StatTestResult::base(request);
    result.parameters_used = json!({ "period": period });

    let (effect, label, magnitude) = match request.test_name.as_str() {
        "cohens_d" => {
            let d = cohens_d(test, control)?;
            (d, "Cohen's d", standardized_magnitude(d))
        }
        "hedges_g" => {
            let g = hedges_g(test, control)?;
            (g, "Hedges' g", standardized_magnitude(g))
        }
        "cliffs_delta" => {
            let delta = cliffs_delta(test, control)?;
            (delta, "Cliff's delta", cliffs_magnitude(delta))
        }
        _ => return Err(unknown_test(request)),
    };

    result.effect_size = Some(effect);
    result.summary = format!(
        "{label} = {effect:.4}: a {magnitude} effect of test relative to control ({period} period)"
    );
    Ok(result)
}

/// Cohen's d with the pooled standard deviation.
pub fn cohens_d(test: &[f64], control: &[f64]) -> Result<f64> {
    require_min("cohens_d", test.len(), 2)?;
    require_min("cohens_d", control.len(), 2)?;
    let n1 = test.len() as f64;
    let n2 = control.len() as f64;
    let pooled_var = ((n1 - 1.0) * sample_variance(test) + (n2 - 1.0) * sample_variance(control))
        / (n1 + n2 - 2.0);
    if pooled_var == 0.0 {
        return Err(MetricsError::Numerical(
            "pooled variance is zero in cohens_d".to_string(),
        ));
    }
    Ok((mean(test) - mean(control)) / pooled_var.sqrt())
}

/// Hedges' g: Cohen's d with the small-sample bias correction.
pub fn hedges_g(test: &[f64], control: &[f64]) -> Result<f64> {
    let d = cohens_d(test, control)?;
    let n = (test.len() + control.len()) as f64;
    Ok(d * (1.0 - 3.0 / (4.0 * n - 9.0)))
}

/// Cliff's delta: rank-based, non-parametric dominance measure in [-1, 1].
pub fn cliffs_delta(test: &[f64], control: &[f64]) -> Result<f64> {
    require_min("cliffs_delta", test.len(), 1)?;
    require_min("cliffs_delta", control.len(), 1)?;
    let mut greater = 0i64;
    let mut lesser = 0i64;
    for &a in test {
        for &b in control {
            if a > b {
                greater += 1;
            } else if a < b {
                lesser += 1;
            }
        }
    }
    Ok((greater - lesser) as f64 / (test.len() * control.len()) as f64)
}

fn standardized_magnitude(effect: f64) -> &'static str {
    match effect.abs() {
        e if e < 0.2 => "negligible",
        e if e < 0.5 => "small",
        e if e < 0.8 => "medium",
        _ => "large",
    }
}

fn cliffs_magnitude(delta: f64) -> &'static str {
    match delta.abs() {
        d if d < 0.147 => "negligible",
        d if d < 0.33 => "small",
        d if d < 0.474 => "medium",
        _ => "large",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Samples;
    use approx::assert_relative_eq;

    const TEST: [f64; 5] = [2.0, 3.0, 4.0, 5.0, 7.0];
    const CONTROL: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 6.0];

    #[test]
    fn test_cohens_d_reference() {
        // Both variances 3.7, mean difference 1.0.
        let d = cohens_d(&TEST, &CONTROL).unwrap();
        assert_relative_eq!(d, 1.0 / 3.7f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_hedges_g_shrinks_d() {
        let d = cohens_d(&TEST, &CONTROL).unwrap();
        let g = hedges_g(&TEST, &CONTROL).unwrap();
        assert_relative_eq!(g, d * (1.0 - 3.0 / 31.0), epsilon = 1e-9);
        assert!(g.abs() < d.abs());
    }

    #[test]
    fn test_cliffs_delta_reference() {
        // 15 dominant pairs, 7 dominated, 3 ties, 25 total.
        let delta = cliffs_delta(&TEST, &CONTROL).unwrap();
        assert_relative_eq!(delta, 8.0 / 25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cliffs_delta_bounds() {
        assert_relative_eq!(cliffs_delta(&[5.0, 6.0], &[1.0, 2.0]).unwrap(), 1.0);
        assert_relative_eq!(cliffs_delta(&[1.0, 2.0], &[5.0, 6.0]).unwrap(), -1.0);
        assert_relative_eq!(cliffs_delta(&[3.0], &[3.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_zero_pooled_variance_rejected() {
        assert!(matches!(
            cohens_d(&[2.0, 2.0], &[2.0, 2.0]),
            Err(MetricsError::Numerical(_))
        ));
    }

    #[test]
    fn test_run_uses_period_parameter() {
        let request = StatTestRequest {
            category: "effect_size".to_string(),
            test_name: "cohens_d".to_string(),
            parameters: [("period".to_string(), serde_json::json!("pre"))]
                .into_iter()
                .collect(),
            samples: Samples {
                pre_test: vec![10.0, 11.0, 12.0],
                pre_control: vec![1.0, 2.0, 3.0],
                // Post samples would give a different sign.
                post_test: vec![1.0, 2.0, 3.0],
                post_control: vec![10.0, 11.0, 12.0],
            },
        };
        let result = run(&request).unwrap();
        assert!(result.effect_size.unwrap() > 0.0);
        assert!(result.summary.contains("pre period"));
        assert_eq!(result.p_value, None);
    }
}
