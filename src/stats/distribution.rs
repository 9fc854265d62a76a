//! Variance and distribution tests.

use super::{
    decision, mean, period_samples, require_min, require_paired, unknown_test, Params,
    StatTestRequest, StatTestResult,
};
use crate::error::{MetricsError, Result};
use serde_json::json;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

pub(crate) fn run(request: &StatTestRequest) -> Result<StatTestResult> {
    let params = Params::new(request);
    let alpha = params.f64("alpha", 0.05)?;
    let mut result = StatTestResult::base(request);

    match request.test_name.as_str() {
        "homoscedasticity" => {
            // Compare the spread of within-subject changes across cohorts.
            let samples = &request.samples;
            require_paired("homoscedasticity", &samples.pre_test, &samples.post_test)?;
            require_paired(
                "homoscedasticity",
                &samples.pre_control,
                &samples.post_control,
            )?;
            let test_diffs: Vec<f64> = samples
                .post_test
                .iter()
                .zip(&samples.pre_test)
                .map(|(a, b)| a - b)
                .collect();
            let control_diffs: Vec<f64> = samples
                .post_control
                .iter()
                .zip(&samples.pre_control)
                .map(|(a, b)| a - b)
                .collect();
            let (f, p) = brown_forsythe(&test_diffs, &control_diffs)?;
            result.statistic = Some(f);
            result.p_value = Some(p);
            result.parameters_used = json!({ "alpha": alpha });
            result.summary = format!(
                "Brown-Forsythe homoscedasticity test on paired differences: F = {f:.4}, p = {p:.4}; {} at alpha = {alpha}",
                decision(p, alpha)
            );
        }
        "ks_two_sample" => {
            let period = params.str("period", "post")?;
            let (test, control) = period_samples(&request.samples, &period)?;
            let (d, p) = ks_two_sample(test, control)?;
            result.statistic = Some(d);
            result.p_value = Some(p);
            result.parameters_used = json!({ "alpha": alpha, "period": period });
            result.summary = format!(
                "Kolmogorov-Smirnov two-sample test ({period} period): D = {d:.4}, p = {p:.4}; {} at alpha = {alpha}",
                decision(p, alpha)
            );
        }
        _ => return Err(unknown_test(request)),
    }
    Ok(result)
}

/// Brown-Forsythe test for equal spread between two samples: a one-way ANOVA
/// on absolute deviations from the group medians. Robust to non-normality.
pub fn brown_forsythe(a: &[f64], b: &[f64]) -> Result<(f64, f64)> {
    require_min("homoscedasticity", a.len(), 2)?;
    require_min("homoscedasticity", b.len(), 2)?;
    let za: Vec<f64> = abs_deviations_from_median(a);
    let zb: Vec<f64> = abs_deviations_from_median(b);
    let n1 = za.len() as f64;
    let n2 = zb.len() as f64;
    let m1 = mean(&za);
    let m2 = mean(&zb);
    let grand = (za.iter().sum::<f64>() + zb.iter().sum::<f64>()) / (n1 + n2);

    let ss_between = n1 * (m1 - grand).powi(2) + n2 * (m2 - grand).powi(2);
    let ss_within: f64 = za.iter().map(|z| (z - m1).powi(2)).sum::<f64>()
        + zb.iter().map(|z| (z - m2).powi(2)).sum::<f64>();
    let df_within = n1 + n2 - 2.0;
    if ss_within == 0.0 {
        // No within-group spread at all: the groups are trivially alike.
        return Ok((0.0, 1.0));
    }
    let f = ss_between / (ss_within / df_within);
    let dist = FisherSnedecor::new(1.0, df_within)
        .map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let p = 1.0 - dist.cdf(f);
    Ok((f, p))
}

/// Two-sample Kolmogorov-Smirnov test with the asymptotic p-value
/// approximation.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> Result<(f64, f64)> {
    require_min("ks_two_sample", a.len(), 2)?;
    require_min("ks_two_sample", b.len(), 2)?;
    let mut sa = a.to_vec();
    let mut sb = b.to_vec();
    sa.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    sb.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let (mut i, mut j) = (0usize, 0usize);
    let (n, m) = (sa.len(), sb.len());
    let mut d: f64 = 0.0;
    while i < n && j < m {
        let x = sa[i].min(sb[j]);
        while i < n && sa[i] <= x {
            i += 1;
        }
        while j < m && sb[j] <= x {
            j += 1;
        }
        let gap = (i as f64 / n as f64 - j as f64 / m as f64).abs();
        d = d.max(gap);
    }

    let ne = (n * m) as f64 / (n + m) as f64;
    let lambda = (ne.sqrt() + 0.12 + 0.11 / ne.sqrt()) * d;
    Ok((d, ks_survival(lambda)))
}

/// Kolmogorov distribution tail probability Q(lambda).
fn ks_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let term = (-2.0 * (k as f64).powi(2) * lambda * lambda).exp();
        sum += sign * term;
        sign = -sign;
        if term < 1e-12 {
            break;
        }
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

fn abs_deviations_from_median(values: &[f64]) -> Vec<f64> {
    let med = median(values);
    values.iter().map(|v| (v - med).abs()).collect()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ks_identical_samples() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let (d, p) = ks_two_sample(&a, &a).unwrap();
        assert_relative_eq!(d, 0.0);
        assert_relative_eq!(p, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ks_shifted_samples() {
        let a = [2.0, 3.0, 4.0, 5.0, 7.0];
        let b = [1.0, 2.0, 3.0, 4.0, 6.0];
        let (d, p) = ks_two_sample(&a, &b).unwrap();
        assert_relative_eq!(d, 0.2, epsilon = 1e-9);
        assert!(p > 0.9);
    }

    #[test]
    fn test_ks_disjoint_samples() {
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 11.0, 12.0];
        let (d, p) = ks_two_sample(&a, &b).unwrap();
        assert_relative_eq!(d, 1.0);
        assert!(p < 0.05);
    }

    #[test]
    fn test_brown_forsythe_reference() {
        // z_a = [2,1,0,1,7], z_b = [0,0,0,0,0]: F = 12.1 / (30.8 / 8).
        let a = [1.0, 2.0, 3.0, 4.0, 10.0];
        let b = [2.0, 2.0, 2.0, 2.0, 2.0];
        let (f, p) = brown_forsythe(&a, &b).unwrap();
        assert_relative_eq!(f, 12.1 / 3.85, epsilon = 1e-9);
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn test_brown_forsythe_no_spread() {
        let (f, p) = brown_forsythe(&[1.0, 1.0], &[5.0, 5.0]).unwrap();
        assert_relative_eq!(f, 0.0);
        assert_relative_eq!(p, 1.0);
    }

    #[test]
    fn test_median_even_odd() {
        assert_relative_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_relative_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn test_run_homoscedasticity() {
        let request = StatTestRequest {
            category: "distribution".to_string(),
            test_name: "homoscedasticity".to_string(),
            parameters: Default::default(),
            samples: crate::stats::Samples {
                pre_test: vec![1.0, 2.0, 3.0, 4.0, 5.0],
                post_test: vec![2.0, 3.0, 4.0, 5.0, 7.0],
                pre_control: vec![1.0, 2.0, 3.0, 4.0, 5.0],
                post_control: vec![1.0, 2.0, 3.0, 4.0, 6.0],
            },
        };
        let result = run(&request).unwrap();
        // Both change vectors deviate identically from their medians.
        assert_relative_eq!(result.statistic.unwrap(), 0.0);
        assert_relative_eq!(result.p_value.unwrap(), 1.0);
    }
}
