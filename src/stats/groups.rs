//! Group comparisons: test vs control over the pre/post design.

use super::{
    decision, mean, require_min, require_paired, sample_variance, unknown_test, Params,
    Samples, StatTestRequest, StatTestResult,
};
use crate::error::{MetricsError, Result};
use nalgebra::{DMatrix, DVector};
use serde_json::json;
use statrs::distribution::{ContinuousCDF, FisherSnedecor, StudentsT};

pub(crate) fn run(request: &StatTestRequest) -> Result<StatTestResult> {
    let params = Params::new(request);
    let alpha = params.f64("alpha", 0.05)?;
    let samples = &request.samples;

    let mut result = StatTestResult::base(request);
    result.parameters_used = json!({ "alpha": alpha });

    match request.test_name.as_str() {
        "two_way_anova" => {
            let (f, p) = two_way_anova(samples)?;
            result.statistic = Some(f);
            result.p_value = Some(p);
            result.summary = format!(
                "Two-way ANOVA (time x group interaction): F = {f:.4}, p = {p:.4}; {} at alpha = {alpha}",
                decision(p, alpha)
            );
        }
        "difference_in_differences" => {
            let did = difference_in_differences(samples)?;
            result.statistic = Some(did.t_statistic);
            result.p_value = Some(did.p_value);
            result.effect_size = Some(did.estimate);
            let dist = StudentsT::new(0.0, 1.0, did.df)
                .map_err(|e| MetricsError::Numerical(e.to_string()))?;
            let t_crit = dist.inverse_cdf(1.0 - alpha / 2.0);
            result.confidence_interval = Some([
                did.estimate - t_crit * did.std_error,
                did.estimate + t_crit * did.std_error,
            ]);
            result.summary = format!(
                "Difference-in-differences: estimate = {:.4} (SE {:.4}), t = {:.4}, p = {:.4}; {} at alpha = {alpha}",
                did.estimate,
                did.std_error,
                did.t_statistic,
                did.p_value,
                decision(did.p_value, alpha)
            );
        }
        "mixed_effects" => {
            let (t, p) = mixed_effects(samples)?;
            result.statistic = Some(t);
            result.p_value = Some(p);
            result.summary = format!(
                "Mixed-effects (within-subject change, test vs control): t = {t:.4}, p = {p:.4}; {} at alpha = {alpha}",
                decision(p, alpha)
            );
        }
        _ => return Err(unknown_test(request)),
    }
    Ok(result)
}

fn require_cells(test: &str, samples: &Samples) -> Result<()> {
    for cell in [
        &samples.pre_test,
        &samples.post_test,
        &samples.pre_control,
        &samples.post_control,
    ] {
        require_min(test, cell.len(), 2)?;
    }
    Ok(())
}

/// Two-way ANOVA over the (time x group) design; the reported statistic is
/// the interaction term, which is the experiment-relevant effect.
pub fn two_way_anova(samples: &Samples) -> Result<(f64, f64)> {
    require_cells("two_way_anova", samples)?;
    let cells = [
        &samples.pre_test,
        &samples.post_test,
        &samples.pre_control,
        &samples.post_control,
    ];
    let n_total: usize = cells.iter().map(|c| c.len()).sum();
    let grand = cells.iter().flat_map(|c| c.iter()).sum::<f64>() / n_total as f64;

    // Factor A: time (pre vs post), pooled across groups.
    let pre: Vec<f64> = samples
        .pre_test
        .iter()
        .chain(&samples.pre_control)
        .copied()
        .collect();
    let post: Vec<f64> = samples
        .post_test
        .iter()
        .chain(&samples.post_control)
        .copied()
        .collect();
    let ss_time = pre.len() as f64 * (mean(&pre) - grand).powi(2)
        + post.len() as f64 * (mean(&post) - grand).powi(2);

    // Factor B: group (test vs control), pooled across time.
    let test: Vec<f64> = samples
        .pre_test
        .iter()
        .chain(&samples.post_test)
        .copied()
        .collect();
    let control: Vec<f64> = samples
        .pre_control
        .iter()
        .chain(&samples.post_control)
        .copied()
        .collect();
    let ss_group = test.len() as f64 * (mean(&test) - grand).powi(2)
        + control.len() as f64 * (mean(&control) - grand).powi(2);

    let ss_cells: f64 = cells
        .iter()
        .map(|c| c.len() as f64 * (mean(c) - grand).powi(2))
        .sum();
    let ss_interaction = ss_cells - ss_time - ss_group;
    let ss_error: f64 = cells
        .iter()
        .map(|c| {
            let m = mean(c);
            c.iter().map(|v| (v - m).powi(2)).sum::<f64>()
        })
        .sum();

    let df_error = (n_total - 4) as f64;
    if ss_error <= 0.0 || df_error <= 0.0 {
        return Err(MetricsError::Numerical(
            "two_way_anova requires within-cell variance".to_string(),
        ));
    }
    let f = (ss_interaction / 1.0) / (ss_error / df_error);
    let dist = FisherSnedecor::new(1.0, df_error)
        .map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let p = 1.0 - dist.cdf(f.max(0.0));
    Ok((f, p))
}

/// Difference-in-differences regression output.
#[derive(Debug, Clone, Copy)]
pub struct DidFit {
    /// Interaction coefficient: the treatment effect estimate.
    pub estimate: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub df: f64,
}

/// Difference-in-differences via OLS on `y ~ post + treat + post:treat`.
///
/// The interaction coefficient equals
/// `(mean(post_test) - mean(pre_test)) - (mean(post_control) - mean(pre_control))`.
pub fn difference_in_differences(samples: &Samples) -> Result<DidFit> {
    require_cells("difference_in_differences", samples)?;
    let cells: [(&[f64], f64, f64); 4] = [
        (&samples.pre_test, 0.0, 1.0),
        (&samples.post_test, 1.0, 1.0),
        (&samples.pre_control, 0.0, 0.0),
        (&samples.post_control, 1.0, 0.0),
    ];
    let n: usize = cells.iter().map(|(c, _, _)| c.len()).sum();
    require_min("difference_in_differences", n, 5)?;

    let mut x = DMatrix::zeros(n, 4);
    let mut y = DVector::zeros(n);
    let mut row = 0;
    for (cell, post, treat) in cells {
        for &value in cell {
            x[(row, 0)] = 1.0;
            x[(row, 1)] = post;
            x[(row, 2)] = treat;
            x[(row, 3)] = post * treat;
            y[row] = value;
            row += 1;
        }
    }

    let xtx = x.transpose() * &x;
    let xtx_inv = xtx.try_inverse().ok_or_else(|| {
        MetricsError::Numerical("singular design matrix in difference_in_differences".to_string())
    })?;
    let beta = &xtx_inv * x.transpose() * &y;
    let residuals = &y - &x * &beta;
    let df = (n - 4) as f64;
    let sigma_sq = residuals.dot(&residuals) / df;
    let std_error = (sigma_sq * xtx_inv[(3, 3)]).sqrt();
    if std_error == 0.0 || !std_error.is_finite() {
        return Err(MetricsError::Numerical(
            "zero residual variance in difference_in_differences".to_string(),
        ));
    }

    let estimate = beta[3];
    let t_statistic = estimate / std_error;
    let dist =
        StudentsT::new(0.0, 1.0, df).map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let p_value = 2.0 * (1.0 - dist.cdf(t_statistic.abs()));
    Ok(DidFit {
        estimate,
        std_error,
        t_statistic,
        p_value,
        df,
    })
}

/// Random-intercept comparison reduced to its sufficient statistic: a Welch
/// t-test on the within-subject pre-to-post changes of each cohort. Requires
/// matched pre/post lengths per cohort.
pub fn mixed_effects(samples: &Samples) -> Result<(f64, f64)> {
    require_paired("mixed_effects", &samples.pre_test, &samples.post_test)?;
    require_paired(
        "mixed_effects",
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
    require_min("mixed_effects", test_diffs.len(), 2)?;
    require_min("mixed_effects", control_diffs.len(), 2)?;

    let n1 = test_diffs.len() as f64;
    let n2 = control_diffs.len() as f64;
    let v1 = sample_variance(&test_diffs) / n1;
    let v2 = sample_variance(&control_diffs) / n2;
    if v1 + v2 == 0.0 {
        return Err(MetricsError::Numerical(
            "within-subject changes have zero variance".to_string(),
        ));
    }
    let t = (mean(&test_diffs) - mean(&control_diffs)) / (v1 + v2).sqrt();
    // Welch-Satterthwaite degrees of freedom.
    let df = (v1 + v2).powi(2) / (v1 * v1 / (n1 - 1.0) + v2 * v2 / (n2 - 1.0));
    let dist =
        StudentsT::new(0.0, 1.0, df).map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    Ok((t, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn samples() -> Samples {
        Samples {
            pre_test: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            post_test: vec![2.0, 3.0, 4.0, 5.0, 7.0],
            pre_control: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            post_control: vec![1.0, 2.0, 3.0, 4.0, 6.0],
        }
    }

    #[test]
    fn test_did_estimate_matches_cell_means() {
        // (4.2 - 3.0) - (3.2 - 3.0) = 1.0
        let fit = difference_in_differences(&samples()).unwrap();
        assert_relative_eq!(fit.estimate, 1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.df, 16.0);
        assert!(fit.p_value > 0.0 && fit.p_value < 1.0);
    }

    #[test]
    fn test_did_detects_strong_effect() {
        let s = Samples {
            pre_test: vec![1.0, 1.1, 0.9, 1.0, 1.05],
            post_test: vec![5.0, 5.1, 4.9, 5.0, 5.05],
            pre_control: vec![1.0, 1.1, 0.9, 1.0, 1.05],
            post_control: vec![1.0, 1.1, 0.9, 1.0, 1.05],
        };
        let fit = difference_in_differences(&s).unwrap();
        assert_relative_eq!(fit.estimate, 4.0, epsilon = 1e-9);
        assert!(fit.p_value < 0.001);
    }

    #[test]
    fn test_anova_reference() {
        // Hand-computed: SS_interaction = 1.25, MS_error = 3.1.
        let (f, p) = two_way_anova(&samples()).unwrap();
        assert_relative_eq!(f, 1.25 / 3.1, epsilon = 1e-9);
        assert!(p > 0.5);
    }

    #[test]
    fn test_anova_requires_cell_minimum() {
        let mut s = samples();
        s.post_control = vec![1.0];
        assert!(matches!(
            two_way_anova(&s),
            Err(MetricsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_mixed_effects_reference() {
        // Test changes [1,1,1,1,2] vs control changes [0,0,0,0,1]:
        // t = 1.0 / sqrt(0.08), df = 8.
        let (t, p) = mixed_effects(&samples()).unwrap();
        assert_relative_eq!(t, 1.0 / 0.08f64.sqrt(), epsilon = 1e-9);
        assert!(p < 0.01);
    }

    #[test]
    fn test_mixed_effects_shape_mismatch() {
        let mut s = samples();
        s.post_test.pop();
        assert!(matches!(
            mixed_effects(&s),
            Err(MetricsError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_run_populates_did_effect() {
        let request = StatTestRequest {
            category: "group_comparison".to_string(),
            test_name: "difference_in_differences".to_string(),
            parameters: Default::default(),
            samples: samples(),
        };
        let result = run(&request).unwrap();
        assert_relative_eq!(result.effect_size.unwrap(), 1.0, epsilon = 1e-9);
        let [lo, hi] = result.confidence_interval.unwrap();
        assert!(lo < 1.0 && 1.0 < hi);
        assert!(result.summary.contains("Difference-in-differences"));
    }
}
