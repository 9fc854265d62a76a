//! Paired tests: pre vs post on the same cohort, matched length.

use super::{
    cohort_samples, decision, mean, require_min, require_paired, sample_std, unknown_test,
    Params, StatTestRequest, StatTestResult,
};
use crate::error::{MetricsError, Result};
use serde_json::json;
use statrs::distribution::{Binomial, ContinuousCDF, DiscreteCDF, Normal, StudentsT};

pub(crate) fn run(request: &StatTestRequest) -> Result<StatTestResult> {
    let params = Params::new(request);
    let alpha = params.f64("alpha", 0.05)?;
    let cohort = params.str("cohort", "test")?;
    let (pre, post) = cohort_samples(&request.samples, &cohort)?;

    let mut result = StatTestResult::base(request);
    result.parameters_used = json!({ "alpha": alpha, "cohort": cohort });

    let (statistic, p_value, label) = match request.test_name.as_str() {
        "paired_t" => {
            let (t, p) = paired_t(pre, post)?;
            (t, p, "Paired t-test")
        }
        "wilcoxon_signed_rank" => {
            let (w, p) = wilcoxon_signed_rank(pre, post)?;
            (w, p, "Wilcoxon signed-rank test")
        }
        "sign_test" => {
            let (s, p) = sign_test(pre, post)?;
            (s, p, "Sign test")
        }
        _ => return Err(unknown_test(request)),
    };

    result.statistic = Some(statistic);
    result.p_value = Some(p_value);
    result.summary = format!(
        "{label}: statistic = {statistic:.4}, p = {p_value:.4}; {} at alpha = {alpha}",
        decision(p_value, alpha)
    );
    Ok(result)
}

/// Paired t-test on the per-subject differences.
pub fn paired_t(pre: &[f64], post: &[f64]) -> Result<(f64, f64)> {
    require_paired("paired_t", pre, post)?;
    require_min("paired_t", pre.len(), 2)?;
    let diffs: Vec<f64> = post.iter().zip(pre).map(|(a, b)| a - b).collect();
    let n = diffs.len() as f64;
    let sd = sample_std(&diffs);
    if sd == 0.0 {
        return Err(MetricsError::Numerical(
            "paired differences have zero variance".to_string(),
        ));
    }
    let t = mean(&diffs) / (sd / n.sqrt());
    let dist = StudentsT::new(0.0, 1.0, n - 1.0)
        .map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    Ok((t, p))
}

/// Wilcoxon signed-rank test with the normal approximation and tie
/// correction. Zero differences are dropped before ranking.
pub fn wilcoxon_signed_rank(pre: &[f64], post: &[f64]) -> Result<(f64, f64)> {
    require_paired("wilcoxon_signed_rank", pre, post)?;
    let diffs: Vec<f64> = post
        .iter()
        .zip(pre)
        .map(|(a, b)| a - b)
        .filter(|d| *d != 0.0)
        .collect();
    require_min("wilcoxon_signed_rank", diffs.len(), 5)?;

    let ranks = average_ranks(&diffs.iter().map(|d| d.abs()).collect::<Vec<f64>>());
    let w_plus: f64 = diffs
        .iter()
        .zip(&ranks)
        .filter(|(d, _)| **d > 0.0)
        .map(|(_, r)| r)
        .sum();
    let n = diffs.len() as f64;
    let w_minus = n * (n + 1.0) / 2.0 - w_plus;

    let tie_correction = tie_sizes(&ranks)
        .into_iter()
        .map(|t| {
            let t = t as f64;
            (t.powi(3) - t) / 48.0
        })
        .sum::<f64>();
    let sigma = (n * (n + 1.0) * (2.0 * n + 1.0) / 24.0 - tie_correction).sqrt();
    if sigma == 0.0 {
        return Err(MetricsError::Numerical(
            "all ranked differences are tied".to_string(),
        ));
    }
    let z = (w_plus - n * (n + 1.0) / 4.0) / sigma;
    let normal = Normal::new(0.0, 1.0).map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let p = 2.0 * (1.0 - normal.cdf(z.abs()));
    Ok((w_plus.min(w_minus), p))
}

/// Exact two-sided sign test; ties are excluded.
pub fn sign_test(pre: &[f64], post: &[f64]) -> Result<(f64, f64)> {
    require_paired("sign_test", pre, post)?;
    let positive = post.iter().zip(pre).filter(|(a, b)| a > b).count();
    let negative = post.iter().zip(pre).filter(|(a, b)| a < b).count();
    let n = positive + negative;
    require_min("sign_test", n, 1)?;

    let binom = Binomial::new(0.5, n as u64)
        .map_err(|e| MetricsError::Numerical(e.to_string()))?;
    let k = positive.min(negative) as u64;
    let p = (2.0 * binom.cdf(k)).min(1.0);
    Ok((positive as f64, p))
}

/// Ranks 1..n with ties assigned their average rank.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Sizes of tie groups in a rank vector.
fn tie_sizes(ranks: &[f64]) -> Vec<usize> {
    let mut sorted = ranks.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut sizes = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1] == sorted[i] {
            j += 1;
        }
        if j > i {
            sizes.push(j - i + 1);
        }
        i = j + 1;
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PRE: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];
    const POST: [f64; 5] = [2.0, 3.0, 4.0, 5.0, 7.0];

    #[test]
    fn test_paired_t_reference() {
        // diffs = [1, 1, 1, 1, 2]: mean 1.2, sd 0.4472, t = 6.0, df = 4.
        let (t, p) = paired_t(&PRE, &POST).unwrap();
        assert_relative_eq!(t, 6.0, epsilon = 1e-10);
        assert!(p < 0.01 && p > 0.0);
    }

    #[test]
    fn test_paired_t_rejects_shape_mismatch() {
        assert!(matches!(
            paired_t(&PRE, &POST[..4]),
            Err(crate::error::MetricsError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_paired_t_zero_variance() {
        let pre = [1.0, 2.0, 3.0];
        let post = [2.0, 3.0, 4.0];
        assert!(matches!(
            paired_t(&pre, &post),
            Err(crate::error::MetricsError::Numerical(_))
        ));
    }

    #[test]
    fn test_wilcoxon_reference() {
        // |diffs| = [1,1,1,1,2], all positive: W- = 0, z = 7.5 / sqrt(12.5).
        let (w, p) = wilcoxon_signed_rank(&PRE, &POST).unwrap();
        assert_relative_eq!(w, 0.0);
        assert_relative_eq!(p, 0.0339, epsilon = 1e-3);
    }

    #[test]
    fn test_wilcoxon_drops_zero_diffs() {
        let pre = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let post = [1.0, 3.0, 4.0, 5.0, 6.0, 7.0]; // first pair tied
        let (_, p) = wilcoxon_signed_rank(&pre, &post).unwrap();
        assert!(p > 0.0 && p < 1.0);

        // After dropping ties fewer than 5 diffs remain.
        let pre = [1.0, 1.0, 1.0, 2.0, 3.0];
        let post = [1.0, 1.0, 1.0, 3.0, 4.0];
        assert!(matches!(
            wilcoxon_signed_rank(&pre, &post),
            Err(crate::error::MetricsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_sign_test_all_positive() {
        // 5 positive, 0 negative: p = 2 * 0.5^5 = 0.0625.
        let (stat, p) = sign_test(&PRE, &POST).unwrap();
        assert_relative_eq!(stat, 5.0);
        assert_relative_eq!(p, 0.0625, epsilon = 1e-10);
    }

    #[test]
    fn test_sign_test_balanced() {
        let pre = [1.0, 2.0, 3.0, 4.0];
        let post = [2.0, 1.0, 4.0, 3.0];
        let (_, p) = sign_test(&pre, &post).unwrap();
        assert_relative_eq!(p, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_average_ranks_with_ties() {
        let ranks = average_ranks(&[1.0, 1.0, 2.0, 3.0]);
        assert_eq!(ranks, vec![1.5, 1.5, 3.0, 4.0]);
    }

    #[test]
    fn test_run_dispatch_and_summary() {
        let request = StatTestRequest {
            category: "paired".to_string(),
            test_name: "paired_t".to_string(),
            parameters: Default::default(),
            samples: crate::stats::Samples {
                pre_test: PRE.to_vec(),
                post_test: POST.to_vec(),
                ..Default::default()
            },
        };
        let result = run(&request).unwrap();
        assert!(result.statistic.is_some());
        assert!(result.summary.contains("reject the null hypothesis"));
        assert_eq!(result.effect_size, None);
    }
}
