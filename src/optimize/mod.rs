//! Large-dataset execution policy.
//!
//! Cross-cutting decisions shared by both aggregators: whether filter steps
//! copy or chain non-owning views, a grouping strategy that only materializes
//! combinations actually observed in the data, and a reproducible sampler for
//! capping output cardinality.

use crate::data::{Dataset, RowSelection};
use crate::error::Result;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;

/// Row count at which filters switch from defensive copies to chained views.
pub const VIEW_THRESHOLD_ROWS: usize = 1_000_000;

/// Maximum number of rows an entity-level result may carry before sampling.
pub const OUTPUT_ROW_CEILING: usize = 10_000;

/// How filter steps treat the underlying table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecPolicy {
    /// Compact a fresh copy after each filter. Simple, no aliasing surprises.
    Materialize,
    /// Chain index vectors over the shared table; materialize nothing until
    /// the grouped-aggregate step.
    View,
}

impl ExecPolicy {
    /// Pick the policy for a dataset of `n_rows`.
    pub fn for_rows(n_rows: usize) -> Self {
        if n_rows >= VIEW_THRESHOLD_ROWS {
            ExecPolicy::View
        } else {
            ExecPolicy::Materialize
        }
    }
}

/// A filtered portion of a dataset, carried per the execution policy.
///
/// Under [`ExecPolicy::View`] this is the shared table plus an index vector;
/// under [`ExecPolicy::Materialize`] each filter compacts into an owned copy
/// and the selection resets to all rows.
#[derive(Debug, Clone)]
pub struct Slice {
    dataset: Arc<Dataset>,
    rows: RowSelection,
    policy: ExecPolicy,
}

impl Slice {
    /// Full-table slice with an explicit policy.
    pub fn new(dataset: Arc<Dataset>, policy: ExecPolicy) -> Self {
        Self {
            dataset,
            rows: RowSelection::All,
            policy,
        }
    }

    /// Full-table slice with the policy picked from the row count.
    pub fn auto(dataset: Arc<Dataset>) -> Self {
        let policy = ExecPolicy::for_rows(dataset.n_rows());
        debug!(rows = dataset.n_rows(), ?policy, "selected execution policy");
        Self::new(dataset, policy)
    }

    #[inline]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    #[inline]
    pub fn policy(&self) -> ExecPolicy {
        self.policy
    }

    /// Number of rows in the slice.
    pub fn len(&self) -> usize {
        self.rows.len(self.dataset.n_rows())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the selected physical row indices.
    pub fn iter_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.iter(self.dataset.n_rows())
    }

    /// Narrow the slice with a per-row predicate.
    pub fn filter<F>(&self, keep: F) -> Result<Slice>
    where
        F: FnMut(usize) -> bool,
    {
        let selection = self.rows.filter(self.dataset.n_rows(), keep);
        match self.policy {
            ExecPolicy::View => Ok(Slice {
                dataset: Arc::clone(&self.dataset),
                rows: selection,
                policy: self.policy,
            }),
            ExecPolicy::Materialize => {
                let indices = match &selection {
                    RowSelection::Indices(idx) => idx.as_slice(),
                    RowSelection::All => unreachable!("filter always yields indices"),
                };
                let compact = self.dataset.take(indices)?;
                Ok(Slice {
                    dataset: Arc::new(compact),
                    rows: RowSelection::All,
                    policy: self.policy,
                })
            }
        }
    }
}

/// Fold rows into per-group accumulators, materializing only groups that are
/// actually observed.
///
/// `key_of` returning `None` excludes the row (e.g. a null group value).
/// Groups come back in first-observed order; callers impose their own output
/// ordering.
pub fn grouped_fold<K, A, KF, IF, FF>(
    rows: impl Iterator<Item = usize>,
    mut key_of: KF,
    mut init: IF,
    mut fold: FF,
) -> Vec<(K, A)>
where
    K: Eq + Hash + Clone,
    KF: FnMut(usize) -> Option<K>,
    IF: FnMut() -> A,
    FF: FnMut(&mut A, usize),
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, A)> = Vec::new();
    for row in rows {
        let Some(key) = key_of(row) else { continue };
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                let slot = groups.len();
                index.insert(key.clone(), slot);
                groups.push((key, init()));
                slot
            }
        };
        fold(&mut groups[slot].1, row);
    }
    groups
}

/// Deterministic xorshift64 generator for reproducible sampling.
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform index in [0, n).
    pub fn next_index(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Result of applying the output-cardinality cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleReport {
    pub sampled: bool,
    pub rate: Option<f64>,
    pub total_before: usize,
}

/// Cap `items` at `ceiling` rows by rate sampling with a seeded generator.
///
/// Uses error-diffusion acceptance (accumulate the rate, emit on overflow)
/// with a random initial phase, so the output size is always within one of
/// `rate * n` and the relative density of the input ordering is preserved.
pub fn sample_to_ceiling<T>(items: Vec<T>, ceiling: usize, seed: u64) -> (Vec<T>, SampleReport) {
    let total = items.len();
    if total <= ceiling {
        return (
            items,
            SampleReport {
                sampled: false,
                rate: None,
                total_before: total,
            },
        );
    }
    let rate = ceiling as f64 / total as f64;
    let mut rng = SimpleRng::new(seed);
    let mut acc = rng.next_f64();
    let mut kept = Vec::with_capacity(ceiling + 1);
    for item in items {
        acc += rate;
        if acc >= 1.0 {
            acc -= 1.0;
            kept.push(item);
        }
    }
    debug!(
        total,
        kept = kept.len(),
        rate,
        "sampled entity output over ceiling"
    );
    (
        kept,
        SampleReport {
            sampled: true,
            rate: Some(rate),
            total_before: total,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Column, ColumnRole, ColumnValues, StrColumn};
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn dataset(n: usize) -> Arc<Dataset> {
        let dates = vec![d("2025-01-01"); n];
        let mut cohort = StrColumn::new();
        let mut values = Vec::with_capacity(n);
        for i in 0..n {
            cohort.push(if i % 2 == 0 { "A" } else { "B" });
            values.push(Some(i as f64));
        }
        let columns = vec![Column {
            name: "m".to_string(),
            role: ColumnRole::Metric,
            values: ColumnValues::Numeric(values),
        }];
        Arc::new(Dataset::new(dates, cohort, columns).unwrap())
    }

    #[test]
    fn test_policy_threshold() {
        assert_eq!(ExecPolicy::for_rows(0), ExecPolicy::Materialize);
        assert_eq!(
            ExecPolicy::for_rows(VIEW_THRESHOLD_ROWS - 1),
            ExecPolicy::Materialize
        );
        assert_eq!(ExecPolicy::for_rows(VIEW_THRESHOLD_ROWS), ExecPolicy::View);
    }

    #[test]
    fn test_policies_filter_equivalently() {
        let ds = dataset(10);
        for policy in [ExecPolicy::Materialize, ExecPolicy::View] {
            let slice = Slice::new(Arc::clone(&ds), policy);
            let filtered = slice
                .filter(|row| slice.dataset().cohort().get(row) == Some("A"))
                .unwrap();
            assert_eq!(filtered.len(), 5);
            let values: Vec<f64> = filtered
                .iter_rows()
                .map(|r| filtered.dataset().metric("m").unwrap()[r].unwrap())
                .collect();
            assert_eq!(values, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
        }
    }

    #[test]
    fn test_chained_filters() {
        let ds = dataset(10);
        for policy in [ExecPolicy::Materialize, ExecPolicy::View] {
            let slice = Slice::new(Arc::clone(&ds), policy);
            let first = slice
                .filter(|row| slice.dataset().cohort().get(row) == Some("B"))
                .unwrap();
            let second = first
                .filter(|row| first.dataset().metric("m").unwrap()[row].unwrap() > 4.0)
                .unwrap();
            assert_eq!(second.len(), 3); // 5, 7, 9
        }
    }

    #[test]
    fn test_grouped_fold_only_observed_groups() {
        // Keys 0..3 observed; key_of skips multiples of 7.
        let groups = grouped_fold(
            0..20usize,
            |row| if row % 7 == 0 { None } else { Some(row % 3) },
            || 0usize,
            |acc, _| *acc += 1,
        );
        assert_eq!(groups.len(), 3);
        let total: usize = groups.iter().map(|(_, c)| c).sum();
        assert_eq!(total, 17); // 20 minus rows 0, 7, 14
    }

    #[test]
    fn test_sample_below_ceiling_untouched() {
        let (kept, report) = sample_to_ceiling(vec![1, 2, 3], 10, 42);
        assert_eq!(kept, vec![1, 2, 3]);
        assert!(!report.sampled);
        assert_eq!(report.rate, None);
    }

    #[test]
    fn test_sample_invariant() {
        let items: Vec<usize> = (0..25_000).collect();
        let (kept, report) = sample_to_ceiling(items, OUTPUT_ROW_CEILING, 42);
        assert!(report.sampled);
        let rate = report.rate.unwrap();
        assert!(kept.len() <= OUTPUT_ROW_CEILING);
        let expected = rate * report.total_before as f64;
        assert!((kept.len() as f64 - expected).abs() <= 1.0);
        // Ordering of survivors is preserved.
        assert!(kept.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sample_deterministic_per_seed() {
        let items: Vec<usize> = (0..30_000).collect();
        let (a, _) = sample_to_ceiling(items.clone(), OUTPUT_ROW_CEILING, 7);
        let (b, _) = sample_to_ceiling(items, OUTPUT_ROW_CEILING, 7);
        assert_eq!(a, b);
    }
}
