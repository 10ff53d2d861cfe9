//! Feature attribution for fitted estimators
//!
//! Permutation attribution: each effect-modifier column of a bounded sample
//! is shuffled in turn and the mean absolute shift in the estimated effect is
//! recorded as that feature's attribution. Estimator families that cannot
//! produce meaningful attributions, or whose attribution cost scales poorly,
//! are skipped up front by identifier-substring match instead of being
//! attempted and failed.

use crate::dataset::Mat;
use crate::model::Estimator;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::debug;

/// Which estimators get attributions and how much work is spent per feature.
#[derive(Debug, Clone)]
pub struct AttributionPolicy {
    excluded: Vec<String>,
    max_rows: usize,
    rounds: usize,
    seed: u64,
}

impl Default for AttributionPolicy {
    fn default() -> Self {
        Self {
            // Dummy has no per-row structure to attribute; 2SLS effects are
            // constant in the modifiers
            excluded: vec!["Dummy".to_string(), "TwoStage".to_string()],
            max_rows: 10,
            rounds: 5,
            seed: 42,
        }
    }
}

impl AttributionPolicy {
    /// Replace the identifier-substring exclusion list.
    #[must_use]
    pub fn with_exclusions(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Cap on sample rows used for attribution.
    #[must_use]
    pub const fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Shuffle rounds per feature.
    #[must_use]
    pub const fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    /// Seed for the permutation shuffles.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Whether an estimator identifier is excluded from attribution.
    #[must_use]
    pub fn excludes(&self, estimator_id: &str) -> bool {
        self.excluded.iter().any(|s| estimator_id.contains(s))
    }
}

/// Attribution outcome.
#[derive(Debug, Clone, Serialize)]
pub enum Explanation {
    /// Per-feature attribution values, aligned with `names`
    Attributions {
        /// Effect-modifier column names
        names: Vec<String>,
        /// Mean absolute effect shift when the column is shuffled
        values: Vec<f64>,
    },
    /// The estimator was excluded by policy
    Skipped {
        /// Why attribution was not attempted
        reason: String,
    },
}

/// Compute permutation attributions for a fitted estimator on a bounded
/// sample, or skip it per policy.
///
/// `sample` rows beyond the policy's cap are ignored.
///
/// # Errors
/// Returns error if the sample is empty, `names` does not match the sample
/// width, or the estimator fails to produce effects.
pub fn explain(
    estimator_id: &str,
    fitted: &dyn Estimator,
    sample: &Mat,
    names: &[String],
    policy: &AttributionPolicy,
) -> Result<Explanation> {
    if policy.excludes(estimator_id) {
        debug!(estimator = %estimator_id, "attribution skipped by policy");
        return Ok(Explanation::Skipped {
            reason: format!("estimator '{estimator_id}' is excluded from attribution"),
        });
    }
    if sample.rows() == 0 {
        return Err(Error::InvalidInput(
            "attribution sample has no rows".to_string(),
        ));
    }
    if names.len() != sample.cols() {
        return Err(Error::ShapeMismatch(format!(
            "{} feature names for a {}-column sample",
            names.len(),
            sample.cols()
        )));
    }

    let x = bounded(sample, policy.max_rows)?;
    let baseline = fitted.effect(&x)?;

    let mut values = vec![0.0; x.cols()];
    for j in 0..x.cols() {
        let original = x.column(j);
        let mut total = 0.0;
        let mut count = 0usize;
        for round in 0..policy.rounds {
            let mut rng =
                StdRng::seed_from_u64(policy.seed ^ ((j as u64) << 32) ^ round as u64);
            let mut shuffled = original.clone();
            shuffled.shuffle(&mut rng);
            let perturbed = fitted.effect(&x.with_column(j, &shuffled)?)?;
            for (level, base_level) in perturbed.iter().zip(&baseline) {
                for (a, b) in level.iter().zip(base_level) {
                    total += (a - b).abs();
                    count += 1;
                }
            }
        }
        #[allow(clippy::cast_precision_loss)]
        {
            values[j] = if count == 0 { 0.0 } else { total / count as f64 };
        }
    }
    Ok(Explanation::Attributions {
        names: names.to_vec(),
        values,
    })
}

/// First `max_rows` rows of `sample`.
fn bounded(sample: &Mat, max_rows: usize) -> Result<Mat> {
    let rows = sample.rows().min(max_rows.max(1));
    if rows == sample.rows() {
        return Ok(sample.clone());
    }
    Mat::new(
        sample.data()[..rows * sample.cols()].to_vec(),
        rows,
        sample.cols(),
    )
}
