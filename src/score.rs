//! Cross-family scoring
//!
//! Estimator-internal likelihoods are not comparable across families, so the
//! scorer builds a model-free target once per run: the Horvitz–Thompson
//! transformed-outcome pseudo-effect on a held-out validation split, with the
//! propensity model fit on the training split only. Every candidate is scored
//! as the RMSE between its per-row `effect()` and that pseudo-effect.
//! **Lower is better.** Re-scoring the same fitted estimator on the same
//! snapshot yields the same value: the pseudo-effect is computed once at
//! construction and never mutated.
//!
//! Multi-valued treatments are scored one-vs-rest: level `k` is evaluated on
//! the validation rows assigned to control or level `k`, against a propensity
//! fit on the corresponding training rows.

use crate::dataset::{DesignMatrix, Mat};
use crate::model::metalearners::transformed_outcome;
use crate::model::{Estimator, FitOptions, PropensityModel};
use crate::{Error, Result};

/// Per-level scoring target.
struct LevelTarget {
    /// Validation row indices with treatment in {0, level}
    rows: Vec<usize>,
    /// Pseudo-effect for each of those rows
    pseudo: Vec<f64>,
}

/// Scorer over a fixed (train, validation) snapshot.
pub struct Scorer {
    val_x: Mat,
    targets: Vec<LevelTarget>,
}

impl Scorer {
    /// Build the scoring target from a train/validation pair.
    ///
    /// # Errors
    /// Returns error if the propensity fit fails or shapes mismatch.
    pub fn new(
        train: &DesignMatrix,
        val: &DesignMatrix,
        propensity: &dyn PropensityModel,
        opts: &FitOptions,
    ) -> Result<Self> {
        if train.k != val.k {
            return Err(Error::ShapeMismatch(format!(
                "train has {} treatment levels, validation has {}",
                train.k, val.k
            )));
        }
        let mut targets = Vec::with_capacity(val.k - 1);
        for level in 1..val.k {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let level = level as i32;
            let (train_x, train_t) = pair_subset(train, level)?;
            let mut model = propensity.clone_box();
            model.fit(&train_x, &train_t, opts)?;

            let (val_x, val_t) = pair_subset(val, level)?;
            let e = model.predict(&val_x)?;

            let rows: Vec<usize> = (0..val.num_rows())
                .filter(|&i| val.t[i] == 0 || val.t[i] == level)
                .collect();
            let pseudo: Vec<f64> = rows
                .iter()
                .enumerate()
                .map(|(j, &i)| transformed_outcome(val.y[i], val_t[j], e[j]))
                .collect();
            targets.push(LevelTarget { rows, pseudo });
        }
        Ok(Self {
            val_x: val.x.clone(),
            targets,
        })
    }

    /// In-sample scorer: train and validation are the same design. Used for
    /// post-run dataset-level diagnostics, not for selection.
    ///
    /// # Errors
    /// Returns error if the propensity fit fails.
    pub fn in_sample(
        design: &DesignMatrix,
        propensity: &dyn PropensityModel,
        opts: &FitOptions,
    ) -> Result<Self> {
        Self::new(design, design, propensity, opts)
    }

    /// RMSE between the estimator's effects and the pseudo-effect target.
    ///
    /// # Errors
    /// Returns error if the estimator is unfitted or returns the wrong number
    /// of levels or rows.
    pub fn score(&self, estimator: &dyn Estimator) -> Result<f64> {
        let effects = estimator.effect(&self.val_x)?;
        if effects.len() != self.targets.len() {
            return Err(Error::ShapeMismatch(format!(
                "estimator produced {} effect levels, scorer expects {}",
                effects.len(),
                self.targets.len()
            )));
        }
        let mut sum_sq = 0.0;
        let mut count = 0usize;
        for (level_effects, target) in effects.iter().zip(&self.targets) {
            if level_effects.len() != self.val_x.rows() {
                return Err(Error::ShapeMismatch(format!(
                    "estimator produced {} effect rows, validation has {}",
                    level_effects.len(),
                    self.val_x.rows()
                )));
            }
            for (j, &row) in target.rows.iter().enumerate() {
                let diff = level_effects[row] - target.pseudo[j];
                sum_sq += diff * diff;
                count += 1;
            }
        }
        if count == 0 {
            return Err(Error::InvalidInput(
                "validation split has no scorable rows".to_string(),
            ));
        }
        #[allow(clippy::cast_precision_loss)]
        Ok((sum_sq / count as f64).sqrt())
    }
}

/// Rows of `design` with treatment in `{0, level}`, as (modifier+confounder
/// block, 0/1 target against control).
fn pair_subset(design: &DesignMatrix, level: i32) -> Result<(Mat, Vec<f64>)> {
    let indices: Vec<usize> = (0..design.num_rows())
        .filter(|&i| design.t[i] == 0 || design.t[i] == level)
        .collect();
    if indices.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no rows at treatment level {level} or control"
        )));
    }
    let mut data = Vec::with_capacity(indices.len() * design.xw.cols());
    let mut t = Vec::with_capacity(indices.len());
    for &i in &indices {
        data.extend_from_slice(design.xw.row(i));
        t.push(f64::from(u8::from(design.t[i] == level)));
    }
    Ok((Mat::new(data, indices.len(), design.xw.cols())?, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic::synth_linear;
    use crate::dataset::PreprocessOptions;
    use crate::model::metalearners::{DummyEstimator, SLearner};
    use crate::model::{LogisticPropensity, Ridge};

    fn snapshot() -> (DesignMatrix, DesignMatrix) {
        let data = synth_linear(600, 4, 21)
            .unwrap()
            .preprocess(&PreprocessOptions {
                seed: Some(21),
                drop_first: false,
            })
            .unwrap();
        let (train, val) = data.split_holdout(0.25, 42).unwrap();
        (train.to_design().unwrap(), val.to_design().unwrap())
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let (train, val) = snapshot();
        let scorer = Scorer::new(
            &train,
            &val,
            &LogisticPropensity::default(),
            &FitOptions::default(),
        )
        .unwrap();

        let mut est = SLearner::new(Ridge::for_rows(train.num_rows()));
        est.fit(&train, &FitOptions::default()).unwrap();
        let a = scorer.score(&est).unwrap();
        let b = scorer.score(&est).unwrap();
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn test_scores_are_comparable_across_families() {
        let (train, val) = snapshot();
        let scorer = Scorer::new(
            &train,
            &val,
            &LogisticPropensity::default(),
            &FitOptions::default(),
        )
        .unwrap();

        let mut dummy = DummyEstimator::new();
        dummy.fit(&train, &FitOptions::default()).unwrap();
        let mut slearner = SLearner::new(Ridge::for_rows(train.num_rows()));
        slearner.fit(&train, &FitOptions::default()).unwrap();

        let dummy_score = scorer.score(&dummy).unwrap();
        let slearner_score = scorer.score(&slearner).unwrap();
        assert!(dummy_score.is_finite());
        assert!(slearner_score.is_finite());
        // The heterogeneous learner should not be dramatically worse than the
        // constant baseline on heterogeneous data
        assert!(slearner_score < dummy_score * 1.5);
    }

    #[test]
    fn test_unfitted_estimator_cannot_be_scored() {
        let (train, val) = snapshot();
        let scorer = Scorer::new(
            &train,
            &val,
            &LogisticPropensity::default(),
            &FitOptions::default(),
        )
        .unwrap();
        let est = SLearner::new(Ridge::for_rows(100));
        assert!(scorer.score(&est).is_err());
    }
}
