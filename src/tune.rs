//! Tuning orchestrator
//!
//! Runs one trial per resolved candidate: instantiate the estimator with its
//! injected configuration, fit on the training split under a cooperative
//! deadline, score on the validation split, and record the outcome. Trials
//! are independent (each sees the same immutable snapshot), so they run
//! identically in sequence or over a rayon worker pool. Results accumulate in
//! a concurrent table written once per estimator identifier, then get
//! re-ordered to candidate order, so the run result never depends on
//! completion order.
//!
//! A single trial's failure never aborts the run: fitting errors, shape
//! incompatibilities, and budget expiries all become failed trial records.

use crate::dataset::{matrix_from_batch, CausalDataset, DesignMatrix};
use crate::model::{build_estimator, Estimator, FitOptions, LogisticPropensity, PropensityModel};
use crate::registry::{EstimatorDescriptor, Identification, Registry};
use crate::resolve::{resolve, Pattern};
use crate::score::Scorer;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resource budget for one tuning run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Budget {
    /// Wall-clock ceiling per trial
    pub per_trial: Option<Duration>,
    /// Wall-clock ceiling for the whole run
    pub total: Option<Duration>,
    /// Maximum number of trials attempted
    pub max_trials: Option<usize>,
}

impl Budget {
    /// Unlimited budget.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            per_trial: None,
            total: None,
            max_trials: None,
        }
    }

    /// Set the per-trial wall-clock ceiling.
    #[must_use]
    pub const fn with_per_trial(mut self, limit: Duration) -> Self {
        self.per_trial = Some(limit);
        self
    }

    /// Set the whole-run wall-clock ceiling.
    #[must_use]
    pub const fn with_total(mut self, limit: Duration) -> Self {
        self.total = Some(limit);
        self
    }

    /// Set the maximum trial count.
    #[must_use]
    pub const fn with_max_trials(mut self, limit: usize) -> Self {
        self.max_trials = Some(limit);
        self
    }
}

/// Trial dispatch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parallelism {
    /// One trial at a time, in candidate order
    Sequential,
    /// Rayon worker pool; falls back to sequential without the `rayon` feature
    WorkerPool,
}

impl Default for Parallelism {
    fn default() -> Self {
        if cfg!(feature = "rayon") {
            Self::WorkerPool
        } else {
            Self::Sequential
        }
    }
}

/// Outcome status of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    /// Fit and scoring completed
    Success,
    /// Fit or scoring failed; see the failure reason
    Failed,
}

/// Per-estimator outcome of one tuning run. Write-once: created when the
/// trial completes and never mutated.
#[derive(Serialize)]
pub struct TrialResult {
    estimator_id: String,
    status: TrialStatus,
    score: Option<f64>,
    failure: Option<String>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    duration: Duration,
    #[serde(skip)]
    fitted: Option<Box<dyn Estimator>>,
}

impl std::fmt::Debug for TrialResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialResult")
            .field("estimator_id", &self.estimator_id)
            .field("status", &self.status)
            .field("score", &self.score)
            .field("failure", &self.failure)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

impl TrialResult {
    fn success(
        estimator_id: String,
        score: f64,
        fitted: Box<dyn Estimator>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            estimator_id,
            status: TrialStatus::Success,
            score: Some(score),
            failure: None,
            started_at,
            ended_at: Utc::now(),
            duration,
            fitted: Some(fitted),
        }
    }

    fn failed(
        estimator_id: String,
        reason: String,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            estimator_id,
            status: TrialStatus::Failed,
            score: None,
            failure: Some(reason),
            started_at,
            ended_at: Utc::now(),
            duration,
            fitted: None,
        }
    }

    /// Estimator identifier this trial fit.
    #[must_use]
    pub fn estimator_id(&self) -> &str {
        &self.estimator_id
    }

    /// Outcome status.
    #[must_use]
    pub const fn status(&self) -> TrialStatus {
        self.status
    }

    /// Validation score (lower is better), present on success.
    #[must_use]
    pub const fn score(&self) -> Option<f64> {
        self.score
    }

    /// Failure reason, present on failure.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// When the trial started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the trial ended.
    #[must_use]
    pub const fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    /// Wall-clock time the trial consumed.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Fitted model artifact, present on success.
    #[must_use]
    pub fn fitted(&self) -> Option<&dyn Estimator> {
        self.fitted.as_deref()
    }
}

/// Pick the best successful trial: minimum score, earliest candidate order on
/// ties. Non-finite scores are never selected; a NaN incumbent would compare
/// false against every finite challenger.
///
/// # Errors
/// Returns [`Error::NoSuccessfulTrial`] when every trial failed.
pub fn select_best(trials: &[TrialResult]) -> Result<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, trial) in trials.iter().enumerate() {
        if trial.status() == TrialStatus::Success {
            if let Some(score) = trial.score().filter(|s| s.is_finite()) {
                // strict < keeps the earliest candidate on equal scores
                if best.map_or(true, |(_, b)| score < b) {
                    best = Some((i, score));
                }
            }
        }
    }
    best.map(|(i, _)| i).ok_or(Error::NoSuccessfulTrial {
        attempted: trials.len(),
    })
}

/// Aggregate result of one tuning run: one trial record per candidate, in
/// candidate order, plus a pointer to the best-scoring success.
pub struct RunResult {
    trials: Vec<TrialResult>,
    best: Option<usize>,
    x_names: Vec<String>,
    propensity: Box<dyn PropensityModel>,
    seed: u64,
}

impl std::fmt::Debug for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunResult")
            .field("trials", &self.trials)
            .field("best", &self.best)
            .finish_non_exhaustive()
    }
}

impl RunResult {
    /// Trial records in candidate order.
    #[must_use]
    pub fn trials(&self) -> &[TrialResult] {
        &self.trials
    }

    /// Trial record for an estimator identifier.
    #[must_use]
    pub fn get(&self, estimator_id: &str) -> Option<&TrialResult> {
        self.trials.iter().find(|t| t.estimator_id() == estimator_id)
    }

    /// Best successful trial.
    ///
    /// # Errors
    /// Returns [`Error::NoSuccessfulTrial`] when every trial failed.
    pub fn best(&self) -> Result<&TrialResult> {
        self.best
            .map(|i| &self.trials[i])
            .ok_or(Error::NoSuccessfulTrial {
                attempted: self.trials.len(),
            })
    }

    /// Identifier of the best successful trial, if any.
    #[must_use]
    pub fn best_id(&self) -> Option<&str> {
        self.best.map(|i| self.trials[i].estimator_id())
    }

    /// Estimate treatment effects for new covariate rows with the winning
    /// model. The batch must carry the run's effect-modifier columns.
    ///
    /// # Errors
    /// Returns error if no trial succeeded or columns are missing.
    pub fn effect(&self, batch: &RecordBatch) -> Result<Vec<Vec<f64>>> {
        let best = self.best()?;
        let fitted = best.fitted().ok_or_else(|| {
            Error::Other(format!(
                "best trial '{}' holds no fitted artifact",
                best.estimator_id()
            ))
        })?;
        let x = matrix_from_batch(batch, &self.x_names)?;
        fitted.effect(&x)
    }

    /// Feature attributions for the winning model on a bounded sample of new
    /// covariate rows, or a skip signal when policy excludes its family.
    ///
    /// # Errors
    /// Returns error if no trial succeeded or columns are missing.
    pub fn explain(
        &self,
        batch: &RecordBatch,
        policy: &crate::explain::AttributionPolicy,
    ) -> Result<crate::explain::Explanation> {
        let best = self.best()?;
        let fitted = best.fitted().ok_or_else(|| {
            Error::Other(format!(
                "best trial '{}' holds no fitted artifact",
                best.estimator_id()
            ))
        })?;
        let x = matrix_from_batch(batch, &self.x_names)?;
        crate::explain::explain(best.estimator_id(), fitted, &x, &self.x_names, policy)
    }

    /// Re-score the winning model on another preprocessed dataset, in-sample.
    /// A pure read: no trial record is mutated.
    ///
    /// # Errors
    /// Returns error if no trial succeeded or the dataset is incompatible.
    pub fn score_dataset(&self, dataset: &CausalDataset) -> Result<f64> {
        let best = self.best()?;
        let fitted = best.fitted().ok_or_else(|| {
            Error::Other(format!(
                "best trial '{}' holds no fitted artifact",
                best.estimator_id()
            ))
        })?;
        let design = dataset.to_design()?;
        let opts = FitOptions {
            deadline: None,
            seed: self.seed,
        };
        let scorer = Scorer::in_sample(&design, self.propensity.as_ref(), &opts)?;
        scorer.score(fitted)
    }

    /// Diagnostics snapshot: per-trial status, score, failure reason, and
    /// timing, keyed by estimator identifier.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "best": self.best_id(),
            "trials": self.trials,
        })
    }
}

/// Orchestrates estimator search: resolve, fit, score, select.
pub struct CausalTuner {
    registry: Registry,
    budget: Budget,
    propensity: Box<dyn PropensityModel>,
    parallelism: Parallelism,
    validation_fraction: f64,
    seed: u64,
    verbose: bool,
}

impl CausalTuner {
    /// Create a tuner builder with default configuration.
    #[must_use]
    pub fn builder() -> CausalTunerBuilder {
        CausalTunerBuilder::default()
    }

    /// Run one tuning pass over every estimator the pattern resolves to.
    ///
    /// The dataset must be preprocessed. The treatment cardinality filter is
    /// derived from the dataset itself.
    ///
    /// # Errors
    /// Returns [`Error::EmptySelection`] when nothing resolves,
    /// [`Error::InvalidInput`] for an unpreprocessed dataset. Per-trial
    /// failures are recorded, never propagated.
    pub fn run(
        &self,
        dataset: &CausalDataset,
        identification: Identification,
        pattern: &Pattern,
        include_experimental: bool,
    ) -> Result<RunResult> {
        if !dataset.is_preprocessed() {
            return Err(Error::InvalidInput(
                "dataset must be preprocessed before tuning".to_string(),
            ));
        }

        let candidates = resolve(
            &self.registry,
            identification,
            pattern,
            dataset.num_rows(),
            include_experimental,
            dataset.is_multivalue(),
        )?;
        info!(
            candidates = candidates.len(),
            rows = dataset.num_rows(),
            "starting tuning run"
        );

        let (train, val) = dataset.split_holdout(self.validation_fraction, self.seed)?;
        let train = train.to_design()?;
        let val = val.to_design()?;
        let scorer = Scorer::new(
            &train,
            &val,
            self.propensity.as_ref(),
            &FitOptions {
                deadline: None,
                seed: self.seed,
            },
        )?;

        let run_deadline = self.budget.total.map(|t| Instant::now() + t);
        let table: DashMap<String, TrialResult> = DashMap::with_capacity(candidates.len());

        let run_trial = |(index, descriptor): (usize, &&EstimatorDescriptor)| {
            let trial = self.execute_trial(index, descriptor, &train, &scorer, run_deadline);
            // write-once per key: each identifier is produced by exactly one trial
            table.insert(descriptor.id().to_string(), trial);
        };

        match self.parallelism {
            Parallelism::Sequential => candidates.iter().enumerate().for_each(run_trial),
            Parallelism::WorkerPool => {
                #[cfg(feature = "rayon")]
                {
                    use rayon::prelude::*;
                    candidates.par_iter().enumerate().for_each(run_trial);
                }
                #[cfg(not(feature = "rayon"))]
                candidates.iter().enumerate().for_each(run_trial);
            }
        }

        let mut trials = Vec::with_capacity(candidates.len());
        for descriptor in &candidates {
            let (_, trial) = table.remove(descriptor.id()).ok_or_else(|| {
                Error::Other(format!("trial table is missing '{}'", descriptor.id()))
            })?;
            trials.push(trial);
        }

        let best = select_best(&trials).ok();
        match best {
            Some(i) => info!(
                best = trials[i].estimator_id(),
                score = trials[i].score(),
                "tuning run complete"
            ),
            None => warn!("tuning run complete with no successful trial"),
        }

        Ok(RunResult {
            trials,
            best,
            x_names: dataset.features_x().to_vec(),
            propensity: self.propensity.clone_box(),
            seed: self.seed,
        })
    }

    fn execute_trial(
        &self,
        index: usize,
        descriptor: &EstimatorDescriptor,
        train: &DesignMatrix,
        scorer: &Scorer,
        run_deadline: Option<Instant>,
    ) -> TrialResult {
        let id = descriptor.id().to_string();
        let started_at = Utc::now();
        let begin = Instant::now();

        if self.budget.max_trials.is_some_and(|max| index >= max) {
            return TrialResult::failed(
                id,
                "budget exceeded: trial count limit reached before start".to_string(),
                started_at,
                begin.elapsed(),
            );
        }
        if run_deadline.is_some_and(|d| Instant::now() >= d) {
            return TrialResult::failed(
                id,
                "budget exceeded: total budget exhausted before start".to_string(),
                started_at,
                begin.elapsed(),
            );
        }

        let per_trial_deadline = self.budget.per_trial.map(|p| begin + p);
        let deadline = match (per_trial_deadline, run_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let opts = FitOptions {
            deadline,
            seed: self.seed.wrapping_add(index as u64),
        };

        let fitted = build_estimator(descriptor, self.propensity.as_ref(), train.num_rows())
            .and_then(|mut estimator| {
                estimator.fit(train, &opts)?;
                Ok(estimator)
            });

        // A fit that returned in time but overran its allotment is still a
        // budget failure; the partial artifact is dropped here
        if self
            .budget
            .per_trial
            .is_some_and(|limit| begin.elapsed() > limit)
        {
            return TrialResult::failed(
                id,
                "budget exceeded: per-trial time limit".to_string(),
                started_at,
                begin.elapsed(),
            );
        }

        let outcome = fitted.and_then(|estimator| {
            let score = scorer.score(estimator.as_ref())?;
            Ok((score, estimator))
        });

        match outcome {
            Ok((score, estimator)) => {
                if self.verbose {
                    info!(estimator = %id, score, "trial succeeded");
                } else {
                    debug!(estimator = %id, score, "trial succeeded");
                }
                TrialResult::success(id, score, estimator, started_at, begin.elapsed())
            }
            Err(err) => {
                let reason = match &err {
                    Error::BudgetExceeded(_) => format!("budget exceeded: {err}"),
                    _ => err.to_string(),
                };
                if self.verbose {
                    info!(estimator = %id, %reason, "trial failed");
                } else {
                    debug!(estimator = %id, %reason, "trial failed");
                }
                TrialResult::failed(id, reason, started_at, begin.elapsed())
            }
        }
    }
}

/// Builder for [`CausalTuner`].
pub struct CausalTunerBuilder {
    registry: Registry,
    budget: Budget,
    propensity: Box<dyn PropensityModel>,
    parallelism: Parallelism,
    validation_fraction: f64,
    seed: u64,
    verbose: bool,
}

impl Default for CausalTunerBuilder {
    fn default() -> Self {
        Self {
            registry: Registry::standard(),
            budget: Budget::unlimited(),
            propensity: Box::new(LogisticPropensity::default()),
            parallelism: Parallelism::default(),
            validation_fraction: 0.25,
            seed: 42,
            verbose: false,
        }
    }
}

impl CausalTunerBuilder {
    /// Resolve candidates against a custom registry.
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the run budget.
    #[must_use]
    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// Inject a custom propensity model; estimators whose descriptor declares
    /// a propensity slot receive a clone of it.
    #[must_use]
    pub fn propensity_model(mut self, model: impl PropensityModel + 'static) -> Self {
        self.propensity = Box::new(model);
        self
    }

    /// Set the trial dispatch strategy.
    #[must_use]
    pub fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Fraction of rows held out for scoring (default 0.25).
    #[must_use]
    pub fn validation_fraction(mut self, fraction: f64) -> Self {
        self.validation_fraction = fraction;
        self
    }

    /// Seed for the holdout split and randomized fitting internals.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Emit per-trial events at info level instead of debug.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Build the tuner.
    ///
    /// # Errors
    /// Returns error if the validation fraction is not in `(0, 1)`.
    pub fn build(self) -> Result<CausalTuner> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(Error::InvalidInput(format!(
                "validation fraction must be in (0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(CausalTuner {
            registry: self.registry,
            budget: self.budget,
            propensity: self.propensity,
            parallelism: self.parallelism,
            validation_fraction: self.validation_fraction,
            seed: self.seed,
            verbose: self.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic::synth_linear;
    use crate::dataset::PreprocessOptions;

    fn processed(rows: usize) -> CausalDataset {
        synth_linear(rows, 4, 5)
            .unwrap()
            .preprocess(&PreprocessOptions {
                seed: Some(5),
                drop_first: false,
            })
            .unwrap()
    }

    #[test]
    fn test_run_rejects_unpreprocessed_dataset() {
        let raw = synth_linear(100, 3, 1).unwrap();
        let tuner = CausalTuner::builder().build().unwrap();
        let err = tuner
            .run(&raw, Identification::Backdoor, &Pattern::All, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_sequential_and_pool_agree_on_outcomes() {
        let data = processed(400);
        let run_with = |parallelism| {
            CausalTuner::builder()
                .parallelism(parallelism)
                .build()
                .unwrap()
                .run(&data, Identification::Backdoor, &Pattern::All, false)
                .unwrap()
        };
        let sequential = run_with(Parallelism::Sequential);
        let pooled = run_with(Parallelism::WorkerPool);

        let ids = |r: &RunResult| -> Vec<String> {
            r.trials()
                .iter()
                .map(|t| t.estimator_id().to_string())
                .collect()
        };
        assert_eq!(ids(&sequential), ids(&pooled));
        assert_eq!(sequential.best_id(), pooled.best_id());
        for (a, b) in sequential.trials().iter().zip(pooled.trials()) {
            match (a.score(), b.score()) {
                (Some(x), Some(y)) => assert!((x - y).abs() < 1e-9),
                (x, y) => assert_eq!(x.is_none(), y.is_none()),
            }
        }
    }

    #[test]
    fn test_max_trials_budget_records_skipped_candidates() {
        let data = processed(400);
        let tuner = CausalTuner::builder()
            .budget(Budget::unlimited().with_max_trials(1))
            .parallelism(Parallelism::Sequential)
            .build()
            .unwrap();
        let result = tuner
            .run(&data, Identification::Backdoor, &Pattern::All, false)
            .unwrap();
        let failed: Vec<&TrialResult> = result
            .trials()
            .iter()
            .filter(|t| t.status() == TrialStatus::Failed)
            .collect();
        assert_eq!(failed.len(), result.trials().len() - 1);
        for trial in failed {
            assert!(trial.failure().unwrap().contains("budget exceeded"));
        }
    }

    #[test]
    fn test_tiny_per_trial_budget_fails_all_trials() {
        let data = processed(400);
        let tuner = CausalTuner::builder()
            .budget(Budget::unlimited().with_per_trial(Duration::ZERO))
            .build()
            .unwrap();
        let result = tuner
            .run(&data, Identification::Backdoor, &Pattern::All, false)
            .unwrap();
        assert!(result
            .trials()
            .iter()
            .all(|t| t.status() == TrialStatus::Failed));
        let err = result.best().unwrap_err();
        assert!(matches!(err, Error::NoSuccessfulTrial { .. }));
    }

    #[test]
    fn test_select_best_tie_break_is_earliest() {
        let now = Utc::now();
        let mk = |id: &str, score: f64| TrialResult {
            estimator_id: id.to_string(),
            status: TrialStatus::Success,
            score: Some(score),
            failure: None,
            started_at: now,
            ended_at: now,
            duration: Duration::ZERO,
            fitted: None,
        };
        let trials = vec![mk("a", 1.0), mk("b", 1.0), mk("c", 2.0)];
        assert_eq!(select_best(&trials).unwrap(), 0);
    }

    #[test]
    fn test_select_best_never_picks_a_non_finite_score() {
        let now = Utc::now();
        let mk = |id: &str, score: f64| TrialResult {
            estimator_id: id.to_string(),
            status: TrialStatus::Success,
            score: Some(score),
            failure: None,
            started_at: now,
            ended_at: now,
            duration: Duration::ZERO,
            fitted: None,
        };
        // A NaN incumbent must not shadow a strictly better finite score
        let trials = vec![mk("a", f64::NAN), mk("b", 1.0)];
        assert_eq!(select_best(&trials).unwrap(), 1);

        let trials = vec![mk("a", f64::INFINITY), mk("b", f64::NAN)];
        let err = select_best(&trials).unwrap_err();
        assert!(matches!(err, Error::NoSuccessfulTrial { attempted: 2 }));
    }

    #[test]
    fn test_builder_rejects_bad_fraction() {
        assert!(CausalTuner::builder()
            .validation_fraction(1.5)
            .build()
            .is_err());
    }
}
