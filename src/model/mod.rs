//! Estimator library boundary
//!
//! The tuner and scorer depend only on the [`Estimator`] trait (`fit` on a
//! design matrix, `effect` on new covariate rows), never on estimator-internal
//! state. Built-in families live in [`metalearners`] and [`iv`]; the
//! [`build_estimator`] factory maps a registry descriptor to a boxed instance,
//! injecting the configured propensity model where the descriptor declares it.

pub mod iv;
pub mod linear;
pub mod metalearners;

pub use linear::{LogisticPropensity, Ridge, PROPENSITY_CLIP};

use crate::dataset::{DesignMatrix, Mat};
use crate::registry::{ConfigKind, EstimatorDescriptor};
use crate::{Error, Result};
use std::time::Instant;

/// Options threaded through every fit call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitOptions {
    /// Cooperative budget deadline; fits check it between internal stages
    pub deadline: Option<Instant>,
    /// Seed for any randomized fitting internals
    pub seed: u64,
}

/// Fail with [`Error::BudgetExceeded`] once `deadline` has passed.
///
/// # Errors
/// Returns error when the deadline is in the past.
pub fn check_deadline(deadline: Option<Instant>, what: &str) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => {
            Err(Error::BudgetExceeded(format!("{what} hit its deadline")))
        }
        _ => Ok(()),
    }
}

/// Treatment-effect estimator.
///
/// `effect` returns one vector per non-control treatment level, each holding
/// the estimated per-row effect of that level versus control, so
/// `effect(x)[j][i]` is the effect of level `j + 1` for row `i`.
pub trait Estimator: Send + Sync {
    /// Fit on a preprocessed design.
    ///
    /// # Errors
    /// Returns error on numerical failure, incompatible shapes, or a missed
    /// cooperative deadline.
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()>;

    /// Estimate treatment effects for new effect-modifier rows.
    ///
    /// # Errors
    /// Returns error if the estimator is unfitted or shapes mismatch.
    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>>;
}

/// Propensity model boundary: estimates `P(T = 1 | X)` for a binary target.
///
/// Multi-valued treatments are handled above this trait by one-vs-rest
/// composition; implementations only ever see 0/1 targets.
pub trait PropensityModel: Send + Sync {
    /// Fit on rows of `x` against a 0/1 target.
    ///
    /// # Errors
    /// Returns error on shape mismatch, numerical failure, or deadline.
    fn fit(&mut self, x: &Mat, t: &[f64], opts: &FitOptions) -> Result<()>;

    /// Predicted treatment probabilities, clipped away from 0 and 1.
    ///
    /// # Errors
    /// Returns error if unfitted or shapes mismatch.
    fn predict(&self, x: &Mat) -> Result<Vec<f64>>;

    /// Clone into a fresh unfitted-or-fitted boxed instance.
    fn clone_box(&self) -> Box<dyn PropensityModel>;
}

impl Clone for Box<dyn PropensityModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Instantiate the estimator a descriptor names.
///
/// Sample-size-aware defaults: the ridge regularization of every base learner
/// is derived from `data_rows`. Descriptors declaring
/// [`ConfigKind::WithPropensity`] receive a clone of `propensity`; the rest
/// ignore it.
///
/// # Errors
/// Returns error for an identifier with no built-in implementation.
pub fn build_estimator(
    descriptor: &EstimatorDescriptor,
    propensity: &dyn PropensityModel,
    data_rows: usize,
) -> Result<Box<dyn Estimator>> {
    let base = Ridge::for_rows(data_rows);
    let injected = match descriptor.config() {
        ConfigKind::WithPropensity => Some(propensity.clone_box()),
        ConfigKind::Plain => None,
    };

    let estimator: Box<dyn Estimator> = match descriptor.id() {
        "backdoor.Dummy" => Box::new(metalearners::DummyEstimator::new()),
        "backdoor.SLearner" => Box::new(metalearners::SLearner::new(base)),
        "backdoor.TLearner" => Box::new(metalearners::TLearner::new(base)),
        "backdoor.TransformedOutcome" => Box::new(metalearners::TransformedOutcome::new(
            base,
            required(injected, descriptor)?,
        )),
        "backdoor.XLearner" => Box::new(metalearners::XLearner::new(
            base,
            required(injected, descriptor)?,
        )),
        "backdoor.RLearner" => Box::new(metalearners::RLearner::new(
            base,
            required(injected, descriptor)?,
        )),
        "iv.TwoStageLeastSquares" => Box::new(iv::TwoStageLeastSquares::new(base)),
        other => {
            return Err(Error::InvalidInput(format!(
                "no built-in estimator for identifier '{other}'"
            )));
        }
    };
    Ok(estimator)
}

fn required(
    injected: Option<Box<dyn PropensityModel>>,
    descriptor: &EstimatorDescriptor,
) -> Result<Box<dyn PropensityModel>> {
    injected.ok_or_else(|| {
        Error::InvalidInput(format!(
            "descriptor '{}' consumes a propensity model but none was injected",
            descriptor.id()
        ))
    })
}
