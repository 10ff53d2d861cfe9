//! # Causa: Automated Causal-Effect Estimator Search
//!
//! Causa searches a catalog of heterogeneous treatment-effect estimators for
//! the one that best fits a dataset: resolve a selection pattern against the
//! estimator registry, fit every surviving candidate under a time and trial
//! budget with per-trial failure isolation, score all of them on a common
//! held-out target, and select the winner deterministically.
//!
//! ## Pipeline
//!
//! raw dataset → preprocess → resolve pattern → fit candidates → score →
//! select best → effect estimation and attribution on demand.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use causa::{CausalDataset, CausalTuner, Identification, Pattern};
//!
//! let data = CausalDataset::load_parquet("data/trial.parquet", "treatment", &["y_factual"])?
//!     .preprocess(&causa::PreprocessOptions::default())?;
//!
//! let tuner = CausalTuner::builder().seed(7).build()?;
//! let run = tuner.run(&data, Identification::Backdoor, &Pattern::All, false)?;
//! println!("best: {:?}, score: {:?}", run.best_id(), run.best()?.score());
//! # Ok::<(), causa::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod dataset;
pub mod error;
pub mod explain;
pub mod model;
pub mod registry;
pub mod resolve;
pub mod score;
pub mod tune;

pub use dataset::{CausalDataset, PreprocessOptions};
pub use error::{Error, Result};
pub use explain::{AttributionPolicy, Explanation};
pub use model::{Estimator, FitOptions, PropensityModel};
pub use registry::{EstimatorDescriptor, Identification, Registry};
pub use resolve::{resolve, Pattern};
pub use score::Scorer;
pub use tune::{Budget, CausalTuner, Parallelism, RunResult, TrialResult, TrialStatus};
