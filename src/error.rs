//! Error types for causa
//!
//! Per-trial failures are recovered locally by the tuner and recorded in the
//! run result; only dataset-level and selection-space-level failures surface
//! through these variants.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Causa error types
#[derive(Error, Debug)]
pub enum Error {
    /// Treatment column cannot be coerced to a small finite integer domain
    #[error("Invalid treatment column '{column}': {reason}\nTreatment values must be coercible to a small finite integer domain (at most {max_levels} levels)")]
    InvalidTreatment {
        /// Name of the offending column
        column: String,
        /// Why coercion failed
        reason: String,
        /// Maximum number of distinct treatment levels accepted
        max_levels: usize,
    },

    /// No estimator descriptor survived pattern resolution
    #[error("Empty estimator selection: {0}\nRelax the pattern, lower the row threshold, or enable experimental estimators")]
    EmptySelection(String),

    /// Every trial in the run failed, so no best estimator can be selected
    #[error("No successful trial among {attempted} candidates\nInspect the per-trial failure reasons in the run result")]
    NoSuccessfulTrial {
        /// Number of candidates attempted
        attempted: usize,
    },

    /// Trial exceeded its time allotment
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Referenced column does not exist in the dataset
    #[error("Column '{0}' not found in dataset schema")]
    ColumnNotFound(String),

    /// Row/column count mismatch between related inputs
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Normal-equations system is singular or not positive definite
    #[error("Singular system while fitting '{0}': increase regularization or drop collinear features")]
    Singular(String),

    /// Invalid argument or dataset state
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (Parquet ingestion)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
