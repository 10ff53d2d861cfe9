//! Instrumental-variable estimation
//!
//! Two-stage least squares: stage one predicts treatment uptake from the
//! instrument plus covariates, stage two regresses the outcome on the
//! predicted uptake plus covariates. The effect is the stage-two coefficient
//! on predicted uptake, constant across rows.

use super::{check_deadline, Estimator, FitOptions, Ridge};
use crate::dataset::{DesignMatrix, Mat};
use crate::{Error, Result};

/// Two-stage least squares over the ridge base learner.
#[derive(Debug)]
pub struct TwoStageLeastSquares {
    base: Ridge,
    effect: Option<f64>,
}

impl TwoStageLeastSquares {
    /// Create from a base learner prototype.
    #[must_use]
    pub const fn new(base: Ridge) -> Self {
        Self { base, effect: None }
    }

    /// Stage-two coefficient on predicted uptake, once fitted.
    #[must_use]
    pub const fn coefficient(&self) -> Option<f64> {
        self.effect
    }
}

impl Estimator for TwoStageLeastSquares {
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()> {
        if design.k != 2 {
            return Err(Error::InvalidInput(format!(
                "TwoStageLeastSquares supports binary treatment only, got {} levels",
                design.k
            )));
        }
        let z = design.z.as_ref().ok_or_else(|| {
            Error::InvalidInput(
                "TwoStageLeastSquares requires a dataset with a declared instrument".to_string(),
            )
        })?;

        check_deadline(opts.deadline, "2SLS stage one")?;
        let t: Vec<f64> = design.t.iter().map(|v| f64::from(*v)).collect();
        let stage_one_x = with_leading_column(&design.x, z)?;
        let mut stage_one = self.base.clone();
        stage_one.fit(&stage_one_x, &t)?;
        let t_hat = stage_one.predict(&stage_one_x)?;

        check_deadline(opts.deadline, "2SLS stage two")?;
        let stage_two_x = with_leading_column(&design.x, &t_hat)?;
        let mut stage_two = self.base.clone();
        stage_two.fit(&stage_two_x, &design.y)?;

        // Coefficient on the leading (predicted-uptake) column: difference of
        // predictions with uptake 1 vs 0 on an otherwise-zero row
        let mut probe = vec![0.0; stage_two_x.cols()];
        let at_zero = stage_two.predict_row(&probe);
        probe[0] = 1.0;
        let at_one = stage_two.predict_row(&probe);
        self.effect = Some(at_one - at_zero);
        Ok(())
    }

    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>> {
        let beta = self.effect.ok_or_else(|| {
            Error::InvalidInput("TwoStageLeastSquares is not fitted".to_string())
        })?;
        Ok(vec![vec![beta; x.rows()]])
    }
}

/// `values` prepended as the first column of `x`.
fn with_leading_column(x: &Mat, values: &[f64]) -> Result<Mat> {
    if values.len() != x.rows() {
        return Err(Error::ShapeMismatch(format!(
            "x has {} rows, column has {}",
            x.rows(),
            values.len()
        )));
    }
    let cols = x.cols() + 1;
    let mut data = Vec::with_capacity(x.rows() * cols);
    for i in 0..x.rows() {
        data.push(values[i]);
        data.extend_from_slice(x.row(i));
    }
    Mat::new(data, x.rows(), cols)
}
