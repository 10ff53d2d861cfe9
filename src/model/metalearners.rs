//! Meta-learners for heterogeneous treatment effect estimation
//!
//! Standard meta-algorithms (S-Learner, T-Learner, X-Learner, transformed
//! outcome, R-Learner) composed from the ridge and logistic base learners.
//! Nuisance models may use the full modifier-plus-confounder block at fit
//! time; effect-side models only ever see the effect-modifier block, since
//! that is all `effect()` receives for new rows.
//!
//! References: Künzel et al. (2019) for S/T/X-Learners, Athey & Imbens (2016)
//! for the transformed outcome, Nie & Wager (2021) for the R-loss.

use super::{check_deadline, Estimator, FitOptions, PropensityModel, Ridge};
use crate::dataset::{DesignMatrix, Mat};
use crate::{Error, Result};

/// Rows of `x` where the treatment equals `level`.
fn rows_at_level(x: &Mat, t: &[i32], level: i32) -> Result<(Mat, Vec<usize>)> {
    let indices: Vec<usize> = t
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == level)
        .map(|(i, _)| i)
        .collect();
    if indices.is_empty() {
        return Err(Error::ShapeMismatch(format!(
            "treatment level {level} has no rows"
        )));
    }
    let mut data = Vec::with_capacity(indices.len() * x.cols());
    for &i in &indices {
        data.extend_from_slice(x.row(i));
    }
    let mat = Mat::new(data, indices.len(), x.cols())?;
    Ok((mat, indices))
}

/// `x` with `extra` appended as trailing columns.
fn hstack(x: &Mat, extra: &[Vec<f64>]) -> Result<Mat> {
    let cols = x.cols() + extra.len();
    let mut data = Vec::with_capacity(x.rows() * cols);
    for i in 0..x.rows() {
        data.extend_from_slice(x.row(i));
        for col in extra {
            data.push(col[i]);
        }
    }
    Mat::new(data, x.rows(), cols)
}

fn require_binary(design: &DesignMatrix, name: &str) -> Result<()> {
    if design.k != 2 {
        return Err(Error::InvalidInput(format!(
            "{name} supports binary treatment only, got {} levels",
            design.k
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dummy
// ---------------------------------------------------------------------------

/// Constant-effect baseline: per-level difference in outcome means.
///
/// Useful as a sanity floor for the scorer: any estimator worth keeping
/// should beat it.
#[derive(Debug, Default)]
pub struct DummyEstimator {
    ate: Vec<f64>,
}

impl DummyEstimator {
    /// Create an unfitted dummy estimator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Estimator for DummyEstimator {
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()> {
        check_deadline(opts.deadline, "Dummy fit")?;
        let mut means = Vec::with_capacity(design.k);
        for level in 0..design.k {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let (_, indices) = rows_at_level(&design.x, &design.t, level as i32)?;
            #[allow(clippy::cast_precision_loss)]
            let mean =
                indices.iter().map(|&i| design.y[i]).sum::<f64>() / indices.len() as f64;
            means.push(mean);
        }
        self.ate = means[1..].iter().map(|m| m - means[0]).collect();
        Ok(())
    }

    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>> {
        if self.ate.is_empty() {
            return Err(Error::InvalidInput("Dummy is not fitted".to_string()));
        }
        Ok(self.ate.iter().map(|a| vec![*a; x.rows()]).collect())
    }
}

// ---------------------------------------------------------------------------
// S-Learner
// ---------------------------------------------------------------------------

/// Single model over covariates plus treatment indicators.
///
/// Effect at level `k` is the prediction with indicator `k` toggled on minus
/// the prediction under control.
#[derive(Debug)]
pub struct SLearner {
    model: Ridge,
    levels: usize,
}

impl SLearner {
    /// Create from a base learner prototype.
    #[must_use]
    pub const fn new(base: Ridge) -> Self {
        Self {
            model: base,
            levels: 0,
        }
    }
}

impl Estimator for SLearner {
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()> {
        check_deadline(opts.deadline, "SLearner fit")?;
        let indicators: Vec<Vec<f64>> = (1..design.k)
            .map(|level| {
                design
                    .t
                    .iter()
                    .map(|t| {
                        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                        let l = level as i32;
                        f64::from(u8::from(*t == l))
                    })
                    .collect()
            })
            .collect();
        let augmented = hstack(&design.x, &indicators)?;
        self.model.fit(&augmented, &design.y)?;
        self.levels = design.k;
        Ok(())
    }

    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>> {
        if self.levels == 0 {
            return Err(Error::InvalidInput("SLearner is not fitted".to_string()));
        }
        let zeros = vec![vec![0.0; x.rows()]; self.levels - 1];
        let control = self.model.predict(&hstack(x, &zeros)?)?;

        let mut out = Vec::with_capacity(self.levels - 1);
        for level in 0..self.levels - 1 {
            let mut indicators = zeros.clone();
            indicators[level] = vec![1.0; x.rows()];
            let treated = self.model.predict(&hstack(x, &indicators)?)?;
            out.push(
                treated
                    .iter()
                    .zip(&control)
                    .map(|(a, b)| a - b)
                    .collect(),
            );
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// T-Learner
// ---------------------------------------------------------------------------

/// One outcome model per treatment level; effect is the prediction gap
/// against the control model.
#[derive(Debug)]
pub struct TLearner {
    base: Ridge,
    models: Vec<Ridge>,
}

impl TLearner {
    /// Create from a base learner prototype.
    #[must_use]
    pub const fn new(base: Ridge) -> Self {
        Self {
            base,
            models: Vec::new(),
        }
    }
}

impl Estimator for TLearner {
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()> {
        let mut models = Vec::with_capacity(design.k);
        for level in 0..design.k {
            check_deadline(opts.deadline, "TLearner fit")?;
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let (x_level, indices) = rows_at_level(&design.x, &design.t, level as i32)?;
            let y_level: Vec<f64> = indices.iter().map(|&i| design.y[i]).collect();
            let mut model = self.base.clone();
            model.fit(&x_level, &y_level)?;
            models.push(model);
        }
        self.models = models;
        Ok(())
    }

    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>> {
        if self.models.is_empty() {
            return Err(Error::InvalidInput("TLearner is not fitted".to_string()));
        }
        let control = self.models[0].predict(x)?;
        self.models[1..]
            .iter()
            .map(|model| {
                let treated = model.predict(x)?;
                Ok(treated.iter().zip(&control).map(|(a, b)| a - b).collect())
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Transformed outcome
// ---------------------------------------------------------------------------

/// Regression on the Horvitz–Thompson transformed outcome (binary only).
///
/// The pseudo-outcome `y * (t - e(x)) / (e(x) * (1 - e(x)))` is unbiased for
/// the CATE; a single ridge fit against it yields the effect model. Consumes
/// the injected propensity model.
pub struct TransformedOutcome {
    model: Ridge,
    propensity: Box<dyn PropensityModel>,
    fitted: bool,
}

impl TransformedOutcome {
    /// Create from a base learner prototype and an injected propensity model.
    #[must_use]
    pub fn new(base: Ridge, propensity: Box<dyn PropensityModel>) -> Self {
        Self {
            model: base,
            propensity,
            fitted: false,
        }
    }
}

/// Transformed-outcome pseudo-effect for one row.
#[must_use]
pub fn transformed_outcome(y: f64, t: f64, e: f64) -> f64 {
    y * (t - e) / (e * (1.0 - e))
}

impl Estimator for TransformedOutcome {
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()> {
        require_binary(design, "TransformedOutcome")?;
        check_deadline(opts.deadline, "TransformedOutcome propensity fit")?;

        let t: Vec<f64> = design.t.iter().map(|v| f64::from(*v)).collect();
        self.propensity.fit(&design.xw, &t, opts)?;
        let e = self.propensity.predict(&design.xw)?;

        check_deadline(opts.deadline, "TransformedOutcome effect fit")?;
        let pseudo: Vec<f64> = (0..design.num_rows())
            .map(|i| transformed_outcome(design.y[i], t[i], e[i]))
            .collect();
        self.model.fit(&design.x, &pseudo)?;
        self.fitted = true;
        Ok(())
    }

    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>> {
        if !self.fitted {
            return Err(Error::InvalidInput(
                "TransformedOutcome is not fitted".to_string(),
            ));
        }
        Ok(vec![self.model.predict(x)?])
    }
}

// ---------------------------------------------------------------------------
// X-Learner
// ---------------------------------------------------------------------------

/// X-Learner (binary only): imputed per-group effects blended by propensity.
///
/// High variance on small samples, hence the large registry row threshold.
pub struct XLearner {
    base: Ridge,
    tau_control: Ridge,
    tau_treated: Ridge,
    propensity: Box<dyn PropensityModel>,
    fitted: bool,
}

impl XLearner {
    /// Create from a base learner prototype and an injected propensity model.
    #[must_use]
    pub fn new(base: Ridge, propensity: Box<dyn PropensityModel>) -> Self {
        Self {
            tau_control: base.clone(),
            tau_treated: base.clone(),
            base,
            propensity,
            fitted: false,
        }
    }
}

impl Estimator for XLearner {
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()> {
        require_binary(design, "XLearner")?;

        let (x0, idx0) = rows_at_level(&design.x, &design.t, 0)?;
        let (x1, idx1) = rows_at_level(&design.x, &design.t, 1)?;
        let y0: Vec<f64> = idx0.iter().map(|&i| design.y[i]).collect();
        let y1: Vec<f64> = idx1.iter().map(|&i| design.y[i]).collect();

        check_deadline(opts.deadline, "XLearner outcome fits")?;
        let mut mu0 = self.base.clone();
        let mut mu1 = self.base.clone();
        mu0.fit(&x0, &y0)?;
        mu1.fit(&x1, &y1)?;

        check_deadline(opts.deadline, "XLearner imputed-effect fits")?;
        // Imputed effects: treated against mu0, control against mu1
        let d1: Vec<f64> = mu0
            .predict(&x1)?
            .iter()
            .zip(&y1)
            .map(|(m, y)| y - m)
            .collect();
        let d0: Vec<f64> = mu1
            .predict(&x0)?
            .iter()
            .zip(&y0)
            .map(|(m, y)| m - y)
            .collect();
        self.tau_treated.fit(&x1, &d1)?;
        self.tau_control.fit(&x0, &d0)?;

        check_deadline(opts.deadline, "XLearner propensity fit")?;
        // Fit on the modifier block: the blend weight is needed at effect time
        let t: Vec<f64> = design.t.iter().map(|v| f64::from(*v)).collect();
        self.propensity.fit(&design.x, &t, opts)?;

        self.fitted = true;
        Ok(())
    }

    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>> {
        if !self.fitted {
            return Err(Error::InvalidInput("XLearner is not fitted".to_string()));
        }
        let g = self.propensity.predict(x)?;
        let tau0 = self.tau_control.predict(x)?;
        let tau1 = self.tau_treated.predict(x)?;
        let blended = (0..x.rows())
            .map(|i| g[i].mul_add(tau0[i], (1.0 - g[i]) * tau1[i]))
            .collect();
        Ok(vec![blended])
    }
}

// ---------------------------------------------------------------------------
// R-Learner
// ---------------------------------------------------------------------------

/// R-Learner (binary only, experimental): residualize outcome and treatment,
/// then fit the effect by weighted least squares on the residual ratio with
/// weights `(t - e(x))^2`.
pub struct RLearner {
    outcome: Ridge,
    tau: Ridge,
    propensity: Box<dyn PropensityModel>,
    fitted: bool,
}

impl RLearner {
    /// Create from a base learner prototype and an injected propensity model.
    #[must_use]
    pub fn new(base: Ridge, propensity: Box<dyn PropensityModel>) -> Self {
        Self {
            outcome: base.clone(),
            tau: base,
            propensity,
            fitted: false,
        }
    }
}

impl Estimator for RLearner {
    fn fit(&mut self, design: &DesignMatrix, opts: &FitOptions) -> Result<()> {
        require_binary(design, "RLearner")?;

        check_deadline(opts.deadline, "RLearner nuisance fits")?;
        let t: Vec<f64> = design.t.iter().map(|v| f64::from(*v)).collect();
        self.outcome.fit(&design.xw, &design.y)?;
        self.propensity.fit(&design.xw, &t, opts)?;

        let m = self.outcome.predict(&design.xw)?;
        let e = self.propensity.predict(&design.xw)?;

        check_deadline(opts.deadline, "RLearner effect fit")?;
        let mut targets = Vec::with_capacity(design.num_rows());
        let mut weights = Vec::with_capacity(design.num_rows());
        for i in 0..design.num_rows() {
            let denom = t[i] - e[i];
            targets.push((design.y[i] - m[i]) / denom);
            weights.push(denom * denom);
        }
        self.tau.fit_weighted(&design.x, &targets, &weights)?;
        self.fitted = true;
        Ok(())
    }

    fn effect(&self, x: &Mat) -> Result<Vec<Vec<f64>>> {
        if !self.fitted {
            return Err(Error::InvalidInput("RLearner is not fitted".to_string()));
        }
        Ok(vec![self.tau.predict(x)?])
    }
}
