//! Linear base learners
//!
//! Every built-in estimator family composes two primitives: a ridge regressor
//! solved by normal equations with a Cholesky factorization, and a logistic
//! propensity model fit by iteratively reweighted least squares. Both are
//! deliberately small; the heterogeneous-model-space search above them is the
//! interesting part, not the base learners.

use super::{check_deadline, FitOptions, PropensityModel};
use crate::dataset::Mat;
use crate::{Error, Result};

/// Probability clip bounds for propensity estimates
pub const PROPENSITY_CLIP: (f64, f64) = (0.01, 0.99);

/// Ridge regressor with intercept (intercept is not penalized).
#[derive(Debug, Clone)]
pub struct Ridge {
    lambda: f64,
    /// Coefficients, intercept last
    weights: Vec<f64>,
}

impl Ridge {
    /// Create a ridge regressor with the given regularization strength.
    #[must_use]
    pub const fn new(lambda: f64) -> Self {
        Self {
            lambda,
            weights: Vec::new(),
        }
    }

    /// Sample-size-aware default regularization: small datasets get a
    /// stronger prior to keep the normal equations well conditioned.
    #[must_use]
    pub fn for_rows(data_rows: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let lambda = (100.0 / (data_rows.max(1) as f64)).max(1e-3);
        Self::new(lambda)
    }

    /// Whether the model has been fit.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        !self.weights.is_empty()
    }

    /// Fit on rows of `x` against targets `y`.
    ///
    /// # Errors
    /// Returns error on shape mismatch or a singular system.
    pub fn fit(&mut self, x: &Mat, y: &[f64]) -> Result<()> {
        let ones = vec![1.0; x.rows()];
        self.fit_weighted(x, y, &ones)
    }

    /// Weighted least squares fit (weights are per-row).
    ///
    /// # Errors
    /// Returns error on shape mismatch or a singular system.
    pub fn fit_weighted(&mut self, x: &Mat, y: &[f64], sample_weight: &[f64]) -> Result<()> {
        let n = x.rows();
        let p = x.cols() + 1; // intercept column appended
        if y.len() != n || sample_weight.len() != n {
            return Err(Error::ShapeMismatch(format!(
                "x has {n} rows, y has {} and weights {}",
                y.len(),
                sample_weight.len()
            )));
        }

        // Normal equations: (X'WX + lambda*I) beta = X'Wy
        let mut a = vec![0.0; p * p];
        let mut b = vec![0.0; p];
        for i in 0..n {
            let w = sample_weight[i];
            let row = x.row(i);
            for j in 0..p {
                let xj = if j < x.cols() { row[j] } else { 1.0 };
                b[j] += w * xj * y[i];
                for l in j..p {
                    let xl = if l < x.cols() { row[l] } else { 1.0 };
                    a[j * p + l] += w * xj * xl;
                }
            }
        }
        // Mirror the upper triangle and add the ridge penalty (not on intercept)
        for j in 0..p {
            for l in 0..j {
                a[j * p + l] = a[l * p + j];
            }
        }
        for j in 0..p - 1 {
            a[j * p + j] += self.lambda;
        }

        self.weights = cholesky_solve(&mut a, &b, p).ok_or_else(|| {
            Error::Singular("ridge regression".to_string())
        })?;
        Ok(())
    }

    /// Predict one row. Caller must have fit the model first; `predict` is
    /// the checked entry point.
    pub(crate) fn predict_row(&self, row: &[f64]) -> f64 {
        let p = self.weights.len();
        let mut out = self.weights[p - 1];
        for (j, v) in row.iter().enumerate().take(p - 1) {
            out += self.weights[j] * v;
        }
        out
    }

    /// Predict every row of `x`.
    ///
    /// # Errors
    /// Returns error if the model is unfitted or the column count differs
    /// from the fit.
    pub fn predict(&self, x: &Mat) -> Result<Vec<f64>> {
        if self.weights.is_empty() {
            return Err(Error::InvalidInput("ridge model is not fitted".to_string()));
        }
        if x.cols() + 1 != self.weights.len() {
            return Err(Error::ShapeMismatch(format!(
                "fit on {} features, asked to predict on {}",
                self.weights.len() - 1,
                x.cols()
            )));
        }
        Ok((0..x.rows()).map(|i| self.predict_row(x.row(i))).collect())
    }
}

/// Solve `A x = b` for symmetric positive definite `A` (row-major, n x n).
/// Returns `None` if the factorization breaks down.
fn cholesky_solve(a: &mut [f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    // In-place lower Cholesky factor
    for j in 0..n {
        let mut diag = a[j * n + j];
        for l in 0..j {
            diag -= a[j * n + l] * a[j * n + l];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return None;
        }
        let diag = diag.sqrt();
        a[j * n + j] = diag;
        for i in j + 1..n {
            let mut v = a[i * n + j];
            for l in 0..j {
                v -= a[i * n + l] * a[j * n + l];
            }
            a[i * n + j] = v / diag;
        }
    }
    // Forward substitution: L z = b
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut v = b[i];
        for l in 0..i {
            v -= a[i * n + l] * z[l];
        }
        z[i] = v / a[i * n + i];
    }
    // Back substitution: L' x = z
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut v = z[i];
        for l in i + 1..n {
            v -= a[l * n + i] * x[l];
        }
        x[i] = v / a[i * n + i];
    }
    Some(x)
}

/// Logistic propensity model fit by IRLS.
#[derive(Debug, Clone)]
pub struct LogisticPropensity {
    l2: f64,
    max_iterations: usize,
    weights: Vec<f64>,
}

impl LogisticPropensity {
    /// Create with explicit L2 strength and iteration cap.
    #[must_use]
    pub const fn new(l2: f64, max_iterations: usize) -> Self {
        Self {
            l2,
            max_iterations,
            weights: Vec::new(),
        }
    }

    fn linear(&self, row: &[f64]) -> f64 {
        let p = self.weights.len();
        let mut out = self.weights[p - 1];
        for (j, v) in row.iter().enumerate().take(p - 1) {
            out += self.weights[j] * v;
        }
        out
    }
}

impl Default for LogisticPropensity {
    fn default() -> Self {
        Self::new(1.0, 25)
    }
}

impl PropensityModel for LogisticPropensity {
    fn fit(&mut self, x: &Mat, t: &[f64], opts: &FitOptions) -> Result<()> {
        let n = x.rows();
        let p = x.cols() + 1;
        if t.len() != n {
            return Err(Error::ShapeMismatch(format!(
                "x has {n} rows, t has {}",
                t.len()
            )));
        }
        self.weights = vec![0.0; p];

        for _ in 0..self.max_iterations {
            check_deadline(opts.deadline, "logistic propensity fit")?;

            // One IRLS step: solve (X'SX + l2*I) d = X'(t - p)
            let mut a = vec![0.0; p * p];
            let mut g = vec![0.0; p];
            for i in 0..n {
                let row = x.row(i);
                let mu = 1.0 / (1.0 + (-self.linear(row)).exp());
                let s = (mu * (1.0 - mu)).max(1e-6);
                let r = t[i] - mu;
                for j in 0..p {
                    let xj = if j < x.cols() { row[j] } else { 1.0 };
                    g[j] += xj * r;
                    for l in j..p {
                        let xl = if l < x.cols() { row[l] } else { 1.0 };
                        a[j * p + l] += s * xj * xl;
                    }
                }
            }
            for j in 0..p {
                for l in 0..j {
                    a[j * p + l] = a[l * p + j];
                }
                a[j * p + j] += self.l2;
                g[j] -= self.l2 * self.weights[j];
            }

            let step = cholesky_solve(&mut a, &g, p)
                .ok_or_else(|| Error::Singular("logistic propensity".to_string()))?;
            let mut delta = 0.0f64;
            for j in 0..p {
                self.weights[j] += step[j];
                delta = delta.max(step[j].abs());
            }
            if delta < 1e-8 {
                break;
            }
        }
        Ok(())
    }

    fn predict(&self, x: &Mat) -> Result<Vec<f64>> {
        if self.weights.is_empty() {
            return Err(Error::InvalidInput(
                "propensity model is not fitted".to_string(),
            ));
        }
        if x.cols() + 1 != self.weights.len() {
            return Err(Error::ShapeMismatch(format!(
                "fit on {} features, asked to predict on {}",
                self.weights.len() - 1,
                x.cols()
            )));
        }
        Ok((0..x.rows())
            .map(|i| {
                let mu = 1.0 / (1.0 + (-self.linear(x.row(i))).exp());
                mu.clamp(PROPENSITY_CLIP.0, PROPENSITY_CLIP.1)
            })
            .collect())
    }

    fn clone_box(&self) -> Box<dyn PropensityModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_data() -> (Mat, Vec<f64>) {
        // y = 2x + 1
        let xs: Vec<f64> = (0..50).map(f64::from).collect();
        let y: Vec<f64> = xs.iter().map(|x| 2.0f64.mul_add(*x, 1.0)).collect();
        (Mat::new(xs, 50, 1).unwrap(), y)
    }

    #[test]
    fn test_ridge_recovers_line() {
        let (x, y) = line_data();
        let mut model = Ridge::new(1e-6);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(&y) {
            assert!((p - t).abs() < 1e-3, "{p} vs {t}");
        }
    }

    #[test]
    fn test_unfitted_ridge_predict_is_an_error() {
        let (x, _) = line_data();
        let model = Ridge::new(1.0);
        assert!(!model.is_fitted());
        let err = model.predict(&x).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_ridge_rejects_shape_mismatch() {
        let (x, _) = line_data();
        let mut model = Ridge::new(1.0);
        let err = model.fit(&x, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn test_logistic_separates_classes() {
        // t = 1 when x > 0
        let xs: Vec<f64> = (-25..25).map(f64::from).collect();
        let t: Vec<f64> = xs.iter().map(|x| f64::from(u8::from(*x > 0.0))).collect();
        let x = Mat::new(xs, 50, 1).unwrap();
        let mut model = LogisticPropensity::default();
        model.fit(&x, &t, &FitOptions::default()).unwrap();
        let probs = model.predict(&x).unwrap();
        assert!(probs[0] < 0.2);
        assert!(probs[49] > 0.8);
    }

    #[test]
    fn test_propensity_predictions_are_clipped() {
        let xs: Vec<f64> = (-25..25).map(|v| f64::from(v) * 100.0).collect();
        let t: Vec<f64> = xs.iter().map(|x| f64::from(u8::from(*x > 0.0))).collect();
        let x = Mat::new(xs, 50, 1).unwrap();
        let mut model = LogisticPropensity::default();
        model.fit(&x, &t, &FitOptions::default()).unwrap();
        for p in model.predict(&x).unwrap() {
            assert!((PROPENSITY_CLIP.0..=PROPENSITY_CLIP.1).contains(&p));
        }
    }
}
