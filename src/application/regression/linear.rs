// Least-squares linear models (OLS and ridge)
use crate::application::error::{PipelineError, PipelineResult};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve `a · x = b` for symmetric positive (semi-)definite `a` via Cholesky.
/// Near-singular systems are retried with a growing diagonal jitter.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    if let Some(x) = cholesky_solve(a, b) {
        return Some(x);
    }

    let mean_diag = a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64;
    let base = if mean_diag > 0.0 { mean_diag } else { 1.0 };
    for factor in [1e-10, 1e-8, 1e-6, 1e-4] {
        let mut reg = a.clone();
        for k in 0..n {
            reg[[k, k]] += factor * base;
        }
        if let Some(x) = cholesky_solve(&reg, b) {
            return Some(x);
        }
    }
    None
}

fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L · y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Lᵀ · x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Linear regression with intercept; `alpha > 0` adds an L2 penalty (ridge)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub alpha: f64,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl LinearModel {
    pub fn ordinary() -> Self {
        Self::ridge(0.0)
    }

    pub fn ridge(alpha: f64) -> Self {
        Self {
            alpha: alpha.max(0.0),
            coefficients: None,
            intercept: 0.0,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> PipelineResult<()> {
        if x.nrows() != y.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "feature rows ({}) and targets ({}) differ",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(PipelineError::DataQuality("no training rows".to_string()));
        }

        // Centre so the intercept drops out of the normal equations
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::DataQuality("no training rows".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);
        let x_c = x - &x_mean.view().insert_axis(Axis(0));
        let y_c = y - y_mean;

        let mut xtx = x_c.t().dot(&x_c);
        for k in 0..xtx.nrows() {
            xtx[[k, k]] += self.alpha;
        }
        let xty = x_c.t().dot(&y_c);

        let coefficients = solve_spd(&xtx, &xty).ok_or_else(|| {
            PipelineError::Numerical("normal equations are singular".to_string())
        })?;

        self.intercept = y_mean - coefficients.dot(&x_mean);
        self.coefficients = Some(coefficients);
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        let coefficients = self
            .coefficients
            .as_ref()
            .ok_or(PipelineError::NotFitted("linear model"))?;
        if x.ncols() != coefficients.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "model expects {} features, got {}",
                coefficients.len(),
                x.ncols()
            )));
        }
        Ok(x.dot(coefficients) + self.intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ordinary_least_squares_recovers_plane() {
        // y = 2·x0 - 3·x1 + 5
        let x = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [3.0, 2.0]];
        let y = x.map_axis(Axis(1), |r| 2.0 * r[0] - 3.0 * r[1] + 5.0);

        let mut model = LinearModel::ordinary();
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&array![[4.0, 4.0]]).unwrap();
        assert!((pred[0] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];

        let mut ols = LinearModel::ordinary();
        ols.fit(&x, &y).unwrap();
        let mut ridge = LinearModel::ridge(10.0);
        ridge.fit(&x, &y).unwrap();

        let slope = |m: &LinearModel| {
            let p = m.predict(&array![[0.0], [1.0]]).unwrap();
            p[1] - p[0]
        };
        assert!((slope(&ols) - 2.0).abs() < 1e-8);
        assert!(slope(&ridge) < slope(&ols));
    }

    #[test]
    fn test_collinear_columns_still_solve() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let mut model = LinearModel::ordinary();
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-3);
        }
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = LinearModel::ordinary();
        assert!(matches!(
            model.predict(&array![[1.0]]),
            Err(PipelineError::NotFitted(_))
        ));
    }
}
