// Epsilon-insensitive support vector regression with an RBF kernel
use crate::application::error::{PipelineError, PipelineResult};
use ndarray::{Array1, Array2, ArrayView1, Axis, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SvrParams {
    pub c: f64,
    pub epsilon: f64,
    /// RBF width; `None` picks `1 / (n_features · var(X))`
    pub gamma: Option<f64>,
    pub max_iter: usize,
    pub tol: f64,
    /// Only the most recent rows are used for training
    pub max_samples: usize,
}

impl Default for SvrParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.1,
            gamma: None,
            max_iter: 200,
            tol: 1e-4,
            max_samples: 1500,
        }
    }
}

/// Dual coordinate descent on `K'(a, b) = exp(-γ‖a-b‖²) + 1`; the constant
/// term stands in for the bias, so there is no equality constraint and each
/// coefficient can be optimized in closed form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportVectorRegressor {
    pub params: SvrParams,
    gamma: f64,
    support_vectors: Option<Array2<f64>>,
    coefficients: Array1<f64>,
}

fn rbf(a: ArrayView1<f64>, b: ArrayView1<f64>, gamma: f64) -> f64 {
    let dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * dist).exp()
}

fn soft_threshold(value: f64, eps: f64) -> f64 {
    if value > eps {
        value - eps
    } else if value < -eps {
        value + eps
    } else {
        0.0
    }
}

impl SupportVectorRegressor {
    pub fn new(params: SvrParams) -> Self {
        Self {
            params,
            gamma: 1.0,
            support_vectors: None,
            coefficients: Array1::zeros(0),
        }
    }

    #[cfg(test)]
    pub fn n_support(&self) -> usize {
        self.coefficients.len()
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

        let start = x.nrows().saturating_sub(self.params.max_samples.max(1));
        let x = x.slice(s![start.., ..]).to_owned();
        let y = y.slice(s![start..]).to_owned();
        let n = x.nrows();

        self.gamma = match self.params.gamma {
            Some(g) if g > 0.0 => g,
            _ => {
                let var = x.var(0.0);
                if var > 1e-12 && x.ncols() > 0 {
                    1.0 / (x.ncols() as f64 * var)
                } else {
                    1.0
                }
            }
        };

        let gamma = self.gamma;
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (0..n).map(|j| rbf(x.row(i), x.row(j), gamma) + 1.0).collect())
            .collect();
        let mut kernel = Array2::<f64>::zeros((n, n));
        for (i, row) in rows.into_iter().enumerate() {
            kernel.row_mut(i).assign(&Array1::from(row));
        }

        let mut beta = Array1::<f64>::zeros(n);
        let mut fitted = Array1::<f64>::zeros(n);
        let c = self.params.c;
        let eps = self.params.epsilon;

        for iteration in 0..self.params.max_iter {
            let mut max_delta: f64 = 0.0;
            for i in 0..n {
                let k_ii = kernel[[i, i]];
                let residual = y[i] - (fitted[i] - k_ii * beta[i]);
                let updated = (soft_threshold(residual, eps) / k_ii).clamp(-c, c);
                let delta = updated - beta[i];
                if delta != 0.0 {
                    fitted.scaled_add(delta, &kernel.row(i));
                    beta[i] = updated;
                    max_delta = max_delta.max(delta.abs());
                }
            }
            if max_delta < self.params.tol {
                tracing::debug!(iterations = iteration + 1, "svr converged");
                break;
            }
        }

        let support: Vec<usize> = (0..n).filter(|&i| beta[i] != 0.0).collect();
        self.support_vectors = Some(x.select(Axis(0), &support));
        self.coefficients = support.iter().map(|&i| beta[i]).collect();
        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        let support = self
            .support_vectors
            .as_ref()
            .ok_or(PipelineError::NotFitted("support vector regressor"))?;
        if support.nrows() > 0 && x.ncols() != support.ncols() {
            return Err(PipelineError::InvalidArgument(format!(
                "model expects {} features, got {}",
                support.ncols(),
                x.ncols()
            )));
        }

        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                support
                    .rows()
                    .into_iter()
                    .zip(self.coefficients.iter())
                    .map(|(sv, beta)| beta * (rbf(sv, row, self.gamma) + 1.0))
                    .sum::<f64>()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fits_smooth_curve() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64 * 0.16);
        let y: Array1<f64> = x.column(0).mapv(f64::sin);

        let params = SvrParams {
            c: 10.0,
            epsilon: 0.05,
            gamma: Some(1.0),
            max_iter: 500,
            ..SvrParams::default()
        };
        let mut svr = SupportVectorRegressor::new(params);
        svr.fit(&x, &y).unwrap();
        let pred = svr.predict(&x).unwrap();

        let mse = (&pred - &y).mapv(|v| v * v).mean().unwrap();
        assert!(mse < 0.05, "in-sample mse {mse}");
    }

    #[test]
    fn test_points_inside_tube_are_not_support_vectors() {
        // every residual is already inside the epsilon tube
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.01, -0.02, 0.0, 0.02];
        let mut svr = SupportVectorRegressor::new(SvrParams::default());
        svr.fit(&x, &y).unwrap();
        assert_eq!(svr.n_support(), 0);
        assert_eq!(svr.predict(&array![[1.5]]).unwrap()[0], 0.0);
    }

    #[test]
    fn test_training_window_is_capped() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y: Array1<f64> = x.column(0).to_owned();
        let params = SvrParams {
            max_samples: 10,
            ..SvrParams::default()
        };
        let mut svr = SupportVectorRegressor::new(params);
        svr.fit(&x, &y).unwrap();
        assert!(svr.n_support() <= 10);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let svr = SupportVectorRegressor::new(SvrParams::default());
        assert!(matches!(
            svr.predict(&array![[1.0]]),
            Err(PipelineError::NotFitted(_))
        ));
    }
}
