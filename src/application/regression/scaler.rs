// Z-score standardization
use crate::application::error::{PipelineError, PipelineResult};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Per-column `(x - mean) / std` with population std.
///
/// Fitting ignores NaN cells, so the same scaler serves gap-ridden
/// imputation input and dense regression input. Constant columns get a unit
/// scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Array2<f64>) -> PipelineResult<Self> {
        if x.nrows() == 0 {
            return Err(PipelineError::DataQuality(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }

        let mut mean = Array1::zeros(x.ncols());
        let mut scale = Array1::ones(x.ncols());

        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
            if observed.is_empty() {
                continue;
            }
            let n = observed.len() as f64;
            let m = observed.iter().sum::<f64>() / n;
            let var = observed.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();

            mean[j] = m;
            scale[j] = if std > 1e-12 { std } else { 1.0 };
        }

        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    /// NaN cells stay NaN
    pub fn transform(&self, x: &Array2<f64>) -> PipelineResult<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(PipelineError::InvalidArgument(format!(
                "scaler expects {} columns, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        Ok((x - &self.mean.view().insert_axis(Axis(0))) / &self.scale.view().insert_axis(Axis(0)))
    }

    /// Map a standardized value in column `j` back to original units
    pub fn inverse_value(&self, j: usize, value: f64) -> f64 {
        value * self.scale[j] + self.mean[j]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standardizes_columns() {
        let x = array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        let z = scaler.transform(&x).unwrap();

        assert!(z.column(0).sum().abs() < 1e-12);
        let var = z.column(0).mapv(|v| v * v).sum() / 3.0;
        assert!((var - 1.0).abs() < 1e-12);
        // constant column is centred but not blown up
        assert_eq!(scaler.scale()[1], 1.0);
        assert!(z.column(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_nan_cells_are_ignored_and_preserved() {
        let x = array![[1.0], [f64::NAN], [3.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        assert_eq!(scaler.mean()[0], 2.0);

        let z = scaler.transform(&x).unwrap();
        assert!(z[[1, 0]].is_nan());
        assert!((scaler.inverse_value(0, z[[2, 0]]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_column_mismatch_is_rejected() {
        let scaler = StandardScaler::fit(&array![[1.0, 2.0]]).unwrap();
        assert!(scaler.transform(&array![[1.0]]).is_err());
    }
}
