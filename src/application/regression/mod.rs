// Regression strategies behind a single fit/predict contract
pub mod forest;
pub mod linear;
pub mod polynomial;
pub mod scaler;
pub mod svr;

use crate::application::error::PipelineResult;
use crate::domain::forecast::ModelKind;
use crate::infrastructure::config::ForecasterSettings;
use forest::{RandomForestRegressor, TreeParams};
use linear::LinearModel;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use svr::{SupportVectorRegressor, SvrParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regressor {
    Linear(LinearModel),
    /// Ridge on polynomial-expanded inputs; the expansion lives with the model
    Polynomial(LinearModel),
    Svr(SupportVectorRegressor),
    RandomForest(RandomForestRegressor),
}

impl Regressor {
    /// Unfitted regressor for `kind` with hyper-parameters from settings
    pub fn from_settings(kind: ModelKind, settings: &ForecasterSettings) -> Self {
        match kind {
            ModelKind::Linear => Regressor::Linear(LinearModel::ordinary()),
            ModelKind::Polynomial => Regressor::Polynomial(LinearModel::ridge(settings.ridge_alpha)),
            ModelKind::Svr => {
                let svr = settings.svr;
                Regressor::Svr(SupportVectorRegressor::new(SvrParams {
                    c: svr.c,
                    epsilon: svr.epsilon,
                    gamma: None,
                    max_iter: svr.max_iter,
                    tol: svr.tol,
                    max_samples: svr.max_samples,
                }))
            }
            ModelKind::RandomForest => {
                let rf = settings.random_forest;
                let params = TreeParams {
                    max_depth: rf.max_depth,
                    min_samples_split: rf.min_samples_split,
                    min_samples_leaf: rf.min_samples_leaf,
                    max_features: rf.max_features,
                };
                Regressor::RandomForest(RandomForestRegressor::new(rf.n_estimators, params, rf.seed))
            }
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            Regressor::Linear(_) => ModelKind::Linear,
            Regressor::Polynomial(_) => ModelKind::Polynomial,
            Regressor::Svr(_) => ModelKind::Svr,
            Regressor::RandomForest(_) => ModelKind::RandomForest,
        }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> PipelineResult<()> {
        match self {
            Regressor::Linear(m) | Regressor::Polynomial(m) => m.fit(x, y),
            Regressor::Svr(m) => m.fit(x, y),
            Regressor::RandomForest(m) => m.fit(x, y),
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        match self {
            Regressor::Linear(m) | Regressor::Polynomial(m) => m.predict(x),
            Regressor::Svr(m) => m.predict(x),
            Regressor::RandomForest(m) => m.predict(x),
        }
    }
}

pub fn rmse(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mse = actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64;
    mse.sqrt()
}

pub fn mae(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted.iter())
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

/// Coefficient of determination. A constant target scores 1 when matched
/// exactly and 0 otherwise.
pub fn r2(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let mean = actual.sum() / actual.len() as f64;
    let ss_res: f64 = actual.iter().zip(predicted.iter()).map(|(a, p)| (a - p).powi(2)).sum();
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_metrics() {
        let actual = array![1.0, 2.0, 3.0, 4.0];
        let predicted = array![1.0, 2.0, 3.0, 6.0];
        assert_eq!(mae(&actual, &predicted), 0.5);
        assert_eq!(rmse(&actual, &predicted), 1.0);
        // ss_tot = 5, ss_res = 4
        assert!((r2(&actual, &predicted) - 0.2).abs() < 1e-12);

        let flat = array![2.0, 2.0];
        assert_eq!(r2(&flat, &flat), 1.0);
        assert_eq!(r2(&flat, &array![1.0, 3.0]), 0.0);
    }

    #[test]
    fn test_dispatch_matches_kind() {
        let settings = ForecasterSettings::default();
        for kind in [
            ModelKind::Linear,
            ModelKind::Polynomial,
            ModelKind::Svr,
            ModelKind::RandomForest,
        ] {
            assert_eq!(Regressor::from_settings(kind, &settings).kind(), kind);
        }
    }

    #[test]
    fn test_regressor_survives_json() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];
        let mut model = Regressor::from_settings(ModelKind::Linear, &ForecasterSettings::default());
        model.fit(&x, &y).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let restored: Regressor = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.kind(), ModelKind::Linear);
        let pred = restored.predict(&array![[10.0]]).unwrap();
        assert!((pred[0] - 21.0).abs() < 1e-9);
    }
}
