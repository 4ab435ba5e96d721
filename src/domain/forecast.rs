// Forecast and training report domain models
use super::pollutant::Pollutant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hour offset (1-based) to predicted concentration
pub type PollutantSeries = BTreeMap<u32, f64>;

/// Predicted concentrations per pollutant
pub type ForecastSet = BTreeMap<Pollutant, PollutantSeries>;

/// Regression strategy behind a forecaster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Polynomial,
    Svr,
    #[default]
    RandomForest,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Polynomial => "polynomial",
            ModelKind::Svr => "svr",
            ModelKind::RandomForest => "random_forest",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-validated error of one forecaster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
    /// RMSE of predicting the training-fold mean, over the same folds
    pub baseline_rmse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissingStats {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total_rows: usize,
    pub missing_by_pollutant: BTreeMap<Pollutant, MissingStats>,
    pub outliers_by_pollutant: BTreeMap<Pollutant, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub city: String,
    pub country: String,
    pub model_kind: ModelKind,
    pub validation_before: ValidationStats,
    pub validation_after: ValidationStats,
    pub model_metrics: BTreeMap<Pollutant, ForecastMetrics>,
    pub model_locations: BTreeMap<Pollutant, String>,
    pub training_samples: usize,
    pub trained_at: DateTime<Utc>,
}
