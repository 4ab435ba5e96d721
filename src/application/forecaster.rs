// Per-pollutant forecaster: fit, recursive multi-step predict, time-series CV
use crate::application::cancellation::CancellationFlag;
use crate::application::error::{PipelineError, PipelineResult};
use crate::application::feature_engine::{target_feature_names, target_frame, target_row, WARM_UP};
use crate::application::model_store::{ModelBlob, MODEL_SCHEMA_VERSION};
use crate::application::regression::polynomial::PolynomialExpansion;
use crate::application::regression::scaler::StandardScaler;
use crate::application::regression::{mae, r2, rmse, Regressor};
use crate::domain::forecast::{ForecastMetrics, ModelKind, PollutantSeries};
use crate::domain::observation::TimeSeriesRecord;
use crate::domain::pollutant::Pollutant;
use crate::infrastructure::config::ForecasterSettings;
use chrono::{Duration, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Records kept for the recursive forecast loop
pub const HISTORY_CAPACITY: usize = 48;

/// Largest lag plus the row being predicted from
pub const MIN_HISTORY: usize = WARM_UP + 1;

/// Usable training rows required after the warm-up is dropped
pub const MIN_TRAINING_ROWS: usize = 10;

/// Fixed-capacity window over the newest records; pushing past capacity
/// evicts the oldest
#[derive(Debug, Clone)]
pub struct RingBuffer {
    records: VecDeque<TimeSeriesRecord>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn from_tail(series: &[TimeSeriesRecord], capacity: usize) -> Self {
        let mut buffer = Self::new(capacity);
        let start = series.len().saturating_sub(buffer.capacity);
        for record in &series[start..] {
            buffer.push(record.clone());
        }
        buffer
    }

    pub fn push(&mut self, record: TimeSeriesRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn newest(&self) -> Option<&TimeSeriesRecord> {
        self.records.back()
    }

    pub fn as_slice(&mut self) -> &[TimeSeriesRecord] {
        self.records.make_contiguous()
    }
}

/// Clip band `[max(0, μ - 3σ), μ + 3σ]` from the target's observed values
pub fn drift_band(records: &[TimeSeriesRecord], target: Pollutant) -> (f64, f64) {
    let observed: Vec<f64> = records.iter().filter_map(|r| r.get(target)).collect();
    if observed.is_empty() {
        return (0.0, f64::INFINITY);
    }
    let n = observed.len() as f64;
    let mean = observed.iter().sum::<f64>() / n;
    let std = if observed.len() > 1 {
        (observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    let low = (mean - 3.0 * std).max(0.0);
    (low, (mean + 3.0 * std).max(low))
}

/// Everything needed to turn a raw target-view row into a prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    pub feature_names: Vec<String>,
    scaler: StandardScaler,
    expansion: Option<PolynomialExpansion>,
    regressor: Regressor,
}

impl FittedModel {
    fn train(
        kind: ModelKind,
        settings: &ForecasterSettings,
        feature_names: Vec<String>,
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> PipelineResult<Self> {
        let scaler = StandardScaler::fit(x)?;
        let scaled = scaler.transform(x)?;
        let expansion = (kind == ModelKind::Polynomial)
            .then(|| PolynomialExpansion::new(scaled.ncols(), settings.polynomial_degree));
        let design = match &expansion {
            Some(poly) => poly.transform(&scaled),
            None => scaled,
        };

        let mut regressor = Regressor::from_settings(kind, settings);
        regressor.fit(&design, y)?;

        Ok(Self {
            feature_names,
            scaler,
            expansion,
            regressor,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.regressor.kind()
    }

    /// Undefined features are imputed with the training mean
    fn predict(&self, x: &Array2<f64>) -> PipelineResult<Array1<f64>> {
        let scaled = self.scaler.transform(x)?.mapv(|v| if v.is_finite() { v } else { 0.0 });
        match &self.expansion {
            Some(poly) => self.regressor.predict(&poly.transform(&scaled)),
            None => self.regressor.predict(&scaled),
        }
    }
}

/// Target-view rows with every feature defined and an observed target
fn training_matrix(series: &[TimeSeriesRecord], target: Pollutant) -> (Vec<String>, Array2<f64>, Array1<f64>) {
    let frame = target_frame(series, target);
    let keep: Vec<usize> = (0..frame.n_rows())
        .filter(|&i| series[i].get(target).is_some() && frame.values.row(i).iter().all(|v| v.is_finite()))
        .collect();

    let x = frame.values.select(Axis(0), &keep);
    let y: Array1<f64> = keep.iter().filter_map(|&i| series[i].get(target)).collect();
    (frame.names, x, y)
}

#[derive(Debug, Clone)]
pub struct Forecaster {
    pollutant: Pollutant,
    kind: ModelKind,
    settings: ForecasterSettings,
    model: Option<FittedModel>,
}

impl Forecaster {
    pub fn new(pollutant: Pollutant, settings: &ForecasterSettings) -> Self {
        Self {
            pollutant,
            kind: settings.model,
            settings: settings.clone(),
            model: None,
        }
    }

    pub fn for_code(code: &str, settings: &ForecasterSettings) -> PipelineResult<Self> {
        let pollutant: Pollutant = code
            .parse()
            .map_err(|e| PipelineError::InvalidArgument(format!("{}", e)))?;
        Ok(Self::new(pollutant, settings))
    }

    pub fn pollutant(&self) -> Pollutant {
        self.pollutant
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn fit(&mut self, series: &[TimeSeriesRecord]) -> PipelineResult<usize> {
        let (names, x, y) = training_matrix(series, self.pollutant);
        if y.len() < MIN_TRAINING_ROWS {
            return Err(PipelineError::DataQuality(format!(
                "{} has {} usable training rows, need {}",
                self.pollutant,
                y.len(),
                MIN_TRAINING_ROWS
            )));
        }

        let model = FittedModel::train(self.kind, &self.settings, names, &x, &y)?;
        tracing::debug!(pollutant = %self.pollutant, kind = %self.kind, rows = y.len(), "forecaster fitted");
        self.model = Some(model);
        Ok(y.len())
    }

    fn fitted(&self) -> PipelineResult<&FittedModel> {
        let model = self.model.as_ref().ok_or(PipelineError::NotFitted("forecaster"))?;
        let expected = target_feature_names(self.pollutant);
        if model.feature_names != expected {
            return Err(PipelineError::SchemaDrift {
                pollutant: self.pollutant.to_string(),
                expected: model.feature_names.len(),
                actual: expected.len(),
            });
        }
        Ok(model)
    }

    /// Recursive forecast for hours `1..=horizon` after the last record.
    ///
    /// Each step predicts from the newest buffered row, clips to the drift
    /// band of the buffer, then appends a synthetic record one hour later that
    /// carries the other pollutants forward.
    pub fn predict(
        &self,
        series: &[TimeSeriesRecord],
        horizon: u32,
        cancel: &CancellationFlag,
    ) -> PipelineResult<PollutantSeries> {
        if horizon == 0 {
            return Err(PipelineError::InvalidArgument("horizon must be at least 1".to_string()));
        }
        let model = self.fitted()?;
        if series.len() < MIN_HISTORY {
            return Err(PipelineError::DataQuality(format!(
                "forecasting {} needs {} history records, got {}",
                self.pollutant,
                MIN_HISTORY,
                series.len()
            )));
        }

        let mut buffer = RingBuffer::from_tail(series, HISTORY_CAPACITY);
        let mut forecast = PollutantSeries::new();

        for step in 1..=horizon {
            cancel.check()?;

            let records = buffer.as_slice();
            let row = target_row(records, self.pollutant, records.len() - 1);
            let x = Array1::from(row).insert_axis(Axis(0));
            let raw = model.predict(&x)?[0];

            let (low, high) = drift_band(records, self.pollutant);
            let value = if raw.is_finite() { raw.clamp(low, high) } else { low }.max(0.0);
            forecast.insert(step, value);

            let Some(newest) = buffer.newest() else {
                break;
            };
            let mut next = newest.clone();
            next.timestamp += Duration::hours(1);
            next.set(self.pollutant, Some(value));
            buffer.push(next);
        }

        Ok(forecast)
    }

    /// Expanding-window cross-validation with fresh models per fold; the
    /// fitted model is left untouched.
    pub fn evaluate(&self, series: &[TimeSeriesRecord]) -> PipelineResult<ForecastMetrics> {
        let model = self.fitted()?;
        let (names, x, y) = training_matrix(series, self.pollutant);
        if names != model.feature_names {
            return Err(PipelineError::SchemaDrift {
                pollutant: self.pollutant.to_string(),
                expected: model.feature_names.len(),
                actual: names.len(),
            });
        }

        let folds = self.settings.cv_folds.max(2);
        let n = y.len();
        let test_size = n / (folds + 1);
        if test_size == 0 || n - folds * test_size < MIN_TRAINING_ROWS.min(n) {
            return Err(PipelineError::DataQuality(format!(
                "{} usable rows are too few for {}-fold evaluation",
                n, folds
            )));
        }

        let mut totals = [0.0f64; 4];
        for fold in 0..folds {
            let test_start = n - (folds - fold) * test_size;
            let test_end = test_start + test_size;

            let x_train = x.slice(ndarray::s![..test_start, ..]).to_owned();
            let y_train = y.slice(ndarray::s![..test_start]).to_owned();
            let x_test = x.slice(ndarray::s![test_start..test_end, ..]).to_owned();
            let y_test = y.slice(ndarray::s![test_start..test_end]).to_owned();

            let fold_model = FittedModel::train(self.kind, &self.settings, names.clone(), &x_train, &y_train)?;
            let predicted = fold_model.predict(&x_test)?;
            let baseline = Array1::from_elem(y_test.len(), y_train.mean().unwrap_or(0.0));

            totals[0] += rmse(&y_test, &predicted);
            totals[1] += mae(&y_test, &predicted);
            totals[2] += r2(&y_test, &predicted);
            totals[3] += rmse(&y_test, &baseline);
        }

        let k = folds as f64;
        Ok(ForecastMetrics {
            rmse: totals[0] / k,
            mae: totals[1] / k,
            r2: totals[2] / k,
            baseline_rmse: totals[3] / k,
        })
    }

    pub fn to_blob(&self) -> PipelineResult<ModelBlob> {
        let model = self.model.as_ref().ok_or(PipelineError::NotFitted("forecaster"))?;
        Ok(ModelBlob {
            schema_version: MODEL_SCHEMA_VERSION,
            pollutant: self.pollutant,
            kind: model.kind(),
            trained_at: Utc::now(),
            model: model.clone(),
        })
    }

    /// Restore a forecaster; a blob whose features no longer match the
    /// feature engine is rejected as schema drift
    pub fn from_blob(blob: ModelBlob, settings: &ForecasterSettings) -> PipelineResult<Self> {
        let mut settings = settings.clone();
        settings.model = blob.kind;
        let forecaster = Self {
            pollutant: blob.pollutant,
            kind: blob.kind,
            settings,
            model: Some(blob.model),
        };
        forecaster.fitted()?;
        Ok(forecaster)
    }
}
