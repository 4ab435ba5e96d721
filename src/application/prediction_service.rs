// Prediction service - Orchestrates imputation, forecasting and AQI aggregation
use crate::application::aqi_aggregator::{calculate_aqi, hourly_aqi_forecast};
use crate::application::cancellation::CancellationFlag;
use crate::application::error::{PipelineError, PipelineResult};
use crate::application::forecaster::Forecaster;
use crate::application::imputer::{validate, KnnImputer};
use crate::application::model_store::{ModelStore, MODEL_SCHEMA_VERSION};
use crate::application::observation_source::ObservationSource;
use crate::domain::aqi::{AqiResult, HourlyAqiForecast};
use crate::domain::forecast::{ForecastMetrics, ForecastSet, TrainingReport, ValidationStats};
use crate::domain::observation::{City, TimeSeriesRecord};
use crate::domain::pollutant::Pollutant;
use crate::infrastructure::config::{ForecasterSettings, ImputationPolicy, ImputerSettings, PipelineSettings};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Fitted cascade state; replaced wholesale after each training run
#[derive(Debug, Clone, Default)]
struct Registry {
    forecasters: BTreeMap<Pollutant, Forecaster>,
    imputer: Option<KnnImputer>,
}

/// Output of the CPU-bound half of a training run
struct TrainedCascade {
    imputer: KnnImputer,
    forecasters: Vec<(Forecaster, ForecastMetrics)>,
    validation_before: ValidationStats,
    validation_after: ValidationStats,
    samples: usize,
}

#[derive(Clone)]
pub struct PredictionService {
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn ModelStore>,
    pipeline: PipelineSettings,
    imputer: ImputerSettings,
    forecaster: ForecasterSettings,
    registry: Arc<RwLock<Arc<Registry>>>,
    training: Arc<Mutex<()>>,
    cancel: CancellationFlag,
}

impl PredictionService {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ModelStore>,
        pipeline: PipelineSettings,
        imputer: ImputerSettings,
        forecaster: ForecasterSettings,
    ) -> Self {
        Self {
            source,
            store,
            pipeline,
            imputer,
            forecaster,
            registry: Arc::new(RwLock::new(Arc::new(Registry::default()))),
            training: Arc::new(Mutex::new(())),
            cancel: CancellationFlag::new(),
        }
    }

    fn snapshot(&self) -> Arc<Registry> {
        match self.registry.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn replace_registry(&self, registry: Registry) {
        let mut guard = match self.registry.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(registry);
    }

    pub fn is_trained(&self) -> bool {
        !self.snapshot().forecasters.is_empty()
    }

    pub fn default_horizon(&self) -> u32 {
        self.pipeline.default_horizon
    }

    /// Stop in-flight and future pipeline work; used on shutdown
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn train(&self, city: &str, country: &str) -> PipelineResult<TrainingReport> {
        let _guard = self.training.lock().await;
        self.train_locked(city, country).await
    }

    /// Train unless a model set is already in place; callers queued behind
    /// a running training reuse its registry
    async fn ensure_trained(&self, city: &str, country: &str) -> PipelineResult<()> {
        if self.is_trained() {
            return Ok(());
        }
        let _guard = self.training.lock().await;
        if self.is_trained() {
            return Ok(());
        }
        tracing::warn!(city = %city, "no trained models, training first");
        self.train_locked(city, country).await.map(|_| ())
    }

    /// Caller holds `self.training`
    async fn train_locked(&self, city: &str, country: &str) -> PipelineResult<TrainingReport> {
        self.cancel.check()?;

        tracing::info!(city = %city, country = %country, days = self.pipeline.lookback_days, "training started");
        let history = self
            .source
            .historical(city, country, self.pipeline.lookback_days)
            .await?;
        if history.is_empty() {
            return Err(PipelineError::DataQuality(format!(
                "no historical data for {}, {}",
                city, country
            )));
        }

        let neighbors = self.imputer.neighbors;
        let settings = self.forecaster.clone();
        let cancel = self.cancel.clone();
        let cascade =
            tokio::task::spawn_blocking(move || train_cascade(&history, neighbors, &settings, &cancel)).await??;

        let mut registry = Registry {
            forecasters: BTreeMap::new(),
            imputer: Some(cascade.imputer),
        };
        let mut model_metrics = BTreeMap::new();
        let mut model_locations = BTreeMap::new();

        for (forecaster, metrics) in cascade.forecasters {
            let pollutant = forecaster.pollutant();
            tracing::info!(
                pollutant = %pollutant,
                rmse = metrics.rmse,
                baseline_rmse = metrics.baseline_rmse,
                r2 = metrics.r2,
                "forecaster evaluated"
            );

            match forecaster.to_blob() {
                Ok(blob) => match self.store.save(&blob).await {
                    Ok(location) => {
                        model_locations.insert(pollutant, location);
                    }
                    Err(e) => tracing::warn!(pollutant = %pollutant, error = %e, "failed to persist model"),
                },
                Err(e) => tracing::warn!(pollutant = %pollutant, error = %e, "failed to snapshot model"),
            }

            model_metrics.insert(pollutant, metrics);
            registry.forecasters.insert(pollutant, forecaster);
        }

        self.replace_registry(registry);
        tracing::info!(city = %city, samples = cascade.samples, "training finished");

        Ok(TrainingReport {
            city: city.to_string(),
            country: country.to_string(),
            model_kind: self.forecaster.model,
            validation_before: cascade.validation_before,
            validation_after: cascade.validation_after,
            model_metrics,
            model_locations,
            training_samples: cascade.samples,
            trained_at: Utc::now(),
        })
    }

    pub async fn predict(&self, city: &str, country: &str, horizon: u32) -> PipelineResult<AqiResult> {
        if horizon == 0 {
            return Err(PipelineError::InvalidArgument("horizon must be at least 1".to_string()));
        }
        self.ensure_trained(city, country).await?;

        let registry = self.snapshot();
        let (current, history) = tokio::try_join!(
            self.source.current(city, country),
            self.source
                .historical(city, country, self.pipeline.recent_history_days),
        )?;

        let policy = self.pipeline.imputation_policy;
        let neighbors = self.imputer.neighbors;
        let cancel = self.cancel.clone();
        let forecasts = tokio::task::spawn_blocking(move || {
            forecast_cascade(&registry, policy, neighbors, &history, horizon, &cancel)
        })
        .await??;

        calculate_aqi(&forecasts, &current)
    }

    pub async fn hourly_forecast(&self, city: &str, country: &str, horizon: u32) -> PipelineResult<HourlyAqiForecast> {
        let result = self.predict(city, country, horizon).await?;
        let forecasts: ForecastSet = result
            .pollutant_forecasts
            .into_iter()
            .map(|f| (f.pollutant, f.forecasted_values))
            .collect();
        Ok(hourly_aqi_forecast(&forecasts, horizon))
    }

    /// Restore persisted forecasters. Stale or unreadable models are skipped
    /// and will be retrained; returns whether anything was restored.
    pub async fn load(&self) -> bool {
        let kind = self.forecaster.model;
        let mut forecasters = BTreeMap::new();

        for pollutant in Pollutant::ALL {
            match self.store.load(pollutant, kind).await {
                Ok(Some(blob)) if blob.schema_version != MODEL_SCHEMA_VERSION => {
                    tracing::warn!(pollutant = %pollutant, version = blob.schema_version, "stored model has another schema version");
                }
                Ok(Some(blob)) => match Forecaster::from_blob(blob, &self.forecaster) {
                    Ok(forecaster) => {
                        forecasters.insert(pollutant, forecaster);
                    }
                    Err(e) => tracing::warn!(pollutant = %pollutant, error = %e, "stored model rejected, retrain required"),
                },
                Ok(None) => tracing::debug!(pollutant = %pollutant, "no stored model"),
                Err(e) => tracing::warn!(pollutant = %pollutant, error = %e, "failed to read stored model"),
            }
        }

        if forecasters.is_empty() {
            return false;
        }
        tracing::info!(models = forecasters.len(), kind = %kind, "restored models");
        self.replace_registry(Registry {
            forecasters,
            imputer: None,
        });
        true
    }

    pub async fn search_cities(&self, query: &str, limit: usize) -> PipelineResult<Vec<City>> {
        self.source.search(query, limit).await
    }
}

fn train_cascade(
    history: &[TimeSeriesRecord],
    neighbors: usize,
    settings: &ForecasterSettings,
    cancel: &CancellationFlag,
) -> PipelineResult<TrainedCascade> {
    let validation_before = validate(history);
    let mut imputer = KnnImputer::new(neighbors);
    let clean = imputer.fit_transform(history)?;
    let validation_after = validate(&clean);
    cancel.check()?;

    let forecasters = Pollutant::ALL
        .par_iter()
        .map(|&pollutant| {
            cancel.check()?;
            let mut forecaster = Forecaster::new(pollutant, settings);
            forecaster.fit(&clean)?;
            let metrics = forecaster.evaluate(&clean)?;
            Ok((forecaster, metrics))
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(TrainedCascade {
        imputer,
        forecasters,
        validation_before,
        validation_after,
        samples: clean.len(),
    })
}

fn forecast_cascade(
    registry: &Registry,
    policy: ImputationPolicy,
    neighbors: usize,
    history: &[TimeSeriesRecord],
    horizon: u32,
    cancel: &CancellationFlag,
) -> PipelineResult<ForecastSet> {
    let clean = match (policy, &registry.imputer) {
        (ImputationPolicy::Persisted, Some(imputer)) => imputer.transform(history)?,
        _ => KnnImputer::new(neighbors).fit_transform(history)?,
    };

    registry
        .forecasters
        .par_iter()
        .map(|(&pollutant, forecaster)| Ok((pollutant, forecaster.predict(&clean, horizon, cancel)?)))
        .collect()
}
