// HTTP request handlers
use crate::application::error::PipelineError;
use crate::domain::aqi::{AqiResult, HourlyAqiForecast};
use crate::domain::forecast::TrainingReport;
use crate::domain::observation::City;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest forecast the API will compute in one request
pub const MAX_HORIZON: u32 = 168;

const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct HorizonQuery {
    pub hours: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Pipeline error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            PipelineError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            PipelineError::UnknownLocation(_) => (StatusCode::NOT_FOUND, "unknown_location"),
            PipelineError::NotFitted(_) => (StatusCode::UNPROCESSABLE_ENTITY, "not_fitted"),
            PipelineError::DataQuality(_) => (StatusCode::UNPROCESSABLE_ENTITY, "data_quality"),
            PipelineError::SchemaDrift { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "schema_drift"),
            PipelineError::Numerical(_) => (StatusCode::INTERNAL_SERVER_ERROR, "numerical"),
            PipelineError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            PipelineError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            PipelineError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            error: kind,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn resolve_horizon(state: &AppState, hours: Option<u32>) -> Result<u32, ApiError> {
    let hours = hours.unwrap_or_else(|| state.prediction_service.default_horizon());
    if hours > MAX_HORIZON {
        return Err(PipelineError::InvalidArgument(format!(
            "hours must be at most {}, got {}",
            MAX_HORIZON, hours
        ))
        .into());
    }
    Ok(hours)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Cities whose name contains `q`
pub async fn search_cities(
    Query(query): Query<SearchQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<City>> {
    let q = query.q.unwrap_or_default();
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let cities = state.prediction_service.search_cities(&q, limit).await?;
    Ok(Json(cities))
}

/// Retrain the cascade on the city's history
pub async fn train(
    Path((country, city)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<TrainingReport> {
    let report = state.prediction_service.train(&city, &country).await?;
    Ok(Json(report))
}

/// Current AQI with per-pollutant forecasts
pub async fn aqi(
    Path((country, city)): Path<(String, String)>,
    Query(query): Query<HorizonQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<AqiResult> {
    let hours = resolve_horizon(&state, query.hours)?;
    let result = state.prediction_service.predict(&city, &country, hours).await?;
    Ok(Json(result))
}

/// Forecasted AQI for each hour ahead
pub async fn forecast(
    Path((country, city)): Path<(String, String)>,
    Query(query): Query<HorizonQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<HourlyAqiForecast> {
    let hours = resolve_horizon(&state, query.hours)?;
    let hourly = state
        .prediction_service
        .hourly_forecast(&city, &country, hours)
        .await?;
    Ok(Json(hourly))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::prediction_service::PredictionService;
    use crate::domain::forecast::ModelKind;
    use crate::infrastructure::config::{ForecasterSettings, ImputerSettings, PipelineSettings};
    use crate::infrastructure::file_model_store::FileModelStore;
    use crate::infrastructure::synthetic_source::SyntheticSource;
    use chrono::{TimeZone, Utc};

    fn state(name: &str) -> Arc<AppState> {
        let anchor = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let dir = std::env::temp_dir().join(format!("aqi-forecast-handlers-{}-{}", name, std::process::id()));
        let service = PredictionService::new(
            Arc::new(SyntheticSource::new(7).with_anchor(anchor)),
            Arc::new(FileModelStore::new(dir)),
            PipelineSettings {
                lookback_days: 14,
                recent_history_days: 3,
                ..PipelineSettings::default()
            },
            ImputerSettings::default(),
            ForecasterSettings {
                model: ModelKind::Linear,
                ..ForecasterSettings::default()
            },
        );
        Arc::new(AppState {
            prediction_service: service,
        })
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (PipelineError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::UnknownLocation("x".into()), StatusCode::NOT_FOUND),
            (PipelineError::NotFitted("imputer"), StatusCode::UNPROCESSABLE_ENTITY),
            (PipelineError::DataQuality("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (PipelineError::Numerical("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (PipelineError::UpstreamUnavailable("x".into()), StatusCode::BAD_GATEWAY),
            (PipelineError::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_forecast_endpoint_returns_requested_hours() {
        let state = state("forecast");
        let Json(hourly) = forecast(
            Path(("IN".to_string(), "Mumbai".to_string())),
            Query(HorizonQuery { hours: Some(6) }),
            State(state.clone()),
        )
        .await
        .unwrap();
        assert_eq!(hourly.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(state.prediction_service.is_trained());

        let Json(result) = aqi(
            Path(("IN".to_string(), "Mumbai".to_string())),
            Query(HorizonQuery { hours: None }),
            State(state),
        )
        .await
        .unwrap();
        assert!(result.pollutant_forecasts.iter().all(|f| f.forecasted_values.len() == 24));
    }

    #[tokio::test]
    async fn test_bad_requests_map_to_client_errors() {
        let state = state("errors");
        let too_long = aqi(
            Path(("FR".to_string(), "Paris".to_string())),
            Query(HorizonQuery {
                hours: Some(MAX_HORIZON + 1),
            }),
            State(state.clone()),
        )
        .await;
        assert_eq!(too_long.unwrap_err().into_response().status(), StatusCode::BAD_REQUEST);

        let unknown = train(Path(("XX".to_string(), "Atlantis".to_string())), State(state.clone())).await;
        assert_eq!(unknown.unwrap_err().into_response().status(), StatusCode::NOT_FOUND);

        let Json(cities) = search_cities(
            Query(SearchQuery {
                q: Some("lon".to_string()),
                limit: None,
            }),
            State(state),
        )
        .await
        .unwrap();
        assert_eq!(cities.len(), 1);
        assert_eq!(cities[0].country_code, "GB");
    }
}
