// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use crate::application::observation_source::ObservationSource;
use crate::application::prediction_service::PredictionService;
use crate::infrastructure::config::{load_settings, SourceKind};
use crate::infrastructure::file_model_store::FileModelStore;
use crate::infrastructure::openaq_repository::OpenAqRepository;
use crate::infrastructure::synthetic_source::SyntheticSource;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{aqi, forecast, health_check, search_cities, train};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aqi_forecast=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let settings = load_settings().context("Failed to load settings")?;

    // Create adapters (infrastructure layer)
    let source: Arc<dyn ObservationSource> = match settings.source.kind {
        SourceKind::Synthetic => {
            tracing::info!(seed = settings.source.seed, "using synthetic observations");
            Arc::new(SyntheticSource::new(settings.source.seed))
        }
        SourceKind::Openaq => {
            tracing::info!(base_url = %settings.openaq.base_url, "using OpenAQ observations");
            Arc::new(OpenAqRepository::new(&settings.openaq)?)
        }
    };
    let store = Arc::new(FileModelStore::new(&settings.store.dir));

    // Create services (application layer)
    let prediction_service = PredictionService::new(
        source,
        store,
        settings.pipeline.clone(),
        settings.imputer.clone(),
        settings.forecaster.clone(),
    );
    if prediction_service.load().await {
        tracing::info!(dir = %settings.store.dir, "serving persisted models");
    } else {
        tracing::info!("no usable persisted models, training on first request");
    }

    let state = Arc::new(AppState {
        prediction_service: prediction_service.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/cities", get(search_cities))
        .route("/cities/:country/:city/train", post(train))
        .route("/cities/:country/:city/aqi", get(aqi))
        .route("/cities/:country/:city/forecast", get(forecast))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("Invalid server address")?;
    tracing::info!(%addr, "starting aqi-forecast service");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
            prediction_service.shutdown();
        })
        .await?;

    Ok(())
}
