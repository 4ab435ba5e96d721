// Application layer - Use cases and business logic
pub mod aqi_aggregator;
pub mod cancellation;
pub mod error;
pub mod feature_engine;
pub mod forecaster;
pub mod imputer;
pub mod model_store;
pub mod observation_source;
pub mod prediction_service;
pub mod regression;
