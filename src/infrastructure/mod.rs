// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod file_model_store;
pub mod openaq_repository;
pub mod synthetic_source;
