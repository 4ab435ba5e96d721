// Application state for HTTP handlers
use crate::application::prediction_service::PredictionService;

#[derive(Clone)]
pub struct AppState {
    pub prediction_service: PredictionService,
}
