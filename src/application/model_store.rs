// Port for persisting fitted forecasters
use crate::application::error::PipelineResult;
use crate::application::forecaster::FittedModel;
use crate::domain::forecast::ModelKind;
use crate::domain::pollutant::Pollutant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever the serialized model layout changes
pub const MODEL_SCHEMA_VERSION: u32 = 1;

/// Self-describing snapshot of one fitted forecaster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBlob {
    pub schema_version: u32,
    pub pollutant: Pollutant,
    pub kind: ModelKind,
    pub trained_at: DateTime<Utc>,
    pub model: FittedModel,
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Persist the blob and return where it was written
    async fn save(&self, blob: &ModelBlob) -> PipelineResult<String>;

    /// Latest blob for the pollutant and model kind. `None` when nothing
    /// usable is stored, including blobs written under another schema version.
    async fn load(&self, pollutant: Pollutant, kind: ModelKind) -> PipelineResult<Option<ModelBlob>>;
}
