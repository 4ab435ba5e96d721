// JSON model store on the local filesystem
use crate::application::error::{PipelineError, PipelineResult};
use crate::application::model_store::{ModelBlob, ModelStore, MODEL_SCHEMA_VERSION};
use crate::domain::forecast::ModelKind;
use crate::domain::pollutant::Pollutant;
use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FileModelStore {
    dir: PathBuf,
}

impl FileModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, pollutant: Pollutant, kind: ModelKind) -> PathBuf {
        self.dir.join(format!("{}_{}.json", pollutant.code(), kind.as_str()))
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save(&self, blob: &ModelBlob) -> PipelineResult<String> {
        let path = self.path_for(blob.pollutant, blob.kind);
        let json = serde_json::to_vec(blob)
            .context("Failed to serialize model")
            .map_err(PipelineError::upstream)?;

        // Write beside the target and rename so readers never see a partial file
        let tmp = path.with_extension("json.tmp");
        async {
            tokio::fs::create_dir_all(&self.dir)
                .await
                .with_context(|| format!("Failed to create model directory {}", self.dir.display()))?;
            tokio::fs::write(&tmp, &json)
                .await
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("Failed to move model into {}", path.display()))
        }
        .await
        .map_err(PipelineError::upstream)?;

        tracing::debug!(path = %path.display(), bytes = json.len(), "model saved");
        Ok(path.display().to_string())
    }

    async fn load(&self, pollutant: Pollutant, kind: ModelKind) -> PipelineResult<Option<ModelBlob>> {
        let path = self.path_for(pollutant, kind);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::upstream(
                    anyhow::Error::new(e).context(format!("Failed to read {}", path.display())),
                ));
            }
        };

        // Check the version first; other layouts may not deserialize at all
        let raw: serde_json::Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))
            .map_err(PipelineError::upstream)?;
        let version = raw.get("schema_version").and_then(serde_json::Value::as_u64);
        if version != Some(MODEL_SCHEMA_VERSION as u64) {
            tracing::warn!(path = %path.display(), ?version, expected = MODEL_SCHEMA_VERSION, "ignoring model with another schema version");
            return Ok(None);
        }

        let blob = serde_json::from_value(raw)
            .with_context(|| format!("Failed to decode model in {}", path.display()))
            .map_err(PipelineError::upstream)?;
        Ok(Some(blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::forecaster::Forecaster;
    use crate::domain::observation::TimeSeriesRecord;
    use crate::infrastructure::config::ForecasterSettings;
    use chrono::{Duration, TimeZone, Utc};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("aqi-forecast-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn fitted_blob() -> ModelBlob {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let series: Vec<TimeSeriesRecord> = (0..24 * 5)
            .map(|h| {
                let phase = (h % 24) as f64 / 24.0 * std::f64::consts::TAU;
                let mut record = TimeSeriesRecord::new(start + Duration::hours(h as i64));
                for (i, p) in Pollutant::ALL.into_iter().enumerate() {
                    record.set(p, Some(10.0 + i as f64 + 3.0 * (phase + i as f64).sin()));
                }
                record
            })
            .collect();
        let settings = ForecasterSettings {
            model: ModelKind::Linear,
            ..ForecasterSettings::default()
        };
        let mut forecaster = Forecaster::new(Pollutant::No2, &settings);
        forecaster.fit(&series).unwrap();
        forecaster.to_blob().unwrap()
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = scratch_dir("roundtrip");
        let store = FileModelStore::new(&dir);
        let blob = fitted_blob();

        let location = store.save(&blob).await.unwrap();
        assert!(location.ends_with("no2_linear.json"));

        let loaded = store.load(Pollutant::No2, ModelKind::Linear).await.unwrap().unwrap();
        assert_eq!(loaded.pollutant, Pollutant::No2);
        assert_eq!(loaded.model.feature_names, blob.model.feature_names);

        // other kinds live in other files
        assert!(store.load(Pollutant::No2, ModelKind::Svr).await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_dir_and_foreign_versions_load_as_none() {
        let dir = scratch_dir("versions");
        let store = FileModelStore::new(&dir);
        assert!(store.load(Pollutant::Pm25, ModelKind::Linear).await.unwrap().is_none());

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            store.path_for(Pollutant::Pm25, ModelKind::Linear),
            r#"{"schema_version": 0, "weights": [1, 2, 3]}"#,
        )
        .unwrap();
        assert!(store.load(Pollutant::Pm25, ModelKind::Linear).await.unwrap().is_none());

        std::fs::write(store.path_for(Pollutant::Co, ModelKind::Linear), "not json").unwrap();
        assert!(matches!(
            store.load(Pollutant::Co, ModelKind::Linear).await,
            Err(PipelineError::UpstreamUnavailable(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
