// Service settings loaded from config/settings.toml and AQI__* environment variables
use crate::domain::forecast::ModelKind;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub openaq: OpenAqSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub imputer: ImputerSettings,
    #[serde(default)]
    pub forecaster: ForecasterSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Synthetic,
    Openaq,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub seed: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAqSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OpenAqSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openaq.org/v3".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImputationPolicy {
    /// Re-fit the imputer on every prediction request
    #[default]
    Adaptive,
    /// Reuse the imputer fitted at training time
    Persisted,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSettings {
    pub lookback_days: u32,
    pub recent_history_days: u32,
    pub default_horizon: u32,
    pub imputation_policy: ImputationPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            recent_history_days: 7,
            default_horizon: 24,
            imputation_policy: ImputationPolicy::Adaptive,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImputerSettings {
    pub neighbors: usize,
}

impl Default for ImputerSettings {
    fn default() -> Self {
        Self { neighbors: 5 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RandomForestSettings {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for RandomForestSettings {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: Some(15),
            min_samples_split: 5,
            min_samples_leaf: 2,
            max_features: None,
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SvrSettings {
    pub c: f64,
    pub epsilon: f64,
    pub max_iter: usize,
    pub max_samples: usize,
    pub tol: f64,
}

impl Default for SvrSettings {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.1,
            max_iter: 200,
            max_samples: 1500,
            tol: 1e-4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ForecasterSettings {
    pub model: ModelKind,
    pub cv_folds: usize,
    pub polynomial_degree: usize,
    pub ridge_alpha: f64,
    pub random_forest: RandomForestSettings,
    pub svr: SvrSettings,
}

impl Default for ForecasterSettings {
    fn default() -> Self {
        Self {
            model: ModelKind::RandomForest,
            cv_folds: 5,
            polynomial_degree: 2,
            ridge_alpha: 1.0,
            random_forest: RandomForestSettings::default(),
            svr: SvrSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreSettings {
    pub dir: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            dir: "models".to_string(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/settings").required(false))
        .add_source(
            config::Environment::with_prefix("AQI")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
