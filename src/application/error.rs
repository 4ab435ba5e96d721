// Pipeline error taxonomy
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was used before it was fitted; a caller bug, never retried
    #[error("{0} is not fitted")]
    NotFitted(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The input cannot support the requested computation
    #[error("data quality: {0}")]
    DataQuality(String),

    /// Data source or model store failure
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unknown location: {0}")]
    UnknownLocation(String),

    /// The fitted feature list no longer matches what the feature engine produces
    #[error("feature schema changed for {pollutant}: model has {expected} features, engine produces {actual}")]
    SchemaDrift {
        pollutant: String,
        expected: usize,
        actual: usize,
    },

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("operation cancelled")]
    Cancelled,

    /// A background task panicked or was aborted
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn upstream(err: anyhow::Error) -> Self {
        PipelineError::UpstreamUnavailable(format!("{:#}", err))
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            PipelineError::Cancelled
        } else {
            PipelineError::Internal(err.to_string())
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
