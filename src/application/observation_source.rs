// Port for measurement data
use crate::application::error::PipelineResult;
use crate::domain::observation::{City, CurrentReadings, TimeSeriesRecord};
use async_trait::async_trait;

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Hourly records for the last `days` days, oldest first
    async fn historical(&self, city: &str, country_code: &str, days: u32) -> PipelineResult<Vec<TimeSeriesRecord>>;

    /// Latest reading for each pollutant the city reports
    async fn current(&self, city: &str, country_code: &str) -> PipelineResult<CurrentReadings>;

    /// Cities whose name contains `query`, case-insensitively
    async fn search(&self, query: &str, limit: usize) -> PipelineResult<Vec<City>>;
}
