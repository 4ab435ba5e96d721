// Reproducible demo observations with diurnal and weekly patterns
use crate::application::error::{PipelineError, PipelineResult};
use crate::application::observation_source::ObservationSource;
use crate::domain::observation::{City, CurrentReadings, TimeSeriesRecord};
use crate::domain::pollutant::Pollutant;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use std::f64::consts::PI;

/// Share of readings dropped to mimic sensor outages
const MISSING_RATE: f64 = 0.07;

/// Per-pollutant shape: `base + amplitude·sin(2π(hour - shift)/24)`, a weekday
/// bump, Gaussian noise and a floor
struct Pattern {
    pollutant: Pollutant,
    base: f64,
    amplitude: f64,
    phase_shift_hours: f64,
    weekday_bump: f64,
    noise_std: f64,
    floor: f64,
}

static PATTERNS: [Pattern; 6] = [
    Pattern { pollutant: Pollutant::Pm25, base: 30.0, amplitude: 15.0, phase_shift_hours: 0.0, weekday_bump: 5.0, noise_std: 5.0, floor: 5.0 },
    Pattern { pollutant: Pollutant::Pm10, base: 50.0, amplitude: 20.0, phase_shift_hours: 0.0, weekday_bump: 8.0, noise_std: 8.0, floor: 10.0 },
    Pattern { pollutant: Pollutant::O3, base: 0.04, amplitude: 0.02, phase_shift_hours: 6.0, weekday_bump: 0.0, noise_std: 0.005, floor: 0.01 },
    Pattern { pollutant: Pollutant::No2, base: 40.0, amplitude: 20.0, phase_shift_hours: 0.0, weekday_bump: 10.0, noise_std: 8.0, floor: 5.0 },
    Pattern { pollutant: Pollutant::So2, base: 20.0, amplitude: 10.0, phase_shift_hours: 0.0, weekday_bump: 0.0, noise_std: 5.0, floor: 2.0 },
    Pattern { pollutant: Pollutant::Co, base: 2.5, amplitude: 1.5, phase_shift_hours: 0.0, weekday_bump: 0.5, noise_std: 0.3, floor: 0.3 },
];

fn default_cities() -> Vec<City> {
    vec![
        City::new("New Delhi", "India", "IN"),
        City::new("Los Angeles", "United States", "US"),
        City::new("London", "United Kingdom", "GB"),
        City::new("Beijing", "China", "CN"),
        City::new("Mexico City", "Mexico", "MX"),
        City::new("São Paulo", "Brazil", "BR"),
        City::new("Tokyo", "Japan", "JP"),
        City::new("Paris", "France", "FR"),
        City::new("Mumbai", "India", "IN"),
        City::new("Bangkok", "Thailand", "TH"),
    ]
}

/// FNV-1a; stable across builds, unlike the std hasher
fn stable_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    seed: u64,
    anchor: Option<DateTime<Utc>>,
    cities: Vec<City>,
}

impl SyntheticSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            anchor: None,
            cities: default_cities(),
        }
    }

    /// Pin "now" so generated windows are fully reproducible
    #[cfg(test)]
    pub fn with_anchor(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    fn find_city(&self, city: &str, country_code: &str) -> PipelineResult<&City> {
        let name = city.trim().to_lowercase();
        self.cities
            .iter()
            .find(|c| c.name.to_lowercase() == name && c.country_code.eq_ignore_ascii_case(country_code.trim()))
            .ok_or_else(|| PipelineError::UnknownLocation(format!("{}, {}", city, country_code)))
    }

    fn latest_hour(&self) -> DateTime<Utc> {
        let now = self.anchor.unwrap_or_else(Utc::now);
        now.duration_trunc(Duration::hours(1)).unwrap_or(now)
    }

    /// Every hour draws from its own stream so overlapping windows agree
    fn hour_rng(&self, city_key: u64, timestamp: DateTime<Utc>) -> ChaCha8Rng {
        let hour_key = (timestamp.timestamp() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        ChaCha8Rng::seed_from_u64(self.seed ^ city_key ^ hour_key)
    }

    fn sample(&self, city_key: u64, timestamp: DateTime<Utc>, with_gaps: bool) -> TimeSeriesRecord {
        let mut rng = self.hour_rng(city_key, timestamp);
        let hour = timestamp.hour() as f64;
        let weekday = timestamp.weekday().num_days_from_monday() < 5;

        let mut record = TimeSeriesRecord::new(timestamp);
        for pattern in &PATTERNS {
            let cycle = (2.0 * PI * (hour - pattern.phase_shift_hours) / 24.0).sin();
            let bump = if weekday { pattern.weekday_bump } else { 0.0 };
            let noise = Normal::new(0.0, pattern.noise_std)
                .map(|normal| rng.sample(normal))
                .unwrap_or(0.0);
            let value = (pattern.base + pattern.amplitude * cycle + bump + noise).max(pattern.floor);

            let missing = rng.gen_range(0.0..1.0) < MISSING_RATE;
            if !(with_gaps && missing) {
                record.set(pattern.pollutant, Some(value));
            }
        }
        record
    }
}

#[async_trait]
impl ObservationSource for SyntheticSource {
    async fn historical(&self, city: &str, country_code: &str, days: u32) -> PipelineResult<Vec<TimeSeriesRecord>> {
        let found = self.find_city(city, country_code)?;
        let city_key = stable_hash(&found.name);
        let hours = days as i64 * 24;
        let end = self.latest_hour();

        let series: Vec<TimeSeriesRecord> = (0..hours)
            .map(|i| self.sample(city_key, end - Duration::hours(hours - 1 - i), true))
            .collect();
        tracing::debug!(city = %found.name, records = series.len(), "generated synthetic history");
        Ok(series)
    }

    async fn current(&self, city: &str, country_code: &str) -> PipelineResult<CurrentReadings> {
        let found = self.find_city(city, country_code)?;
        let record = self.sample(stable_hash(&found.name), self.latest_hour(), false);
        Ok(Pollutant::ALL
            .iter()
            .filter_map(|&p| record.get(p).map(|v| (p, (v * 100.0).round() / 100.0)))
            .collect())
    }

    async fn search(&self, query: &str, limit: usize) -> PipelineResult<Vec<City>> {
        let needle = query.trim().to_lowercase();
        Ok(self
            .cities
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source() -> SyntheticSource {
        SyntheticSource::new(42).with_anchor(Utc.with_ymd_and_hms(2024, 6, 10, 15, 37, 0).unwrap())
    }

    #[tokio::test]
    async fn test_history_is_hourly_and_ends_at_anchor_hour() {
        let series = source().historical("London", "GB", 3).await.unwrap();
        assert_eq!(series.len(), 72);
        assert_eq!(series[71].timestamp, Utc.with_ymd_and_hms(2024, 6, 10, 15, 0, 0).unwrap());
        for pair in series.windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::hours(1));
        }
    }

    #[tokio::test]
    async fn test_overlapping_windows_agree() {
        let src = source();
        let long = src.historical("Tokyo", "JP", 10).await.unwrap();
        let short = src.historical("Tokyo", "JP", 2).await.unwrap();
        assert_eq!(&long[long.len() - short.len()..], &short[..]);

        let other_city = src.historical("Paris", "FR", 2).await.unwrap();
        assert_ne!(short, other_city);
    }

    #[tokio::test]
    async fn test_values_respect_floors_and_gap_rate() {
        let series = source().historical("new delhi", "in", 90).await.unwrap();
        let cells = series.len() * Pollutant::COUNT;
        let gaps: usize = series
            .iter()
            .map(|r| Pollutant::ALL.iter().filter(|&&p| r.get(p).is_none()).count())
            .sum();
        let rate = gaps as f64 / cells as f64;
        assert!(rate > 0.04 && rate < 0.10, "gap rate {rate}");

        for pattern in &PATTERNS {
            assert!(series
                .iter()
                .filter_map(|r| r.get(pattern.pollutant))
                .all(|v| v >= pattern.floor));
        }
    }

    #[tokio::test]
    async fn test_noise_is_centered_on_the_pattern() {
        // 06:00 on weekdays: pm25 peaks at base + amplitude + bump = 50 with sd 5
        let series = source().historical("Bangkok", "TH", 90).await.unwrap();
        let samples: Vec<f64> = series
            .iter()
            .filter(|r| r.timestamp.hour() == 6 && r.timestamp.weekday().num_days_from_monday() < 5)
            .filter_map(|r| r.get(Pollutant::Pm25))
            .collect();
        assert!(samples.len() > 50);

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let sd = (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
        assert!((mean - 50.0).abs() < 3.0, "mean {mean}");
        assert!(sd > 3.0 && sd < 7.5, "sd {sd}");
    }

    #[tokio::test]
    async fn test_current_reports_every_pollutant() {
        let current = source().current("Mumbai", "IN").await.unwrap();
        assert_eq!(current.len(), Pollutant::COUNT);
    }

    #[tokio::test]
    async fn test_unknown_city_and_search() {
        let src = source();
        assert!(matches!(
            src.historical("Atlantis", "XX", 1).await,
            Err(PipelineError::UnknownLocation(_))
        ));
        assert!(matches!(
            src.current("London", "US").await,
            Err(PipelineError::UnknownLocation(_))
        ));

        let hits = src.search("PA", 10).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["São Paulo", "Paris"]);
        assert_eq!(src.search("o", 2).await.unwrap().len(), 2);
    }
}
