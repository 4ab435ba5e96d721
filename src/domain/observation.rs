// Observation domain models
use super::pollutant::Pollutant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One hourly sample: a timestamp and a reading (or gap) per pollutant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub timestamp: DateTime<Utc>,
    values: [Option<f64>; Pollutant::COUNT],
}

impl TimeSeriesRecord {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: [None; Pollutant::COUNT],
        }
    }

    #[cfg(test)]
    pub fn with_value(mut self, pollutant: Pollutant, value: f64) -> Self {
        self.set(pollutant, Some(value));
        self
    }

    pub fn get(&self, pollutant: Pollutant) -> Option<f64> {
        self.values[pollutant.index()]
    }

    /// Non-finite readings are stored as gaps
    pub fn set(&mut self, pollutant: Pollutant, value: Option<f64>) {
        self.values[pollutant.index()] = value.filter(|v| v.is_finite());
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }
}

/// Latest reading per pollutant
pub type CurrentReadings = BTreeMap<Pollutant, f64>;

/// A city with monitoring coverage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub country: String,
    pub country_code: String,
}

impl City {
    pub fn new(name: &str, country: &str, country_code: &str) -> Self {
        Self {
            name: name.to_string(),
            country: country.to_string(),
            country_code: country_code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_non_finite_values_become_gaps() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut record = TimeSeriesRecord::new(ts).with_value(Pollutant::Pm25, 12.0);
        record.set(Pollutant::O3, Some(f64::NAN));

        assert_eq!(record.get(Pollutant::Pm25), Some(12.0));
        assert_eq!(record.get(Pollutant::O3), None);
        assert!(!record.is_complete());
    }
}
