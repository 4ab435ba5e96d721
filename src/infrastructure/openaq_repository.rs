// OpenAQ v3 REST adapter
use crate::application::error::{PipelineError, PipelineResult};
use crate::application::observation_source::ObservationSource;
use crate::domain::observation::{City, CurrentReadings, TimeSeriesRecord};
use crate::domain::pollutant::Pollutant;
use crate::infrastructure::config::OpenAqSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Page size for list endpoints; the API caps it at 1000
const PAGE_LIMIT: usize = 1000;

/// Upper bound on pages followed for one listing
const MAX_PAGES: usize = 100;

#[derive(Debug, Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct Location {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    locality: Option<String>,
    country: Country,
    #[serde(default)]
    sensors: Vec<Sensor>,
}

#[derive(Debug, Clone, Deserialize)]
struct Country {
    code: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Sensor {
    id: i64,
    parameter: Parameter,
}

#[derive(Debug, Clone, Deserialize)]
struct Parameter {
    name: String,
    units: String,
}

#[derive(Debug, Deserialize)]
struct Latest {
    value: f64,
    #[serde(rename = "sensorsId")]
    sensors_id: i64,
}

#[derive(Debug, Deserialize)]
struct HourlyValue {
    value: f64,
    period: Period,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "datetimeFrom")]
    datetime_from: Instant,
}

#[derive(Debug, Deserialize)]
struct Instant {
    utc: DateTime<Utc>,
}

impl Location {
    fn matches_city(&self, city: &str) -> bool {
        let needle = city.trim().to_lowercase();
        [&self.locality, &self.name]
            .into_iter()
            .flatten()
            .any(|s| s.to_lowercase().contains(&needle))
    }

    /// Sensors that measure a tracked pollutant
    fn tracked_sensors(&self) -> impl Iterator<Item = (Pollutant, &Sensor)> {
        self.sensors
            .iter()
            .filter_map(|s| s.parameter.name.parse::<Pollutant>().ok().map(|p| (p, s)))
    }
}

/// Convert gas readings to the units the breakpoint tables use
fn normalize(pollutant: Pollutant, value: f64, units: &str) -> f64 {
    match (pollutant, units.to_ascii_lowercase().as_str()) {
        (Pollutant::O3 | Pollutant::Co, "ppb") => value / 1000.0,
        (Pollutant::No2 | Pollutant::So2, "ppm") => value * 1000.0,
        _ => value,
    }
}

/// Lay readings onto a contiguous hourly grid ending at `end`
fn hourly_grid(
    readings: &BTreeMap<DateTime<Utc>, Vec<(Pollutant, f64)>>,
    end: DateTime<Utc>,
    hours: i64,
) -> Vec<TimeSeriesRecord> {
    (0..hours)
        .map(|i| {
            let timestamp = end - Duration::hours(hours - 1 - i);
            let mut record = TimeSeriesRecord::new(timestamp);
            if let Some(values) = readings.get(&timestamp) {
                for &(p, v) in values {
                    record.set(p, Some(v));
                }
            }
            record
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct OpenAqRepository {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAqRepository {
    pub fn new(settings: &OpenAqSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            client,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to OpenAQ: {}", path_and_query))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAQ request {} failed with status {}: {}", path_and_query, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse OpenAQ response for {}", path_and_query))
    }

    /// Follow `page=N` until a short page; `path_and_query` must already carry a query
    async fn get_all<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> Result<Vec<T>> {
        let mut results = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Page<T> = self
                .get(&format!("{}&limit={}&page={}", path_and_query, PAGE_LIMIT, page))
                .await?;
            let len = batch.results.len();
            results.extend(batch.results);
            if len < PAGE_LIMIT {
                return Ok(results);
            }
        }
        tracing::warn!(path = %path_and_query, pages = MAX_PAGES, "OpenAQ listing truncated");
        Ok(results)
    }

    async fn locations_in(&self, country_code: &str) -> Result<Vec<Location>> {
        self.get_all(&format!("/locations?iso={}", urlencoding::encode(country_code.trim())))
            .await
    }

    async fn city_locations(&self, city: &str, country_code: &str) -> PipelineResult<Vec<Location>> {
        let locations = self
            .locations_in(country_code)
            .await
            .map_err(PipelineError::upstream)?;
        let matching: Vec<Location> = locations.into_iter().filter(|l| l.matches_city(city)).collect();
        if matching.is_empty() {
            return Err(PipelineError::UnknownLocation(format!("{}, {}", city, country_code)));
        }
        Ok(matching)
    }

    async fn sensor_hours(&self, sensor_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<HourlyValue>> {
        self.get_all(&format!(
            "/sensors/{}/hours?datetime_from={}&datetime_to={}",
            sensor_id,
            urlencoding::encode(&from.to_rfc3339()),
            urlencoding::encode(&to.to_rfc3339()),
        ))
        .await
    }
}

#[async_trait]
impl ObservationSource for OpenAqRepository {
    async fn historical(&self, city: &str, country_code: &str, days: u32) -> PipelineResult<Vec<TimeSeriesRecord>> {
        let locations = self.city_locations(city, country_code).await?;
        let now = Utc::now();
        let end = now.duration_trunc(Duration::hours(1)).unwrap_or(now);
        let hours = days as i64 * 24;
        let start = end - Duration::hours(hours - 1);

        // First sensor found per pollutant wins
        let mut sensors: BTreeMap<Pollutant, Sensor> = BTreeMap::new();
        for location in &locations {
            for (p, sensor) in location.tracked_sensors() {
                sensors.entry(p).or_insert_with(|| sensor.clone());
            }
        }

        let mut readings: BTreeMap<DateTime<Utc>, Vec<(Pollutant, f64)>> = BTreeMap::new();
        for (pollutant, sensor) in &sensors {
            let values = self
                .sensor_hours(sensor.id, start, end + Duration::hours(1))
                .await
                .map_err(PipelineError::upstream)?;
            for hourly in values {
                let Ok(slot) = hourly.period.datetime_from.utc.duration_trunc(Duration::hours(1)) else {
                    continue;
                };
                readings
                    .entry(slot)
                    .or_default()
                    .push((*pollutant, normalize(*pollutant, hourly.value, &sensor.parameter.units)));
            }
        }

        tracing::info!(city = %city, sensors = sensors.len(), hours, "fetched OpenAQ history");
        Ok(hourly_grid(&readings, end, hours))
    }

    async fn current(&self, city: &str, country_code: &str) -> PipelineResult<CurrentReadings> {
        let locations = self.city_locations(city, country_code).await?;
        let mut current = CurrentReadings::new();

        for location in &locations {
            let by_sensor: HashMap<i64, (Pollutant, &Sensor)> =
                location.tracked_sensors().map(|(p, s)| (s.id, (p, s))).collect();
            if by_sensor.is_empty() {
                continue;
            }

            let page: Page<Latest> = self
                .get(&format!("/locations/{}/latest", location.id))
                .await
                .map_err(PipelineError::upstream)?;
            for latest in page.results {
                if let Some((p, sensor)) = by_sensor.get(&latest.sensors_id) {
                    current
                        .entry(*p)
                        .or_insert_with(|| normalize(*p, latest.value, &sensor.parameter.units));
                }
            }
            if current.len() == Pollutant::COUNT {
                break;
            }
        }

        Ok(current)
    }

    async fn search(&self, query: &str, limit: usize) -> PipelineResult<Vec<City>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut seen = BTreeSet::new();
        let mut cities = Vec::new();

        // Stop paging once enough distinct cities are found
        for page in 1..=MAX_PAGES {
            let batch: Page<Location> = self
                .get(&format!("/locations?limit={}&page={}", PAGE_LIMIT, page))
                .await
                .map_err(PipelineError::upstream)?;
            let len = batch.results.len();

            for location in batch.results.into_iter().filter(|l| l.matches_city(query)) {
                let Some(name) = location.locality.clone().or(location.name.clone()) else {
                    continue;
                };
                if seen.insert((name.clone(), location.country.code.clone())) {
                    cities.push(City::new(&name, &location.country.name, &location.country.code));
                }
                if cities.len() >= limit {
                    return Ok(cities);
                }
            }
            if len < PAGE_LIMIT {
                break;
            }
        }
        Ok(cities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    async fn mock_locations(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
        let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        let results = if page == 1 {
            json!([{
                "id": 1,
                "name": "Town Centre",
                "locality": "Town",
                "country": {"code": "XX", "name": "Testland"},
                "sensors": [{"id": 7, "parameter": {"name": "pm25", "units": "µg/m³"}}]
            }])
        } else {
            json!([])
        };
        Json(json!({ "results": results }))
    }

    /// Hourly values over the requested window, oldest first, paged like the real API
    async fn mock_hours(Path(_sensor): Path<i64>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
        let parse = |key: &str| DateTime::parse_from_rfc3339(&query[key]).unwrap().with_timezone(&Utc);
        let (from, to) = (parse("datetime_from"), parse("datetime_to"));
        let limit: usize = query["limit"].parse().unwrap();
        let page: usize = query.get("page").map(|p| p.parse().unwrap()).unwrap_or(1);

        let results: Vec<Value> = (0..(to - from).num_hours())
            .skip((page - 1) * limit)
            .take(limit)
            .map(|i| {
                let ts = from + Duration::hours(i);
                json!({"value": 10.0 + i as f64, "period": {"datetimeFrom": {"utc": ts.to_rfc3339()}}})
            })
            .collect();
        Json(json!({ "results": results }))
    }

    async fn mock_repository() -> OpenAqRepository {
        let app = Router::new()
            .route("/locations", get(mock_locations))
            .route("/sensors/:id/hours", get(mock_hours));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        OpenAqRepository::new(&OpenAqSettings {
            base_url: format!("http://{}", addr),
            ..OpenAqSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_history_reads_every_page() {
        let repo = mock_repository().await;
        let series = repo.historical("Town", "XX", 90).await.unwrap();

        assert_eq!(series.len(), 90 * 24);
        let observed = series.iter().filter(|r| r.get(Pollutant::Pm25).is_some()).count();
        assert_eq!(observed, 90 * 24);
        assert_eq!(series[0].get(Pollutant::Pm25), Some(10.0));
        assert_eq!(series[90 * 24 - 1].get(Pollutant::Pm25), Some(10.0 + 2159.0));
    }

    #[tokio::test]
    async fn test_search_against_paged_locations() {
        let repo = mock_repository().await;
        let hits = repo.search("town", 5).await.unwrap();
        assert_eq!(hits, vec![City::new("Town", "Testland", "XX")]);
        assert!(repo.search("town", 0).await.unwrap().is_empty());
        assert!(matches!(
            repo.historical("Elsewhere", "XX", 1).await,
            Err(PipelineError::UnknownLocation(_))
        ));
    }

    const LOCATIONS: &str = r#"{
        "meta": {"found": 2},
        "results": [
            {
                "id": 8118,
                "name": "New Delhi - ITO",
                "locality": "New Delhi",
                "country": {"id": 9, "code": "IN", "name": "India"},
                "sensors": [
                    {"id": 101, "name": "pm25 µg/m³", "parameter": {"id": 2, "name": "pm25", "units": "µg/m³", "displayName": "PM2.5"}},
                    {"id": 102, "name": "o3 ppb", "parameter": {"id": 10, "name": "o3", "units": "ppb", "displayName": "O₃"}},
                    {"id": 103, "name": "temperature c", "parameter": {"id": 100, "name": "temperature", "units": "c"}}
                ]
            },
            {
                "id": 9001,
                "name": "Mumbai - Bandra",
                "locality": null,
                "country": {"id": 9, "code": "IN", "name": "India"},
                "sensors": []
            }
        ]
    }"#;

    #[test]
    fn test_location_payload_maps_tracked_sensors() {
        let page: Page<Location> = serde_json::from_str(LOCATIONS).unwrap();
        assert_eq!(page.results.len(), 2);

        let delhi = &page.results[0];
        assert!(delhi.matches_city("new delhi"));
        assert!(!delhi.matches_city("Mumbai"));
        let tracked: Vec<Pollutant> = delhi.tracked_sensors().map(|(p, _)| p).collect();
        assert_eq!(tracked, vec![Pollutant::Pm25, Pollutant::O3]);

        // falls back to the station name when locality is missing
        assert!(page.results[1].matches_city("mumbai"));
    }

    #[test]
    fn test_hourly_payload_parses() {
        let json = r#"{"results": [
            {"value": 41.5, "parameter": {"name": "pm25", "units": "µg/m³"},
             "period": {"label": "raw", "interval": "01:00:00",
                        "datetimeFrom": {"utc": "2024-06-10T13:00:00Z", "local": "2024-06-10T18:30:00+05:30"},
                        "datetimeTo": {"utc": "2024-06-10T14:00:00Z", "local": "2024-06-10T19:30:00+05:30"}}}
        ]}"#;
        let page: Page<HourlyValue> = serde_json::from_str(json).unwrap();
        assert_eq!(page.results[0].value, 41.5);
        assert_eq!(
            page.results[0].period.datetime_from.utc,
            Utc.with_ymd_and_hms(2024, 6, 10, 13, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_gas_units_are_normalized() {
        assert!((normalize(Pollutant::O3, 45.0, "ppb") - 0.045).abs() < 1e-12);
        assert_eq!(normalize(Pollutant::No2, 0.02, "ppm"), 20.0);
        assert_eq!(normalize(Pollutant::Pm25, 12.0, "µg/m³"), 12.0);
    }

    #[test]
    fn test_grid_marks_missing_hours_as_gaps() {
        let end = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let mut readings = BTreeMap::new();
        readings.insert(end - Duration::hours(1), vec![(Pollutant::Pm25, 20.0)]);
        readings.insert(end, vec![(Pollutant::Pm25, 22.0), (Pollutant::Co, 0.4)]);

        let grid = hourly_grid(&readings, end, 3);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0].get(Pollutant::Pm25), None);
        assert_eq!(grid[1].get(Pollutant::Pm25), Some(20.0));
        assert_eq!(grid[2].get(Pollutant::Co), Some(0.4));
        assert_eq!(grid[2].timestamp, end);
    }

    #[test]
    fn test_api_key_is_optional() {
        let settings = OpenAqSettings {
            api_key: Some(String::new()),
            base_url: "https://api.openaq.org/v3/".to_string(),
            ..OpenAqSettings::default()
        };
        let repo = OpenAqRepository::new(&settings).unwrap();
        assert!(repo.api_key.is_none());
        assert_eq!(repo.base_url, "https://api.openaq.org/v3");
    }
}
