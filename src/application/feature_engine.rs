// Feature engineering shared by imputation and forecasting
//
// Two views over the same calendar logic: the imputation view (every
// pollutant plus calendar context) and the target view (calendar, lags and
// rolling statistics of one pollutant, plus the others' concurrent values).
use crate::domain::observation::TimeSeriesRecord;
use crate::domain::pollutant::Pollutant;
use chrono::{DateTime, Datelike, Timelike, Utc};
use ndarray::Array2;
use std::f64::consts::PI;

pub const LAGS: [usize; 5] = [1, 3, 6, 12, 24];
pub const ROLLING_WINDOWS: [usize; 4] = [3, 6, 12, 24];

/// Rows needed before every lag feature is defined
pub const WARM_UP: usize = LAGS[LAGS.len() - 1];

/// Named feature columns over a series; undefined cells hold NaN
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    pub names: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureFrame {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    #[cfg(test)]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarFeatures {
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub day_sin: f64,
    pub day_cos: f64,
    pub month_sin: f64,
    pub month_cos: f64,
    pub is_weekend: f64,
}

pub fn calendar_features(timestamp: DateTime<Utc>) -> CalendarFeatures {
    let hour = timestamp.hour() as f64;
    let day_of_week = timestamp.weekday().num_days_from_monday();
    let month = timestamp.month() as f64;

    CalendarFeatures {
        hour_sin: (2.0 * PI * hour / 24.0).sin(),
        hour_cos: (2.0 * PI * hour / 24.0).cos(),
        day_sin: (2.0 * PI * day_of_week as f64 / 7.0).sin(),
        day_cos: (2.0 * PI * day_of_week as f64 / 7.0).cos(),
        month_sin: (2.0 * PI * month / 12.0).sin(),
        month_cos: (2.0 * PI * month / 12.0).cos(),
        is_weekend: if day_of_week >= 5 { 1.0 } else { 0.0 },
    }
}

pub fn imputation_feature_names() -> Vec<String> {
    let mut names: Vec<String> = Pollutant::ALL.iter().map(|p| p.code().to_string()).collect();
    names.extend(
        ["hour_sin", "hour_cos", "day_sin", "day_cos", "is_weekend"]
            .iter()
            .map(|s| s.to_string()),
    );
    names
}

/// Pollutant readings (NaN for gaps) followed by calendar context.
/// The first `Pollutant::COUNT` columns are the pollutants in canonical order.
pub fn imputation_frame(series: &[TimeSeriesRecord]) -> FeatureFrame {
    let names = imputation_feature_names();
    let mut values = Array2::from_elem((series.len(), names.len()), f64::NAN);

    for (i, record) in series.iter().enumerate() {
        for p in Pollutant::ALL {
            values[[i, p.index()]] = record.get(p).unwrap_or(f64::NAN);
        }
        let cal = calendar_features(record.timestamp);
        let base = Pollutant::COUNT;
        values[[i, base]] = cal.hour_sin;
        values[[i, base + 1]] = cal.hour_cos;
        values[[i, base + 2]] = cal.day_sin;
        values[[i, base + 3]] = cal.day_cos;
        values[[i, base + 4]] = cal.is_weekend;
    }

    FeatureFrame { names, values }
}

/// Column names of the target view; a pure function of the target
pub fn target_feature_names(target: Pollutant) -> Vec<String> {
    let mut names: Vec<String> = [
        "is_weekend",
        "hour_sin",
        "hour_cos",
        "day_sin",
        "day_cos",
        "month_sin",
        "month_cos",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    for lag in LAGS {
        names.push(format!("{}_lag_{}", target, lag));
    }
    for window in ROLLING_WINDOWS {
        names.push(format!("{}_rolling_mean_{}", target, window));
        names.push(format!("{}_rolling_std_{}", target, window));
    }
    for other in Pollutant::ALL.iter().filter(|&&p| p != target) {
        names.push(format!("{}_current", other));
    }
    names
}

pub fn target_frame(series: &[TimeSeriesRecord], target: Pollutant) -> FeatureFrame {
    let names = target_feature_names(target);
    let mut values = Array2::from_elem((series.len(), names.len()), f64::NAN);

    for idx in 0..series.len() {
        let row = target_row(series, target, idx);
        values.row_mut(idx).assign(&ndarray::ArrayView1::from(row.as_slice()));
    }

    FeatureFrame { names, values }
}

/// Target-view features of a single row, in `target_feature_names` order
pub fn target_row(series: &[TimeSeriesRecord], target: Pollutant, idx: usize) -> Vec<f64> {
    let record = &series[idx];
    let cal = calendar_features(record.timestamp);
    let mut row = Vec::with_capacity(7 + LAGS.len() + 2 * ROLLING_WINDOWS.len() + Pollutant::COUNT - 1);

    row.extend([
        cal.is_weekend,
        cal.hour_sin,
        cal.hour_cos,
        cal.day_sin,
        cal.day_cos,
        cal.month_sin,
        cal.month_cos,
    ]);

    for lag in LAGS {
        let value = idx
            .checked_sub(lag)
            .and_then(|j| series[j].get(target))
            .unwrap_or(f64::NAN);
        row.push(value);
    }

    for window in ROLLING_WINDOWS {
        let start = (idx + 1).saturating_sub(window);
        let (mean, std) = rolling_stats(series[start..=idx].iter().filter_map(|r| r.get(target)));
        row.push(mean);
        row.push(std);
    }

    for other in Pollutant::ALL.iter().filter(|&&p| p != target) {
        row.push(record.get(*other).unwrap_or(f64::NAN));
    }

    row
}

/// Mean and sample standard deviation over the observed values in a window.
/// A single observation has zero spread; an empty window is undefined.
fn rolling_stats(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let observed: Vec<f64> = values.collect();
    match observed.len() {
        0 => (f64::NAN, f64::NAN),
        1 => (observed[0], 0.0),
        n => {
            let mean = observed.iter().sum::<f64>() / n as f64;
            let var = observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (mean, var.sqrt())
        }
    }
}
