// Distance-weighted kNN imputation over the imputation feature view
use crate::application::error::{PipelineError, PipelineResult};
use crate::application::feature_engine::imputation_frame;
use crate::application::regression::scaler::StandardScaler;
use crate::domain::forecast::{MissingStats, ValidationStats};
use crate::domain::observation::TimeSeriesRecord;
use crate::domain::pollutant::Pollutant;
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct DonorPool {
    scaler: StandardScaler,
    /// Standardized imputation view of the fit series, NaN where unobserved
    rows: Array2<f64>,
}

/// Fills pollutant gaps from the k most similar rows of the fit series.
///
/// Similarity is a NaN-aware Euclidean distance in standardized space over
/// the features both rows observe. Only rows that observe the missing
/// pollutant are donors.
#[derive(Debug, Clone)]
pub struct KnnImputer {
    n_neighbors: usize,
    pool: Option<DonorPool>,
}

impl Default for KnnImputer {
    fn default() -> Self {
        Self::new(5)
    }
}

impl KnnImputer {
    pub fn new(n_neighbors: usize) -> Self {
        Self {
            n_neighbors: n_neighbors.max(1),
            pool: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.pool.is_some()
    }

    pub fn fit(&mut self, series: &[TimeSeriesRecord]) -> PipelineResult<()> {
        if series.is_empty() {
            return Err(PipelineError::DataQuality(
                "cannot fit imputer on an empty series".to_string(),
            ));
        }

        let frame = imputation_frame(series);
        for p in Pollutant::ALL {
            if frame.values.column(p.index()).iter().all(|v| v.is_nan()) {
                return Err(PipelineError::DataQuality(format!(
                    "no observed {} values to impute from",
                    p
                )));
            }
        }

        let scaler = StandardScaler::fit(&frame.values)?;
        let rows = scaler.transform(&frame.values)?;
        self.pool = Some(DonorPool { scaler, rows });
        Ok(())
    }

    pub fn transform(&self, series: &[TimeSeriesRecord]) -> PipelineResult<Vec<TimeSeriesRecord>> {
        let pool = self.pool.as_ref().ok_or(PipelineError::NotFitted("imputer"))?;
        let frame = imputation_frame(series);
        let scaled = pool.scaler.transform(&frame.values)?;

        let filled = series
            .par_iter()
            .enumerate()
            .map(|(i, record)| {
                if record.is_complete() {
                    return record.clone();
                }
                let mut out = record.clone();
                let receiver = scaled.row(i);
                for p in Pollutant::ALL {
                    if record.get(p).is_none() {
                        out.set(p, Some(self.estimate(pool, receiver, p.index())));
                    }
                }
                out
            })
            .collect();

        Ok(filled)
    }

    pub fn fit_transform(&mut self, series: &[TimeSeriesRecord]) -> PipelineResult<Vec<TimeSeriesRecord>> {
        self.fit(series)?;
        self.transform(series)
    }

    /// Estimate for column `j` of `receiver`, in original units
    fn estimate(&self, pool: &DonorPool, receiver: ArrayView1<f64>, j: usize) -> f64 {
        let mut donors: Vec<(f64, f64)> = pool
            .rows
            .rows()
            .into_iter()
            .filter(|donor| !donor[j].is_nan())
            .filter_map(|donor| {
                let d = nan_euclidean(receiver, donor);
                d.is_finite().then_some((d, donor[j]))
            })
            .collect();

        if donors.is_empty() {
            return pool.scaler.mean()[j];
        }

        let k = self.n_neighbors.min(donors.len());
        if k < donors.len() {
            donors.select_nth_unstable_by(k - 1, |a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            donors.truncate(k);
        }

        let exact: Vec<f64> = donors.iter().filter(|(d, _)| *d == 0.0).map(|(_, v)| *v).collect();
        let scaled_value = if !exact.is_empty() {
            exact.iter().sum::<f64>() / exact.len() as f64
        } else {
            let (weighted, total) = donors
                .iter()
                .fold((0.0, 0.0), |(acc, w), (d, v)| (acc + v / d, w + 1.0 / d));
            weighted / total
        };

        pool.scaler.inverse_value(j, scaled_value)
    }
}

/// Euclidean distance over jointly observed coordinates, scaled up by the
/// fraction of coordinates present. Infinite when nothing overlaps.
fn nan_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let mut sum = 0.0;
    let mut joint = 0usize;
    for (x, y) in a.iter().zip(b.iter()) {
        if x.is_nan() || y.is_nan() {
            continue;
        }
        sum += (x - y).powi(2);
        joint += 1;
    }
    if joint == 0 {
        return f64::INFINITY;
    }
    (a.len() as f64 / joint as f64 * sum).sqrt()
}

/// Missing counts and IQR outliers per pollutant
pub fn validate(series: &[TimeSeriesRecord]) -> ValidationStats {
    let total = series.len();
    let mut stats = ValidationStats {
        total_rows: total,
        ..ValidationStats::default()
    };

    for p in Pollutant::ALL {
        let observed: Vec<f64> = series.iter().filter_map(|r| r.get(p)).collect();
        let count = total - observed.len();
        let percentage = if total == 0 {
            0.0
        } else {
            (count as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        };
        stats.missing_by_pollutant.insert(p, MissingStats { count, percentage });
        stats.outliers_by_pollutant.insert(p, iqr_outliers(&observed));
    }

    stats
}

fn iqr_outliers(values: &[f64]) -> usize {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    let (low, high) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    values.iter().filter(|v| **v < low || **v > high).count()
}

/// Linear-interpolated quantile of sorted data
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}
