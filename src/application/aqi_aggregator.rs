// AQI aggregation: breakpoint interpolation, primary pollutant, categories
use crate::application::error::{PipelineError, PipelineResult};
use crate::domain::aqi::{
    breakpoints, AqiCategory, AqiResult, HourlyAqi, HourlyAqiForecast, PollutantForecast, SubIndex, AQI_MAX,
};
use crate::domain::forecast::ForecastSet;
use crate::domain::observation::CurrentReadings;
use crate::domain::pollutant::Pollutant;
use chrono::Utc;

/// EPA sub-index for a concentration.
///
/// Linear interpolation inside the first tier whose upper bound covers the
/// concentration, rounded half-to-even. Values in the gap below a tier's
/// lower bound take that tier's lower index; values past the last tier
/// saturate at the top of the scale.
pub fn calc_subindex(pollutant: Pollutant, concentration: f64) -> u32 {
    if concentration.is_nan() || concentration <= 0.0 {
        return 0;
    }

    for tier in breakpoints(pollutant) {
        if concentration <= tier.c_high {
            let c = concentration.max(tier.c_low);
            let slope = (tier.i_high - tier.i_low) as f64 / (tier.c_high - tier.c_low);
            let aqi = tier.i_low as f64 + slope * (c - tier.c_low);
            return (aqi.round_ties_even() as u32).min(AQI_MAX);
        }
    }

    AQI_MAX
}

/// Same as `calc_subindex`, keyed by pollutant code; unknown codes score 0
pub fn calc_subindex_for_code(code: &str, concentration: f64) -> u32 {
    code.parse::<Pollutant>()
        .map(|p| calc_subindex(p, concentration))
        .unwrap_or(0)
}

/// Highest sub-index; ties go to the pollutant earliest in canonical order
fn dominant(subindices: impl IntoIterator<Item = SubIndex>) -> Option<SubIndex> {
    let mut best: Option<SubIndex> = None;
    for s in subindices {
        let replace = match &best {
            None => true,
            Some(b) => s.aqi > b.aqi || (s.aqi == b.aqi && s.pollutant < b.pollutant),
        };
        if replace {
            best = Some(s);
        }
    }
    best
}

pub fn health_recommendation(category: AqiCategory, primary: Pollutant) -> String {
    let base = category.base_recommendation();
    match primary.health_advice() {
        Some(advice) if category.wants_pollutant_advice() => format!("{} {}", base, advice),
        _ => base.to_string(),
    }
}

/// Overall index from current readings, with the forecasts attached
pub fn calculate_aqi(forecasts: &ForecastSet, current: &CurrentReadings) -> PipelineResult<AqiResult> {
    let pollutant_forecasts: Vec<PollutantForecast> = forecasts
        .iter()
        .map(|(&pollutant, series)| {
            let current_value = current.get(&pollutant).copied();
            PollutantForecast {
                pollutant,
                unit: pollutant.unit().to_string(),
                current_value,
                forecasted_values: series.clone(),
                aqi_subindex: current_value.map(|c| calc_subindex(pollutant, c)),
            }
        })
        .collect();

    let primary = dominant(pollutant_forecasts.iter().filter_map(|f| {
        Some(SubIndex {
            pollutant: f.pollutant,
            concentration: f.current_value?,
            aqi: f.aqi_subindex?,
        })
    }))
    .ok_or_else(|| {
        PipelineError::DataQuality("no current reading for any forecast pollutant".to_string())
    })?;

    let category = AqiCategory::from_aqi(primary.aqi);
    Ok(AqiResult {
        overall_aqi: primary.aqi,
        category,
        color: category.color().to_string(),
        primary_pollutant: primary.pollutant,
        health_recommendation: health_recommendation(category, primary.pollutant),
        pollutant_forecasts,
        timestamp: Utc::now(),
    })
}

/// Index per hour `1..=horizon` from forecasted concentrations only.
/// An hour with no forecasts scores 0 with PM2.5 as its primary pollutant.
pub fn hourly_aqi_forecast(forecasts: &ForecastSet, horizon: u32) -> HourlyAqiForecast {
    (1..=horizon)
        .map(|hour| {
            let top = dominant(forecasts.iter().filter_map(|(&pollutant, series)| {
                series.get(&hour).map(|&c| SubIndex {
                    pollutant,
                    concentration: c,
                    aqi: calc_subindex(pollutant, c),
                })
            }));
            let (aqi, primary) = top.map_or((0, Pollutant::Pm25), |s| (s.aqi, s.pollutant));
            let category = AqiCategory::from_aqi(aqi);
            (
                hour,
                HourlyAqi {
                    aqi,
                    category,
                    color: category.color().to_string(),
                    primary_pollutant: primary,
                },
            )
        })
        .collect()
}
