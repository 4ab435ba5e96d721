// AQI reference tables and result models
use super::pollutant::Pollutant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Highest index value on the scale
pub const AQI_MAX: u32 = 500;

/// One row of a breakpoint table: a concentration range mapped onto an index range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub c_low: f64,
    pub c_high: f64,
    pub i_low: u32,
    pub i_high: u32,
}

const fn bp(c_low: f64, c_high: f64, i_low: u32, i_high: u32) -> Breakpoint {
    Breakpoint {
        c_low,
        c_high,
        i_low,
        i_high,
    }
}

// US EPA tables. PM in µg/m³, O3 and CO in ppm, NO2 and SO2 in ppb.
static PM25_BREAKPOINTS: [Breakpoint; 6] = [
    bp(0.0, 12.0, 0, 50),
    bp(12.1, 35.4, 51, 100),
    bp(35.5, 55.4, 101, 150),
    bp(55.5, 150.4, 151, 200),
    bp(150.5, 250.4, 201, 300),
    bp(250.5, 500.4, 301, 500),
];

static PM10_BREAKPOINTS: [Breakpoint; 6] = [
    bp(0.0, 54.0, 0, 50),
    bp(55.0, 154.0, 51, 100),
    bp(155.0, 254.0, 101, 150),
    bp(255.0, 354.0, 151, 200),
    bp(355.0, 424.0, 201, 300),
    bp(425.0, 604.0, 301, 500),
];

static O3_BREAKPOINTS: [Breakpoint; 5] = [
    bp(0.000, 0.054, 0, 50),
    bp(0.055, 0.070, 51, 100),
    bp(0.071, 0.085, 101, 150),
    bp(0.086, 0.105, 151, 200),
    bp(0.106, 0.200, 201, 300),
];

static NO2_BREAKPOINTS: [Breakpoint; 6] = [
    bp(0.0, 53.0, 0, 50),
    bp(54.0, 100.0, 51, 100),
    bp(101.0, 360.0, 101, 150),
    bp(361.0, 649.0, 151, 200),
    bp(650.0, 1249.0, 201, 300),
    bp(1250.0, 2049.0, 301, 500),
];

static SO2_BREAKPOINTS: [Breakpoint; 6] = [
    bp(0.0, 35.0, 0, 50),
    bp(36.0, 75.0, 51, 100),
    bp(76.0, 185.0, 101, 150),
    bp(186.0, 304.0, 151, 200),
    bp(305.0, 604.0, 201, 300),
    bp(605.0, 1004.0, 301, 500),
];

static CO_BREAKPOINTS: [Breakpoint; 6] = [
    bp(0.0, 4.4, 0, 50),
    bp(4.5, 9.4, 51, 100),
    bp(9.5, 12.4, 101, 150),
    bp(12.5, 15.4, 151, 200),
    bp(15.5, 30.4, 201, 300),
    bp(30.5, 50.4, 301, 500),
];

/// Ordered breakpoint tiers for a pollutant
pub fn breakpoints(pollutant: Pollutant) -> &'static [Breakpoint] {
    match pollutant {
        Pollutant::Pm25 => &PM25_BREAKPOINTS,
        Pollutant::Pm10 => &PM10_BREAKPOINTS,
        Pollutant::O3 => &O3_BREAKPOINTS,
        Pollutant::No2 => &NO2_BREAKPOINTS,
        Pollutant::So2 => &SO2_BREAKPOINTS,
        Pollutant::Co => &CO_BREAKPOINTS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AqiCategory {
    #[serde(rename = "Good")]
    Good,
    #[serde(rename = "Moderate")]
    Moderate,
    #[serde(rename = "Unhealthy for Sensitive Groups")]
    UnhealthyForSensitiveGroups,
    #[serde(rename = "Unhealthy")]
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
    #[serde(rename = "Hazardous")]
    Hazardous,
}

struct CategoryBand {
    category: AqiCategory,
    low: u32,
    high: u32,
    color: &'static str,
    recommendation: &'static str,
}

static CATEGORY_BANDS: [CategoryBand; 6] = [
    CategoryBand {
        category: AqiCategory::Good,
        low: 0,
        high: 50,
        color: "#00E400",
        recommendation: "Air quality is satisfactory. Enjoy outdoor activities!",
    },
    CategoryBand {
        category: AqiCategory::Moderate,
        low: 51,
        high: 100,
        color: "#FFFF00",
        recommendation: "Air quality is acceptable. Unusually sensitive people should consider limiting prolonged outdoor exertion.",
    },
    CategoryBand {
        category: AqiCategory::UnhealthyForSensitiveGroups,
        low: 101,
        high: 150,
        color: "#FF7E00",
        recommendation: "Children, elderly, and people with respiratory conditions should limit outdoor exposure.",
    },
    CategoryBand {
        category: AqiCategory::Unhealthy,
        low: 151,
        high: 200,
        color: "#FF0000",
        recommendation: "Everyone should reduce prolonged outdoor exertion. Sensitive groups should avoid outdoor activities.",
    },
    CategoryBand {
        category: AqiCategory::VeryUnhealthy,
        low: 201,
        high: 300,
        color: "#8F3F97",
        recommendation: "Health alert! Everyone should avoid outdoor activities. Keep windows closed.",
    },
    CategoryBand {
        category: AqiCategory::Hazardous,
        low: 301,
        high: 500,
        color: "#7E0023",
        recommendation: "Health emergency! Stay indoors. Use air purifiers if available. Seek medical attention if experiencing symptoms.",
    },
];

impl AqiCategory {
    /// Category whose band contains `aqi`; anything above the scale is Hazardous
    pub fn from_aqi(aqi: u32) -> Self {
        CATEGORY_BANDS
            .iter()
            .find(|band| band.low <= aqi && aqi <= band.high)
            .map(|band| band.category)
            .unwrap_or(AqiCategory::Hazardous)
    }

    fn band(self) -> &'static CategoryBand {
        &CATEGORY_BANDS[self as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    pub fn color(self) -> &'static str {
        self.band().color
    }

    pub fn base_recommendation(self) -> &'static str {
        self.band().recommendation
    }

    /// Categories where pollutant-specific guidance is worth adding
    pub fn wants_pollutant_advice(self) -> bool {
        matches!(
            self,
            AqiCategory::UnhealthyForSensitiveGroups
                | AqiCategory::Unhealthy
                | AqiCategory::VeryUnhealthy
        )
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single pollutant's contribution to the index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubIndex {
    pub pollutant: Pollutant,
    pub concentration: f64,
    pub aqi: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantForecast {
    pub pollutant: Pollutant,
    pub unit: String,
    pub current_value: Option<f64>,
    pub forecasted_values: BTreeMap<u32, f64>,
    pub aqi_subindex: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AqiResult {
    pub overall_aqi: u32,
    pub category: AqiCategory,
    pub color: String,
    pub primary_pollutant: Pollutant,
    pub health_recommendation: String,
    pub pollutant_forecasts: Vec<PollutantForecast>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAqi {
    pub aqi: u32,
    pub category: AqiCategory,
    pub color: String,
    pub primary_pollutant: Pollutant,
}

/// Hour offset (1-based) to that hour's index
pub type HourlyAqiForecast = BTreeMap<u32, HourlyAqi>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_boundaries() {
        assert_eq!(AqiCategory::from_aqi(0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(51), AqiCategory::Moderate);
        assert_eq!(AqiCategory::from_aqi(150), AqiCategory::UnhealthyForSensitiveGroups);
        assert_eq!(AqiCategory::from_aqi(300), AqiCategory::VeryUnhealthy);
        assert_eq!(AqiCategory::from_aqi(301), AqiCategory::Hazardous);
        assert_eq!(AqiCategory::from_aqi(500), AqiCategory::Hazardous);
        assert_eq!(AqiCategory::from_aqi(9_999), AqiCategory::Hazardous);
    }

    #[test]
    fn test_bands_partition_the_scale() {
        let mut expected_low = 0;
        for band in CATEGORY_BANDS.iter() {
            assert_eq!(band.low, expected_low);
            assert!(band.high >= band.low);
            expected_low = band.high + 1;
        }
        assert_eq!(expected_low, AQI_MAX + 1);

        for aqi in 0..=AQI_MAX {
            let hits = CATEGORY_BANDS
                .iter()
                .filter(|band| band.low <= aqi && aqi <= band.high)
                .count();
            assert_eq!(hits, 1, "aqi {} must fall in exactly one band", aqi);
        }
    }

    #[test]
    fn test_breakpoint_tiers_strictly_increase() {
        for p in Pollutant::ALL {
            let tiers = breakpoints(p);
            for tier in tiers {
                assert!(tier.c_low < tier.c_high, "{p}: {:?}", tier);
                assert!(tier.i_low < tier.i_high, "{p}: {:?}", tier);
            }
            for pair in tiers.windows(2) {
                assert!(pair[0].c_high < pair[1].c_low, "{p}: tiers overlap");
                assert_eq!(pair[0].i_high + 1, pair[1].i_low, "{p}: index gap");
            }
            assert!(tiers.last().unwrap().i_high <= AQI_MAX);
        }
    }

    #[test]
    fn test_category_serializes_with_display_name() {
        let json = serde_json::to_string(&AqiCategory::UnhealthyForSensitiveGroups).unwrap();
        assert_eq!(json, "\"Unhealthy for Sensitive Groups\"");
        assert_eq!(AqiCategory::VeryUnhealthy.color(), "#8F3F97");
    }
}
