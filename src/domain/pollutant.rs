// Pollutant domain model
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tracked pollutants, in canonical order.
///
/// The declaration order is significant: it is the order features are laid
/// out in, and the order used to break ties when two pollutants share the
/// highest AQI sub-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pollutant {
    Pm25,
    Pm10,
    O3,
    No2,
    So2,
    Co,
}

impl Pollutant {
    pub const ALL: [Pollutant; 6] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::O3,
        Pollutant::No2,
        Pollutant::So2,
        Pollutant::Co,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Position in canonical order, used to index per-pollutant arrays
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn code(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm25",
            Pollutant::Pm10 => "pm10",
            Pollutant::O3 => "o3",
            Pollutant::No2 => "no2",
            Pollutant::So2 => "so2",
            Pollutant::Co => "co",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Pollutant::Pm25 | Pollutant::Pm10 => "µg/m³",
            Pollutant::O3 | Pollutant::Co => "ppm",
            Pollutant::No2 | Pollutant::So2 => "ppb",
        }
    }

    /// Extra guidance appended to the recommendation when this pollutant
    /// drives an unhealthy reading
    pub fn health_advice(self) -> Option<&'static str> {
        match self {
            Pollutant::O3 => Some(
                "Ozone levels are elevated. Limit outdoor activities during peak afternoon hours.",
            ),
            Pollutant::Pm25 => Some(
                "Fine particulate matter is elevated. Consider wearing a mask if outdoors for extended periods.",
            ),
            Pollutant::Pm10 => Some(
                "Coarse particulate matter is elevated. Avoid dusty areas and outdoor exercise.",
            ),
            Pollutant::No2 => Some("Nitrogen dioxide levels are high. Avoid areas with heavy traffic."),
            Pollutant::So2 | Pollutant::Co => None,
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pollutant code '{0}'")]
pub struct UnknownPollutant(pub String);

impl FromStr for Pollutant {
    type Err = UnknownPollutant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // OpenAQ reports fine particulates as "pm2.5"
        match s.trim().to_ascii_lowercase().as_str() {
            "pm25" | "pm2.5" | "pm2_5" => Ok(Pollutant::Pm25),
            "pm10" => Ok(Pollutant::Pm10),
            "o3" => Ok(Pollutant::O3),
            "no2" => Ok(Pollutant::No2),
            "so2" => Ok(Pollutant::So2),
            "co" => Ok(Pollutant::Co),
            _ => Err(UnknownPollutant(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_from_str() {
        for p in Pollutant::ALL {
            assert_eq!(p.code().parse::<Pollutant>().unwrap(), p);
        }
        assert_eq!("PM2.5".parse::<Pollutant>().unwrap(), Pollutant::Pm25);
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        let err = "benzene".parse::<Pollutant>().unwrap_err();
        assert_eq!(err.to_string(), "unknown pollutant code 'benzene'");
        assert_eq!(err, UnknownPollutant("benzene".to_string()));
    }

    #[test]
    fn test_canonical_order_matches_index() {
        for (i, p) in Pollutant::ALL.iter().enumerate() {
            assert_eq!(p.index(), i);
        }
        assert!(Pollutant::Pm25 < Pollutant::Co);
    }
}
