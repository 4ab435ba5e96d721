// Domain layer - Pollutants, observations, AQI tables and forecast models
pub mod aqi;
pub mod forecast;
pub mod observation;
pub mod pollutant;
