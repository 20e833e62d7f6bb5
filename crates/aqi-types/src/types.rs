//! Core types for air-quality sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Device identifier used when a payload does not carry one.
pub const DEFAULT_DEVICE_ID: &str = "sen55-mqtt-node";

/// Air-quality severity category.
///
/// # Ordering
///
/// Categories are ordered by severity: `Good < Moderate < ... < Hazardous`.
/// This allows threshold comparisons like
/// `if category >= AqiCategory::Unhealthy { warn!(...) }`.
///
/// # Display vs Serialization
///
/// `Display` returns the human-readable label ("Unhealthy for Sensitive
/// Groups"), while serde and [`FromStr`] use the snake_case key
/// ("unhealthy_sensitive").
///
/// ```
/// use aqi_types::AqiCategory;
///
/// assert_eq!(format!("{}", AqiCategory::Good), "Good");
/// assert_eq!(AqiCategory::UnhealthySensitive.as_str(), "unhealthy_sensitive");
/// assert!(AqiCategory::Hazardous > AqiCategory::VeryUnhealthy);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AqiCategory {
    /// AQI 0-50.
    Good,
    /// AQI 51-100.
    Moderate,
    /// AQI 101-150.
    UnhealthySensitive,
    /// AQI 151-200.
    Unhealthy,
    /// AQI 201-300.
    VeryUnhealthy,
    /// AQI above 300.
    Hazardous,
}

impl AqiCategory {
    /// All categories in ascending severity.
    pub const ALL: [AqiCategory; 6] = [
        AqiCategory::Good,
        AqiCategory::Moderate,
        AqiCategory::UnhealthySensitive,
        AqiCategory::Unhealthy,
        AqiCategory::VeryUnhealthy,
        AqiCategory::Hazardous,
    ];

    /// The snake_case key used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "good",
            AqiCategory::Moderate => "moderate",
            AqiCategory::UnhealthySensitive => "unhealthy_sensitive",
            AqiCategory::Unhealthy => "unhealthy",
            AqiCategory::VeryUnhealthy => "very_unhealthy",
            AqiCategory::Hazardous => "hazardous",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthySensitive => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    /// Display colour as a `#RRGGBB` hex string.
    #[must_use]
    pub fn color(&self) -> &'static str {
        match self {
            AqiCategory::Good => "#22C55E",
            AqiCategory::Moderate => "#EAB308",
            AqiCategory::UnhealthySensitive => "#F97316",
            AqiCategory::Unhealthy => "#EF4444",
            AqiCategory::VeryUnhealthy => "#A855F7",
            AqiCategory::Hazardous => "#7C2D12",
        }
    }

    /// A short health recommendation for this category.
    #[must_use]
    pub fn health_tip(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Air quality is great. Enjoy outdoor activities and open the windows.",
            AqiCategory::Moderate => {
                "Air quality is acceptable. Unusually sensitive people should limit prolonged exertion outdoors."
            }
            AqiCategory::UnhealthySensitive => {
                "Children, older adults and people with heart or lung disease should reduce outdoor exertion."
            }
            AqiCategory::Unhealthy => {
                "Everyone should reduce prolonged exertion. Keep windows closed and run an air purifier."
            }
            AqiCategory::VeryUnhealthy => {
                "Avoid outdoor activity. Stay indoors with filtered air and wear a mask if you must go out."
            }
            AqiCategory::Hazardous => {
                "Health warning of emergency conditions. Remain indoors and keep activity levels low."
            }
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AqiCategory {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AqiCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ParseError::UnknownCategory(s.to_string()))
    }
}

/// Map an air-quality index onto its severity category.
///
/// Breakpoints are inclusive upper bounds: 50, 100, 150, 200, 300.
///
/// Negative input and NaN are classified as [`AqiCategory::Good`]; positive
/// infinity is [`AqiCategory::Hazardous`].
///
/// ```
/// use aqi_types::{classify, AqiCategory};
///
/// assert_eq!(classify(50.0), AqiCategory::Good);
/// assert_eq!(classify(51.0), AqiCategory::Moderate);
/// assert_eq!(classify(301.0), AqiCategory::Hazardous);
/// ```
#[must_use]
pub fn classify(aqi: f64) -> AqiCategory {
    if aqi.is_nan() || aqi <= 50.0 {
        AqiCategory::Good
    } else if aqi <= 100.0 {
        AqiCategory::Moderate
    } else if aqi <= 150.0 {
        AqiCategory::UnhealthySensitive
    } else if aqi <= 200.0 {
        AqiCategory::Unhealthy
    } else if aqi <= 300.0 {
        AqiCategory::VeryUnhealthy
    } else {
        AqiCategory::Hazardous
    }
}

/// One normalized sensor sample.
///
/// The `aqi` value and its category are private: a `Reading` can only be
/// produced through [`ReadingBuilder`], which derives the category from the
/// index. `Reading` serializes (with `aqi_category` included) but does not
/// deserialize, so a category can never be taken from outside.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Reading {
    /// Identifier reported by the sensor node.
    pub device_id: String,
    /// When this reading was received (not the device clock).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// PM1.0 concentration in µg/m³.
    pub pm1_0: f64,
    /// PM2.5 concentration in µg/m³.
    pub pm2_5: f64,
    /// PM4.0 concentration in µg/m³.
    pub pm4_0: f64,
    /// PM10 concentration in µg/m³.
    pub pm10: f64,
    /// VOC index.
    pub voc_index: f64,
    /// NOx index.
    pub nox_index: f64,
    /// Temperature in °C.
    pub temperature: f64,
    /// Relative humidity in %.
    pub humidity: f64,
    aqi: f64,
    aqi_category: AqiCategory,
}

impl Reading {
    /// Start building a reading for the given device.
    pub fn builder(device_id: impl Into<String>) -> ReadingBuilder {
        ReadingBuilder::new(device_id)
    }

    /// Composite air-quality index.
    #[must_use]
    pub fn aqi(&self) -> f64 {
        self.aqi
    }

    /// Severity category derived from [`aqi`](Self::aqi).
    #[must_use]
    pub fn category(&self) -> AqiCategory {
        self.aqi_category
    }
}

/// Builder for [`Reading`].
///
/// Every measurement defaults to `0`.
#[derive(Debug, Clone)]
pub struct ReadingBuilder {
    device_id: String,
    pm1_0: f64,
    pm2_5: f64,
    pm4_0: f64,
    pm10: f64,
    voc_index: f64,
    nox_index: f64,
    temperature: f64,
    humidity: f64,
    aqi: f64,
}

impl ReadingBuilder {
    /// Create a builder with all measurements set to zero.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            pm1_0: 0.0,
            pm2_5: 0.0,
            pm4_0: 0.0,
            pm10: 0.0,
            voc_index: 0.0,
            nox_index: 0.0,
            temperature: 0.0,
            humidity: 0.0,
            aqi: 0.0,
        }
    }

    #[must_use]
    pub fn pm1_0(mut self, value: f64) -> Self {
        self.pm1_0 = value;
        self
    }

    #[must_use]
    pub fn pm2_5(mut self, value: f64) -> Self {
        self.pm2_5 = value;
        self
    }

    #[must_use]
    pub fn pm4_0(mut self, value: f64) -> Self {
        self.pm4_0 = value;
        self
    }

    #[must_use]
    pub fn pm10(mut self, value: f64) -> Self {
        self.pm10 = value;
        self
    }

    #[must_use]
    pub fn voc_index(mut self, value: f64) -> Self {
        self.voc_index = value;
        self
    }

    #[must_use]
    pub fn nox_index(mut self, value: f64) -> Self {
        self.nox_index = value;
        self
    }

    #[must_use]
    pub fn temperature(mut self, value: f64) -> Self {
        self.temperature = value;
        self
    }

    #[must_use]
    pub fn humidity(mut self, value: f64) -> Self {
        self.humidity = value;
        self
    }

    #[must_use]
    pub fn aqi(mut self, value: f64) -> Self {
        self.aqi = value;
        self
    }

    /// Finish the reading, stamping it with `timestamp`.
    #[must_use]
    pub fn build(self, timestamp: OffsetDateTime) -> Reading {
        Reading {
            device_id: self.device_id,
            timestamp,
            pm1_0: self.pm1_0,
            pm2_5: self.pm2_5,
            pm4_0: self.pm4_0,
            pm10: self.pm10,
            voc_index: self.voc_index,
            nox_index: self.nox_index,
            temperature: self.temperature,
            humidity: self.humidity,
            aqi: self.aqi,
            aqi_category: classify(self.aqi),
        }
    }
}
