//! Platform-agnostic types for air-quality sensor readings.
//!
//! This crate provides the data model shared by the acquisition core and any
//! front end that displays its output.
//!
//! # Features
//!
//! - [`Reading`]: one normalized sample (particulates, gas indices,
//!   temperature, humidity, AQI)
//! - [`AqiCategory`] and [`classify`]: six-level severity scale
//! - [`normalize`]: tolerant mapping from sensor JSON to a [`Reading`]
//!
//! # Example
//!
//! ```
//! use aqi_types::{normalize, AqiCategory};
//!
//! let reading = normalize(br#"{"pm2_5": 12.0, "aqi": 62, "temp": 22.1}"#).unwrap();
//! assert_eq!(reading.category(), AqiCategory::Moderate);
//! assert_eq!(reading.temperature, 22.1);
//! ```

pub mod error;
pub mod payload;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use payload::{normalize, normalize_at, normalize_value};
pub use types::{AqiCategory, DEFAULT_DEVICE_ID, Reading, ReadingBuilder, classify};
