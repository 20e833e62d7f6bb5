//! Error types for payload parsing in aqi-types.

use thiserror::Error;

/// Errors that can occur when normalizing an inbound sensor payload.
///
/// Only the payload as a whole can fail to parse. Individual fields that are
/// missing or of the wrong type fall back to their defaults instead.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is not valid JSON.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The payload is valid JSON but not an object.
    #[error("Payload is not a JSON object (got {0})")]
    NotAnObject(&'static str),

    /// A category key that is not one of the six known categories.
    #[error("Unknown AQI category: {0}")]
    UnknownCategory(String),
}

/// Result type alias using aqi-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
