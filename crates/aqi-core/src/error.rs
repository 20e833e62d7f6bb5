//! Error types for aqi-core.
//!
//! Connection managers never return these to their callers for connectivity
//! problems: every failure is turned into an
//! [`AcquisitionState`](crate::state::AcquisitionState) update. The types
//! here are used at the seams (transport, fetcher, config validation) and
//! to produce the user-facing error strings. Settings storage has its own
//! [`SettingsError`](crate::settings::SettingsError).
//!
//! # Error Classification
//!
//! | Error Type | Marks source offline | Notes |
//! |------------|----------------------|-------|
//! | [`Error::InvalidConfig`] | no | Connection is not attempted |
//! | [`Error::ConnectTimeout`] | yes | No broker acknowledgement in time |
//! | [`Error::Transport`] | yes | Refused, reset, TLS failure |
//! | [`Error::Network`] | yes | DNS or connection failure while polling |
//! | [`Error::RequestTimeout`] | yes | Poll request exceeded its timeout |
//! | [`Error::Http`] | no | Server reachable but answered non-2xx |
//! | [`Error::Parse`] | no | Logged and dropped, never surfaced |

use std::time::Duration;

use thiserror::Error;

use aqi_types::ParseError;

/// Errors that can occur while acquiring sensor data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connection configuration is empty or unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport did not report a connection before the deadline.
    #[error("Connection timed out - Check your broker settings")]
    ConnectTimeout(Duration),

    /// Underlying transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network-level failure (DNS, connection refused, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("Server returned {status}")]
    Http {
        /// HTTP status code.
        status: u16,
    },

    /// A poll request did not complete in time.
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// Payload could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Whether this failure means the data source is unreachable.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::ConnectTimeout(_)
                | Error::Transport(_)
                | Error::Network(_)
                | Error::RequestTimeout(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Error::Network(err.to_string())
        } else if let Some(status) = err.status() {
            Error::Http {
                status: status.as_u16(),
            }
        } else {
            Error::Transport(err.to_string())
        }
    }
}

/// Result type alias using aqi-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
