//! Connection configuration and manager options.
//!
//! [`ConnectionConfig`] is the snapshot handed over by the settings
//! collaborator. It is deliberately loose (plain strings, as a user typed
//! them) and is turned into a concrete transport address by
//! [`ConnectionConfig::broker_target`] or [`ConnectionConfig::poll_url`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default MQTT broker host.
pub const DEFAULT_BROKER: &str = "broker.hivemq.com";
/// Default MQTT-over-websocket port.
pub const DEFAULT_PORT: &str = "8884";
/// Default topic the sensor node publishes to.
pub const DEFAULT_TOPIC: &str = "ashutosh/aqi/sen55";
/// Default HTTP path served by the sensor node.
pub const DEFAULT_POLL_PATH: &str = "/aqi";

/// Path suffix of the broker's websocket endpoint.
const WEBSOCKET_PATH: &str = "/mqtt";

/// Connection parameters for one data source.
///
/// For subscription mode `topic` is the MQTT topic; for polling mode it is
/// the HTTP path (empty means [`DEFAULT_POLL_PATH`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Broker host or sensor address, optionally with a scheme.
    pub endpoint: String,
    /// Port, kept as a string because that is how it is stored.
    #[serde(default)]
    pub port: Option<String>,
    /// MQTT topic or HTTP path.
    #[serde(default)]
    pub topic: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_BROKER.to_string(),
            port: Some(DEFAULT_PORT.to_string()),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Create a config without an explicit port.
    pub fn new(endpoint: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            port: None,
            topic: topic.into(),
        }
    }

    /// Set the port.
    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Validate the config for subscription mode.
    ///
    /// This checks:
    /// - the endpoint has a host once any scheme and path are removed
    /// - the port (if given) is a number 1-65535
    /// - the topic is not empty and has no wildcards
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let (host, embedded_port) = split_host(&self.endpoint);
        if host.is_empty() {
            errors.push(ValidationError::new("endpoint", "broker address cannot be empty"));
        }

        for (field, port) in [("port", self.port.as_deref()), ("endpoint", embedded_port)] {
            if let Some(port) = port.filter(|p| !p.trim().is_empty())
                && let Err(message) = parse_port(port)
            {
                errors.push(ValidationError::new(field, message));
            }
        }

        let topic = self.topic.trim();
        if topic.is_empty() {
            errors.push(ValidationError::new("topic", "topic cannot be empty"));
        } else if topic.contains(['#', '+']) {
            errors.push(ValidationError::new(
                "topic",
                format!("topic '{}' must not contain wildcards", topic),
            ));
        }

        errors
    }

    /// Resolve the websocket broker address for subscription mode.
    ///
    /// Any scheme (`mqtt://`, `wss://`, ...) and path the user typed are
    /// dropped, and the result is always `wss://{host}:{port}/mqtt`.
    pub fn broker_target(&self) -> Result<BrokerTarget> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(Error::InvalidConfig(format_validation_errors(&errors)));
        }

        let (host, embedded_port) = split_host(&self.endpoint);
        let port = self
            .port
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or(embedded_port)
            .unwrap_or(DEFAULT_PORT);
        let port = parse_port(port).map_err(Error::InvalidConfig)?;

        Ok(BrokerTarget {
            url: format!("wss://{}:{}{}", host, port, WEBSOCKET_PATH),
            host: host.to_string(),
            port,
            topic: self.topic.trim().to_string(),
        })
    }

    /// Resolve the HTTP URL for polling mode.
    ///
    /// `http://` is assumed when no scheme is given; `https://` is kept.
    pub fn poll_url(&self) -> Result<String> {
        let endpoint = self.endpoint.trim();
        let (scheme, rest) = match endpoint.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("https") => ("https", rest),
            Some((_, rest)) => ("http", rest),
            None => ("http", endpoint),
        };
        let authority = rest.split('/').next().unwrap_or_default();
        let (host, embedded_port) = split_authority(authority);
        if host.is_empty() {
            return Err(Error::invalid_config("endpoint: device address cannot be empty"));
        }

        let port = match self.port.as_deref().filter(|p| !p.trim().is_empty()).or(embedded_port) {
            Some(port) => Some(parse_port(port).map_err(Error::InvalidConfig)?),
            None => None,
        };

        let path = match self.topic.trim() {
            "" => DEFAULT_POLL_PATH.to_string(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{}", p),
        };

        Ok(match port {
            Some(port) => format!("{}://{}:{}{}", scheme, host, port, path),
            None => format!("{}://{}{}", scheme, host, path),
        })
    }
}

/// A resolved MQTT subscription target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTarget {
    /// Full websocket URL, e.g. `wss://broker.hivemq.com:8884/mqtt`.
    pub url: String,
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Topic to subscribe to.
    pub topic: String,
}

/// Strip a scheme prefix and any path, then split off an embedded port.
fn split_host(endpoint: &str) -> (&str, Option<&str>) {
    let trimmed = endpoint.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or_default();
    split_authority(authority)
}

/// Split `host[:port]`. Bracketed IPv6 hosts keep their brackets.
fn split_authority(authority: &str) -> (&str, Option<&str>) {
    if authority.starts_with('[')
        && let Some(end) = authority.find(']')
    {
        let (host, rest) = authority.split_at(end + 1);
        let port = match rest {
            "" => None,
            rest => Some(rest.strip_prefix(':').unwrap_or(rest)),
        };
        return (host, port);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    }
}

fn parse_port(port: &str) -> std::result::Result<u16, String> {
    match port.trim().parse::<u16>() {
        Ok(0) => Err("port cannot be 0".to_string()),
        Ok(port) => Ok(port),
        Err(_) => Err(format!("invalid port '{}': must be a number 1-65535", port)),
    }
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// What to do with the last reading when connectivity degrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleDataPolicy {
    /// Drop the reading so outdated values are never shown as live.
    #[default]
    Clear,
    /// Keep showing the last reading alongside the error.
    Preserve,
}

/// Options for the subscription (MQTT) strategy.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// How long to wait for the broker before reporting a timeout.
    pub connect_timeout: Duration,
    /// Fixed delay between automatic reconnect attempts.
    pub reconnect_period: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Reading retention on disconnect.
    pub stale_data: StaleDataPolicy,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_period: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
            stale_data: StaleDataPolicy::Clear,
        }
    }
}

impl SubscriptionOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect period.
    #[must_use]
    pub fn reconnect_period(mut self, period: Duration) -> Self {
        self.reconnect_period = period;
        self
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the stale data policy.
    #[must_use]
    pub fn stale_data(mut self, policy: StaleDataPolicy) -> Self {
        self.stale_data = policy;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::invalid_config("connect_timeout must be > 0"));
        }
        if self.reconnect_period.is_zero() {
            return Err(Error::invalid_config("reconnect_period must be > 0"));
        }
        if self.keep_alive < Duration::from_secs(1) {
            return Err(Error::invalid_config("keep_alive must be at least 1 second"));
        }
        Ok(())
    }
}

/// Options for the polling (HTTP) strategy.
#[derive(Debug, Clone)]
pub struct PollingOptions {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Reading retention on failure.
    pub stale_data: StaleDataPolicy,
}

impl Default for PollingOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            stale_data: StaleDataPolicy::Preserve,
        }
    }
}

impl PollingOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the stale data policy.
    #[must_use]
    pub fn stale_data(mut self, policy: StaleDataPolicy) -> Self {
        self.stale_data = policy;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be > 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::invalid_config("request_timeout must be > 0"));
        }
        Ok(())
    }
}
