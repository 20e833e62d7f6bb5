//! Trait abstractions at the edges of the acquisition core.
//!
//! - [`DataSource`]: what a consumer drives (subscription or polling)
//! - [`Transport`] / [`SessionControl`]: a push-based message connection
//! - [`Fetcher`]: a single request/response fetch
//!
//! The managers only talk to the network through these traits, so tests can
//! swap in [`MockTransport`](crate::mock::MockTransport) and
//! [`MockFetcher`](crate::mock::MockFetcher).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::config::{BrokerTarget, ConnectionConfig, SubscriptionOptions};
use crate::error::Result;
use crate::events::{EventReceiver, SourceKind};
use crate::state::AcquisitionState;

/// A connection strategy that keeps [`AcquisitionState`] up to date.
///
/// None of these methods report connectivity failures to the caller; they
/// show up in the state instead.
///
/// # Example
///
/// ```ignore
/// use aqi_core::{ConnectionConfig, DataSource};
///
/// fn restart(source: &dyn DataSource, config: ConnectionConfig) {
///     source.start(config);
///     let state = source.state();
///     assert!(state.loading || state.error.is_some());
/// }
/// ```
pub trait DataSource: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> SourceKind;

    /// Tear down any previous connection and start a new one.
    fn start(&self, config: ConnectionConfig);

    /// Stop the connection. Safe to call repeatedly.
    fn stop(&self);

    /// Restart with the most recent config.
    fn refresh(&self);

    /// Receive every state change.
    fn subscribe_state(&self) -> watch::Receiver<AcquisitionState>;

    /// Receive acquisition events, including each accepted reading.
    fn subscribe_events(&self) -> EventReceiver;

    /// Latest state.
    fn state(&self) -> AcquisitionState {
        self.subscribe_state().borrow().clone()
    }
}

/// Notifications from a live transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Broker acknowledged the connection.
    Connected,
    /// An automatic reconnect attempt is starting.
    Reconnecting,
    /// A message arrived.
    Message { topic: String, payload: Bytes },
    /// Transport failure.
    Error(String),
    /// The connection to the broker was lost.
    Offline,
    /// The session is finished.
    Closed,
}

/// Control handle for a session.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Subscribe to `topic` with at-least-once delivery.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Close the session immediately. Safe to call repeatedly.
    fn close(&self);
}

/// An open transport session.
pub struct TransportSession {
    /// Event stream; ends once the session is closed.
    pub events: mpsc::Receiver<TransportEvent>,
    /// Control handle.
    pub control: Arc<dyn SessionControl>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession").finish_non_exhaustive()
    }
}

/// Factory for push-based sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session to `target`. Connection progress is reported through
    /// the returned event stream, not through this call.
    async fn open(
        &self,
        target: &BrokerTarget,
        options: &SubscriptionOptions,
    ) -> Result<TransportSession>;
}

/// A single request/response fetch.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` and return the body of a 2xx response.
    ///
    /// Non-2xx responses must be reported as [`Error::Http`](crate::Error::Http).
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}
