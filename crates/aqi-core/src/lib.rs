//! Data acquisition for remote air-quality sensors.
//!
//! This crate keeps a live view of a sensor's readings, delivered either by
//! an MQTT broker subscription or by polling the sensor over HTTP, and
//! exposes it as a single [`AcquisitionState`] snapshot.
//!
//! # Features
//!
//! - **Subscription mode**: MQTT over secure websockets with connect
//!   timeout and fixed-period automatic reconnect
//! - **Polling mode**: periodic HTTP fetch with at most one request in flight
//! - **Consistent state**: every write is bound to a connection epoch, so a
//!   torn-down connection can never overwrite a newer one
//! - **Settings**: persisted broker/port/topic with change notifications
//! - **Streaming**: readings as a `futures::Stream`
//!
//! # Strategies
//!
//! | Strategy | Transport | Stale data on failure |
//! |----------|-----------|-----------------------|
//! | [`SubscriptionManager`] | [`MqttTransport`] | cleared |
//! | [`PollingManager`] | [`HttpFetcher`] | kept |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use aqi_core::{AqiMonitor, FileStore, MqttTransport, Settings, SubscriptionManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Settings::new(FileStore::open_default());
//!     settings.load();
//!
//!     let source = Arc::new(SubscriptionManager::new(MqttTransport::new()));
//!     let monitor = AqiMonitor::spawn(source, settings.subscribe());
//!
//!     let mut state = monitor.state();
//!     while state.changed().await.is_ok() {
//!         let snapshot = state.borrow_and_update().clone();
//!         if let Some(reading) = snapshot.reading {
//!             println!("AQI {} ({})", reading.aqi(), reading.category());
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod freshness;
pub mod http;
pub mod mock;
pub mod monitor;
pub mod mqtt;
pub mod polling;
pub mod settings;
pub mod state;
pub mod streaming;
pub mod subscription;
pub mod traits;

pub use aqi_types::{AqiCategory, ParseError, Reading, classify, normalize};

pub use config::{
    BrokerTarget, ConnectionConfig, PollingOptions, StaleDataPolicy, SubscriptionOptions,
    ValidationError,
};
pub use error::{Error, Result};
pub use events::{AcquisitionEvent, DisconnectReason, EventDispatcher, EventReceiver, SourceKind};
pub use freshness::{UpdateAge, time_since_update};
pub use http::HttpFetcher;
pub use mock::{MockFetcher, MockReply, MockTransport};
pub use monitor::AqiMonitor;
pub use mqtt::MqttTransport;
pub use polling::PollingManager;
pub use settings::{FileStore, KeyValueStore, MemoryStore, Settings, SettingsError, SettingsField};
pub use state::{AcquisitionState, AcquisitionStore, StateWriter};
pub use streaming::{DataSourceStreamExt, ReadingStream};
pub use subscription::SubscriptionManager;
pub use traits::{DataSource, Fetcher, SessionControl, Transport, TransportEvent, TransportSession};
