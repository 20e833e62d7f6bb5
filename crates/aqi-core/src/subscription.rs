//! Subscription (MQTT) connection manager.
//!
//! [`SubscriptionManager`] keeps at most one transport session alive. Each
//! [`start`](DataSource::start) tears the previous session down, opens a
//! new epoch in the [`AcquisitionStore`] and spawns one driver task that
//! owns the session, the connect-timeout timer and the message handling.
//!
//! ```text
//!  start ──► connecting ──Connected──► subscribed ──Message──► live
//!               │  ▲                         │
//!     timeout   │  └──────Reconnecting───────┤
//!               ▼                            ▼
//!            timed out                  Error / Offline
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aqi_types::normalize;

use crate::config::{BrokerTarget, ConnectionConfig, StaleDataPolicy, SubscriptionOptions};
use crate::error::Error;
use crate::events::{AcquisitionEvent, DisconnectReason, EventReceiver, SourceKind};
use crate::state::{AcquisitionState, AcquisitionStore, StateWriter};
use crate::traits::{DataSource, SessionControl, Transport, TransportEvent, TransportSession};

/// Shown when an established connection drops.
pub const DISCONNECTED_MESSAGE: &str = "Disconnected from broker";

type SessionSlot = Arc<Mutex<Option<Arc<dyn SessionControl>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running driver task.
struct Driver {
    cancel: CancellationToken,
    session: SessionSlot,
    writer: StateWriter,
    handle: JoinHandle<()>,
}

impl Driver {
    /// Cancel the task and force the session closed.
    fn shutdown(self) {
        // Cancel before taking the slot: a driver that is still opening its
        // session checks the token under the same lock.
        self.cancel.cancel();
        if let Some(session) = lock(&self.session).take() {
            session.close();
        }
        self.writer.update(|state| state.is_connected = false);
        self.handle.abort();
    }
}

#[derive(Default)]
struct Inner {
    config: Option<ConnectionConfig>,
    driver: Option<Driver>,
}

/// MQTT subscription data source.
///
/// `start`, `stop` and `refresh` must be called from within a Tokio runtime.
pub struct SubscriptionManager<T> {
    transport: Arc<T>,
    options: SubscriptionOptions,
    store: AcquisitionStore,
    inner: Mutex<Inner>,
}

impl<T: Transport + 'static> SubscriptionManager<T> {
    /// Create a manager with default options.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, SubscriptionOptions::default())
    }

    pub fn with_options(transport: T, options: SubscriptionOptions) -> Self {
        Self {
            transport: Arc::new(transport),
            options,
            store: AcquisitionStore::default(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    /// The config of the current or most recent session.
    pub fn config(&self) -> Option<ConnectionConfig> {
        lock(&self.inner).config.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).driver.is_some()
    }
}

impl<T: Transport + 'static> DataSource for SubscriptionManager<T> {
    fn kind(&self) -> SourceKind {
        SourceKind::Subscription
    }

    fn start(&self, config: ConnectionConfig) {
        let mut inner = lock(&self.inner);
        if let Some(driver) = inner.driver.take() {
            debug!("Tearing down previous subscription");
            driver.shutdown();
        }
        inner.config = Some(config.clone());

        let target = match self
            .options
            .validate()
            .and_then(|()| config.broker_target())
        {
            Ok(target) => target,
            Err(e) => {
                warn!("Not connecting: {}", e);
                let writer = self.store.begin_epoch(AcquisitionState::failed(e.to_string()));
                writer.emit(AcquisitionEvent::Error {
                    source: SourceKind::Subscription,
                    error: e.to_string(),
                });
                return;
            }
        };

        info!(url = %target.url, topic = %target.topic, "Starting subscription");
        let writer = self.store.begin_epoch(AcquisitionState::connecting());
        writer.emit(AcquisitionEvent::Connecting {
            source: SourceKind::Subscription,
            target: target.url.clone(),
        });

        let cancel = CancellationToken::new();
        let session: SessionSlot = Arc::new(Mutex::new(None));
        let task = SubscriptionTask {
            transport: Arc::clone(&self.transport),
            options: self.options.clone(),
            deadline: Instant::now() + self.options.connect_timeout,
            target,
            writer: writer.clone(),
            cancel: cancel.clone(),
            session: Arc::clone(&session),
        };
        let handle = tokio::spawn(task.run());

        inner.driver = Some(Driver {
            cancel,
            session,
            writer,
            handle,
        });
    }

    fn stop(&self) {
        let mut inner = lock(&self.inner);
        if let Some(driver) = inner.driver.take() {
            info!("Stopping subscription");
            driver.shutdown();
            self.store.invalidate();
            self.store.emit(AcquisitionEvent::Stopped {
                source: SourceKind::Subscription,
            });
        }
    }

    fn refresh(&self) {
        let Some(config) = self.config() else {
            info!("Refresh requested before any connection was configured");
            return;
        };
        self.start(config);
    }

    fn subscribe_state(&self) -> watch::Receiver<AcquisitionState> {
        self.store.subscribe()
    }

    fn subscribe_events(&self) -> EventReceiver {
        self.store.subscribe_events()
    }
}

impl<T> Drop for SubscriptionManager<T> {
    fn drop(&mut self) {
        if let Some(driver) = lock(&self.inner).driver.take() {
            driver.shutdown();
        }
    }
}

/// State owned by one driver task.
struct SubscriptionTask<T> {
    transport: Arc<T>,
    options: SubscriptionOptions,
    deadline: Instant,
    target: BrokerTarget,
    writer: StateWriter,
    cancel: CancellationToken,
    session: SessionSlot,
}

impl<T: Transport> SubscriptionTask<T> {
    async fn run(self) {
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return,
            opened = self.transport.open(&self.target, &self.options) => opened,
        };

        let TransportSession {
            mut events,
            control,
        } = match opened {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to open transport: {}", e);
                self.on_error(e.to_string());
                return;
            }
        };

        {
            let mut slot = lock(&self.session);
            if self.cancel.is_cancelled() {
                control.close();
                return;
            }
            *slot = Some(Arc::clone(&control));
        }

        let timer = tokio::time::sleep_until(self.deadline);
        tokio::pin!(timer);
        let mut timer_armed = true;
        let mut connected = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = &mut timer, if timer_armed => {
                    timer_armed = false;
                    if !connected {
                        self.on_timeout();
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Transport event stream ended");
                        break;
                    };
                    if matches!(event, TransportEvent::Connected) {
                        timer_armed = false;
                    }
                    self.handle_event(event, &mut connected, control.as_ref()).await;
                }
            }
        }

        control.close();
    }

    async fn handle_event(
        &self,
        event: TransportEvent,
        connected: &mut bool,
        control: &dyn SessionControl,
    ) {
        match event {
            TransportEvent::Connected => {
                info!(url = %self.target.url, "Connected to broker");
                *connected = true;
                self.writer.update(|state| {
                    state.is_connected = true;
                    state.error = None;
                    state.is_offline = false;
                    state.loading = state.reading.is_none();
                });
                self.writer.emit(AcquisitionEvent::Connected {
                    source: SourceKind::Subscription,
                });
                self.subscribe(control).await;
            }
            TransportEvent::Message { topic, payload } => {
                if !*connected {
                    debug!(%topic, "Dropping message received while not connected");
                    return;
                }
                if topic != self.target.topic {
                    debug!(%topic, "Dropping message for unrelated topic");
                    return;
                }
                self.on_payload(&payload);
            }
            TransportEvent::Reconnecting => {
                info!("Reconnecting to broker");
                *connected = false;
                let policy = self.options.stale_data;
                self.writer.update(|state| {
                    if policy == StaleDataPolicy::Clear {
                        state.clear_reading();
                    }
                    state.loading = state.reading.is_none();
                    state.error = None;
                    state.is_offline = true;
                    state.is_connected = false;
                });
                self.writer.emit(AcquisitionEvent::Reconnecting {
                    source: SourceKind::Subscription,
                });
            }
            TransportEvent::Error(message) => {
                *connected = false;
                self.on_error(message);
            }
            TransportEvent::Offline => {
                warn!("Broker went offline");
                *connected = false;
                self.degrade(DISCONNECTED_MESSAGE.to_string());
                self.writer.emit(AcquisitionEvent::Disconnected {
                    source: SourceKind::Subscription,
                    reason: DisconnectReason::Offline,
                });
            }
            TransportEvent::Closed => {
                debug!("Transport closed");
                *connected = false;
                self.writer.update(|state| state.is_connected = false);
                self.writer.emit(AcquisitionEvent::Disconnected {
                    source: SourceKind::Subscription,
                    reason: DisconnectReason::Closed,
                });
            }
        }
    }

    async fn subscribe(&self, control: &dyn SessionControl) {
        let topic = &self.target.topic;
        match control.subscribe(topic).await {
            Ok(()) => info!(%topic, "Subscribed"),
            Err(e) => {
                warn!(%topic, "Subscribe failed: {}", e);
                let error = format!("Failed to subscribe to topic: {}", topic);
                self.writer.update(|state| state.error = Some(error.clone()));
                self.writer.emit(AcquisitionEvent::Error {
                    source: SourceKind::Subscription,
                    error,
                });
            }
        }
    }

    fn on_payload(&self, payload: &[u8]) {
        let reading = match normalize(payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Dropping unparseable payload: {}", e);
                return;
            }
        };
        debug!(aqi = reading.aqi(), category = %reading.category(), "Reading received");

        let received_at = reading.timestamp;
        let accepted = reading.clone();
        if self
            .writer
            .update(move |state| state.apply_reading(accepted, received_at))
        {
            self.writer.emit(AcquisitionEvent::Reading {
                source: SourceKind::Subscription,
                reading,
            });
        }
    }

    fn on_error(&self, message: String) {
        self.degrade(format!("Connection Error: {}", message));
        self.writer.emit(AcquisitionEvent::Disconnected {
            source: SourceKind::Subscription,
            reason: DisconnectReason::Error(message),
        });
    }

    fn on_timeout(&self) {
        warn!(timeout = ?self.options.connect_timeout, "Connection timed out");
        self.degrade(Error::ConnectTimeout(self.options.connect_timeout).to_string());
        self.writer.emit(AcquisitionEvent::Disconnected {
            source: SourceKind::Subscription,
            reason: DisconnectReason::Timeout,
        });
    }

    /// Shared transition for timeout, error and offline.
    fn degrade(&self, error: String) {
        let policy = self.options.stale_data;
        self.writer.update(|state| {
            if policy == StaleDataPolicy::Clear {
                state.clear_reading();
            }
            state.is_connected = false;
            state.loading = false;
            state.error = Some(error);
            state.is_offline = true;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::time::Duration;

    const PAYLOAD: &[u8] = br#"{"aqi": 42, "pm2_5": 9.5, "temp": 21.0}"#;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new("broker.test", "home/aqi")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_resets_state_and_opens_session() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());

        let state = manager.state();
        assert!(state.loading);
        assert!(!state.is_connected);
        assert!(state.error.is_none());
        settle().await;

        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.live_sessions(), 1);
        assert_eq!(
            transport.last_target().map(|t| t.url),
            Some("wss://broker.test:8884/mqtt".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_message() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;

        transport.push(TransportEvent::Connected).await;
        settle().await;
        let state = manager.state();
        assert!(state.is_connected);
        assert!(state.loading);
        assert_eq!(transport.subscriptions(), vec!["home/aqi".to_string()]);

        transport.push_message("home/aqi", PAYLOAD).await;
        settle().await;
        let state = manager.state();
        assert!(!state.loading);
        assert!(state.last_updated.is_some());
        assert_eq!(state.reading.map(|r| r.aqi()), Some(42.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());

        tokio::time::sleep(Duration::from_secs(11)).await;
        let state = manager.state();
        assert_eq!(
            state.error.as_deref(),
            Some("Connection timed out - Check your broker settings")
        );
        assert!(state.is_offline);
        assert!(!state.loading);
        assert!(!state.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_noop_once_connected() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;
        transport.push(TransportEvent::Connected).await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        let state = manager.state();
        assert!(state.error.is_none());
        assert!(state.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_before_connect_is_dropped() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;

        transport.push_message("home/aqi", PAYLOAD).await;
        settle().await;
        assert!(manager.state().reading.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_topic_is_dropped() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;
        transport.push(TransportEvent::Connected).await;
        transport.push_message("home/other", PAYLOAD).await;
        settle().await;
        assert!(manager.state().reading.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_and_offline_transitions() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;
        transport.push(TransportEvent::Connected).await;
        transport.push_message("home/aqi", PAYLOAD).await;
        settle().await;

        transport.push(TransportEvent::Error("refused".into())).await;
        settle().await;
        let state = manager.state();
        assert_eq!(state.error.as_deref(), Some("Connection Error: refused"));
        assert!(state.is_offline);
        assert!(!state.loading);
        assert!(state.reading.is_none());

        transport.push(TransportEvent::Offline).await;
        settle().await;
        assert_eq!(manager.state().error.as_deref(), Some(DISCONNECTED_MESSAGE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preserve_policy_keeps_reading() {
        let transport = MockTransport::new();
        let options = SubscriptionOptions::new().stale_data(StaleDataPolicy::Preserve);
        let manager = SubscriptionManager::with_options(transport.clone(), options);
        manager.start(config());
        settle().await;
        transport.push(TransportEvent::Connected).await;
        transport.push_message("home/aqi", PAYLOAD).await;
        settle().await;

        transport.push(TransportEvent::Reconnecting).await;
        settle().await;
        let state = manager.state();
        assert!(state.reading.is_some());
        assert!(!state.loading);
        assert!(state.is_offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure() {
        let transport = MockTransport::new().fail_subscribe(true);
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;
        transport.push(TransportEvent::Connected).await;
        settle().await;
        assert_eq!(
            manager.state().error.as_deref(),
            Some("Failed to subscribe to topic: home/aqi")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_marks_disconnected() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;
        transport.push(TransportEvent::Connected).await;
        transport.push(TransportEvent::Closed).await;
        settle().await;
        assert!(!manager.state().is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(config());
        settle().await;

        manager.stop();
        manager.stop();
        settle().await;
        assert_eq!(transport.live_sessions(), 0);
        assert!(!manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_does_not_connect() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.start(ConnectionConfig::new("", "home/aqi"));
        settle().await;

        let state = manager.state();
        assert!(!state.loading);
        assert!(state.error.unwrap().contains("broker address cannot be empty"));
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_without_config_is_noop() {
        let transport = MockTransport::new();
        let manager = SubscriptionManager::new(transport.clone());
        manager.refresh();
        settle().await;
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_session() {
        let transport = MockTransport::new();
        {
            let manager = SubscriptionManager::new(transport.clone());
            manager.start(config());
            settle().await;
            assert_eq!(transport.live_sessions(), 1);
        }
        assert_eq!(transport.live_sessions(), 0);
    }
}
