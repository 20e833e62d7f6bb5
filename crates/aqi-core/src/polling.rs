//! Polling (HTTP) connection manager.
//!
//! [`PollingManager`] fetches the sensor's latest reading immediately on
//! start and then on every tick of the poll interval. At most one request
//! is in flight: a tick that finds the previous request still running is
//! skipped, so a hung request always runs into its timeout. A manual
//! refresh cancels the outstanding request instead, and a cancelled
//! request never touches the state even if its response was already on
//! the way.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aqi_types::normalize;

use crate::config::{ConnectionConfig, PollingOptions, StaleDataPolicy};
use crate::error::Error;
use crate::events::{AcquisitionEvent, EventReceiver, SourceKind};
use crate::state::{AcquisitionState, AcquisitionStore, StateWriter};
use crate::traits::{DataSource, Fetcher};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Poller {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    writer: StateWriter,
    handle: JoinHandle<()>,
}

impl Poller {
    fn shutdown(self) {
        self.cancel.cancel();
        self.writer.update(|state| state.is_connected = false);
        self.handle.abort();
    }
}

#[derive(Default)]
struct Inner {
    config: Option<ConnectionConfig>,
    poller: Option<Poller>,
}

/// HTTP polling data source.
///
/// `start`, `stop` and `refresh` must be called from within a Tokio runtime.
pub struct PollingManager<F> {
    fetcher: Arc<F>,
    options: PollingOptions,
    store: AcquisitionStore,
    inner: Mutex<Inner>,
}

impl<F: Fetcher + 'static> PollingManager<F> {
    /// Create a manager with default options.
    pub fn new(fetcher: F) -> Self {
        Self::with_options(fetcher, PollingOptions::default())
    }

    pub fn with_options(fetcher: F, options: PollingOptions) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            options,
            store: AcquisitionStore::default(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn options(&self) -> &PollingOptions {
        &self.options
    }

    pub fn config(&self) -> Option<ConnectionConfig> {
        lock(&self.inner).config.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).poller.is_some()
    }
}

impl<F: Fetcher + 'static> DataSource for PollingManager<F> {
    fn kind(&self) -> SourceKind {
        SourceKind::Polling
    }

    fn start(&self, config: ConnectionConfig) {
        let mut inner = lock(&self.inner);
        if let Some(poller) = inner.poller.take() {
            debug!("Tearing down previous poller");
            poller.shutdown();
        }
        inner.config = Some(config.clone());

        let url = match self.options.validate().and_then(|()| config.poll_url()) {
            Ok(url) => url,
            Err(e) => {
                warn!("Not polling: {}", e);
                let writer = self.store.begin_epoch(AcquisitionState::failed(e.to_string()));
                writer.emit(AcquisitionEvent::Error {
                    source: SourceKind::Polling,
                    error: e.to_string(),
                });
                return;
            }
        };

        info!(%url, interval = ?self.options.poll_interval, "Starting poller");
        let writer = self.store.begin_epoch(AcquisitionState::polling());
        writer.emit(AcquisitionEvent::Connecting {
            source: SourceKind::Polling,
            target: url.clone(),
        });

        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());
        let task = PollTask {
            fetcher: Arc::clone(&self.fetcher),
            url,
            options: self.options.clone(),
            writer: writer.clone(),
            cancel: cancel.clone(),
            refresh: Arc::clone(&refresh),
        };
        let handle = tokio::spawn(task.run());

        inner.poller = Some(Poller {
            cancel,
            refresh,
            writer,
            handle,
        });
    }

    fn stop(&self) {
        let mut inner = lock(&self.inner);
        if let Some(poller) = inner.poller.take() {
            info!("Stopping poller");
            poller.shutdown();
            self.store.invalidate();
            self.store.emit(AcquisitionEvent::Stopped {
                source: SourceKind::Polling,
            });
        }
    }

    /// Fetch now without resetting the state.
    ///
    /// When stopped, restarts with the last config instead.
    fn refresh(&self) {
        let inner = lock(&self.inner);
        if let Some(poller) = &inner.poller {
            debug!("Manual refresh");
            poller.refresh.notify_one();
            return;
        }
        let Some(config) = inner.config.clone() else {
            info!("Refresh requested before any endpoint was configured");
            return;
        };
        drop(inner);
        self.start(config);
    }

    fn subscribe_state(&self) -> watch::Receiver<AcquisitionState> {
        self.store.subscribe()
    }

    fn subscribe_events(&self) -> EventReceiver {
        self.store.subscribe_events()
    }
}

impl<F> Drop for PollingManager<F> {
    fn drop(&mut self) {
        if let Some(poller) = lock(&self.inner).poller.take() {
            poller.shutdown();
        }
    }
}

struct PollTask<F> {
    fetcher: Arc<F>,
    url: String,
    options: PollingOptions,
    writer: StateWriter,
    cancel: CancellationToken,
    refresh: Arc<Notify>,
}

impl<F: Fetcher + 'static> PollTask<F> {
    async fn run(self) {
        // The first tick completes immediately.
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: Option<(CancellationToken, JoinHandle<()>)> = None;

        loop {
            let manual = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => false,
                _ = self.refresh.notified() => {
                    ticker.reset();
                    true
                }
            };

            if let Some((previous, handle)) = in_flight.take() {
                if !handle.is_finished() {
                    if !manual {
                        // Let a slow request run into its own timeout.
                        debug!("Previous poll still in flight, skipping tick");
                        in_flight = Some((previous, handle));
                        continue;
                    }
                    previous.cancel();
                }
            }
            let request = self.cancel.child_token();
            let handle = tokio::spawn(poll_once(
                Arc::clone(&self.fetcher),
                self.url.clone(),
                self.options.request_timeout,
                self.options.stale_data,
                self.writer.clone(),
                request.clone(),
            ));
            in_flight = Some((request, handle));
        }

        debug!("Poller stopped");
    }
}

async fn poll_once<F: Fetcher>(
    fetcher: Arc<F>,
    url: String,
    timeout: Duration,
    policy: StaleDataPolicy,
    writer: StateWriter,
    request: CancellationToken,
) {
    let fetched = tokio::select! {
        _ = request.cancelled() => {
            debug!(%url, "Poll request superseded");
            return;
        }
        fetched = tokio::time::timeout(timeout, fetcher.fetch(&url)) => {
            fetched.unwrap_or(Err(Error::RequestTimeout(timeout)))
        }
    };

    let reading = fetched.and_then(|body| normalize(&body).map_err(Error::from));
    match reading {
        Ok(reading) => {
            let received_at = reading.timestamp;
            let accepted = reading.clone();
            let applied = writer.update_if(
                |_| !request.is_cancelled(),
                move |state| state.apply_reading(accepted, received_at),
            );
            if applied {
                writer.emit(AcquisitionEvent::Reading {
                    source: SourceKind::Polling,
                    reading,
                });
            } else {
                debug!("Discarding superseded poll response");
            }
        }
        Err(Error::Parse(e)) => {
            warn!(%url, "Dropping unparseable response: {}", e);
        }
        Err(e) => {
            warn!(%url, "Poll failed: {}", e);
            let offline = e.is_network();
            let message = e.to_string();
            let applied = writer.update_if(
                |_| !request.is_cancelled(),
                |state| {
                    if policy == StaleDataPolicy::Clear {
                        state.clear_reading();
                    }
                    state.loading = false;
                    state.error = Some(message.clone());
                    state.is_offline = offline;
                },
            );
            if applied {
                writer.emit(AcquisitionEvent::Error {
                    source: SourceKind::Polling,
                    error: message,
                });
            }
        }
    }
}
