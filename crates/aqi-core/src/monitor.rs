//! Settings-driven data source supervisor.
//!
//! [`AqiMonitor`] starts a [`DataSource`] with the current connection
//! settings and restarts it every time the settings change. The old
//! connection is always torn down before the new one is opened.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::events::EventReceiver;
use crate::state::AcquisitionState;
use crate::streaming::{DataSourceStreamExt, ReadingStream};
use crate::traits::DataSource;

/// Keeps a data source in step with the settings.
pub struct AqiMonitor {
    source: Arc<dyn DataSource>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AqiMonitor {
    /// Start `source` with the current value of `configs` and follow every
    /// later change.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(source: Arc<dyn DataSource>, mut configs: watch::Receiver<ConnectionConfig>) -> Self {
        let initial = configs.borrow_and_update().clone();
        info!(source = ?source.kind(), endpoint = %initial.endpoint, "Starting monitor");
        source.start(initial);

        let cancel = CancellationToken::new();
        let task_token = cancel.clone();
        let task_source = Arc::clone(&source);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    changed = configs.changed() => {
                        if changed.is_err() {
                            debug!("Settings dropped, keeping current connection");
                            break;
                        }
                        let config = configs.borrow_and_update().clone();
                        info!(endpoint = %config.endpoint, topic = %config.topic, "Settings changed, reconnecting");
                        task_source.start(config);
                    }
                }
            }
        });

        Self {
            source,
            cancel,
            handle,
        }
    }

    /// Receive every state change.
    pub fn state(&self) -> watch::Receiver<AcquisitionState> {
        self.source.subscribe_state()
    }

    /// Latest state.
    pub fn snapshot(&self) -> AcquisitionState {
        self.source.state()
    }

    pub fn events(&self) -> EventReceiver {
        self.source.subscribe_events()
    }

    pub fn readings(&self) -> ReadingStream {
        self.source.readings()
    }

    /// Reconnect or re-fetch with the current settings.
    pub fn refresh(&self) {
        self.source.refresh();
    }

    /// Stop following settings and stop the source.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.handle).await;
        self.source.stop();
        info!("Monitor stopped");
    }
}

impl Drop for AqiMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
