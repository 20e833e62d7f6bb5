//! Readings as an async stream.
//!
//! [`ReadingStream`] forwards every accepted [`Reading`] from a data source's
//! event channel into a `futures::Stream`. It supports graceful shutdown via
//! [`ReadingStream::close`]; dropping the stream has the same effect.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use aqi_types::Reading;

use crate::events::{AcquisitionEvent, EventReceiver};
use crate::traits::DataSource;

/// Default number of readings buffered between the source and the consumer.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// A stream of readings from a data source.
pub struct ReadingStream {
    receiver: mpsc::Receiver<Reading>,
    handle: tokio::task::JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl ReadingStream {
    /// Forward readings from `events`.
    ///
    /// Spawns a background task; must be called from within a Tokio runtime.
    pub fn new(events: EventReceiver, buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut events = events;
            loop {
                let event = tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Reading stream cancelled");
                        break;
                    }
                    event = events.recv() => event,
                };

                match event {
                    Ok(AcquisitionEvent::Reading { reading, .. }) => {
                        if tx.send(reading).await.is_err() {
                            debug!("Stream receiver dropped, stopping");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Reading stream lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            receiver: rx,
            handle,
            cancel_token,
        }
    }

    /// Stop forwarding. Readings already buffered are discarded.
    pub fn close(self) {
        self.cancel_token.cancel();
    }

    /// Whether the forwarding task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for ReadingStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Stream for ReadingStream {
    type Item = Reading;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

/// Extension trait to turn a data source into a [`ReadingStream`].
///
/// # Example
///
/// ```ignore
/// use aqi_core::{DataSourceStreamExt, SubscriptionManager, MqttTransport};
/// use futures::StreamExt;
///
/// let manager = SubscriptionManager::new(MqttTransport::new());
/// let mut readings = manager.readings();
/// manager.start(config);
/// while let Some(reading) = readings.next().await {
///     println!("AQI {} ({})", reading.aqi(), reading.category());
/// }
/// ```
pub trait DataSourceStreamExt {
    /// Stream readings with the default buffer size.
    fn readings(&self) -> ReadingStream;
}

impl<D: DataSource + ?Sized> DataSourceStreamExt for D {
    fn readings(&self) -> ReadingStream {
        ReadingStream::new(self.subscribe_events(), DEFAULT_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDispatcher, SourceKind};
    use futures::StreamExt;
    use time::OffsetDateTime;

    fn reading(aqi: f64) -> Reading {
        Reading::builder("node").aqi(aqi).build(OffsetDateTime::UNIX_EPOCH)
    }

    #[tokio::test]
    async fn test_forwards_only_readings() {
        let dispatcher = EventDispatcher::new(8);
        let mut stream = ReadingStream::new(dispatcher.subscribe(), 4);

        dispatcher.send(AcquisitionEvent::Connected {
            source: SourceKind::Subscription,
        });
        dispatcher.send(AcquisitionEvent::Reading {
            source: SourceKind::Subscription,
            reading: reading(12.0),
        });

        let next = stream.next().await.unwrap();
        assert_eq!(next.aqi(), 12.0);
    }

    #[tokio::test]
    async fn test_ends_when_source_closes() {
        let dispatcher = EventDispatcher::new(8);
        let mut stream = ReadingStream::new(dispatcher.subscribe(), 4);
        drop(dispatcher);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_cancels() {
        let dispatcher = EventDispatcher::new(8);
        let stream = ReadingStream::new(dispatcher.subscribe(), 4);
        let token = stream.cancel_token.clone();
        assert!(!stream.is_cancelled());
        stream.close();
        assert!(token.is_cancelled());
    }
}
