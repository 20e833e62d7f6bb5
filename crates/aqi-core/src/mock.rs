//! Mock transport and fetcher for testing.
//!
//! These stand in for the MQTT broker and the sensor's HTTP endpoint so the
//! connection managers can be exercised without a network.
//!
//! # Features
//!
//! - **Scripted events**: push [`TransportEvent`]s into the latest (or any
//!   earlier) session
//! - **Session accounting**: count opened, closed and live sessions
//! - **Gated responses**: hold a fetch open until the test releases it

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::config::{BrokerTarget, SubscriptionOptions};
use crate::error::{Error, Result};
use crate::traits::{Fetcher, SessionControl, Transport, TransportEvent, TransportSession};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MockSession {
    events: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
    target: BrokerTarget,
}

#[derive(Default)]
struct TransportInner {
    sessions: Vec<MockSession>,
    subscriptions: Vec<String>,
    fail_open: bool,
    fail_subscribe: bool,
}

/// A scriptable in-memory [`Transport`].
///
/// Clones share state, so a test keeps one clone and hands another to the
/// manager.
///
/// # Example
///
/// ```
/// use aqi_core::{ConnectionConfig, DataSource, MockTransport, SubscriptionManager, TransportEvent};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     let manager = SubscriptionManager::new(transport.clone());
///     manager.start(ConnectionConfig::new("broker.test", "home/aqi"));
///     tokio::task::yield_now().await;
///
///     transport.push(TransportEvent::Connected).await;
///     transport.push_message("home/aqi", br#"{"aqi": 12}"#).await;
/// }
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<TransportInner>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("open_count", &self.open_count())
            .field("live_sessions", &self.live_sessions())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `open` fail.
    #[must_use]
    pub fn fail_open(self, fail: bool) -> Self {
        lock(&self.inner).fail_open = fail;
        self
    }

    /// Make every `subscribe` fail.
    #[must_use]
    pub fn fail_subscribe(self, fail: bool) -> Self {
        lock(&self.inner).fail_subscribe = fail;
        self
    }

    /// Number of sessions opened so far.
    pub fn open_count(&self) -> usize {
        lock(&self.inner).sessions.len()
    }

    /// Number of sessions not yet closed.
    pub fn live_sessions(&self) -> usize {
        lock(&self.inner)
            .sessions
            .iter()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .count()
    }

    /// Whether session `index` has been closed.
    pub fn is_closed(&self, index: usize) -> bool {
        lock(&self.inner)
            .sessions
            .get(index)
            .is_none_or(|s| s.closed.load(Ordering::SeqCst))
    }

    /// Target of the most recently opened session.
    pub fn last_target(&self) -> Option<BrokerTarget> {
        lock(&self.inner).sessions.last().map(|s| s.target.clone())
    }

    /// Every topic subscribed to, across all sessions.
    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner).subscriptions.clone()
    }

    /// Push an event into the most recent session.
    pub async fn push(&self, event: TransportEvent) {
        let index = self.open_count().saturating_sub(1);
        self.push_to(index, event).await;
    }

    /// Push an event into session `index`, closed or not.
    ///
    /// Events for sessions whose consumer has gone away are discarded.
    pub async fn push_to(&self, index: usize, event: TransportEvent) {
        let sender = lock(&self.inner).sessions.get(index).map(|s| s.events.clone());
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    /// Push a message into the most recent session.
    pub async fn push_message(&self, topic: &str, payload: &[u8]) {
        self.push(TransportEvent::Message {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
        })
        .await;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        target: &BrokerTarget,
        _options: &SubscriptionOptions,
    ) -> Result<TransportSession> {
        let mut inner = lock(&self.inner);
        if inner.fail_open {
            return Err(Error::transport("mock open failure"));
        }

        let (events_tx, events_rx) = mpsc::channel(32);
        let closed = Arc::new(AtomicBool::new(false));
        inner.sessions.push(MockSession {
            events: events_tx,
            closed: Arc::clone(&closed),
            target: target.clone(),
        });

        Ok(TransportSession {
            events: events_rx,
            control: Arc::new(MockControl {
                closed,
                inner: Arc::clone(&self.inner),
            }),
        })
    }
}

struct MockControl {
    closed: Arc<AtomicBool>,
    inner: Arc<Mutex<TransportInner>>,
}

#[async_trait]
impl SessionControl for MockControl {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut inner = lock(&self.inner);
        if inner.fail_subscribe {
            return Err(Error::transport("mock subscribe failure"));
        }
        inner.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A canned fetch outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 2xx with this body.
    Body(Bytes),
    /// Non-2xx status.
    Status(u16),
    /// Connection-level failure.
    Network(String),
    /// Never completes.
    Pending,
}

impl MockReply {
    /// 2xx with a JSON body.
    pub fn json(body: &str) -> Self {
        MockReply::Body(Bytes::copy_from_slice(body.as_bytes()))
    }
}

enum Scripted {
    Reply(MockReply),
    Gated(oneshot::Receiver<MockReply>),
}

struct FetcherInner {
    script: VecDeque<Scripted>,
    fallback: MockReply,
    urls: Vec<String>,
}

/// A scriptable [`Fetcher`].
///
/// Replies are consumed in order; once the script is exhausted every fetch
/// gets the fallback reply.
#[derive(Clone)]
pub struct MockFetcher {
    inner: Arc<Mutex<FetcherInner>>,
}

impl std::fmt::Debug for MockFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFetcher")
            .field("fetch_count", &self.fetch_count())
            .finish()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new(MockReply::Pending)
    }
}

impl MockFetcher {
    /// Create a fetcher that answers `fallback` when nothing is scripted.
    pub fn new(fallback: MockReply) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FetcherInner {
                script: VecDeque::new(),
                fallback,
                urls: Vec::new(),
            })),
        }
    }

    /// Queue a reply.
    pub fn push(&self, reply: MockReply) {
        lock(&self.inner).script.push_back(Scripted::Reply(reply));
    }

    /// Queue a reply that is held until the returned sender fires.
    ///
    /// Dropping the sender leaves the fetch pending forever.
    pub fn push_gated(&self) -> oneshot::Sender<MockReply> {
        let (tx, rx) = oneshot::channel();
        lock(&self.inner).script.push_back(Scripted::Gated(rx));
        tx
    }

    /// Replace the fallback reply.
    pub fn set_fallback(&self, reply: MockReply) {
        lock(&self.inner).fallback = reply;
    }

    /// Number of fetches issued.
    pub fn fetch_count(&self) -> usize {
        lock(&self.inner).urls.len()
    }

    /// URLs fetched, in order.
    pub fn urls(&self) -> Vec<String> {
        lock(&self.inner).urls.clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let next = {
            let mut inner = lock(&self.inner);
            inner.urls.push(url.to_string());
            match inner.script.pop_front() {
                Some(next) => next,
                None => Scripted::Reply(inner.fallback.clone()),
            }
        };

        let reply = match next {
            Scripted::Reply(reply) => reply,
            Scripted::Gated(rx) => rx.await.unwrap_or(MockReply::Pending),
        };

        match reply {
            MockReply::Body(body) => Ok(body),
            MockReply::Status(status) => Err(Error::Http { status }),
            MockReply::Network(message) => Err(Error::network(message)),
            MockReply::Pending => std::future::pending().await,
        }
    }
}
