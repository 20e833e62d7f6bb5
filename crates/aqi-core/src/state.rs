//! Acquisition state shared with consumers.
//!
//! # Epochs
//!
//! Every `start` of a data source opens a new epoch. Background work
//! (transport callbacks, poll responses, timers) writes through a
//! [`StateWriter`] bound to the epoch it was started in. Once a newer epoch
//! begins, or the source is stopped, older writers become inert: their
//! updates are discarded even if they were already in flight.
//!
//! The epoch check happens inside the `watch` channel's write lock, so a
//! stale writer can never interleave with the reset performed by
//! [`AcquisitionStore::begin_epoch`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;

use aqi_types::Reading;

use crate::events::{AcquisitionEvent, EventDispatcher, EventReceiver};

/// Snapshot of what a data source currently knows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionState {
    /// Latest accepted reading.
    pub reading: Option<Reading>,
    /// True while waiting for the first reading of this attempt.
    pub loading: bool,
    /// User-facing error message.
    pub error: Option<String>,
    /// When `reading` was accepted.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
    /// The data source is unreachable.
    pub is_offline: bool,
    /// The transport is connected (always true while polling).
    pub is_connected: bool,
}

impl Default for AcquisitionState {
    fn default() -> Self {
        Self {
            reading: None,
            loading: true,
            error: None,
            last_updated: None,
            is_offline: false,
            is_connected: false,
        }
    }
}

impl AcquisitionState {
    /// State at the start of a subscription attempt.
    pub fn connecting() -> Self {
        Self::default()
    }

    /// State at the start of a polling session.
    pub fn polling() -> Self {
        Self {
            is_connected: true,
            ..Self::default()
        }
    }

    /// State for a source that will not connect.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            loading: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Accept a new reading.
    pub fn apply_reading(&mut self, reading: Reading, now: OffsetDateTime) {
        self.reading = Some(reading);
        self.loading = false;
        self.error = None;
        self.last_updated = Some(now);
        self.is_offline = false;
    }

    /// Drop the reading and its timestamp.
    pub fn clear_reading(&mut self) {
        self.reading = None;
        self.last_updated = None;
    }
}

#[derive(Debug)]
struct StoreInner {
    state_tx: watch::Sender<AcquisitionState>,
    epoch: AtomicU64,
    events: EventDispatcher,
}

/// Owner of the state channel and the current epoch.
#[derive(Debug, Clone)]
pub struct AcquisitionStore {
    inner: Arc<StoreInner>,
}

impl Default for AcquisitionStore {
    fn default() -> Self {
        Self::new(EventDispatcher::default())
    }
}

impl AcquisitionStore {
    pub fn new(events: EventDispatcher) -> Self {
        let (state_tx, _) = watch::channel(AcquisitionState::default());
        Self {
            inner: Arc::new(StoreInner {
                state_tx,
                epoch: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Start a new epoch and publish `initial`.
    ///
    /// All writers from earlier epochs are invalidated before `initial` is
    /// visible.
    pub fn begin_epoch(&self, initial: AcquisitionState) -> StateWriter {
        let mut epoch = 0;
        self.inner.state_tx.send_modify(|state| {
            epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            *state = initial;
        });
        StateWriter {
            inner: Arc::clone(&self.inner),
            epoch,
        }
    }

    /// Invalidate the current writer without touching the state.
    pub fn invalidate(&self) {
        self.inner.state_tx.send_if_modified(|_| {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            false
        });
    }

    /// Current epoch number.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Latest state.
    pub fn snapshot(&self) -> AcquisitionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AcquisitionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Send an event regardless of epoch.
    pub fn emit(&self, event: AcquisitionEvent) {
        self.inner.events.send(event);
    }
}

/// Epoch-bound handle for writing state.
#[derive(Debug, Clone)]
pub struct StateWriter {
    inner: Arc<StoreInner>,
    epoch: u64,
}

impl StateWriter {
    /// Epoch this writer belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this writer's epoch is still the current one.
    pub fn is_current(&self) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == self.epoch
    }

    /// Apply `f` to the state if this writer is still current.
    ///
    /// Returns `false` when the update was discarded. Subscribers are only
    /// notified when the state actually changed.
    pub fn update(&self, f: impl FnOnce(&mut AcquisitionState)) -> bool {
        self.update_if(|_| true, f)
    }

    /// Like [`update`](Self::update), with an extra guard evaluated under
    /// the same lock as the epoch check.
    pub fn update_if(
        &self,
        guard: impl FnOnce(&AcquisitionState) -> bool,
        f: impl FnOnce(&mut AcquisitionState),
    ) -> bool {
        let mut applied = false;
        self.inner.state_tx.send_if_modified(|state| {
            if !self.is_current() || !guard(state) {
                return false;
            }
            applied = true;
            let before = state.clone();
            f(state);
            *state != before
        });
        applied
    }

    /// Send an event if this writer is still current.
    pub fn emit(&self, event: AcquisitionEvent) -> bool {
        if self.is_current() {
            self.inner.events.send(event);
            true
        } else {
            false
        }
    }

    /// Latest state.
    pub fn snapshot(&self) -> AcquisitionState {
        self.inner.state_tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SourceKind;

    fn reading(aqi: f64) -> Reading {
        Reading::builder("node").aqi(aqi).build(OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn test_initial_states() {
        let state = AcquisitionState::connecting();
        assert!(state.loading);
        assert!(!state.is_connected);
        assert!(!state.is_offline);

        assert!(AcquisitionState::polling().is_connected);

        let failed = AcquisitionState::failed("bad");
        assert!(!failed.loading);
        assert_eq!(failed.error.as_deref(), Some("bad"));
    }

    #[test]
    fn test_apply_reading() {
        let mut state = AcquisitionState {
            error: Some("old".into()),
            is_offline: true,
            ..AcquisitionState::default()
        };
        let now = OffsetDateTime::UNIX_EPOCH;
        state.apply_reading(reading(10.0), now);

        assert!(!state.loading);
        assert!(state.error.is_none());
        assert!(!state.is_offline);
        assert_eq!(state.last_updated, Some(now));
        assert_eq!(state.reading.as_ref().map(Reading::aqi), Some(10.0));

        state.clear_reading();
        assert!(state.reading.is_none());
        assert!(state.last_updated.is_none());
    }

    #[test]
    fn test_begin_epoch_resets_state() {
        let store = AcquisitionStore::default();
        let first = store.begin_epoch(AcquisitionState::connecting());
        first.update(|s| s.apply_reading(reading(20.0), OffsetDateTime::UNIX_EPOCH));
        assert!(store.snapshot().reading.is_some());

        let second = store.begin_epoch(AcquisitionState::connecting());
        assert!(store.snapshot().reading.is_none());
        assert_eq!(second.epoch(), first.epoch() + 1);
    }

    #[test]
    fn test_stale_writer_is_ignored() {
        let store = AcquisitionStore::default();
        let stale = store.begin_epoch(AcquisitionState::connecting());
        let current = store.begin_epoch(AcquisitionState::connecting());

        assert!(!stale.is_current());
        assert!(!stale.update(|s| s.error = Some("late".into())));
        assert!(store.snapshot().error.is_none());

        assert!(current.update(|s| s.is_connected = true));
        assert!(store.snapshot().is_connected);
    }

    #[test]
    fn test_invalidate_keeps_state() {
        let store = AcquisitionStore::default();
        let writer = store.begin_epoch(AcquisitionState::polling());
        writer.update(|s| s.error = Some("Server returned 503".into()));

        store.invalidate();
        assert!(!writer.is_current());
        assert_eq!(store.snapshot().error.as_deref(), Some("Server returned 503"));
        assert!(!writer.update(|s| s.error = None));
    }

    #[test]
    fn test_update_if_guard() {
        let store = AcquisitionStore::default();
        let writer = store.begin_epoch(AcquisitionState::connecting());
        assert!(!writer.update_if(|s| s.is_connected, |s| s.loading = false));
        assert!(store.snapshot().loading);
    }

    #[tokio::test]
    async fn test_unchanged_update_does_not_notify() {
        let store = AcquisitionStore::default();
        let writer = store.begin_epoch(AcquisitionState::connecting());
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        assert!(writer.update(|s| s.loading = true));
        assert!(!rx.has_changed().unwrap());

        writer.update(|s| s.loading = false);
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_stale_writer_events_dropped() {
        let store = AcquisitionStore::default();
        let mut rx = store.subscribe_events();
        let stale = store.begin_epoch(AcquisitionState::connecting());
        store.invalidate();

        assert!(!stale.emit(AcquisitionEvent::Connected {
            source: SourceKind::Subscription,
        }));
        store.emit(AcquisitionEvent::Stopped {
            source: SourceKind::Subscription,
        });
        assert!(matches!(rx.recv().await.unwrap(), AcquisitionEvent::Stopped { .. }));
    }

    #[test]
    fn test_state_serialization() {
        let mut state = AcquisitionState::polling();
        state.apply_reading(reading(75.0), OffsetDateTime::UNIX_EPOCH);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_updated"], "1970-01-01T00:00:00Z");
        assert_eq!(json["reading"]["aqi_category"], "moderate");
        assert_eq!(json["is_connected"], true);
    }
}
