//! In-memory record store shared by the ingestion loop and the monitor.
//!
//! The store holds the latest position, the acceptance counter and a bounded
//! ring of recently accepted payloads. A single mutex guards all of it, so
//! every mutation and every snapshot is atomic with respect to the others.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::sample::{Location, Sample, SampleKind};

/// Default number of samples kept in the history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// The most recently accepted position fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CurrentPosition {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Meters.
    pub altitude: f64,
    /// Epoch milliseconds.
    pub timestamp_ms: i64,
}

impl From<&Location> for CurrentPosition {
    fn from(fix: &Location) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            timestamp_ms: fix.timestamp_ms,
        }
    }
}

/// One accepted sample as kept in the history ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Counter value assigned at acceptance.
    pub id: u64,
    /// Shape of the payload.
    pub kind: SampleKind,
    /// Server receive time.
    pub received_at: DateTime<Utc>,
    /// Client timestamp in epoch milliseconds, as normalized at decode.
    pub timestamp_ms: i64,
    /// The position fix, for location samples.
    pub fix: Option<Location>,
    /// The payload as received.
    pub payload: Value,
}

/// A consistent copy of the store taken under the lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Latest position.
    pub position: CurrentPosition,
    /// Accepted requests since startup or the last reset.
    pub counter: u64,
    /// History, oldest first.
    pub history: Vec<HistoryEntry>,
    /// Whether any client has sent a non-control request.
    pub client_connected: bool,
}

#[derive(Debug, Default)]
struct Inner {
    position: CurrentPosition,
    counter: u64,
    history: VecDeque<HistoryEntry>,
    client_connected: bool,
}

/// Bounded history, counter and latest position behind one lock.
#[derive(Debug)]
pub struct RecordStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RecordStore {
    /// Create an empty store keeping at most `capacity` history entries.
    ///
    /// A capacity of 0 is raised to 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                history: VecDeque::with_capacity(capacity),
                ..Inner::default()
            }),
        }
    }

    /// Maximum number of history entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Every critical section leaves `Inner` consistent, so a panic while
    // holding the lock cannot leave a half-applied mutation behind.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one accepted sample and return the id assigned to it.
    ///
    /// Increments the counter by exactly one, appends the payload to the
    /// history (evicting the oldest entry when full) and, for location
    /// samples, overwrites the current position.
    pub fn apply(&self, sample: &Sample) -> u64 {
        let received_at = Utc::now();
        let mut inner = self.lock();

        if let Some(fix) = sample.location() {
            inner.position = CurrentPosition::from(fix);
        }
        inner.counter += 1;
        let id = inner.counter;

        if inner.history.len() == self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(HistoryEntry {
            id,
            kind: sample.kind(),
            received_at,
            timestamp_ms: sample.timestamp_ms(),
            fix: sample.location().copied(),
            payload: sample.payload().clone(),
        });
        id
    }

    /// Flag that a client has sent something other than a control request.
    ///
    /// Returns `true` only for the first call.
    pub fn mark_client_connected(&self) -> bool {
        let mut inner = self.lock();
        !std::mem::replace(&mut inner.client_connected, true)
    }

    /// Take a consistent copy of the whole store.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            position: inner.position,
            counter: inner.counter,
            history: inner.history.iter().cloned().collect(),
            client_connected: inner.client_connected,
        }
    }

    /// Up to `limit` most recent entries, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.lock().history.iter().rev().take(limit).cloned().collect()
    }

    /// Current counter value.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.lock().counter
    }

    /// Latest accepted position.
    #[must_use]
    pub fn position(&self) -> CurrentPosition {
        self.lock().position
    }

    /// Reset the counter to 0 and empty the history.
    ///
    /// The current position is kept.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.counter = 0;
        inner.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn location(lat: f64, lon: f64) -> Sample {
        Sample::decode(format!(r#"{{"latitude": {lat}, "longitude": {lon}}}"#).as_bytes()).unwrap()
    }

    fn traffic(total: u64) -> Sample {
        Sample::decode(format!(r#"{{"traffic": {{"total_bytes": {total}}}}}"#).as_bytes()).unwrap()
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = RecordStore::default();
        let snapshot = store.snapshot();

        assert_eq!(store.capacity(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(snapshot.counter, 0);
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.position, CurrentPosition::default());
        assert!(!snapshot.client_connected);
    }

    #[test]
    fn test_apply_location_updates_position() {
        let store = RecordStore::default();

        let id = store.apply(&location(1.5, 2.5));

        assert_eq!(id, 1);
        assert_eq!(
            store.position(),
            CurrentPosition {
                latitude: 1.5,
                longitude: 2.5,
                altitude: 0.0,
                timestamp_ms: 0,
            }
        );
    }

    #[test]
    fn test_apply_traffic_keeps_position() {
        let store = RecordStore::default();
        store.apply(&location(1.0, 2.0));

        let id = store.apply(&traffic(10));

        assert_eq!(id, 2);
        assert_eq!(store.position().latitude, 1.0);
        assert_eq!(store.snapshot().history[1].kind, SampleKind::Traffic);
    }

    #[test]
    fn test_history_entry_carries_decoded_fields() {
        let store = RecordStore::default();
        let sample = Sample::decode(
            br#"{"latitude": 1, "longitude": 2, "altitude": 30, "timestamp": null, "time": 1700000000}"#,
        )
        .unwrap();
        store.apply(&sample);
        store.apply(&traffic(10));

        let history = store.snapshot().history;
        assert_eq!(history[0].timestamp_ms, 1_700_000_000_000);
        assert_eq!(history[0].fix.map(|fix| fix.altitude), Some(30.0));
        assert_eq!(history[1].fix, None);
    }

    #[test]
    fn test_history_length_is_bounded() {
        let store = RecordStore::new(100);

        for i in 0..150u32 {
            store.apply(&location(f64::from(i), 0.0));
            let expected = usize::try_from(i + 1).unwrap().min(100);
            assert_eq!(store.snapshot().history.len(), expected);
        }
    }

    #[test]
    fn test_oldest_entry_evicted_first() {
        let store = RecordStore::new(100);

        for i in 0..101u32 {
            store.apply(&location(f64::from(i), 0.0));
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.counter, 101);
        assert_eq!(snapshot.history.len(), 100);
        assert_eq!(snapshot.history[0].id, 2);
        assert_eq!(snapshot.history[0].payload["latitude"], 1.0);
        assert_eq!(snapshot.history[99].id, 101);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let store = RecordStore::default();
        for i in 0..5u32 {
            store.apply(&location(f64::from(i), 0.0));
        }

        let recent = store.recent(3);
        let ids: Vec<u64> = recent.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(store.recent(50).len(), 5);
    }

    #[test]
    fn test_reset_keeps_position() {
        let store = RecordStore::default();
        store.apply(&location(3.0, 4.0));

        store.reset();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.counter, 0);
        assert!(snapshot.history.is_empty());
        assert_eq!(snapshot.position.latitude, 3.0);
        assert_eq!(store.apply(&location(5.0, 6.0)), 1);
    }

    #[test]
    fn test_mark_client_connected_is_one_shot() {
        let store = RecordStore::default();
        assert!(store.mark_client_connected());
        assert!(!store.mark_client_connected());
        assert!(store.snapshot().client_connected);

        store.reset();
        assert!(store.snapshot().client_connected);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let store = RecordStore::new(0);
        store.apply(&location(1.0, 1.0));
        store.apply(&location(2.0, 2.0));
        assert_eq!(store.capacity(), 1);
        assert_eq!(store.snapshot().history.len(), 1);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let store = Arc::new(RecordStore::new(10));
        let writer_store = Arc::clone(&store);

        let writer = thread::spawn(move || {
            for i in 0..500u32 {
                writer_store.apply(&location(f64::from(i), 0.0));
            }
        });

        for _ in 0..200 {
            let snapshot = store.snapshot();
            assert!(snapshot.history.len() <= 10);
            if let Some(last) = snapshot.history.last() {
                assert_eq!(last.id, snapshot.counter);
            }
        }

        writer.join().unwrap();
        assert_eq!(store.counter(), 500);
    }
}
