//! Per-session event bus: bounded ring plus live fan-out.
//!
//! Publishing assigns the next sequence number under the bus lock, appends
//! to the ring (evicting the oldest event when full), and broadcasts to
//! every live subscriber. Broadcast never blocks: a subscriber whose
//! channel is full is flagged lagged and dropped from the live set; it can
//! resubscribe with an offset and catch up from the ring.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::debug;

use oubliette_core::constants::{EVENT_RING_CAPACITY, SUBSCRIBER_CHANNEL_CAPACITY};
use oubliette_core::events::{StreamEvent, StreamEventKind};
use oubliette_core::SessionId;

/// A live or caught-up view onto one session's events.
#[derive(Debug)]
pub struct Subscription {
    /// Session this subscription follows.
    pub session_id: SessionId,
    /// True when the requested offset was below the oldest event still in
    /// the ring: events were lost to eviction.
    pub events_lost: bool,
    /// Buffered events at or after the requested offset, in order.
    pub backlog: Vec<StreamEvent>,
    /// Live events published after this subscription was taken. Closes when
    /// the session detaches or the subscriber lags out.
    pub receiver: mpsc::Receiver<StreamEvent>,
    lagged: Arc<AtomicBool>,
}

impl Subscription {
    /// Whether this subscriber was dropped for falling behind.
    #[must_use]
    pub fn is_lagged(&self) -> bool {
        self.lagged.load(Ordering::SeqCst)
    }
}

struct LiveSubscriber {
    tx: mpsc::Sender<StreamEvent>,
    lagged: Arc<AtomicBool>,
}

struct BusInner {
    ring: VecDeque<StreamEvent>,
    next_seq: u64,
    subscribers: Vec<LiveSubscriber>,
    closed: bool,
}

/// The bus itself; one per session, shared by the pump and all readers.
pub struct SessionBus {
    session_id: SessionId,
    capacity: usize,
    inner: Mutex<BusInner>,
    notify: Notify,
}

impl SessionBus {
    /// Create a bus with the default ring capacity.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self::with_capacity(session_id, EVENT_RING_CAPACITY)
    }

    /// Create a bus with an explicit ring capacity.
    #[must_use]
    pub fn with_capacity(session_id: SessionId, capacity: usize) -> Self {
        Self {
            session_id,
            capacity,
            inner: Mutex::new(BusInner {
                ring: VecDeque::with_capacity(capacity.min(64)),
                next_seq: 0,
                subscribers: Vec::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Sequence the event, append it to the ring, and fan out. Returns the
    /// sequenced event.
    pub fn publish(&self, kind: StreamEventKind, raw: Value) -> StreamEvent {
        let event = {
            let mut inner = self.inner.lock();
            let event = StreamEvent {
                session_id: self.session_id.clone(),
                seq: inner.next_seq,
                timestamp: Utc::now(),
                kind,
                raw,
            };
            inner.next_seq += 1;
            if inner.ring.len() == self.capacity {
                let _ = inner.ring.pop_front();
            }
            inner.ring.push_back(event.clone());

            inner.subscribers.retain(|sub| match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.lagged.store(true, Ordering::SeqCst);
                    debug!(session = %event.session_id, "subscriber lagged, dropping");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
            event
        };
        self.notify.notify_waiters();
        event
    }

    /// Subscribe from an offset with the default channel capacity.
    #[must_use]
    pub fn subscribe(&self, from_seq: u64) -> Subscription {
        self.subscribe_with_capacity(from_seq, SUBSCRIBER_CHANNEL_CAPACITY)
    }

    /// Subscribe from an offset. Buffered events at or after `from_seq`
    /// are returned as backlog; later events arrive on the channel. Taking
    /// the snapshot and joining the live set happen under one lock, so no
    /// event is missed or duplicated between them.
    #[must_use]
    pub fn subscribe_with_capacity(&self, from_seq: u64, channel_capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let lagged = Arc::new(AtomicBool::new(false));

        let mut inner = self.inner.lock();
        let oldest_held = inner.next_seq - inner.ring.len() as u64;
        let events_lost = from_seq < oldest_held;
        let backlog: Vec<StreamEvent> = inner
            .ring
            .iter()
            .filter(|e| e.seq >= from_seq)
            .cloned()
            .collect();
        if !inner.closed {
            inner.subscribers.push(LiveSubscriber {
                tx,
                lagged: lagged.clone(),
            });
        }
        Subscription {
            session_id: self.session_id.clone(),
            events_lost,
            backlog,
            receiver: rx,
            lagged,
        }
    }

    /// Synchronous pull: events at or after `from_seq`, up to `max`. With
    /// `wait`, blocks up to `timeout` for the first new event.
    ///
    /// Returns the events and the offset to pull from next.
    pub async fn events_since(
        &self,
        from_seq: u64,
        max: usize,
        wait: bool,
        timeout: Duration,
    ) -> (Vec<StreamEvent>, u64) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            {
                let inner = self.inner.lock();
                let collected: Vec<StreamEvent> = inner
                    .ring
                    .iter()
                    .filter(|e| e.seq >= from_seq)
                    .take(max.max(1))
                    .cloned()
                    .collect();
                if !collected.is_empty() || !wait || inner.closed {
                    let next = collected.last().map_or(from_seq, |e| e.seq + 1);
                    return (collected, next);
                }
                // Register for wakeup before releasing the lock, so a
                // publish between unlock and await cannot be missed.
                notified.as_mut().enable();
            }
            if tokio::time::timeout_at(deadline, &mut notified).await.is_err() {
                return (Vec::new(), from_seq);
            }
        }
    }

    /// Sequence number the next event will get.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().next_seq
    }

    /// Close the live set: subscriber channels end, ring and sequence are
    /// kept for replay and a later [`reopen`].
    ///
    /// [`reopen`]: SessionBus::reopen
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Accept subscribers again after a resume.
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
