//! Session event stream
//!
//! Every session owns one [`EventSink`]. At most one consumer is attached at a
//! time; attaching a new consumer replaces the previous one. Events pushed while
//! no consumer is attached are dropped, never queued. Once the sink is closed
//! (on `dispose`) nothing is delivered again, even to a consumer attached later.

use crate::error::ErrorKind;
use crate::types::{MediaTracks, SessionId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Events pushed to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PlayerEvent {
    /// Source opened and ready to play
    #[serde(rename_all = "camelCase")]
    Initialized {
        key: String,
        /// Milliseconds, or `UNKNOWN_DURATION_MS`
        duration: i64,
        width: Option<u32>,
        height: Option<u32>,
        tracks: MediaTracks,
    },

    /// Stall episode started
    BufferingStart,

    /// Stall episode ended
    BufferingEnd,

    /// Buffered ranges changed, in milliseconds
    BufferingUpdate { ranges: Vec<(i64, i64)> },

    /// Reached end of stream without looping
    Completed,

    /// Seek confirmed by the engine
    Seek { position: i64 },

    /// Picture-in-picture entered or left
    PipStateChanged { active: bool },

    /// Source open is being retried
    Retry { attempt: u32 },

    /// Failure surfaced from an asynchronous operation
    Error { kind: ErrorKind, message: String },
}

impl PlayerEvent {
    /// Event name as seen by hosts
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Initialized { .. } => "initialized",
            PlayerEvent::BufferingStart => "bufferingStart",
            PlayerEvent::BufferingEnd => "bufferingEnd",
            PlayerEvent::BufferingUpdate { .. } => "bufferingUpdate",
            PlayerEvent::Completed => "completed",
            PlayerEvent::Seek { .. } => "seek",
            PlayerEvent::PipStateChanged { .. } => "pipStateChanged",
            PlayerEvent::Retry { .. } => "retry",
            PlayerEvent::Error { .. } => "error",
        }
    }
}

/// Event with delivery metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Session ID
    pub session_id: SessionId,
    /// Sequence number, strictly increasing per session
    pub sequence: u64,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// The event
    #[serde(flatten)]
    pub event: PlayerEvent,
}

struct SinkInner {
    consumer: Option<mpsc::UnboundedSender<EventRecord>>,
    sequence: u64,
    closed: bool,
}

/// Ordered, at-most-one-consumer event channel
pub struct EventSink {
    session_id: SessionId,
    inner: Mutex<SinkInner>,
}

impl EventSink {
    /// Create a sink with no consumer
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            inner: Mutex::new(SinkInner {
                consumer: None,
                sequence: 0,
                closed: false,
            }),
        }
    }

    /// Attach the consumer, replacing any previous one
    pub fn attach(&self) -> mpsc::UnboundedReceiver<EventRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.consumer = Some(tx);
        }
        rx
    }

    /// Detach the consumer; safe with none attached
    pub fn detach(&self) {
        self.inner.lock().consumer = None;
    }

    /// Check if a consumer is attached
    pub fn has_consumer(&self) -> bool {
        let inner = self.inner.lock();
        inner
            .consumer
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Stop delivering for good and drop the consumer
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.consumer = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Push an event; returns whether a consumer received it
    pub fn emit(&self, event: PlayerEvent) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        let Some(consumer) = inner.consumer.as_ref() else {
            debug!(event = event.name(), "No consumer attached, event dropped");
            return false;
        };

        let record = EventRecord {
            session_id: self.session_id,
            sequence: inner.sequence + 1,
            timestamp: Utc::now(),
            event,
        };

        if consumer.send(record).is_err() {
            // Receiver dropped without an explicit detach
            inner.consumer = None;
            return false;
        }
        inner.sequence += 1;
        true
    }
}
