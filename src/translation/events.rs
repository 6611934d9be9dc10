/*!
 * Progress and event bus.
 *
 * Events go out over a `tokio::sync::broadcast` channel. Publishing never
 * waits: each subscriber has its own bounded ring, and a subscriber that
 * falls behind loses its oldest events instead of slowing the run down.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::ErrorKind;
use crate::translation::report::{RunStatus, SegmentStatus};

/// Bumped whenever an event changes shape
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Default per-subscriber ring size
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    RunStarted {
        chapters: usize,
        provider_id: String,
        model: String,
    },
    ChapterStarted {
        chapter_id: String,
        ordinal: usize,
        segments: usize,
    },
    SegmentCompleted {
        chapter_id: String,
        segment_id: String,
        block_index: usize,
        status: SegmentStatus,
        retries: u32,
        duration_ms: u64,
    },
    GlossaryProposed {
        source_term: String,
        target_term: String,
    },
    GlossaryConflict {
        source_term: String,
        existing_target: String,
        proposed_target: String,
    },
    RetryScheduled {
        segment_id: String,
        attempt: u32,
        delay_ms: u64,
        reason: ErrorKind,
    },
    ProviderError {
        segment_id: String,
        kind: ErrorKind,
        message: String,
    },
    ChapterCompleted {
        chapter_id: String,
        ordinal: usize,
        flagged: usize,
    },
    RunCompleted {
        status: RunStatus,
        segments: usize,
        cache_hits: usize,
        flagged: usize,
    },
    RunFailed {
        errors: Vec<String>,
    },
}

impl EventKind {
    /// Event name as it appears in the `type` field
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RunStarted { .. } => "runStarted",
            EventKind::ChapterStarted { .. } => "chapterStarted",
            EventKind::SegmentCompleted { .. } => "segmentCompleted",
            EventKind::GlossaryProposed { .. } => "glossaryProposed",
            EventKind::GlossaryConflict { .. } => "glossaryConflict",
            EventKind::RetryScheduled { .. } => "retryScheduled",
            EventKind::ProviderError { .. } => "providerError",
            EventKind::ChapterCompleted { .. } => "chapterCompleted",
            EventKind::RunCompleted { .. } => "runCompleted",
            EventKind::RunFailed { .. } => "runFailed",
        }
    }
}

/// An event with its envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub schema_version: u32,
    pub run_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// One NDJSON line, without the newline
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"schemaVersion\":{},\"type\":\"serializationError\",\"message\":{:?}}}",
                EVENT_SCHEMA_VERSION,
                e.to_string()
            )
        })
    }
}

struct BusInner {
    sender: broadcast::Sender<Event>,
    sequence: AtomicU64,
    run_id: String,
}

/// Publishes events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("run_id", &self.inner.run_id)
            .field("subscribers", &self.inner.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(run_id: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                sender,
                sequence: AtomicU64::new(0),
                run_id: run_id.into(),
            }),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Publish without waiting; events with no subscriber are discarded
    pub fn publish(&self, kind: EventKind) {
        let event = Event {
            schema_version: EVENT_SCHEMA_VERSION,
            run_id: self.inner.run_id.clone(),
            sequence: self.inner.sequence.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.inner.sender.send(event);
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.inner.sender.subscribe(),
            dropped: 0,
        }
    }
}

/// Receiving end; lagging only costs the oldest events
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Event>,
    dropped: u64,
}

impl EventSubscriber {
    /// Next event, `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.dropped += n,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.dropped += n,
                Err(_) => return None,
            }
        }
    }

    /// Drain everything queued right now
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Events this subscriber lost by falling behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
