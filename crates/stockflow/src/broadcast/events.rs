//! Event recording and live streaming.
//!
//! Every audit event is persisted to the event log and simultaneously
//! broadcast to in-process subscribers (GUI, CLI, SSE bridges). The
//! broadcast channel is lossy by design: a slow subscriber never blocks
//! a worker.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::db::{event_repo, Database};
use crate::model::EventLog;

/// Broadcasts event log entries for streaming.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<EventLog>>,
}

impl EventBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers.
    pub fn send(&self, event: EventLog) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventLog> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Persists events to the audit log and mirrors them onto the broadcast
/// channel. Shared by both schedulers.
///
/// Recording is best-effort from the caller's point of view: an audit
/// write failure is logged, never propagated, so bookkeeping problems
/// cannot abort pipeline work.
#[derive(Clone)]
pub struct EventRecorder {
    db: Database,
    broadcaster: EventBroadcaster,
}

impl EventRecorder {
    pub fn new(db: Database, broadcaster: EventBroadcaster) -> Self {
        Self { db, broadcaster }
    }

    /// Appends the event to the persistent log and broadcasts it.
    pub fn record(&self, event: EventLog) {
        if let Err(e) = event_repo::insert(&self.db, &event) {
            log::error!(
                "Failed to persist event for batch {}: {}",
                event.batch_id,
                e
            );
        }
        self.broadcaster.send(event);
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }
}
