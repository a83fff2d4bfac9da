//! Import event types and EventBus
//!
//! Events leave the commit thread through a tokio broadcast channel. Emitting
//! never blocks: when nobody listens, or a slow receiver lags, events are
//! dropped for that receiver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published by the import pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// A rule effect asked for a notification about a committed object
    ///
    /// Triggers:
    /// - Notification delivery (message templates, SMS, email)
    NotificationRequested {
        /// Tracker type of the committed object ("ENROLLMENT" or "EVENT")
        tracker_type: String,
        /// UID of the committed object
        uid: String,
        /// Program the object belongs to
        program: Option<String>,
        /// Rule that produced the effect
        rule: String,
        /// Message template to render
        template: Option<String>,
        /// Delivery time for scheduled messages, None for immediate delivery
        scheduled_at: Option<DateTime<Utc>>,
        /// Username of the importing user
        username: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A bundle finished committing
    ImportCommitted {
        import_id: String,
        created: usize,
        updated: usize,
        deleted: usize,
        ignored: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for import events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before lagging receivers lose old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: ImportEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
