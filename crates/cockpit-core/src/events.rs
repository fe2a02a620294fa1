//! Notification surface
//!
//! Broadcast-style publish/subscribe for the UI collaborator: one change
//! event per mutated field, plus trip, alert, link, power and update
//! notifications. Subscribers get their own mpsc receiver; a subscriber
//! that goes away is pruned on the next publish.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use crate::alerts::Alert;
use crate::power::PowerEvent;
use crate::trip::TripState;
use crate::update::UpdateEvent;
use crate::vehicle::Field;

/// One notification to the UI collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A vehicle field changed; read the new value from the snapshot
    /// accessor
    VehicleField(Field),
    /// Trip metrics after the latest tick
    Trip(TripState),
    /// The visible alert changed
    Alert {
        /// The alert now visible, or `None` when cleared/dismissed
        alert: Option<Alert>,
        /// Whether "any alert visible" flipped on this change
        visibility_changed: bool,
    },
    /// Link connectivity changed
    LinkConnected(bool),
    /// Power/ignition event
    Power(PowerEvent),
    /// Update service event
    Update(UpdateEvent),
}

/// Fan-out bus. Publishing never blocks: each subscriber has an unbounded
/// channel, and closed subscribers are dropped from the list.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Notification>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    /// Publish to all live subscribers, pruning dead ones.
    pub fn publish(&self, notification: Notification) {
        self.lock()
            .retain(|sub| sub.send(notification.clone()).is_ok());
    }

    /// Number of live subscribers (as of the last publish).
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Notification>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
