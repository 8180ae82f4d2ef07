use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    OfferReceived,
    PickupApproved,
    PickupRejected,
    PickupAssigned,
    AgentReleased,
    PickupInTransit,
    PickupCompleted,
    PickupCancelled,
    RewardIssued,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient_id: Uuid,
    pub event: EventKind,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

/// Best-effort fan-out over a broadcast channel. Delivery is
/// at-most-once per attempt: a recipient with no live subscription
/// simply misses the event, and the broker's expiry path is the only
/// recovery mechanism. `notify` never blocks and never fails.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn notify(&self, recipient_id: Uuid, event: EventKind, payload: serde_json::Value) {
        let _ = self.tx.send(Notification {
            recipient_id,
            event,
            payload,
            sent_at: Utc::now(),
        });
    }
}
