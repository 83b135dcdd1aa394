use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Events emitted by the coordinator services.
///
/// Events are strictly after-the-fact notifications: no coordinator ever
/// waits on a consumer, and a full channel only costs a log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartUpdated(Uuid),
    CartDeleted(Uuid),
    CartLocked(Uuid),

    // Order events
    OrderCreated(Uuid),
    OrderPlaced { order_id: Uuid, total: i64 },
    OrderDeleted(Uuid),

    // Catalog events
    ProductCreated(Uuid),
    CouponStored { code: String, product_id: Uuid },

    // User events
    UserCreated(Uuid),
}

/// Cloneable sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, failing if the channel is closed or full.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {e}"))
    }

    /// Sends an event and logs instead of failing. Services use this so
    /// that event delivery can never fail a user operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("event dropped: {e}");
        }
    }
}

/// Creates a connected sender/receiver pair with the given buffer size.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Embedding applications
/// that want to react to events run their own consumer instead.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "event");
    }
}
