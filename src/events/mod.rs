use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{OrderStatus, PaymentStatus};

// Define the various events that can occur in the procurement core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderDeleted(Uuid),

    // Payment events (precondition inputs for transitions)
    PaymentRecorded {
        order_id: Uuid,
        amount: Decimal,
        total_paid: Decimal,
        payment_status: PaymentStatus,
    },
    PaymentReversed {
        order_id: Uuid,
        amount_reversed: Decimal,
    },

    // Receive workflow events
    ReceiptCommitted {
        order_id: Uuid,
        fully_received: bool,
        total_now_receiving: i64,
        total_ordered: i64,
        timestamp: DateTime<Utc>,
    },
    UnitPricingPropagated {
        line_id: Uuid,
        unit_count: usize,
        selling_price: Decimal,
    },
    QualityCheckCompleted {
        order_id: Uuid,
        approved_units: usize,
        rejected_units: usize,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is best-effort; it never fails the business operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Creates a bounded event channel and its sender handle.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Drains incoming events and logs them. Projections subscribe by consuming
// the receiver themselves instead of running this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            Event::ReceiptCommitted {
                order_id,
                fully_received,
                ..
            } => {
                info!(%order_id, fully_received, "Receipt committed");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (sender, mut rx) = channel(8);
        let order_id = Uuid::new_v4();
        sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: OrderStatus::Sent,
                new_status: OrderStatus::Confirmed,
            })
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            Event::OrderStatusChanged {
                order_id: got,
                new_status,
                ..
            } => {
                assert_eq!(got, order_id);
                assert_eq!(new_status, OrderStatus::Confirmed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_survives_a_closed_channel() {
        let (sender, rx) = channel(1);
        drop(rx);
        // Must not panic or error out.
        sender.send_or_log(Event::with_data("ping".to_string())).await;
    }
}
