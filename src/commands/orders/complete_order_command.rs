use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    commands::Command,
    errors::ServiceError,
    events::{Event, EventSender},
    gateways::OrderStore,
    models::OrderStatus,
    services::status_transition,
};

/// Closes out a received, fully paid order.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CompleteOrderCommand {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteOrderResult {
    pub id: Uuid,
    pub status: OrderStatus,
}

#[async_trait]
impl Command for CompleteOrderCommand {
    type Result = CompleteOrderResult;

    #[instrument(skip(self, orders, event_sender))]
    async fn execute(
        &self,
        orders: Arc<dyn OrderStore>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        // Validation runs against the order as loaded now, not a stale view.
        let order = orders.get_order(self.order_id).await?;
        status_transition::validate(&order, OrderStatus::Completed).into_result()?;

        orders
            .update_order_status(self.order_id, OrderStatus::Completed)
            .await?;

        info!(order_id = %self.order_id, "Order completed");
        event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: self.order_id,
                old_status: order.status,
                new_status: OrderStatus::Completed,
            })
            .await;

        Ok(CompleteOrderResult {
            id: self.order_id,
            status: OrderStatus::Completed,
        })
    }
}
