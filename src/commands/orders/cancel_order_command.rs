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

/// Cancels an order.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CancelOrderCommand {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelOrderResult {
    pub id: Uuid,
    pub status: OrderStatus,
}

#[async_trait]
impl Command for CancelOrderCommand {
    type Result = CancelOrderResult;

    #[instrument(skip(self, orders, event_sender))]
    async fn execute(
        &self,
        orders: Arc<dyn OrderStore>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let order = orders.get_order(self.order_id).await?;
        status_transition::validate(&order, OrderStatus::Cancelled).into_result()?;

        orders
            .update_order_status(self.order_id, OrderStatus::Cancelled)
            .await?;

        info!(
            order_id = %self.order_id,
            reason = self.reason.as_deref().unwrap_or("-"),
            "Order cancelled"
        );
        event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: self.order_id,
                old_status: order.status,
                new_status: OrderStatus::Cancelled,
            })
            .await;

        Ok(CancelOrderResult {
            id: self.order_id,
            status: OrderStatus::Cancelled,
        })
    }
}
