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

/// Marks a sent order as confirmed by the supplier.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ConfirmOrderCommand {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmOrderResult {
    pub id: Uuid,
    pub status: OrderStatus,
}

#[async_trait]
impl Command for ConfirmOrderCommand {
    type Result = ConfirmOrderResult;

    #[instrument(skip(self, orders, event_sender))]
    async fn execute(
        &self,
        orders: Arc<dyn OrderStore>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let order = orders.get_order(self.order_id).await?;
        status_transition::validate(&order, OrderStatus::Confirmed).into_result()?;

        orders
            .update_order_status(self.order_id, OrderStatus::Confirmed)
            .await?;

        info!(order_id = %self.order_id, "Order confirmed");
        event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: self.order_id,
                old_status: order.status,
                new_status: OrderStatus::Confirmed,
            })
            .await;

        Ok(ConfirmOrderResult {
            id: self.order_id,
            status: OrderStatus::Confirmed,
        })
    }
}
