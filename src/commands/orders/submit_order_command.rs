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

/// Sends a draft order to the supplier.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct SubmitOrderCommand {
    pub order_id: Uuid,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitOrderResult {
    pub id: Uuid,
    pub status: OrderStatus,
}

#[async_trait]
impl Command for SubmitOrderCommand {
    type Result = SubmitOrderResult;

    #[instrument(skip(self, orders, event_sender))]
    async fn execute(
        &self,
        orders: Arc<dyn OrderStore>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let order = orders.get_order(self.order_id).await?;

        // Submission is the one transition reserved for drafts.
        if order.status != OrderStatus::Draft {
            return Err(ServiceError::PreconditionFailure(format!(
                "Order {} is not a draft",
                self.order_id
            )));
        }
        status_transition::validate(&order, OrderStatus::Sent).into_result()?;

        orders
            .update_order_status(self.order_id, OrderStatus::Sent)
            .await?;

        info!(order_id = %self.order_id, "Order submitted to supplier");
        event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: self.order_id,
                old_status: order.status,
                new_status: OrderStatus::Sent,
            })
            .await;

        Ok(SubmitOrderResult {
            id: self.order_id,
            status: OrderStatus::Sent,
        })
    }
}
