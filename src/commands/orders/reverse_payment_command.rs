use async_trait::async_trait;
use rust_decimal::Decimal;
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
};

/// Reverses the most recent payment on an order.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReversePaymentCommand {
    pub order_id: Uuid,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReversePaymentResult {
    pub id: Uuid,
    pub amount_reversed: Decimal,
}

#[async_trait]
impl Command for ReversePaymentCommand {
    type Result = ReversePaymentResult;

    #[instrument(skip(self, orders, event_sender))]
    async fn execute(
        &self,
        orders: Arc<dyn OrderStore>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let amount_reversed = orders.reverse_latest_payment(self.order_id).await?;

        info!(
            order_id = %self.order_id,
            amount = %amount_reversed,
            "Latest payment reversed"
        );
        event_sender
            .send_or_log(Event::PaymentReversed {
                order_id: self.order_id,
                amount_reversed,
            })
            .await;

        Ok(ReversePaymentResult {
            id: self.order_id,
            amount_reversed,
        })
    }
}
