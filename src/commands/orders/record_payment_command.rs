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
    models::PaymentStatus,
};

/// Records a payment against an order. Ledger mechanics live in the order
/// store; this command only gates the input and publishes the outcome, since
/// payment status is a precondition for receive/complete transitions.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RecordPaymentCommand {
    pub order_id: Uuid,
    pub amount: Decimal,
    #[validate(length(max = 500))]
    pub reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordPaymentResult {
    pub id: Uuid,
    pub total_paid: Decimal,
    pub payment_status: PaymentStatus,
}

#[async_trait]
impl Command for RecordPaymentCommand {
    type Result = RecordPaymentResult;

    #[instrument(skip(self, orders, event_sender))]
    async fn execute(
        &self,
        orders: Arc<dyn OrderStore>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if self.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Payment amount must be positive".to_string(),
            ));
        }

        let order = orders.record_payment(self.order_id, self.amount).await?;

        info!(
            order_id = %self.order_id,
            amount = %self.amount,
            total_paid = %order.total_paid,
            "Payment recorded"
        );
        event_sender
            .send_or_log(Event::PaymentRecorded {
                order_id: self.order_id,
                amount: self.amount,
                total_paid: order.total_paid,
                payment_status: order.payment_status,
            })
            .await;

        Ok(RecordPaymentResult {
            id: self.order_id,
            total_paid: order.total_paid,
            payment_status: order.payment_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::gateways::in_memory::InMemoryOrderStore;
    use crate::models::{OrderStatus, PurchaseOrder};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn unpaid_order(total_amount: Decimal) -> PurchaseOrder {
        let now = Utc::now();
        PurchaseOrder {
            id: Uuid::new_v4(),
            order_number: "PO-P-1".to_string(),
            supplier_id: Uuid::new_v4(),
            currency: "USD".to_string(),
            exchange_rate: None,
            status: OrderStatus::Sent,
            payment_status: PaymentStatus::Unpaid,
            total_amount,
            total_paid: Decimal::ZERO,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn payments_accumulate_to_paid() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = unpaid_order(dec!(100));
        let order_id = order.id;
        store.insert(order);

        let (sender, _rx) = events::channel(8);
        let sender = Arc::new(sender);

        let result = RecordPaymentCommand {
            order_id,
            amount: dec!(30),
            reference: None,
        }
        .execute(store.clone(), sender.clone())
        .await
        .unwrap();
        assert_eq!(result.payment_status, PaymentStatus::Partial);

        let result = RecordPaymentCommand {
            order_id,
            amount: dec!(70),
            reference: Some("wire-0042".to_string()),
        }
        .execute(store.clone(), sender)
        .await
        .unwrap();
        assert_eq!(result.payment_status, PaymentStatus::Paid);
        assert_eq!(result.total_paid, dec!(100));
    }

    #[tokio::test]
    async fn non_positive_amounts_are_rejected() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = unpaid_order(dec!(100));
        let order_id = order.id;
        store.insert(order);

        let (sender, _rx) = events::channel(8);
        let err = RecordPaymentCommand {
            order_id,
            amount: dec!(0),
            reference: None,
        }
        .execute(store, Arc::new(sender))
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }
}
