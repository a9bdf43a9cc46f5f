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
};

/// Deletes a draft order. Orders that have been sent are never deleted.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DeleteOrderCommand {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteOrderResult {
    pub id: Uuid,
}

#[async_trait]
impl Command for DeleteOrderCommand {
    type Result = DeleteOrderResult;

    #[instrument(skip(self, orders, event_sender))]
    async fn execute(
        &self,
        orders: Arc<dyn OrderStore>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let order = orders.get_order(self.order_id).await?;
        if order.status != OrderStatus::Draft {
            return Err(ServiceError::PreconditionFailure(format!(
                "Order {} has been sent and can no longer be deleted",
                self.order_id
            )));
        }

        orders.delete_order(self.order_id).await?;

        info!(order_id = %self.order_id, "Draft order deleted");
        event_sender.send_or_log(Event::OrderDeleted(self.order_id)).await;

        Ok(DeleteOrderResult { id: self.order_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::gateways::in_memory::InMemoryOrderStore;
    use crate::models::{PaymentStatus, PurchaseOrder};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn order_in(status: OrderStatus) -> PurchaseOrder {
        let now = Utc::now();
        PurchaseOrder {
            id: Uuid::new_v4(),
            order_number: "PO-D-1".to_string(),
            supplier_id: Uuid::new_v4(),
            currency: "USD".to_string(),
            exchange_rate: None,
            status,
            payment_status: PaymentStatus::Unpaid,
            total_amount: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            lines: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn drafts_can_be_deleted() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = order_in(OrderStatus::Draft);
        let order_id = order.id;
        store.insert(order);

        let (sender, _rx) = events::channel(8);
        DeleteOrderCommand { order_id }
            .execute(store.clone(), Arc::new(sender))
            .await
            .unwrap();

        assert!(store.get_order(order_id).await.is_err());
    }

    #[tokio::test]
    async fn sent_orders_are_never_deleted() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = order_in(OrderStatus::Sent);
        let order_id = order.id;
        store.insert(order);

        let (sender, _rx) = events::channel(8);
        let err = DeleteOrderCommand { order_id }
            .execute(store.clone(), Arc::new(sender))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailure(_)));
        assert!(store.get_order(order_id).await.is_ok());
    }
}
