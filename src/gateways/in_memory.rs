//! In-memory collaborator implementations for tests and local wiring.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::gateways::{
    InventoryCommitGateway, LocationPicker, OrderStore, PickerOutcome, QualityGate, QualityOutcome,
    QualityUnit, ReceiveOutcome,
};
use crate::models::{OrderStatus, PaymentStatus, PricingRecord, PurchaseOrder, UnitRecord};

/// In-memory order store backed by a hash map and a per-order payment log.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: Mutex<HashMap<Uuid, PurchaseOrder>>,
    payments: Mutex<HashMap<Uuid, Vec<Decimal>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: PurchaseOrder) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    /// Applies received quantities to the stored order. Used by the
    /// in-memory inventory gateway when a receipt finalizes.
    pub fn apply_receipt(
        &self,
        order_id: Uuid,
        quantities_by_line: &[(Uuid, i32)],
    ) -> Result<PurchaseOrder, ServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        for (line_id, quantity) in quantities_by_line {
            let line = order
                .lines
                .iter_mut()
                .find(|l| l.id == *line_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Order line {} not found", line_id))
                })?;
            line.received_quantity =
                (line.received_quantity + quantity).min(line.ordered_quantity);
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_order(&self, order_id: Uuid) -> Result<PurchaseOrder, ServiceError> {
        self.orders
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), ServiceError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn record_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<PurchaseOrder, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "payment amount must be positive".to_string(),
            ));
        }

        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        order.total_paid += amount;
        order.payment_status = payment_status_for(order.total_paid, order.total_amount);
        order.updated_at = Utc::now();
        self.payments
            .lock()
            .unwrap()
            .entry(order_id)
            .or_default()
            .push(amount);
        Ok(order.clone())
    }

    async fn reverse_latest_payment(&self, order_id: Uuid) -> Result<Decimal, ServiceError> {
        let amount = self
            .payments
            .lock()
            .unwrap()
            .get_mut(&order_id)
            .and_then(|log| log.pop())
            .ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "Order {} has no payments to reverse",
                    order_id
                ))
            })?;

        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        order.total_paid -= amount;
        order.payment_status = payment_status_for(order.total_paid, order.total_amount);
        order.updated_at = Utc::now();
        Ok(amount)
    }

    async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        self.orders
            .lock()
            .unwrap()
            .remove(&order_id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }
}

fn payment_status_for(total_paid: Decimal, total_amount: Decimal) -> PaymentStatus {
    if total_paid <= Decimal::ZERO {
        PaymentStatus::Unpaid
    } else if total_paid < total_amount {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Paid
    }
}

/// Record of one finalized receipt, for test assertions.
#[derive(Clone, Debug)]
pub struct FinalizedReceipt {
    pub order_id: Uuid,
    pub quantities_by_line: Vec<(Uuid, i32)>,
    pub is_partial: bool,
    pub note: Option<String>,
}

/// In-memory inventory gateway. Applies receipts to the backing order store
/// and keeps a call log; failures can be injected per sub-step.
pub struct InMemoryInventoryGateway {
    store: Arc<InMemoryOrderStore>,
    propagated: Mutex<Vec<(Uuid, usize)>>,
    finalized: Mutex<Vec<FinalizedReceipt>>,
    fail_propagate: AtomicBool,
    fail_finalize: AtomicBool,
}

impl InMemoryInventoryGateway {
    pub fn new(store: Arc<InMemoryOrderStore>) -> Self {
        Self {
            store,
            propagated: Mutex::new(Vec::new()),
            finalized: Mutex::new(Vec::new()),
            fail_propagate: AtomicBool::new(false),
            fail_finalize: AtomicBool::new(false),
        }
    }

    pub fn fail_propagate(&self, fail: bool) {
        self.fail_propagate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_finalize(&self, fail: bool) {
        self.fail_finalize.store(fail, Ordering::SeqCst);
    }

    /// Line ids and unit counts of every successful pricing propagation.
    pub fn propagated(&self) -> Vec<(Uuid, usize)> {
        self.propagated.lock().unwrap().clone()
    }

    pub fn finalized(&self) -> Vec<FinalizedReceipt> {
        self.finalized.lock().unwrap().clone()
    }
}

#[async_trait]
impl InventoryCommitGateway for InMemoryInventoryGateway {
    async fn propagate_unit_pricing(
        &self,
        line_id: Uuid,
        units: &[UnitRecord],
        _pricing: &PricingRecord,
    ) -> Result<(), ServiceError> {
        if self.fail_propagate.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError(
                "injected pricing propagation failure".to_string(),
            ));
        }
        self.propagated.lock().unwrap().push((line_id, units.len()));
        Ok(())
    }

    async fn finalize_receive(
        &self,
        order_id: Uuid,
        quantities_by_line: &[(Uuid, i32)],
        is_partial: bool,
        note: Option<String>,
    ) -> Result<ReceiveOutcome, ServiceError> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError(
                "injected finalize failure".to_string(),
            ));
        }

        let order = self.store.apply_receipt(order_id, quantities_by_line)?;
        self.finalized.lock().unwrap().push(FinalizedReceipt {
            order_id,
            quantities_by_line: quantities_by_line.to_vec(),
            is_partial,
            note,
        });

        let total_ordered: i64 = order.lines.iter().map(|l| l.ordered_quantity as i64).sum();
        let total_received: i64 = order.lines.iter().map(|l| l.received_quantity as i64).sum();
        let new_status = if order.is_fully_received() {
            OrderStatus::Received
        } else {
            OrderStatus::PartialReceived
        };

        Ok(ReceiveOutcome {
            success: true,
            new_status,
            total_received,
            total_ordered,
        })
    }
}

/// Picker that always returns the same outcome.
pub struct FixedLocationPicker {
    outcome: PickerOutcome,
}

impl FixedLocationPicker {
    pub fn new(outcome: PickerOutcome) -> Self {
        Self { outcome }
    }
}

#[async_trait]
impl LocationPicker for FixedLocationPicker {
    async fn open_picker(&self) -> Result<PickerOutcome, ServiceError> {
        Ok(self.outcome.clone())
    }
}

/// Quality gate that approves every unit.
#[derive(Debug, Default)]
pub struct ApproveAllQualityGate;

#[async_trait]
impl QualityGate for ApproveAllQualityGate {
    async fn run_quality_check(
        &self,
        _order_id: Uuid,
        units: Vec<QualityUnit>,
    ) -> Result<QualityOutcome, ServiceError> {
        Ok(QualityOutcome::Completed {
            approved: units.iter().map(|u| (u.line_id, u.unit_index)).collect(),
        })
    }
}

/// Quality gate that rejects a fixed set of `(line_id, unit_index)` pairs.
pub struct RejectingQualityGate {
    rejected: Vec<(Uuid, usize)>,
}

impl RejectingQualityGate {
    pub fn new(rejected: Vec<(Uuid, usize)>) -> Self {
        Self { rejected }
    }
}

#[async_trait]
impl QualityGate for RejectingQualityGate {
    async fn run_quality_check(
        &self,
        _order_id: Uuid,
        units: Vec<QualityUnit>,
    ) -> Result<QualityOutcome, ServiceError> {
        Ok(QualityOutcome::Completed {
            approved: units
                .iter()
                .map(|u| (u.line_id, u.unit_index))
                .filter(|key| !self.rejected.contains(key))
                .collect(),
        })
    }
}

/// Quality gate whose operator always abandons the check.
#[derive(Debug, Default)]
pub struct CancellingQualityGate;

#[async_trait]
impl QualityGate for CancellingQualityGate {
    async fn run_quality_check(
        &self,
        _order_id: Uuid,
        _units: Vec<QualityUnit>,
    ) -> Result<QualityOutcome, ServiceError> {
        Ok(QualityOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PurchaseOrderLine;
    use rust_decimal_macros::dec;

    fn order_with_one_line(ordered: i32, total_amount: Decimal) -> PurchaseOrder {
        let now = Utc::now();
        PurchaseOrder {
            id: Uuid::new_v4(),
            order_number: "PO-T-1".to_string(),
            supplier_id: Uuid::new_v4(),
            currency: "USD".to_string(),
            exchange_rate: None,
            status: OrderStatus::Sent,
            payment_status: PaymentStatus::Unpaid,
            total_amount,
            total_paid: Decimal::ZERO,
            lines: vec![PurchaseOrderLine {
                id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                variant_id: None,
                sku: "SKU-T".to_string(),
                ordered_quantity: ordered,
                received_quantity: 0,
                unit_cost: dec!(10.00),
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn payments_drive_payment_status() {
        let store = InMemoryOrderStore::new();
        let order = order_with_one_line(5, dec!(100.00));
        let order_id = order.id;
        store.insert(order);

        let after_first = store.record_payment(order_id, dec!(40.00)).await.unwrap();
        assert_eq!(after_first.payment_status, PaymentStatus::Partial);

        let after_second = store.record_payment(order_id, dec!(60.00)).await.unwrap();
        assert_eq!(after_second.payment_status, PaymentStatus::Paid);

        let reversed = store.reverse_latest_payment(order_id).await.unwrap();
        assert_eq!(reversed, dec!(60.00));
        let order = store.get_order(order_id).await.unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Partial);
        assert_eq!(order.total_paid, dec!(40.00));
    }

    #[tokio::test]
    async fn reversing_with_no_payments_is_rejected() {
        let store = InMemoryOrderStore::new();
        let order = order_with_one_line(5, dec!(100.00));
        let order_id = order.id;
        store.insert(order);

        let err = store.reverse_latest_payment(order_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn finalize_receive_reports_partial_and_full() {
        let store = Arc::new(InMemoryOrderStore::new());
        let order = order_with_one_line(10, dec!(100.00));
        let order_id = order.id;
        let line_id = order.lines[0].id;
        store.insert(order);

        let gateway = InMemoryInventoryGateway::new(store.clone());

        let outcome = gateway
            .finalize_receive(order_id, &[(line_id, 4)], true, None)
            .await
            .unwrap();
        assert_eq!(outcome.new_status, OrderStatus::PartialReceived);
        assert_eq!(outcome.total_received, 4);

        let outcome = gateway
            .finalize_receive(order_id, &[(line_id, 6)], false, None)
            .await
            .unwrap();
        assert_eq!(outcome.new_status, OrderStatus::Received);
        assert_eq!(outcome.total_received, 10);
        assert_eq!(outcome.total_ordered, 10);
    }
}
