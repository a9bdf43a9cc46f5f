//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use uuid::Uuid;

use procurement_core::config::AppConfig;
use procurement_core::events::{self, Event};
use procurement_core::gateways::in_memory::{
    ApproveAllQualityGate, FixedLocationPicker, InMemoryInventoryGateway, InMemoryOrderStore,
};
use procurement_core::gateways::{PickerOutcome, QualityGate};
use procurement_core::models::{
    OrderStatus, PaymentStatus, PurchaseOrder, PurchaseOrderLine, StorageLocation,
};
use procurement_core::services::ReceiveStagingOrchestrator;

pub struct TestHarness {
    pub store: Arc<InMemoryOrderStore>,
    pub inventory: Arc<InMemoryInventoryGateway>,
    pub orchestrator: ReceiveStagingOrchestrator,
    pub events: mpsc::Receiver<Event>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_quality_gate(Arc::new(ApproveAllQualityGate))
    }

    pub fn with_quality_gate(gate: Arc<dyn QualityGate>) -> Self {
        let store = Arc::new(InMemoryOrderStore::new());
        let inventory = Arc::new(InMemoryInventoryGateway::new(store.clone()));
        let (sender, events) = events::channel(64);

        let picker = Arc::new(FixedLocationPicker::new(PickerOutcome::Selected(
            StorageLocation {
                room_id: Uuid::new_v4(),
                shelf_id: Uuid::new_v4(),
                label: "A1-03".to_string(),
            },
        )));

        let orchestrator = ReceiveStagingOrchestrator::new(
            AppConfig::default(),
            store.clone(),
            inventory.clone(),
            picker,
            gate,
            Some(sender),
        );

        Self {
            store,
            inventory,
            orchestrator,
            events,
        }
    }

    /// Seeds an order and returns it. Lines are `(ordered, received, cost)`.
    pub fn seed_order(
        &self,
        status: OrderStatus,
        payment_status: PaymentStatus,
        lines: Vec<(i32, i32, Decimal)>,
    ) -> PurchaseOrder {
        let order = build_order(status, payment_status, lines);
        self.store.insert(order.clone());
        order
    }

    /// Drains any events delivered so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn build_order(
    status: OrderStatus,
    payment_status: PaymentStatus,
    lines: Vec<(i32, i32, Decimal)>,
) -> PurchaseOrder {
    let now = Utc::now();
    let total_amount: Decimal = lines
        .iter()
        .map(|(ordered, _, cost)| Decimal::from(*ordered) * *cost)
        .sum();
    PurchaseOrder {
        id: Uuid::new_v4(),
        order_number: format!("PO-{}", &Uuid::new_v4().to_string()[..8]),
        supplier_id: Uuid::new_v4(),
        currency: "USD".to_string(),
        exchange_rate: None,
        status,
        payment_status,
        total_amount,
        total_paid: Decimal::ZERO,
        lines: lines
            .into_iter()
            .enumerate()
            .map(|(i, (ordered, received, cost))| PurchaseOrderLine {
                id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                variant_id: None,
                sku: format!("SKU-{:03}", i),
                ordered_quantity: ordered,
                received_quantity: received,
                unit_cost: cost,
            })
            .collect(),
        created_at: now,
        updated_at: now,
    }
}
