/*!
 * External collaborator seams for the procurement core.
 *
 * Order persistence, inventory commitment, the location picker, and the
 * quality gate are opaque collaborators behind async traits. In-memory
 * implementations live in [`in_memory`] for tests and local wiring.
 */

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{OrderStatus, PricingRecord, PurchaseOrder, StorageLocation, UnitRecord};

#[cfg(test)]
use mockall::automock;

pub mod in_memory;

pub use in_memory::{
    ApproveAllQualityGate, CancellingQualityGate, FixedLocationPicker, InMemoryInventoryGateway,
    InMemoryOrderStore, RejectingQualityGate,
};

/// Result of a finalize-receive call against the inventory boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiveOutcome {
    pub success: bool,
    pub new_status: OrderStatus,
    pub total_received: i64,
    pub total_ordered: i64,
}

/// Outcome of opening the storage location picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PickerOutcome {
    Selected(StorageLocation),
    Cancelled,
}

/// One unit handed to the quality gate for a pass/fail decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityUnit {
    pub line_id: Uuid,
    pub unit_index: usize,
    pub serial: Option<String>,
}

/// Decision returned by the quality gate. Approved units are addressed by
/// `(line_id, unit_index)` so unidentified units can still be gated.
#[derive(Clone, Debug, PartialEq)]
pub enum QualityOutcome {
    Completed { approved: Vec<(Uuid, usize)> },
    Cancelled,
}

/// Order persistence boundary.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_order(&self, order_id: Uuid) -> Result<PurchaseOrder, ServiceError>;

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<(), ServiceError>;

    /// Records a payment against the order and returns the updated order.
    /// Ledger mechanics (how payments are stored) belong to the collaborator.
    async fn record_payment(
        &self,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<PurchaseOrder, ServiceError>;

    /// Reverses the most recent payment and returns the amount reversed.
    async fn reverse_latest_payment(&self, order_id: Uuid) -> Result<Decimal, ServiceError>;

    async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError>;
}

/// Boundary the orchestrator calls to persist staged receipt data.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InventoryCommitGateway: Send + Sync {
    /// Pushes per-unit pricing and identifiers to the product catalog.
    async fn propagate_unit_pricing(
        &self,
        line_id: Uuid,
        units: &[UnitRecord],
        pricing: &PricingRecord,
    ) -> Result<(), ServiceError>;

    /// Commits received quantities to inventory.
    async fn finalize_receive(
        &self,
        order_id: Uuid,
        quantities_by_line: &[(Uuid, i32)],
        is_partial: bool,
        note: Option<String>,
    ) -> Result<ReceiveOutcome, ServiceError>;
}

/// Storage location picker collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocationPicker: Send + Sync {
    async fn open_picker(&self) -> Result<PickerOutcome, ServiceError>;
}

/// Quality gate collaborator; suspends the workflow until a decision exists.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QualityGate: Send + Sync {
    async fn run_quality_check(
        &self,
        order_id: Uuid,
        units: Vec<QualityUnit>,
    ) -> Result<QualityOutcome, ServiceError>;
}
