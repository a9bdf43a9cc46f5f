use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Purchase order status lifecycle.
///
/// Transitions into `Received`/`PartialReceived` are driven by the receive
/// workflow; every other transition goes through the status-transition
/// validator first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Sent,
    Confirmed,
    Shipped,
    PartialReceived,
    Received,
    Completed,
    Cancelled,
}

/// Payment state of an order, maintained by the payment ledger and read here
/// as a precondition input for status transitions.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
    Refunded,
}

/// A purchase order line. Owned exclusively by its order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: String,
    /// Fixed after creation.
    pub ordered_quantity: i32,
    /// Monotonically non-decreasing, never exceeds `ordered_quantity`.
    pub received_quantity: i32,
    /// In the order currency.
    pub unit_cost: Decimal,
}

impl PurchaseOrderLine {
    /// Units still outstanding on this line.
    pub fn remaining(&self) -> i32 {
        (self.ordered_quantity - self.received_quantity).max(0)
    }
}

/// Purchase order header plus its lines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub order_number: String,
    pub supplier_id: Uuid,
    /// ISO 4217 code of the currency the order was placed in.
    pub currency: String,
    /// Rate from the order currency to the base currency. `None` means no
    /// rate is known and conversion degrades to identity.
    pub exchange_rate: Option<Decimal>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub total_paid: Decimal,
    pub lines: Vec<PurchaseOrderLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    pub fn line(&self, line_id: Uuid) -> Option<&PurchaseOrderLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    /// True when every line with a positive ordered quantity is fully received.
    pub fn is_fully_received(&self) -> bool {
        self.lines
            .iter()
            .filter(|l| l.ordered_quantity > 0)
            .all(|l| l.received_quantity == l.ordered_quantity)
    }
}

/// Category of a shared order-level cost.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdditionalCostCategory {
    Shipping,
    Duty,
    ImportTax,
    Handling,
    Insurance,
    Transport,
    Packaging,
    Other,
}

/// A cost shared by the whole order (freight, duty, ...), owned at the
/// staging-session level and never attached to an individual line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdditionalCost {
    pub id: Uuid,
    pub category: AdditionalCostCategory,
    /// Applies to the entire order, not one line.
    pub amount: Decimal,
    pub description: String,
}

impl AdditionalCost {
    pub fn new(category: AdditionalCostCategory, amount: Decimal, description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            amount,
            description,
        }
    }
}

/// Storage location selected through the location picker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub room_id: Uuid,
    pub shelf_id: Uuid,
    pub label: String,
}

/// Warranty coverage computed for one received unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarrantyWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl WarrantyWindow {
    pub fn from_receipt(received_at: DateTime<Utc>, months: u32) -> Self {
        Self {
            starts_at: received_at,
            ends_at: received_at + chrono::Months::new(months),
        }
    }
}

/// Identifier and location data captured for one physical received unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub serial: Option<String>,
    /// Populated only when the identifier classifies as an IMEI.
    pub imei: Option<String>,
    pub location: Option<StorageLocation>,
    pub warranty: Option<WarrantyWindow>,
}

impl UnitRecord {
    /// Captures an identifier with auto-classification.
    ///
    /// The cleaned value (common separators stripped) is an IMEI when it is
    /// exactly 15 digits: both the serial and IMEI fields then carry the
    /// cleaned value. Anything else is an opaque serial and clears a
    /// previously-set IMEI. An empty input clears both fields.
    pub fn set_identifier(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            self.serial = None;
            self.imei = None;
            return;
        }

        let cleaned: String = trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '/' | '.'))
            .collect();

        if cleaned.len() == 15 && cleaned.chars().all(|c| c.is_ascii_digit()) {
            self.serial = Some(cleaned.clone());
            self.imei = Some(cleaned);
        } else {
            self.serial = Some(trimmed.to_string());
            self.imei = None;
        }
    }

    pub fn has_identifier(&self) -> bool {
        self.serial.is_some()
    }
}

/// Resizes a line's unit-record slots to `target`, preserving the prefix:
/// surplus slots are discarded, missing slots appended empty. Never resets
/// data in slots that survive.
pub fn resize_unit_slots(slots: &mut Vec<UnitRecord>, target: usize) {
    if slots.len() > target {
        slots.truncate(target);
    } else {
        slots.resize_with(target, UnitRecord::default);
    }
}

/// Per-line pricing derived by the cost-allocation engine. Ephemeral until
/// commit; all amounts are in the base currency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingRecord {
    pub line_id: Uuid,
    /// Unit cost converted to the base currency.
    pub unit_cost: Decimal,
    /// This line's per-unit share of the shared cost pool.
    pub allocated_additional_cost: Decimal,
    pub total_unit_cost: Decimal,
    pub selling_price: Decimal,
    pub markup_percent: Decimal,
    pub profit_per_unit: Decimal,
}

impl PricingRecord {
    pub fn new(line_id: Uuid, unit_cost: Decimal) -> Self {
        Self {
            line_id,
            unit_cost,
            allocated_additional_cost: Decimal::ZERO,
            total_unit_cost: unit_cost,
            selling_price: Decimal::ZERO,
            markup_percent: Decimal::ZERO,
            profit_per_unit: Decimal::ZERO,
        }
    }

    /// Rounds monetary fields to the given scale. Applied at commit/display
    /// time only; intermediate computation keeps full precision.
    pub fn rounded(&self, scale: u32) -> Self {
        Self {
            line_id: self.line_id,
            unit_cost: self.unit_cost.round_dp(scale),
            allocated_additional_cost: self.allocated_additional_cost.round_dp(scale),
            total_unit_cost: self.total_unit_cost.round_dp(scale),
            selling_price: self.selling_price.round_dp(scale),
            markup_percent: self.markup_percent.round_dp(scale),
            profit_per_unit: self.profit_per_unit.round_dp(scale),
        }
    }
}
