//! Boundary normalization for loosely-typed upstream order records.
//!
//! Upstream payloads carry the same concept under several field names (cost
//! price alone arrives as `unit_cost`, `cost_price`, or `buying_price`). All
//! synonym resolution lives here, in one adapter; business logic only ever
//! sees the canonical model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::purchase_order::{
    OrderStatus, PaymentStatus, PurchaseOrder, PurchaseOrderLine,
};

/// A raw order line as upstream systems send it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawOrderLine {
    pub id: Option<Uuid>,
    #[serde(alias = "productId")]
    pub product_id: Option<Uuid>,
    #[serde(alias = "variantId")]
    pub variant_id: Option<Uuid>,
    pub sku: Option<String>,

    // Ordered quantity synonyms.
    #[serde(alias = "orderedQuantity")]
    pub ordered_quantity: Option<i32>,
    pub quantity: Option<i32>,
    pub qty: Option<i32>,

    // Received quantity synonyms.
    #[serde(alias = "receivedQuantity")]
    pub received_quantity: Option<i32>,
    pub received: Option<i32>,

    // Cost price synonyms.
    #[serde(alias = "unitCost")]
    pub unit_cost: Option<Decimal>,
    #[serde(alias = "costPrice")]
    pub cost_price: Option<Decimal>,
    #[serde(alias = "buyingPrice")]
    pub buying_price: Option<Decimal>,
}

impl RawOrderLine {
    fn canonical_ordered(&self) -> i32 {
        self.ordered_quantity
            .or(self.quantity)
            .or(self.qty)
            .unwrap_or(0)
    }

    fn canonical_received(&self) -> i32 {
        self.received_quantity.or(self.received).unwrap_or(0)
    }

    fn canonical_unit_cost(&self) -> Decimal {
        self.unit_cost
            .or(self.cost_price)
            .or(self.buying_price)
            .unwrap_or(Decimal::ZERO)
    }
}

/// A raw order record as upstream systems send it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawOrderRecord {
    pub id: Option<Uuid>,
    #[serde(alias = "orderNumber", alias = "po_number")]
    pub order_number: Option<String>,
    #[serde(alias = "supplierId", alias = "vendor_id")]
    pub supplier_id: Option<Uuid>,
    pub currency: Option<String>,
    #[serde(alias = "exchangeRate", alias = "fx_rate")]
    pub exchange_rate: Option<Decimal>,
    pub status: Option<OrderStatus>,
    #[serde(alias = "paymentStatus")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(alias = "totalAmount", alias = "grand_total")]
    pub total_amount: Option<Decimal>,
    #[serde(alias = "totalPaid", alias = "paid_amount")]
    pub total_paid: Option<Decimal>,
    #[serde(alias = "items", alias = "line_items")]
    pub lines: Vec<RawOrderLine>,
    #[serde(alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RawOrderRecord {
    /// Normalizes this record into the canonical schema.
    ///
    /// Missing identifiers are an error; missing scalars fall back to
    /// conservative defaults (draft, unpaid, zero amounts).
    pub fn normalize(self) -> Result<PurchaseOrder, ServiceError> {
        let id = self
            .id
            .ok_or_else(|| ServiceError::ValidationError("order record has no id".to_string()))?;

        let supplier_id = self.supplier_id.ok_or_else(|| {
            ServiceError::ValidationError(format!("order {} has no supplier id", id))
        })?;

        let now = Utc::now();
        let lines = self
            .lines
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| {
                let line_id = raw.id.ok_or_else(|| {
                    ServiceError::ValidationError(format!("order {} line {} has no id", id, idx))
                })?;
                let product_id = raw.product_id.ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "order {} line {} has no product id",
                        id, idx
                    ))
                })?;
                let ordered = raw.canonical_ordered();
                if ordered < 0 {
                    return Err(ServiceError::ValidationError(format!(
                        "order {} line {} has negative ordered quantity {}",
                        id, idx, ordered
                    )));
                }
                let received = raw.canonical_received().clamp(0, ordered);
                Ok(PurchaseOrderLine {
                    id: line_id,
                    product_id,
                    variant_id: raw.variant_id,
                    sku: raw.sku.clone().unwrap_or_default(),
                    ordered_quantity: ordered,
                    received_quantity: received,
                    unit_cost: raw.canonical_unit_cost(),
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(PurchaseOrder {
            id,
            order_number: self.order_number.unwrap_or_else(|| id.to_string()),
            supplier_id,
            currency: self.currency.unwrap_or_else(|| "USD".to_string()),
            exchange_rate: self.exchange_rate,
            status: self.status.unwrap_or(OrderStatus::Draft),
            payment_status: self.payment_status.unwrap_or(PaymentStatus::Unpaid),
            total_amount: self.total_amount.unwrap_or(Decimal::ZERO),
            total_paid: self.total_paid.unwrap_or(Decimal::ZERO),
            lines,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn synonymous_cost_fields_resolve_in_precedence_order() {
        let raw = RawOrderLine {
            id: Some(Uuid::new_v4()),
            product_id: Some(Uuid::new_v4()),
            cost_price: Some(dec!(7.50)),
            buying_price: Some(dec!(9.99)),
            quantity: Some(4),
            ..Default::default()
        };
        // unit_cost absent: cost_price wins over buying_price.
        assert_eq!(raw.canonical_unit_cost(), dec!(7.50));
        assert_eq!(raw.canonical_ordered(), 4);
    }

    #[test]
    fn normalize_rejects_missing_ids() {
        let raw = RawOrderRecord {
            supplier_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(raw.normalize().is_err());
    }

    #[test]
    fn normalize_parses_loose_json_payloads() {
        let order_id = Uuid::new_v4();
        let supplier_id = Uuid::new_v4();
        let line_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        let payload = serde_json::json!({
            "id": order_id,
            "orderNumber": "PO-1001",
            "vendor_id": supplier_id,
            "currency": "EUR",
            "fx_rate": "1.08",
            "status": "sent",
            "paymentStatus": "partial",
            "grand_total": "250.00",
            "items": [{
                "id": line_id,
                "productId": product_id,
                "qty": 5,
                "buyingPrice": "50.00"
            }]
        });

        let raw: RawOrderRecord = serde_json::from_value(payload).unwrap();
        let order = raw.normalize().unwrap();

        assert_eq!(order.order_number, "PO-1001");
        assert_eq!(order.supplier_id, supplier_id);
        assert_eq!(order.status, OrderStatus::Sent);
        assert_eq!(order.payment_status, PaymentStatus::Partial);
        assert_eq!(order.exchange_rate, Some(dec!(1.08)));
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].ordered_quantity, 5);
        assert_eq!(order.lines[0].unit_cost, dec!(50.00));
        assert_eq!(order.lines[0].received_quantity, 0);
    }

    #[test]
    fn received_is_clamped_into_ordered_range() {
        let raw = RawOrderRecord {
            id: Some(Uuid::new_v4()),
            supplier_id: Some(Uuid::new_v4()),
            lines: vec![RawOrderLine {
                id: Some(Uuid::new_v4()),
                product_id: Some(Uuid::new_v4()),
                quantity: Some(3),
                received: Some(10),
                ..Default::default()
            }],
            ..Default::default()
        };
        let order = raw.normalize().unwrap();
        assert_eq!(order.lines[0].received_quantity, 3);
    }
}
