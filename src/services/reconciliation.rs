//! Post-commit fulfillment reconciliation.
//!
//! Decides whether an order is fully or partially received once a batch
//! commits, and produces the progress summary. The derived status does not
//! pass through the status-transition validator: physical receipt is the one
//! case where status is an outcome, not a request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{OrderStatus, PurchaseOrderLine};

/// Fulfillment progress for one order after applying a receiving batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentSummary {
    pub is_fully_received: bool,
    pub total_ordered: i64,
    pub total_already_received: i64,
    pub total_now_receiving: i64,
    pub remaining: i64,
    pub percent_complete: u8,
}

impl FulfillmentSummary {
    /// Status the order lands in once this batch commits.
    pub fn post_commit_status(&self) -> OrderStatus {
        if self.is_fully_received {
            OrderStatus::Received
        } else {
            OrderStatus::PartialReceived
        }
    }
}

/// Reconciles ordered/already-received/now-receiving quantities per line.
///
/// A line absent from the batch contributes zero to `total_now_receiving`.
/// `is_fully_received` holds only when every line with a positive ordered
/// quantity will have received exactly its ordered quantity.
pub fn reconcile(
    lines: &[PurchaseOrderLine],
    receiving_batch: &HashMap<Uuid, i32>,
) -> FulfillmentSummary {
    let mut total_ordered: i64 = 0;
    let mut total_already_received: i64 = 0;
    let mut total_now_receiving: i64 = 0;
    let mut is_fully_received = true;

    for line in lines {
        let now_receiving = receiving_batch.get(&line.id).copied().unwrap_or(0) as i64;
        let ordered = line.ordered_quantity as i64;
        let already = line.received_quantity as i64;

        total_ordered += ordered;
        total_already_received += already;
        total_now_receiving += now_receiving;

        if ordered > 0 && already + now_receiving != ordered {
            is_fully_received = false;
        }
    }

    let received_after = total_already_received + total_now_receiving;
    let percent_complete = if total_ordered > 0 {
        ((received_after as f64 / total_ordered as f64) * 100.0).round() as u8
    } else {
        100
    };

    FulfillmentSummary {
        is_fully_received,
        total_ordered,
        total_already_received,
        total_now_receiving,
        remaining: (total_ordered - received_after).max(0),
        percent_complete,
    }
}
