//! Status-transition validation for purchase orders.
//!
//! This is a validator, not a full transition table: it rejects illegal
//! *target* states given the current status and payment status. Transitions
//! driven by the receive workflow (`partial_received`/`received` as a physical
//! outcome) do not pass through here; explicit status requests do, and callers
//! re-run validation at the moment of commit to avoid acting on stale state.

use tracing::debug;

use crate::errors::ServiceError;
use crate::models::{OrderStatus, PaymentStatus, PurchaseOrder};

/// Allow/deny decision with a human-readable reason on denial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl TransitionDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }

    /// Converts a denial into a `ValidationError` carrying the reason.
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.allowed {
            Ok(())
        } else {
            Err(ServiceError::ValidationError(
                self.reason
                    .unwrap_or_else(|| "transition denied".to_string()),
            ))
        }
    }
}

/// Validates a requested status against the order's current state.
///
/// Rules are evaluated in precedence order; the first failing rule wins.
/// Pure function, no side effects.
pub fn validate(order: &PurchaseOrder, requested: OrderStatus) -> TransitionDecision {
    let decision = evaluate(order.status, order.payment_status, requested);
    if let Some(reason) = &decision.reason {
        debug!(
            order_id = %order.id,
            current = %order.status,
            requested = %requested,
            reason,
            "Status transition denied"
        );
    }
    decision
}

fn evaluate(
    status: OrderStatus,
    payment_status: PaymentStatus,
    requested: OrderStatus,
) -> TransitionDecision {
    match requested {
        OrderStatus::Completed => {
            if status != OrderStatus::Received {
                return TransitionDecision::deny("Order must be received before completing.");
            }
            if payment_status != PaymentStatus::Paid {
                return TransitionDecision::deny("Order must be fully paid before completing.");
            }
            TransitionDecision::allow()
        }
        // Full receipt requires at least a partial payment. Partial receipt
        // has no payment gate: unpaid orders may still receive partially.
        OrderStatus::Received => {
            if payment_status == PaymentStatus::Unpaid {
                return TransitionDecision::deny(
                    "Order must be paid before full receiving items.",
                );
            }
            TransitionDecision::allow()
        }
        OrderStatus::Shipped => {
            if !matches!(status, OrderStatus::Sent | OrderStatus::Confirmed) {
                return TransitionDecision::deny(
                    "Order must be sent or confirmed before shipping.",
                );
            }
            TransitionDecision::allow()
        }
        OrderStatus::Confirmed => {
            if status != OrderStatus::Sent {
                return TransitionDecision::deny("Only sent orders can be confirmed.");
            }
            TransitionDecision::allow()
        }
        _ => TransitionDecision::allow(),
    }
}
