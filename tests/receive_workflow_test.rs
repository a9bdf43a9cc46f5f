//! End-to-end tests for the receive-staging pipeline.
//!
//! Tests cover the full journey:
//! - Full receive with identifiers, shared costs and pricing
//! - Partial receive across two sessions
//! - Skip-identifiers path
//! - Quality gating (approval, rejection, cancellation)
//! - Partial commit failure and sub-step retry
//! - Session lifecycle rules (single writer, cancel)

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use common::TestHarness;
use rust_decimal_macros::dec;

use procurement_core::errors::{CommitSubStep, ServiceError};
use procurement_core::events::Event;
use procurement_core::gateways::in_memory::{CancellingQualityGate, RejectingQualityGate};
use procurement_core::gateways::OrderStore;
use procurement_core::models::{AdditionalCostCategory, OrderStatus, PaymentStatus};
use procurement_core::services::{QualityGateResult, QuickAction, ReceiveMode, Stage};

#[tokio::test]
async fn full_receive_allocates_shared_costs_and_completes_the_order() {
    let mut harness = TestHarness::new();
    // Line A: ordered=10, nothing received. Line B: already fully received.
    let order = harness.seed_order(
        OrderStatus::Shipped,
        PaymentStatus::Paid,
        vec![(10, 0, dec!(50.00)), (5, 5, dec!(80.00))],
    );
    let line_a = order.lines[0].id;

    let orch = &harness.orchestrator;
    let view = orch.start_session(order.id, ReceiveMode::Full).await.unwrap();
    assert_eq!(view.lines[0].receiving_quantity, 10);
    assert_eq!(view.lines[1].receiving_quantity, 0);

    // Step 1: capture identifiers, one of them an IMEI.
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.set_unit_identifier(order.id, line_a, 0, "123456789012345")
        .await
        .unwrap();
    orch.set_unit_identifier(order.id, line_a, 1, "SN-00A1")
        .await
        .unwrap();
    let location = orch.attach_location(order.id, line_a, 0).await.unwrap();
    assert_eq!(location.unwrap().label, "A1-03");

    // Step 2: price the batch. A 1000 pool over the 10 receiving units puts
    // 100 on every unit of line A; line B receives nothing and carries none.
    orch.proceed_to_pricing(order.id).await.unwrap();
    orch.add_additional_cost(
        order.id,
        AdditionalCostCategory::Shipping,
        dec!(1000.00),
        "sea freight".to_string(),
    )
    .await
    .unwrap();

    let view = orch.session_view(order.id).await.unwrap();
    assert_eq!(view.pricing.len(), 1);
    assert_eq!(view.pricing[0].line_id, line_a);
    assert_eq!(view.pricing[0].allocated_additional_cost, dec!(100.00));
    assert_eq!(view.pricing[0].total_unit_cost, dec!(150.00));

    orch.set_selling_price(order.id, line_a, dec!(225.00))
        .await
        .unwrap();
    let view = orch.session_view(order.id).await.unwrap();
    assert_eq!(view.pricing[0].markup_percent, dec!(50.00));
    assert_eq!(view.pricing[0].profit_per_unit, dec!(75.00));

    // Step 3: commit and verify the order is fully received.
    let success = orch.commit(order.id, Some("dock 3".to_string())).await.unwrap();
    assert!(success.summary.is_fully_received);
    assert_eq!(success.summary.percent_complete, 100);
    assert_eq!(success.new_status, OrderStatus::Received);
    assert!(success.report.all_succeeded());

    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Received);
    assert_eq!(stored.lines[0].received_quantity, 10);

    let propagated = harness.inventory.propagated();
    assert_eq!(propagated, vec![(line_a, 10)]);
    let finalized = harness.inventory.finalized();
    assert_eq!(finalized.len(), 1);
    assert!(!finalized[0].is_partial);
    assert_eq!(finalized[0].note.as_deref(), Some("dock 3"));

    let events = harness.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::UnitPricingPropagated { unit_count: 10, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::OrderStatusChanged {
            new_status: OrderStatus::Received,
            ..
        }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ReceiptCommitted {
            fully_received: true,
            ..
        }
    )));
}

#[tokio::test]
async fn partial_receipts_accumulate_across_sessions() {
    let harness = TestHarness::new();
    // Unpaid on purpose: partial receipt is allowed on unpaid orders.
    let order = harness.seed_order(
        OrderStatus::Sent,
        PaymentStatus::Unpaid,
        vec![(10, 0, dec!(20.00))],
    );
    let line_id = order.lines[0].id;
    let orch = &harness.orchestrator;

    // Session 1: receive 4 of 10.
    orch.start_session(order.id, ReceiveMode::Partial).await.unwrap();
    orch.set_quantity(order.id, line_id, 4).await.unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.skip_identifiers(order.id).await.unwrap();
    let success = orch.commit(order.id, None).await.unwrap();
    assert!(!success.summary.is_fully_received);
    assert_eq!(success.new_status, OrderStatus::PartialReceived);
    assert_eq!(success.summary.percent_complete, 40);

    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PartialReceived);
    assert_eq!(stored.lines[0].received_quantity, 4);

    // Session 2: full mode picks up the remaining 6.
    let view = orch.start_session(order.id, ReceiveMode::Full).await.unwrap();
    assert_eq!(view.lines[0].receiving_quantity, 6);
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.skip_identifiers(order.id).await.unwrap();
    let success = orch.commit(order.id, None).await.unwrap();
    assert!(success.summary.is_fully_received);

    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Received);
    assert_eq!(stored.lines[0].received_quantity, 10);
}

#[tokio::test]
async fn skipping_identifiers_preserves_chosen_quantities() {
    let harness = TestHarness::new();
    let order = harness.seed_order(
        OrderStatus::Confirmed,
        PaymentStatus::Partial,
        vec![(8, 0, dec!(10.00)), (4, 0, dec!(5.00))],
    );
    let orch = &harness.orchestrator;

    orch.start_session(order.id, ReceiveMode::Partial).await.unwrap();
    orch.set_quantity(order.id, order.lines[0].id, 3).await.unwrap();
    orch.set_quantity(order.id, order.lines[1].id, 0).await.unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.skip_identifiers(order.id).await.unwrap();

    let view = orch.session_view(order.id).await.unwrap();
    assert_eq!(view.stage, Stage::Pricing);
    assert_eq!(view.summary.total_now_receiving, 3);

    let success = orch.commit(order.id, None).await.unwrap();
    assert_eq!(success.summary.total_now_receiving, 3);
    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.lines[0].received_quantity, 3);
    assert_eq!(stored.lines[1].received_quantity, 0);
}

#[tokio::test]
async fn quality_gate_commits_only_approved_units() {
    let order = common::build_order(
        OrderStatus::Shipped,
        PaymentStatus::Paid,
        vec![(3, 0, dec!(30.00))],
    );
    let line_id = order.lines[0].id;
    // The gate rejects the middle unit.
    let harness =
        TestHarness::with_quality_gate(Arc::new(RejectingQualityGate::new(vec![(line_id, 1)])));
    harness.store.insert(order.clone());
    let orch = &harness.orchestrator;

    orch.start_session(order.id, ReceiveMode::Full).await.unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.set_unit_identifier(order.id, line_id, 0, "SN-0").await.unwrap();
    orch.set_unit_identifier(order.id, line_id, 1, "SN-1").await.unwrap();
    orch.set_unit_identifier(order.id, line_id, 2, "SN-2").await.unwrap();
    orch.proceed_to_pricing(order.id).await.unwrap();

    let result = orch.request_quality_gate(order.id).await.unwrap();
    assert_matches!(
        result,
        QualityGateResult::Completed {
            approved: 2,
            rejected: 1
        }
    );

    let success = orch.commit(order.id, None).await.unwrap();
    assert_eq!(success.summary.total_now_receiving, 2);
    assert!(!success.summary.is_fully_received);
    assert_eq!(success.new_status, OrderStatus::PartialReceived);

    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.lines[0].received_quantity, 2);
    // Only the approved units were propagated.
    assert_eq!(harness.inventory.propagated(), vec![(line_id, 2)]);
}

#[tokio::test]
async fn cancelled_quality_gate_leaves_the_session_ungated() {
    let order = common::build_order(
        OrderStatus::Shipped,
        PaymentStatus::Paid,
        vec![(2, 0, dec!(10.00))],
    );
    let harness = TestHarness::with_quality_gate(Arc::new(CancellingQualityGate));
    harness.store.insert(order.clone());
    let orch = &harness.orchestrator;

    orch.start_session(order.id, ReceiveMode::Full).await.unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.skip_identifiers(order.id).await.unwrap();

    let result = orch.request_quality_gate(order.id).await.unwrap();
    assert_matches!(result, QualityGateResult::Cancelled);

    // The session is still at pricing and commits every unit.
    let success = orch.commit(order.id, None).await.unwrap();
    assert_eq!(success.summary.total_now_receiving, 2);
    assert!(success.summary.is_fully_received);
}

#[tokio::test]
async fn failed_sub_step_is_reported_and_retried_without_repeating_succeeded_ones() {
    let harness = TestHarness::new();
    let order = harness.seed_order(
        OrderStatus::Shipped,
        PaymentStatus::Paid,
        vec![(5, 0, dec!(12.00))],
    );
    let orch = &harness.orchestrator;

    orch.start_session(order.id, ReceiveMode::Full).await.unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.skip_identifiers(order.id).await.unwrap();

    harness.inventory.fail_finalize(true);
    let err = orch.commit(order.id, None).await.unwrap_err();
    let report = match err {
        ServiceError::PartialCommitFailure(report) => report,
        other => panic!("expected partial commit failure, got {:?}", other),
    };
    assert!(report.has_succeeded(CommitSubStep::PropagateUnitPricing));
    assert!(!report.has_succeeded(CommitSubStep::FinalizeReceive));
    assert!(!report.has_succeeded(CommitSubStep::UpdateOrderStatus));

    // Nothing was applied to the order by the failed finalize.
    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.lines[0].received_quantity, 0);
    assert_eq!(harness.inventory.propagated().len(), 1);

    // Retry re-runs only the failed sub-steps.
    harness.inventory.fail_finalize(false);
    let success = orch.commit(order.id, None).await.unwrap();
    assert!(success.report.all_succeeded());
    assert_eq!(harness.inventory.propagated().len(), 1);
    assert_eq!(harness.inventory.finalized().len(), 1);

    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Received);
    assert_eq!(stored.lines[0].received_quantity, 5);
}

#[tokio::test]
async fn commit_cannot_be_cancelled_once_started() {
    let harness = TestHarness::new();
    let order = harness.seed_order(
        OrderStatus::Shipped,
        PaymentStatus::Paid,
        vec![(5, 0, dec!(12.00))],
    );
    let orch = &harness.orchestrator;

    orch.start_session(order.id, ReceiveMode::Full).await.unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.skip_identifiers(order.id).await.unwrap();

    harness.inventory.fail_finalize(true);
    orch.commit(order.id, None).await.unwrap_err();

    // The commit stage has begun; cancellation is no longer supported.
    let err = orch.cancel(order.id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn only_one_session_per_order_and_cancel_frees_the_slot() {
    let harness = TestHarness::new();
    let order = harness.seed_order(
        OrderStatus::Sent,
        PaymentStatus::Unpaid,
        vec![(5, 0, dec!(1.00))],
    );
    let orch = &harness.orchestrator;

    orch.start_session(order.id, ReceiveMode::Partial).await.unwrap();
    let err = orch
        .start_session(order.id, ReceiveMode::Partial)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));

    orch.cancel(order.id).await.unwrap();
    let stored = harness.store.get_order(order.id).await.unwrap();
    assert_eq!(stored.lines[0].received_quantity, 0);
    assert!(orch.start_session(order.id, ReceiveMode::Partial).await.is_ok());
}

#[tokio::test]
async fn quick_actions_and_progress_query() {
    let harness = TestHarness::new();
    let order = harness.seed_order(
        OrderStatus::Sent,
        PaymentStatus::Unpaid,
        vec![(6, 2, dec!(3.00)), (4, 0, dec!(7.00))],
    );
    let orch = &harness.orchestrator;

    let progress = orch.receipt_progress(order.id).await.unwrap();
    assert!(!progress.is_fully_received);
    assert_eq!(progress.total_ordered, 10);
    assert_eq!(progress.total_already_received, 2);
    assert_eq!(progress.percent_complete, 20);

    orch.start_session(order.id, ReceiveMode::Partial).await.unwrap();
    orch.apply_quick_action(order.id, QuickAction::AllRemaining)
        .await
        .unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.skip_identifiers(order.id).await.unwrap();
    orch.commit(order.id, None).await.unwrap();

    let progress = orch.receipt_progress(order.id).await.unwrap();
    assert!(progress.is_fully_received);
    assert_eq!(progress.percent_complete, 100);
}

#[tokio::test]
async fn going_back_preserves_later_stage_pricing_edits() {
    let harness = TestHarness::new();
    let order = harness.seed_order(
        OrderStatus::Sent,
        PaymentStatus::Unpaid,
        vec![(5, 0, dec!(40.00))],
    );
    let line_id = order.lines[0].id;
    let orch = &harness.orchestrator;

    orch.start_session(order.id, ReceiveMode::Partial).await.unwrap();
    orch.set_quantity(order.id, line_id, 5).await.unwrap();
    orch.proceed_to_identifiers(order.id).await.unwrap();
    orch.set_unit_identifier(order.id, line_id, 0, "SN-KEEP")
        .await
        .unwrap();
    orch.proceed_to_pricing(order.id).await.unwrap();
    orch.set_selling_price(order.id, line_id, dec!(60.00)).await.unwrap();

    // Back to identifiers and forward again: the selling price survives.
    orch.go_back(order.id).await.unwrap();
    let view = orch.session_view(order.id).await.unwrap();
    assert_eq!(view.stage, Stage::Identifiers);
    assert_eq!(view.lines[0].unit_records[0].serial.as_deref(), Some("SN-KEEP"));

    orch.proceed_to_pricing(order.id).await.unwrap();
    let view = orch.session_view(order.id).await.unwrap();
    assert_eq!(view.pricing[0].selling_price, dec!(60.00));
    assert_eq!(view.pricing[0].markup_percent, dec!(50.00));
}
