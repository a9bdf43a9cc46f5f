//! The receive-staging pipeline.
//!
//! One staging session walks an order through mode selection, quantity
//! adjustment, unit-identifier capture, pricing, an optional quality gate,
//! and commit. Stage state is explicit and owned by the session; stage
//! transitions are the suspend points of the workflow. Nothing is persisted
//! until the commit stage begins, and the commit sub-steps are serialized
//! compensating actions, not a transaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{CommitReport, CommitSubStep, ServiceError};
use crate::events::{Event, EventSender};
use crate::gateways::{
    InventoryCommitGateway, LocationPicker, OrderStore, PickerOutcome, QualityGate,
    QualityOutcome, QualityUnit,
};
use crate::models::{
    AdditionalCost, AdditionalCostCategory, OrderStatus, PricingRecord, PurchaseOrder,
    StorageLocation, UnitRecord, WarrantyWindow,
};
use crate::services::cost_allocation::CostAllocationEngine;
use crate::services::reconciliation::{reconcile, FulfillmentSummary};

/// Receive mode selected when a session starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// Pre-fills every line with its full remaining quantity.
    Full,
    /// Pre-fills one unit per line (zero when nothing remains) and lets the
    /// caller adjust.
    Partial,
}

/// Bulk quantity adjustments available in the quantity stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickAction {
    AllRemaining,
    AllOne,
    Clear,
}

/// Pipeline stage of a staging session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Quantities,
    Identifiers,
    Pricing,
    QualityGated,
    Committing,
    Committed,
}

/// Result of running the quality gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGateResult {
    Completed { approved: usize, rejected: usize },
    Cancelled,
}

/// Staged receipt data for one line.
#[derive(Clone, Debug, Serialize)]
pub struct LineStaging {
    pub line_id: Uuid,
    pub sku: String,
    pub ordered_quantity: i32,
    pub already_received: i32,
    pub receiving_quantity: i32,
    pub unit_records: Vec<UnitRecord>,
}

impl LineStaging {
    fn remaining(&self) -> i32 {
        (self.ordered_quantity - self.already_received).max(0)
    }

    /// Resize-preserving-prefix: slots `0..min(old, new)` keep their data,
    /// surplus slots are truncated, missing slots appended empty.
    fn resize_slots(&mut self) {
        let target = self.receiving_quantity.max(0) as usize;
        crate::models::purchase_order::resize_unit_slots(&mut self.unit_records, target);
    }
}

// The payload frozen when commit first begins. Retries re-use it verbatim.
#[derive(Clone, Debug)]
struct CommitPayload {
    lines: Vec<EffectiveLine>,
    pricing: Vec<PricingRecord>,
    summary: FulfillmentSummary,
    is_partial: bool,
    note: Option<String>,
}

#[derive(Clone, Debug)]
struct EffectiveLine {
    line_id: Uuid,
    quantity: i32,
    units: Vec<UnitRecord>,
}

struct StagingSession {
    order: PurchaseOrder,
    mode: ReceiveMode,
    stage: Stage,
    lines: Vec<LineStaging>,
    additional_costs: Vec<AdditionalCost>,
    pricing: Vec<PricingRecord>,
    quality_requested: bool,
    approved_units: Option<HashSet<(Uuid, usize)>>,
    commit_report: CommitReport,
    commit_payload: Option<CommitPayload>,
}

impl StagingSession {
    fn line_mut(&mut self, line_id: Uuid) -> Result<&mut LineStaging, ServiceError> {
        self.lines
            .iter_mut()
            .find(|l| l.line_id == line_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order line {} not found", line_id)))
    }

    fn total_now_receiving(&self) -> i64 {
        self.lines.iter().map(|l| l.receiving_quantity as i64).sum()
    }

    fn receiving_batch(&self) -> HashMap<Uuid, i32> {
        self.lines
            .iter()
            .map(|l| (l.line_id, l.receiving_quantity))
            .collect()
    }

    /// Lines as they will actually commit: positive quantities only, reduced
    /// to the quality gate's approved units when a gate decision exists.
    fn effective_lines(&self) -> Vec<EffectiveLine> {
        self.lines
            .iter()
            .filter(|l| l.receiving_quantity > 0)
            .map(|l| match &self.approved_units {
                None => EffectiveLine {
                    line_id: l.line_id,
                    quantity: l.receiving_quantity,
                    units: l.unit_records.clone(),
                },
                Some(approved) => {
                    let units: Vec<UnitRecord> = l
                        .unit_records
                        .iter()
                        .enumerate()
                        .filter(|(idx, _)| approved.contains(&(l.line_id, *idx)))
                        .map(|(_, unit)| unit.clone())
                        .collect();
                    EffectiveLine {
                        line_id: l.line_id,
                        quantity: units.len() as i32,
                        units,
                    }
                }
            })
            .filter(|e| e.quantity > 0)
            .collect()
    }
}

/// Snapshot of a staging session for the caller. Pricing is rounded to the
/// configured scale here; the session keeps full precision.
#[derive(Clone, Debug, Serialize)]
pub struct StagingView {
    pub order_id: Uuid,
    pub mode: ReceiveMode,
    pub stage: Stage,
    pub lines: Vec<LineStaging>,
    pub additional_costs: Vec<AdditionalCost>,
    pub pricing: Vec<PricingRecord>,
    pub summary: FulfillmentSummary,
}

/// Result of a fully committed staging session.
#[derive(Clone, Debug, Serialize)]
pub struct CommitSuccess {
    pub order_id: Uuid,
    pub new_status: OrderStatus,
    pub summary: FulfillmentSummary,
    pub report: CommitReport,
}

/// Orchestrates receive-staging sessions, one per order at a time.
#[derive(Clone)]
pub struct ReceiveStagingOrchestrator {
    config: AppConfig,
    engine: CostAllocationEngine,
    sessions: Arc<DashMap<Uuid, Arc<Mutex<StagingSession>>>>,
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryCommitGateway>,
    location_picker: Arc<dyn LocationPicker>,
    quality_gate: Arc<dyn QualityGate>,
    event_sender: Option<EventSender>,
}

impl ReceiveStagingOrchestrator {
    pub fn new(
        config: AppConfig,
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryCommitGateway>,
        location_picker: Arc<dyn LocationPicker>,
        quality_gate: Arc<dyn QualityGate>,
        event_sender: Option<EventSender>,
    ) -> Self {
        let engine = CostAllocationEngine::new(config.base_currency.clone());
        Self {
            config,
            engine,
            sessions: Arc::new(DashMap::new()),
            orders,
            inventory,
            location_picker,
            quality_gate,
            event_sender,
        }
    }

    /// Opens a staging session for an order.
    ///
    /// At most one session per order may be open; a second start is a caller
    /// error. Nothing is persisted until commit.
    #[instrument(skip(self))]
    pub async fn start_session(
        &self,
        order_id: Uuid,
        mode: ReceiveMode,
    ) -> Result<StagingView, ServiceError> {
        if self.sessions.len() >= self.config.max_open_sessions {
            return Err(ServiceError::InvalidOperation(format!(
                "staging session capacity ({}) reached",
                self.config.max_open_sessions
            )));
        }

        let order = self.orders.get_order(order_id).await?;

        if order.lines.is_empty() {
            return Err(ServiceError::PreconditionFailure(format!(
                "Order {} has no lines to receive",
                order_id
            )));
        }
        match order.status {
            OrderStatus::Draft => {
                return Err(ServiceError::PreconditionFailure(
                    "Order has not been sent to the supplier".to_string(),
                ));
            }
            OrderStatus::Cancelled => {
                return Err(ServiceError::PreconditionFailure(
                    "Order is cancelled".to_string(),
                ));
            }
            OrderStatus::Completed => {
                return Err(ServiceError::PreconditionFailure(
                    "Order is already completed".to_string(),
                ));
            }
            _ => {}
        }
        if order.is_fully_received() {
            return Err(ServiceError::PreconditionFailure(
                "All lines are already fully received".to_string(),
            ));
        }

        let lines = order
            .lines
            .iter()
            .map(|line| {
                let remaining = line.remaining();
                let receiving_quantity = match mode {
                    ReceiveMode::Full => remaining,
                    ReceiveMode::Partial => remaining.min(1),
                };
                let mut staging = LineStaging {
                    line_id: line.id,
                    sku: line.sku.clone(),
                    ordered_quantity: line.ordered_quantity,
                    already_received: line.received_quantity,
                    receiving_quantity,
                    unit_records: Vec::new(),
                };
                staging.resize_slots();
                staging
            })
            .collect();

        let session = StagingSession {
            order,
            mode,
            stage: Stage::Quantities,
            lines,
            additional_costs: Vec::new(),
            pricing: Vec::new(),
            quality_requested: false,
            approved_units: None,
            commit_report: CommitReport::default(),
            commit_payload: None,
        };
        let view = view_of(&session);

        match self.sessions.entry(order_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ServiceError::InvalidOperation(format!(
                    "A staging session is already open for order {}",
                    order_id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(session)));
            }
        }

        info!(%order_id, ?mode, "Staging session started");
        Ok(view)
    }

    /// Adjusts one line's receiving quantity (partial mode only).
    ///
    /// Resizes the line's unit-identifier slots to match, preserving data in
    /// slots that survive. Invalidates any quality-gate decision.
    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Quantities, "adjust quantities")?;
        if session.mode != ReceiveMode::Partial {
            return Err(ServiceError::InvalidOperation(
                "Receiving quantities are fixed in full mode".to_string(),
            ));
        }

        let line = session.line_mut(line_id)?;
        let remaining = line.remaining();
        if quantity < 0 || quantity > remaining {
            return Err(ServiceError::ValidationError(format!(
                "Receiving quantity {} out of range for line {} (remaining {})",
                quantity, line_id, remaining
            )));
        }
        line.receiving_quantity = quantity;
        line.resize_slots();

        self.after_quantity_change(&mut session);
        Ok(())
    }

    /// Applies a bulk quantity action to every line (partial mode only).
    #[instrument(skip(self))]
    pub async fn apply_quick_action(
        &self,
        order_id: Uuid,
        action: QuickAction,
    ) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Quantities, "adjust quantities")?;
        if session.mode != ReceiveMode::Partial {
            return Err(ServiceError::InvalidOperation(
                "Receiving quantities are fixed in full mode".to_string(),
            ));
        }

        for line in session.lines.iter_mut() {
            line.receiving_quantity = match action {
                QuickAction::AllRemaining => line.remaining(),
                QuickAction::AllOne => line.remaining().min(1),
                QuickAction::Clear => 0,
            };
            line.resize_slots();
        }

        self.after_quantity_change(&mut session);
        Ok(())
    }

    /// Moves from the quantity stage to unit-identifier capture.
    #[instrument(skip(self))]
    pub async fn proceed_to_identifiers(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Quantities, "proceed to identifiers")?;
        if session.total_now_receiving() == 0 {
            return Err(ServiceError::ValidationError(
                "No units staged for receipt".to_string(),
            ));
        }
        session.stage = Stage::Identifiers;
        Ok(())
    }

    /// Captures a unit identifier with IMEI auto-classification.
    #[instrument(skip(self, value))]
    pub async fn set_unit_identifier(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        unit_index: usize,
        value: &str,
    ) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Identifiers, "capture identifiers")?;

        let line = session.line_mut(line_id)?;
        let slots = line.unit_records.len();
        let unit = line.unit_records.get_mut(unit_index).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Unit index {} out of range for line {} ({} slots)",
                unit_index, line_id, slots
            ))
        })?;
        unit.set_identifier(value);
        Ok(())
    }

    /// Opens the location picker and attaches the chosen storage location to
    /// one unit. A cancelled picker leaves the unit untouched.
    #[instrument(skip(self))]
    pub async fn attach_location(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        unit_index: usize,
    ) -> Result<Option<StorageLocation>, ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Identifiers, "attach locations")?;

        // Bounds check before opening the picker.
        {
            let line = session.line_mut(line_id)?;
            let slots = line.unit_records.len();
            if unit_index >= slots {
                return Err(ServiceError::ValidationError(format!(
                    "Unit index {} out of range for line {} ({} slots)",
                    unit_index, line_id, slots
                )));
            }
        }

        match self.location_picker.open_picker().await? {
            PickerOutcome::Cancelled => Ok(None),
            PickerOutcome::Selected(location) => {
                let line = session.line_mut(line_id)?;
                line.unit_records[unit_index].location = Some(location.clone());
                Ok(Some(location))
            }
        }
    }

    /// Skips identifier capture entirely while keeping the chosen
    /// quantities: a first-class transition into the pricing stage.
    #[instrument(skip(self))]
    pub async fn skip_identifiers(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Identifiers, "skip identifiers")?;
        self.enter_pricing(&mut session);
        Ok(())
    }

    /// Completes identifier capture and moves to pricing.
    #[instrument(skip(self))]
    pub async fn proceed_to_pricing(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Identifiers, "proceed to pricing")?;
        self.enter_pricing(&mut session);
        Ok(())
    }

    /// Adds a shared cost to the session's pool and redistributes.
    #[instrument(skip(self, description))]
    pub async fn add_additional_cost(
        &self,
        order_id: Uuid,
        category: AdditionalCostCategory,
        amount: Decimal,
        description: String,
    ) -> Result<Uuid, ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Pricing, "edit additional costs")?;
        if amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Additional cost amount cannot be negative".to_string(),
            ));
        }

        let cost = AdditionalCost::new(category, amount, description);
        let cost_id = cost.id;
        session.additional_costs.push(cost);
        self.reallocate(&mut session);
        Ok(cost_id)
    }

    /// Removes a shared cost from the pool and redistributes.
    #[instrument(skip(self))]
    pub async fn remove_additional_cost(
        &self,
        order_id: Uuid,
        cost_id: Uuid,
    ) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Pricing, "edit additional costs")?;

        let before = session.additional_costs.len();
        session.additional_costs.retain(|c| c.id != cost_id);
        if session.additional_costs.len() == before {
            return Err(ServiceError::NotFound(format!(
                "Additional cost {} not found",
                cost_id
            )));
        }
        self.reallocate(&mut session);
        Ok(())
    }

    /// Sets an explicit selling price on one line.
    #[instrument(skip(self))]
    pub async fn set_selling_price(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        price: Decimal,
    ) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Pricing, "edit pricing")?;
        if price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Selling price cannot be negative".to_string(),
            ));
        }

        let record = pricing_record_mut(&mut session, line_id)?;
        self.engine.set_selling_price(record, price);
        Ok(())
    }

    /// Sets a markup percentage on one line.
    #[instrument(skip(self))]
    pub async fn set_markup_percent(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        pct: Decimal,
    ) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Pricing, "edit pricing")?;

        let record = pricing_record_mut(&mut session, line_id)?;
        self.engine.set_markup_percent(record, pct);
        Ok(())
    }

    /// Applies one markup percentage across every line in the batch,
    /// overriding individually set selling prices.
    #[instrument(skip(self))]
    pub async fn apply_bulk_markup(&self, order_id: Uuid, pct: Decimal) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Pricing, "edit pricing")?;
        self.engine.apply_bulk_markup(&mut session.pricing, pct);
        Ok(())
    }

    /// Requests the quality gate and suspends until its decision.
    ///
    /// On completion only approved units proceed to commit. A cancelled gate
    /// leaves the session in the pricing stage, ungated.
    #[instrument(skip(self))]
    pub async fn request_quality_gate(
        &self,
        order_id: Uuid,
    ) -> Result<QualityGateResult, ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        require_stage(&session, Stage::Pricing, "request a quality check")?;

        let units: Vec<QualityUnit> = session
            .lines
            .iter()
            .filter(|l| l.receiving_quantity > 0)
            .flat_map(|l| {
                l.unit_records.iter().enumerate().map(|(idx, unit)| QualityUnit {
                    line_id: l.line_id,
                    unit_index: idx,
                    serial: unit.serial.clone(),
                })
            })
            .collect();
        let total = units.len();

        session.quality_requested = true;
        match self.quality_gate.run_quality_check(order_id, units).await? {
            QualityOutcome::Cancelled => {
                // The operator abandoned the check; the session proceeds
                // ungated unless the caller requests it again.
                session.quality_requested = false;
                info!(%order_id, "Quality check cancelled");
                Ok(QualityGateResult::Cancelled)
            }
            QualityOutcome::Completed { approved } => {
                let approved_count = approved.len();
                session.approved_units = Some(approved.into_iter().collect());
                session.stage = Stage::QualityGated;

                if let Some(sender) = &self.event_sender {
                    sender
                        .send_or_log(Event::QualityCheckCompleted {
                            order_id,
                            approved_units: approved_count,
                            rejected_units: total - approved_count,
                        })
                        .await;
                }
                info!(%order_id, approved_count, total, "Quality check completed");
                Ok(QualityGateResult::Completed {
                    approved: approved_count,
                    rejected: total - approved_count,
                })
            }
        }
    }

    /// Commits the staged receipt.
    ///
    /// Runs the sub-steps in order: unit pricing propagation, inventory
    /// finalize, order status update. A failed sub-step stops the sequence;
    /// the error carries a per-sub-step report and succeeded sub-steps are
    /// never rolled back. Calling `commit` again retries only what failed.
    #[instrument(skip(self, note))]
    pub async fn commit(
        &self,
        order_id: Uuid,
        note: Option<String>,
    ) -> Result<CommitSuccess, ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;

        match session.stage {
            Stage::Pricing | Stage::QualityGated | Stage::Committing => {}
            Stage::Committed => {
                return Err(ServiceError::InvalidOperation(
                    "Session is already committed".to_string(),
                ));
            }
            Stage::Quantities | Stage::Identifiers => {
                return Err(ServiceError::InvalidOperation(
                    "Pricing has not been completed".to_string(),
                ));
            }
        }

        if session.stage != Stage::Committing {
            self.freeze_commit_payload(&mut session, note)?;
            session.stage = Stage::Committing;
        }
        // Past this point cancellation is unsupported; sub-steps run to
        // completion or to a reported partial failure.

        let payload = session
            .commit_payload
            .clone()
            .ok_or_else(|| ServiceError::InvalidOperation("Commit payload missing".to_string()))?;

        // Sub-step 1: push unit pricing to the catalog.
        if !session
            .commit_report
            .has_succeeded(CommitSubStep::PropagateUnitPricing)
        {
            let result = self.propagate_pricing(&payload).await;
            if let Err(e) = result {
                warn!(%order_id, error = %e, "Pricing propagation failed");
                session
                    .commit_report
                    .record_failure(CommitSubStep::PropagateUnitPricing, e.to_string());
                session.commit_report.record_skipped(CommitSubStep::FinalizeReceive);
                session
                    .commit_report
                    .record_skipped(CommitSubStep::UpdateOrderStatus);
                return Err(ServiceError::PartialCommitFailure(
                    session.commit_report.clone(),
                ));
            }
            session
                .commit_report
                .record_success(CommitSubStep::PropagateUnitPricing);
        }

        // Sub-step 2: commit quantities to inventory.
        if !session
            .commit_report
            .has_succeeded(CommitSubStep::FinalizeReceive)
        {
            let quantities: Vec<(Uuid, i32)> = payload
                .lines
                .iter()
                .map(|l| (l.line_id, l.quantity))
                .collect();
            let result = self
                .inventory
                .finalize_receive(order_id, &quantities, payload.is_partial, payload.note.clone())
                .await;
            if let Err(e) = result {
                warn!(%order_id, error = %e, "Finalize receive failed");
                session
                    .commit_report
                    .record_failure(CommitSubStep::FinalizeReceive, e.to_string());
                session
                    .commit_report
                    .record_skipped(CommitSubStep::UpdateOrderStatus);
                return Err(ServiceError::PartialCommitFailure(
                    session.commit_report.clone(),
                ));
            }
            session
                .commit_report
                .record_success(CommitSubStep::FinalizeReceive);
        }

        // Sub-step 3: derive and persist the new order status.
        let new_status = payload.summary.post_commit_status();
        if !session
            .commit_report
            .has_succeeded(CommitSubStep::UpdateOrderStatus)
        {
            if let Err(e) = self.orders.update_order_status(order_id, new_status).await {
                warn!(%order_id, error = %e, "Order status update failed");
                session
                    .commit_report
                    .record_failure(CommitSubStep::UpdateOrderStatus, e.to_string());
                return Err(ServiceError::PartialCommitFailure(
                    session.commit_report.clone(),
                ));
            }
            session
                .commit_report
                .record_success(CommitSubStep::UpdateOrderStatus);
        }

        session.stage = Stage::Committed;
        let report = session.commit_report.clone();
        let summary = payload.summary.clone();
        let old_status = session.order.status;

        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status,
                })
                .await;
            sender
                .send_or_log(Event::ReceiptCommitted {
                    order_id,
                    fully_received: summary.is_fully_received,
                    total_now_receiving: summary.total_now_receiving,
                    total_ordered: summary.total_ordered,
                    timestamp: Utc::now(),
                })
                .await;
        }

        drop(session);
        self.sessions.remove(&order_id);

        info!(%order_id, %new_status, "Receipt committed");
        Ok(CommitSuccess {
            order_id,
            new_status,
            summary,
            report,
        })
    }

    /// Abandons the session. Legal at any stage before commit begins; there
    /// is nothing to undo because nothing was persisted.
    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let session = self.session(order_id)?;
        {
            let session = session.lock().await;
            if matches!(session.stage, Stage::Committing | Stage::Committed) {
                return Err(ServiceError::InvalidOperation(
                    "Commit has already started".to_string(),
                ));
            }
        }
        self.sessions.remove(&order_id);
        info!(%order_id, "Staging session cancelled");
        Ok(())
    }

    /// Steps back one stage without losing later-stage edits. Edits made
    /// after going back invalidate downstream data only where required
    /// (quantity changes truncate identifier slots and void gate decisions).
    #[instrument(skip(self))]
    pub async fn go_back(&self, order_id: Uuid) -> Result<Stage, ServiceError> {
        let session = self.session(order_id)?;
        let mut session = session.lock().await;
        session.stage = match session.stage {
            Stage::Identifiers => Stage::Quantities,
            Stage::Pricing => Stage::Identifiers,
            Stage::QualityGated => Stage::Pricing,
            Stage::Quantities => {
                return Err(ServiceError::InvalidOperation(
                    "Already at the first stage".to_string(),
                ));
            }
            Stage::Committing | Stage::Committed => {
                return Err(ServiceError::InvalidOperation(
                    "Cannot go back once commit has started".to_string(),
                ));
            }
        };
        Ok(session.stage)
    }

    /// Snapshot of the session for display.
    pub async fn session_view(&self, order_id: Uuid) -> Result<StagingView, ServiceError> {
        let session = self.session(order_id)?;
        let session = session.lock().await;
        let mut view = view_of(&session);
        let scale = self.config.money_scale;
        view.pricing = view.pricing.iter().map(|p| p.rounded(scale)).collect();
        Ok(view)
    }

    /// Fulfillment progress of an order, without any session open.
    #[instrument(skip(self))]
    pub async fn receipt_progress(&self, order_id: Uuid) -> Result<FulfillmentSummary, ServiceError> {
        let order = self.orders.get_order(order_id).await?;
        Ok(reconcile(&order.lines, &HashMap::new()))
    }

    fn session(&self, order_id: Uuid) -> Result<Arc<Mutex<StagingSession>>, ServiceError> {
        self.sessions
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No staging session open for order {}", order_id))
            })
    }

    // Quantity edits invalidate the gate decision and, when pricing already
    // exists (the caller went back from a later stage), resync the batch.
    fn after_quantity_change(&self, session: &mut StagingSession) {
        session.approved_units = None;
        session.quality_requested = false;
        if !session.pricing.is_empty() {
            self.sync_pricing(session);
        }
    }

    /// Builds pricing records for the current batch and redistributes the
    /// cost pool. Selling prices survive re-entry for lines still in the
    /// batch.
    fn enter_pricing(&self, session: &mut StagingSession) {
        self.sync_pricing(session);
        session.stage = Stage::Pricing;
    }

    fn sync_pricing(&self, session: &mut StagingSession) {
        let mut records = Vec::new();
        for staged in session.lines.iter().filter(|l| l.receiving_quantity > 0) {
            if let Some(line) = session.order.line(staged.line_id) {
                let base_cost = self.engine.convert_to_base_currency(
                    line.unit_cost,
                    &session.order.currency,
                    session.order.exchange_rate,
                );
                let mut record = PricingRecord::new(staged.line_id, base_cost);
                if let Some(previous) = session.pricing.iter().find(|p| p.line_id == staged.line_id)
                {
                    record.selling_price = previous.selling_price;
                }
                records.push(record);
            }
        }
        session.pricing = records;
        self.reallocate(session);
    }

    fn reallocate(&self, session: &mut StagingSession) {
        let quantities: HashMap<Uuid, i32> = session.receiving_batch();
        self.engine.allocate_shared_costs(
            &mut session.pricing,
            &session.additional_costs,
            |record| quantities.get(&record.line_id).copied().unwrap_or(0),
        );
    }

    // Freezes what will commit: effective lines (gate-approved units only),
    // final pricing reallocated over the effective quantities, warranty
    // stamps, and the reconciliation summary.
    fn freeze_commit_payload(
        &self,
        session: &mut StagingSession,
        note: Option<String>,
    ) -> Result<(), ServiceError> {
        let mut lines = session.effective_lines();
        if lines.is_empty() {
            return Err(ServiceError::PreconditionFailure(
                "No units left to commit".to_string(),
            ));
        }

        let received_at = Utc::now();
        if self.config.default_warranty_months > 0 {
            for line in lines.iter_mut() {
                for unit in line.units.iter_mut() {
                    unit.warranty = Some(WarrantyWindow::from_receipt(
                        received_at,
                        self.config.default_warranty_months,
                    ));
                }
            }
        }

        // The pool is redistributed over the quantities that actually commit.
        let quantities: HashMap<Uuid, i32> =
            lines.iter().map(|l| (l.line_id, l.quantity)).collect();
        let mut pricing: Vec<PricingRecord> = session
            .pricing
            .iter()
            .filter(|p| quantities.contains_key(&p.line_id))
            .cloned()
            .collect();
        self.engine
            .allocate_shared_costs(&mut pricing, &session.additional_costs, |record| {
                quantities.get(&record.line_id).copied().unwrap_or(0)
            });
        let scale = self.config.money_scale;
        let pricing: Vec<PricingRecord> = pricing.iter().map(|p| p.rounded(scale)).collect();

        let batch: HashMap<Uuid, i32> = quantities;
        let summary = reconcile(&session.order.lines, &batch);
        let is_partial = !summary.is_fully_received;

        session.commit_payload = Some(CommitPayload {
            lines,
            pricing,
            summary,
            is_partial,
            note,
        });
        Ok(())
    }

    async fn propagate_pricing(&self, payload: &CommitPayload) -> Result<(), ServiceError> {
        for line in &payload.lines {
            let pricing = payload
                .pricing
                .iter()
                .find(|p| p.line_id == line.line_id)
                .ok_or_else(|| {
                    ServiceError::InvalidOperation(format!(
                        "No pricing record for line {}",
                        line.line_id
                    ))
                })?;
            self.inventory
                .propagate_unit_pricing(line.line_id, &line.units, pricing)
                .await?;

            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::UnitPricingPropagated {
                        line_id: line.line_id,
                        unit_count: line.units.len(),
                        selling_price: pricing.selling_price,
                    })
                    .await;
            }
        }
        Ok(())
    }
}

fn require_stage(
    session: &StagingSession,
    expected: Stage,
    action: &str,
) -> Result<(), ServiceError> {
    if session.stage != expected {
        return Err(ServiceError::InvalidOperation(format!(
            "Cannot {} in the {:?} stage",
            action, session.stage
        )));
    }
    Ok(())
}

fn pricing_record_mut<'a>(
    session: &'a mut StagingSession,
    line_id: Uuid,
) -> Result<&'a mut PricingRecord, ServiceError> {
    session
        .pricing
        .iter_mut()
        .find(|p| p.line_id == line_id)
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Line {} is not part of this batch", line_id))
        })
}

fn view_of(session: &StagingSession) -> StagingView {
    StagingView {
        order_id: session.order.id,
        mode: session.mode,
        stage: session.stage,
        lines: session.lines.clone(),
        additional_costs: session.additional_costs.clone(),
        pricing: session.pricing.clone(),
        summary: reconcile(&session.order.lines, &session.receiving_batch()),
    }
}
