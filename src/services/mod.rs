// Core services of the procurement workflow
pub mod cost_allocation;
pub mod receive_staging;
pub mod reconciliation;
pub mod status_transition;

pub use cost_allocation::CostAllocationEngine;
pub use receive_staging::{
    CommitSuccess, QualityGateResult, QuickAction, ReceiveMode, ReceiveStagingOrchestrator, Stage,
    StagingView,
};
pub use reconciliation::{reconcile, FulfillmentSummary};
pub use status_transition::{validate, TransitionDecision};
