use serde::{Deserialize, Serialize};
use strum::Display;

/// The commit sub-steps, in the order they are executed. They operate on
/// different external aggregates and are never wrapped in one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommitSubStep {
    PropagateUnitPricing,
    FinalizeReceive,
    UpdateOrderStatus,
}

/// Outcome of one commit sub-step. `succeeded == false` with an error of
/// "not attempted" means an earlier sub-step failed first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubStepOutcome {
    pub sub_step: CommitSubStep,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-sub-step record of a commit attempt. Survives across retries so a
/// re-issued commit skips sub-steps that already succeeded.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub sub_steps: Vec<SubStepOutcome>,
}

impl CommitReport {
    pub fn record_success(&mut self, sub_step: CommitSubStep) {
        self.upsert(SubStepOutcome {
            sub_step,
            succeeded: true,
            error: None,
        });
    }

    pub fn record_failure(&mut self, sub_step: CommitSubStep, error: String) {
        self.upsert(SubStepOutcome {
            sub_step,
            succeeded: false,
            error: Some(error),
        });
    }

    pub fn record_skipped(&mut self, sub_step: CommitSubStep) {
        // Do not overwrite an earlier success or a concrete failure.
        if self.outcome(sub_step).is_none() {
            self.upsert(SubStepOutcome {
                sub_step,
                succeeded: false,
                error: Some("not attempted".to_string()),
            });
        }
    }

    fn upsert(&mut self, outcome: SubStepOutcome) {
        if let Some(existing) = self
            .sub_steps
            .iter_mut()
            .find(|o| o.sub_step == outcome.sub_step)
        {
            *existing = outcome;
        } else {
            self.sub_steps.push(outcome);
        }
    }

    pub fn outcome(&self, sub_step: CommitSubStep) -> Option<&SubStepOutcome> {
        self.sub_steps.iter().find(|o| o.sub_step == sub_step)
    }

    pub fn has_succeeded(&self, sub_step: CommitSubStep) -> bool {
        self.outcome(sub_step).is_some_and(|o| o.succeeded)
    }

    pub fn all_succeeded(&self) -> bool {
        !self.sub_steps.is_empty() && self.sub_steps.iter().all(|o| o.succeeded)
    }

    pub fn any_succeeded(&self) -> bool {
        self.sub_steps.iter().any(|o| o.succeeded)
    }
}

impl std::fmt::Display for CommitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let succeeded = self.sub_steps.iter().filter(|o| o.succeeded).count();
        write!(
            f,
            "{}/{} sub-steps succeeded",
            succeeded,
            self.sub_steps.len()
        )?;
        for outcome in self.sub_steps.iter().filter(|o| !o.succeeded) {
            write!(
                f,
                "; {} failed: {}",
                outcome.sub_step,
                outcome.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

/// Crate-wide error taxonomy.
///
/// `ValidationError` and `PreconditionFailure` are always recoverable locally
/// and carry a human-readable reason with no retry implied.
/// `PartialCommitFailure` lists which commit sub-steps succeeded; retrying is
/// a caller decision and re-runs only the failed sub-steps.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailure(String),

    #[error("Commit partially failed: {0}")]
    PartialCommitFailure(CommitReport),

    #[error("Gateway error: {0}")]
    GatewayError(String),

    #[error("Event delivery error: {0}")]
    EventError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ServiceError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(what.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tracks_mixed_outcomes() {
        let mut report = CommitReport::default();
        report.record_success(CommitSubStep::PropagateUnitPricing);
        report.record_failure(CommitSubStep::FinalizeReceive, "boom".to_string());
        report.record_skipped(CommitSubStep::UpdateOrderStatus);

        assert!(report.has_succeeded(CommitSubStep::PropagateUnitPricing));
        assert!(!report.has_succeeded(CommitSubStep::FinalizeReceive));
        assert!(!report.all_succeeded());
        assert!(report.any_succeeded());
    }

    #[test]
    fn retry_overwrites_a_recorded_failure() {
        let mut report = CommitReport::default();
        report.record_failure(CommitSubStep::FinalizeReceive, "boom".to_string());
        report.record_success(CommitSubStep::FinalizeReceive);
        assert!(report.has_succeeded(CommitSubStep::FinalizeReceive));
        assert_eq!(report.sub_steps.len(), 1);
    }

    #[test]
    fn skipped_does_not_mask_an_earlier_success() {
        let mut report = CommitReport::default();
        report.record_success(CommitSubStep::FinalizeReceive);
        report.record_skipped(CommitSubStep::FinalizeReceive);
        assert!(report.has_succeeded(CommitSubStep::FinalizeReceive));
    }

    #[test]
    fn partial_failure_message_names_the_failed_sub_step() {
        let mut report = CommitReport::default();
        report.record_success(CommitSubStep::PropagateUnitPricing);
        report.record_failure(CommitSubStep::FinalizeReceive, "gateway timeout".to_string());

        let err = ServiceError::PartialCommitFailure(report);
        let message = err.to_string();
        assert!(message.contains("1/2"));
        assert!(message.contains("finalize_receive"));
        assert!(message.contains("gateway timeout"));
    }
}
