use crate::engine::{ExecutionResult, ExecutionSummary};
use crate::error::PlanError;
use crate::types::{RiskLevel, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepAudit {
    pub id: String,
    pub operation_name: String,
    pub risk: RiskLevel,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Immutable record of one plan run. Storing it is up to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAudit {
    pub plan_id: String,
    /// BLAKE3 over the plan's static content; equal for every run of the same plan.
    pub plan_fingerprint: String,
    pub raw_intent: String,
    pub overall_risk: RiskLevel,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: ExecutionSummary,
    pub steps: Vec<StepAudit>,
}

impl ExecutionAudit {
    pub fn from_result(result: &ExecutionResult) -> Result<Self, PlanError> {
        let plan = &result.plan;
        Ok(Self {
            plan_id: plan.id.clone(),
            plan_fingerprint: plan.fingerprint()?,
            raw_intent: plan.raw_intent.clone(),
            overall_risk: plan.overall_risk,
            started_at: result.started_at,
            finished_at: result.finished_at,
            summary: result.summary.clone(),
            steps: plan
                .steps
                .iter()
                .map(|step| StepAudit {
                    id: step.id.clone(),
                    operation_name: step.operation_name.clone(),
                    risk: step.risk,
                    status: step.status,
                    error: step.error.clone(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ExecutionState;
    use crate::types::{Plan, PlanStep};

    #[test]
    fn audit_keeps_fingerprint_of_the_accepted_plan() {
        let accepted = Plan::new(
            "check balance",
            vec![PlanStep::new("1", "check", "getBalance", RiskLevel::Low)],
        );
        let fingerprint = accepted.fingerprint().unwrap();

        let mut executed = accepted.clone();
        executed.steps[0].status = StepStatus::Failed;
        executed.steps[0].error = Some("Ledger error: timeout".to_string());

        let now = Utc::now();
        let result = ExecutionResult {
            plan: executed,
            execution_state: ExecutionState::new(),
            summary: ExecutionSummary {
                total: 1,
                failed: 1,
                ..ExecutionSummary::default()
            },
            started_at: now,
            finished_at: now,
        };

        let audit = result.audit_record().unwrap();
        assert_eq!(audit.plan_fingerprint, fingerprint);
        assert_eq!(audit.steps[0].status, StepStatus::Failed);
        assert_eq!(audit.steps[0].error.as_deref(), Some("Ledger error: timeout"));

        let json = serde_json::to_value(&audit).unwrap();
        assert_eq!(json["planFingerprint"], fingerprint.as_str());
        assert_eq!(json["steps"][0]["operationName"], "getBalance");
    }
}
