//! Sequential plan execution.
//!
//! Steps run strictly in order. Each step moves `pending -> in_progress` and then to
//! exactly one terminal status. A failed or unmet `high`/`critical` step sets the
//! plan-level abort flag, after which every remaining step is skipped without being
//! evaluated.

use crate::audit::ExecutionAudit;
use crate::conditions::ConditionEvaluator;
use crate::error::PlanError;
use crate::operations::OperationRegistry;
use crate::state::{
    step_result_key, step_status_key, ExecutionState, BALANCE_SYMBOL, CURRENT_BALANCE,
    LAST_BATCH_TX_HASHES, LAST_QUOTE_PRICE, LAST_QUOTE_SYMBOL, LAST_TRANSFER_AMOUNT, LAST_TX_HASH,
};
use crate::types::{Plan, PlanStep, StepStatus};
use crate::units::parse_amount;
use crate::validator::PlanValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecuteOptions {
    /// Apply the risk-gated abort. When false every step is attempted on its own.
    pub stop_on_failure: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: bool,
}

impl ExecutionSummary {
    fn tally(plan: &Plan, aborted: bool) -> Self {
        let count = |status: StepStatus| {
            plan.steps
                .iter()
                .filter(|step| step.status == status)
                .count()
        };
        Self {
            total: plan.steps.len(),
            completed: count(StepStatus::Completed),
            failed: count(StepStatus::Failed),
            skipped: count(StepStatus::Skipped),
            aborted,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// The executed plan with every step's final status, result and error.
    pub plan: Plan,
    /// Snapshot of the engine's state after this run.
    pub execution_state: ExecutionState,
    pub summary: ExecutionSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn audit_record(&self) -> Result<ExecutionAudit, PlanError> {
        ExecutionAudit::from_result(self)
    }
}

/// Runs validated plans for one acting account.
///
/// The engine owns its execution state; entries written by one run stay visible to
/// the next until [`ExecutionEngine::clear_state`] is called.
pub struct ExecutionEngine {
    registry: Arc<OperationRegistry>,
    evaluator: ConditionEvaluator,
    validator: PlanValidator,
    state: ExecutionState,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<OperationRegistry>,
        evaluator: ConditionEvaluator,
        validator: PlanValidator,
    ) -> Self {
        Self {
            registry,
            evaluator,
            validator,
            state: ExecutionState::new(),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn clear_state(&mut self) {
        self.state.clear();
    }

    pub async fn execute(
        &mut self,
        mut plan: Plan,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, PlanError> {
        if !plan.all_pending() {
            return Err(PlanError::InvariantViolation(format!(
                "plan {} has steps that are not pending",
                plan.id
            )));
        }
        let report = self.validator.validate(&plan, &self.registry);
        if !report.valid {
            return Err(PlanError::Validation(report));
        }

        let started_at = Utc::now();
        let plan_id = plan.id.clone();
        tracing::info!(
            plan_id = %plan_id,
            steps = plan.steps.len(),
            overall_risk = %plan.overall_risk,
            stop_on_failure = options.stop_on_failure,
            "executing plan"
        );

        let mut aborted_by: Option<String> = None;
        for step in plan.steps.iter_mut() {
            if let Some(cause) = &aborted_by {
                step.transition(StepStatus::Skipped)?;
                step.error = Some(format!("plan aborted after step '{cause}'"));
                tracing::info!(plan_id = %plan_id, step = %step.id, "step skipped; plan aborted");
                self.state.record(step_status_key(&step.id), step.status.name());
                continue;
            }

            step.transition(StepStatus::InProgress)?;
            self.run_step(&plan_id, step).await?;
            self.state.record(step_status_key(&step.id), step.status.name());

            let stopped = matches!(step.status, StepStatus::Failed | StepStatus::Skipped);
            if stopped && options.stop_on_failure && step.risk.is_abort_tier() {
                tracing::warn!(
                    plan_id = %plan_id,
                    step = %step.id,
                    risk = %step.risk,
                    status = %step.status,
                    "high-risk step did not complete; aborting plan"
                );
                aborted_by = Some(step.id.clone());
            }
        }

        let summary = ExecutionSummary::tally(&plan, aborted_by.is_some());
        tracing::info!(
            plan_id = %plan_id,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            aborted = summary.aborted,
            "plan finished"
        );

        Ok(ExecutionResult {
            plan,
            execution_state: self.state.clone(),
            summary,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Evaluate conditions, then invoke. Leaves `step` in a terminal status.
    async fn run_step(&mut self, plan_id: &str, step: &mut PlanStep) -> Result<(), PlanError> {
        let verdict = self
            .evaluator
            .evaluate_all(&step.conditions, &self.state)
            .await;
        if let Some(unmet) = verdict.first_unmet() {
            step.transition(StepStatus::Skipped)?;
            step.error = Some(format!("condition not met: {}", unmet.reason));
            tracing::info!(
                plan_id = %plan_id,
                step = %step.id,
                reason = %unmet.reason,
                "step skipped; condition not met"
            );
            return Ok(());
        }

        match self
            .registry
            .invoke(&step.operation_name, &step.parameters)
            .await
        {
            Ok(result) => {
                project_result(&mut self.state, self.evaluator.account(), &step.id, &result);
                step.result = Some(result);
                step.transition(StepStatus::Completed)?;
                tracing::info!(
                    plan_id = %plan_id,
                    step = %step.id,
                    operation = %step.operation_name,
                    "step completed"
                );
            }
            Err(err) => {
                step.transition(StepStatus::Failed)?;
                step.error = Some(err.to_string());
                tracing::warn!(
                    plan_id = %plan_id,
                    step = %step.id,
                    operation = %step.operation_name,
                    error = %err,
                    "step failed"
                );
            }
        }
        Ok(())
    }
}

/// Copy well-known result shapes into the state so later conditions can see them.
///
/// Balances of any holder other than `account` stay in the step result only.
fn project_result(state: &mut ExecutionState, account: &str, step_id: &str, result: &Value) {
    state.record(step_result_key(step_id), result.clone());

    let symbol = result.get("symbol").and_then(Value::as_str);
    let own_balance = result
        .get("account")
        .and_then(Value::as_str)
        .map_or(true, |holder| holder.eq_ignore_ascii_case(account));

    if let (Some(balance), Some(symbol), true) = (result.get("balance"), symbol, own_balance) {
        state.record(CURRENT_BALANCE, numeric_or_raw(balance));
        state.record(BALANCE_SYMBOL, symbol);
    }

    if let Some(hashes) = result.get("tx_hashes").and_then(Value::as_array) {
        if let Some(last) = hashes.last() {
            state.record(LAST_TX_HASH, last.clone());
        }
        state.record(LAST_BATCH_TX_HASHES, Value::Array(hashes.clone()));
        if let Some(total) = result.get("total_amount") {
            state.record(LAST_TRANSFER_AMOUNT, numeric_or_raw(total));
        }
    } else if let Some(hash) = result.get("tx_hash").and_then(Value::as_str) {
        state.record(LAST_TX_HASH, hash);
        if let Some(amount) = result.get("amount") {
            state.record(LAST_TRANSFER_AMOUNT, numeric_or_raw(amount));
        }
    }

    if let (Some(price), Some(symbol)) = (result.get("price").and_then(Value::as_f64), symbol) {
        state.record(LAST_QUOTE_PRICE, price);
        state.record(LAST_QUOTE_SYMBOL, symbol);
    }
}

fn numeric_or_raw(value: &Value) -> Value {
    match value {
        Value::String(text) => parse_amount(text)
            .map(Value::from)
            .unwrap_or_else(|| value.clone()),
        other => other.clone(),
    }
}
