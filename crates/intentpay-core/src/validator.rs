//! Structural and semantic checks run before any plan touches the ledger.
//!
//! Every check runs and issues accumulate; a report with any error rejects the plan
//! while warnings only inform the approver.

use crate::ledger::is_valid_address;
use crate::operations::{amount_text, OperationRegistry, ParameterShape};
use crate::risk::batch_amount;
use crate::types::{Condition, ConditionKind, Parameters, Plan, PlanStep, StepStatus, TrendDirection};
use crate::units::parse_transfer_amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Check family an issue came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueCheck {
    Schema,
    Operation,
    Parameters,
    Risk,
    Condition,
    Heuristic,
}

impl IssueCheck {
    pub fn name(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Operation => "operation",
            Self::Parameters => "parameters",
            Self::Risk => "risk",
            Self::Condition => "condition",
            Self::Heuristic => "heuristic",
        }
    }
}

impl fmt::Display for IssueCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub check: IssueCheck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step_id {
            Some(step_id) => write!(f, "[{}] step {}: {}", self.check, step_id, self.message),
            None => write!(f, "[{}] {}", self.check, self.message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, check: IssueCheck, step_id: Option<&str>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationIssue {
            check,
            step_id: step_id.map(str::to_string),
            message: message.into(),
        });
    }

    pub fn warn(&mut self, check: IssueCheck, step_id: Option<&str>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            check,
            step_id: step_id.map(str::to_string),
            message: message.into(),
        });
    }

    /// Append another report's issues.
    pub fn absorb(&mut self, other: ValidationReport) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Validator thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Transfers above this amount (token units) raise a warning.
    pub large_transfer_threshold: f64,
    /// Plans longer than this raise a warning.
    pub max_steps: usize,
    /// More transfer-shaped steps than this raise a warning.
    pub max_transfer_steps: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            large_transfer_threshold: 1_000.0,
            max_steps: 10,
            max_transfer_steps: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanValidator {
    config: ValidatorConfig,
}

impl PlanValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Run every check against `plan`. The plan is never modified.
    pub fn validate(&self, plan: &Plan, registry: &OperationRegistry) -> ValidationReport {
        let mut report = ValidationReport::new();

        self.check_schema(plan, &mut report);
        self.check_operations(plan, registry, &mut report);
        self.check_parameters(plan, registry, &mut report);
        self.check_risk(plan, &mut report);
        self.check_conditions(plan, &mut report);
        self.check_heuristics(plan, registry, &mut report);

        if report.valid {
            tracing::debug!(
                plan_id = %plan.id,
                warnings = report.warnings.len(),
                "plan validated"
            );
        } else {
            tracing::warn!(
                plan_id = %plan.id,
                errors = report.errors.len(),
                warnings = report.warnings.len(),
                "plan rejected by validator"
            );
        }
        report
    }

    fn check_schema(&self, plan: &Plan, report: &mut ValidationReport) {
        if plan.id.trim().is_empty() {
            report.error(IssueCheck::Schema, None, "plan id must not be empty");
        }
        if plan.raw_intent.trim().is_empty() {
            report.error(IssueCheck::Schema, None, "rawIntent must not be empty");
        }
        if plan.steps.is_empty() {
            report.error(IssueCheck::Schema, None, "plan has no steps");
        }

        let mut seen = BTreeSet::new();
        for (index, step) in plan.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                report.error(
                    IssueCheck::Schema,
                    None,
                    format!("step at index {index} has an empty id"),
                );
                continue;
            }
            if !seen.insert(step.id.as_str()) {
                report.error(
                    IssueCheck::Schema,
                    Some(&step.id),
                    format!("duplicate step id '{}'", step.id),
                );
            }
            if step.human_action.trim().is_empty() {
                report.error(IssueCheck::Schema, Some(&step.id), "humanAction must not be empty");
            }
            if step.operation_name.trim().is_empty() {
                report.error(IssueCheck::Schema, Some(&step.id), "operationName must not be empty");
            }
            if step.status != StepStatus::Pending {
                report.error(
                    IssueCheck::Schema,
                    Some(&step.id),
                    format!("step status must be 'pending', found '{}'", step.status),
                );
            }
        }
    }

    fn check_operations(&self, plan: &Plan, registry: &OperationRegistry, report: &mut ValidationReport) {
        for step in &plan.steps {
            if step.operation_name.trim().is_empty() {
                continue;
            }
            if !registry.has(&step.operation_name) {
                report.error(
                    IssueCheck::Operation,
                    Some(&step.id),
                    format!("operation '{}' is not registered", step.operation_name),
                );
            }
        }
    }

    fn check_parameters(&self, plan: &Plan, registry: &OperationRegistry, report: &mut ValidationReport) {
        for step in &plan.steps {
            let Some(descriptor) = registry.descriptor(&step.operation_name) else {
                continue;
            };
            match descriptor.shape {
                ParameterShape::Free => {}
                ParameterShape::Transfer => {
                    self.check_transfer_leg(&step.id, &step.parameters, "", report);
                }
                ParameterShape::BatchTransfer => self.check_batch(step, report),
            }
        }
    }

    fn check_batch(&self, step: &PlanStep, report: &mut ValidationReport) {
        let Some(recipients) = step.parameters.get("recipients").and_then(Value::as_array) else {
            report.error(
                IssueCheck::Parameters,
                Some(&step.id),
                "batch transfer requires a 'recipients' array",
            );
            return;
        };
        if recipients.is_empty() {
            report.error(
                IssueCheck::Parameters,
                Some(&step.id),
                "batch transfer has no recipients",
            );
            return;
        }

        for (index, recipient) in recipients.iter().enumerate() {
            let prefix = format!("recipient {index}: ");
            match recipient.as_object() {
                Some(object) => {
                    let leg: Parameters = object.clone().into_iter().collect();
                    self.check_transfer_leg(&step.id, &leg, &prefix, report);
                }
                None => report.error(
                    IssueCheck::Parameters,
                    Some(&step.id),
                    format!("{prefix}expected an object with 'to' and 'amount'"),
                ),
            }
        }

        if let Some(total) = batch_amount(recipients) {
            if total > self.config.large_transfer_threshold {
                report.warn(
                    IssueCheck::Parameters,
                    Some(&step.id),
                    format!(
                        "batch total {} exceeds large-transfer threshold {}",
                        total, self.config.large_transfer_threshold
                    ),
                );
            }
        }
    }

    fn check_transfer_leg(
        &self,
        step_id: &str,
        parameters: &Parameters,
        prefix: &str,
        report: &mut ValidationReport,
    ) {
        match parameters.get("to") {
            Some(Value::String(to)) if is_valid_address(to) => {}
            Some(Value::String(to)) => report.error(
                IssueCheck::Parameters,
                Some(step_id),
                format!("{prefix}invalid recipient address '{to}'"),
            ),
            Some(_) => report.error(
                IssueCheck::Parameters,
                Some(step_id),
                format!("{prefix}'to' must be an address string"),
            ),
            None => report.error(
                IssueCheck::Parameters,
                Some(step_id),
                format!("{prefix}missing recipient 'to'"),
            ),
        }

        let Some(raw) = parameters.get("amount") else {
            report.error(
                IssueCheck::Parameters,
                Some(step_id),
                format!("{prefix}missing 'amount'"),
            );
            return;
        };
        let text = amount_text(raw).unwrap_or_else(|| raw.to_string());
        match parse_transfer_amount(&text) {
            None => report.error(
                IssueCheck::Parameters,
                Some(step_id),
                format!("{prefix}amount '{text}' is not a plain decimal number"),
            ),
            Some(amount) if amount <= 0.0 => report.error(
                IssueCheck::Parameters,
                Some(step_id),
                format!("{prefix}amount must be strictly positive, got {text}"),
            ),
            Some(amount) if amount > self.config.large_transfer_threshold => report.warn(
                IssueCheck::Parameters,
                Some(step_id),
                format!(
                    "{prefix}amount {text} exceeds large-transfer threshold {}",
                    self.config.large_transfer_threshold
                ),
            ),
            Some(_) => {}
        }
    }

    fn check_risk(&self, plan: &Plan, report: &mut ValidationReport) {
        let Some(highest) = plan.highest_step_risk() else {
            return;
        };
        if plan.overall_risk != highest {
            report.warn(
                IssueCheck::Risk,
                None,
                format!(
                    "overall risk '{}' differs from highest step risk '{}'",
                    plan.overall_risk, highest
                ),
            );
        }
    }

    fn check_conditions(&self, plan: &Plan, report: &mut ValidationReport) {
        for step in &plan.steps {
            for (index, condition) in step.conditions.iter().enumerate() {
                for problem in condition_problems(condition) {
                    report.error(
                        IssueCheck::Condition,
                        Some(&step.id),
                        format!("condition {index} ({}): {problem}", condition.kind),
                    );
                }
            }
        }
    }

    fn check_heuristics(&self, plan: &Plan, registry: &OperationRegistry, report: &mut ValidationReport) {
        if plan.steps.len() > self.config.max_steps {
            report.warn(
                IssueCheck::Heuristic,
                None,
                format!(
                    "plan has {} steps, more than the usual ceiling of {}",
                    plan.steps.len(),
                    self.config.max_steps
                ),
            );
        }

        let transfer_steps: Vec<&PlanStep> = plan
            .steps
            .iter()
            .filter(|step| {
                registry
                    .descriptor(&step.operation_name)
                    .is_some_and(|descriptor| descriptor.shape.is_transfer())
            })
            .collect();

        if transfer_steps.len() > self.config.max_transfer_steps {
            report.warn(
                IssueCheck::Heuristic,
                None,
                format!(
                    "plan has {} transfer steps, more than the usual ceiling of {}",
                    transfer_steps.len(),
                    self.config.max_transfer_steps
                ),
            );
        }

        for step in transfer_steps {
            if !step.has_balance_guard() {
                report.warn(
                    IssueCheck::Heuristic,
                    Some(&step.id),
                    "transfer has no balance condition guarding it",
                );
            }
        }
    }
}

fn condition_problems(condition: &Condition) -> Vec<String> {
    let mut problems = Vec::new();

    if condition.kind.is_market()
        && condition
            .symbol
            .as_deref()
            .map_or(true, |symbol| symbol.trim().is_empty())
    {
        problems.push("market condition requires a symbol".to_string());
    }

    match condition.kind {
        ConditionKind::Balance | ConditionKind::Price => {
            if condition.value.as_number().is_none() {
                problems.push(format!("expected a numeric value, got '{}'", condition.value));
            }
        }
        ConditionKind::Volatility => match condition.value.as_number() {
            None => problems.push(format!("expected a numeric value, got '{}'", condition.value)),
            Some(value) if value < 0.0 => {
                problems.push(format!("volatility must be non-negative, got {value}"))
            }
            Some(_) => {}
        },
        ConditionKind::Trend => {
            if TrendDirection::parse(&condition.value.as_text()).is_none() {
                problems.push(format!(
                    "trend must be bullish, bearish or neutral, got '{}'",
                    condition.value
                ));
            }
            if !condition.operator.is_equality() {
                problems.push(format!(
                    "trend supports only = and !=, got {}",
                    condition.operator
                ));
            }
        }
        ConditionKind::Custom => {
            if condition.field.trim().is_empty() {
                problems.push("custom condition requires a field".to_string());
            }
        }
    }

    problems
}
