//! Proposal transform: untrusted draft JSON -> validated [`Plan`].
//!
//! The draft is walked field by field so every schema problem is reported at once,
//! defaults are filled in, and the typed plan then goes through the
//! [`PlanValidator`]. Nothing is returned unless the combined report is clean.

use crate::error::PlanError;
use crate::risk::RiskClassifier;
use crate::types::{
    normalize_intent, ComparisonOperator, Condition, ConditionKind, ConditionValue, Parameters,
    Plan, PlanStep, RiskLevel, StepStatus,
};
use crate::operations::OperationRegistry;
use crate::validator::{IssueCheck, PlanValidator, ValidationIssue, ValidationReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A plan accepted by the validator, with the warnings the approver should see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreparedPlan {
    pub plan: Plan,
    pub warnings: Vec<ValidationIssue>,
}

/// Validate a draft and build the executable plan from it.
///
/// Returns [`PlanError::Validation`] carrying every schema and semantic error found.
pub fn validate_and_prepare(
    draft: &Value,
    registry: &OperationRegistry,
    classifier: &RiskClassifier,
    validator: &PlanValidator,
) -> Result<PreparedPlan, PlanError> {
    let (plan, report) = inspect_draft(draft, registry, classifier, validator);
    match plan {
        Some(plan) if report.valid => {
            tracing::info!(
                plan_id = %plan.id,
                steps = plan.steps.len(),
                overall_risk = %plan.overall_risk,
                requires_approval = plan.requires_approval,
                warnings = report.warnings.len(),
                "draft accepted"
            );
            Ok(PreparedPlan {
                plan,
                warnings: report.warnings,
            })
        }
        _ => Err(PlanError::Validation(report)),
    }
}

/// Full report for a draft, plus the typed plan when the draft was readable.
///
/// The plan is returned even when the report carries errors so callers can show
/// what was understood.
pub fn inspect_draft(
    draft: &Value,
    registry: &OperationRegistry,
    classifier: &RiskClassifier,
    validator: &PlanValidator,
) -> (Option<Plan>, ValidationReport) {
    let mut report = ValidationReport::new();
    let Some(plan) = DraftReader::new(registry, classifier, &mut report).read_plan(draft) else {
        return (None, report);
    };

    report.absorb(validator.validate(&plan, registry));
    review_step_risk(&plan, registry, classifier, &mut report);
    (Some(plan), report)
}

/// Warn where a declared step tier sits below what the classifier assigns.
fn review_step_risk(
    plan: &Plan,
    registry: &OperationRegistry,
    classifier: &RiskClassifier,
    report: &mut ValidationReport,
) {
    for step in &plan.steps {
        let Some(descriptor) = registry.descriptor(&step.operation_name) else {
            continue;
        };
        let assessed = classifier.classify_step(Some(&descriptor), &step.parameters);
        if step.risk < assessed {
            report.warn(
                IssueCheck::Risk,
                Some(&step.id),
                format!(
                    "declared risk '{}' is below the assessed '{}'",
                    step.risk, assessed
                ),
            );
        }
    }
}

struct DraftReader<'a> {
    registry: &'a OperationRegistry,
    classifier: &'a RiskClassifier,
    report: &'a mut ValidationReport,
}

impl<'a> DraftReader<'a> {
    fn new(
        registry: &'a OperationRegistry,
        classifier: &'a RiskClassifier,
        report: &'a mut ValidationReport,
    ) -> Self {
        Self {
            registry,
            classifier,
            report,
        }
    }

    fn schema_error(&mut self, step_id: Option<&str>, message: impl Into<String>) {
        self.report.error(IssueCheck::Schema, step_id, message);
    }

    fn read_plan(&mut self, draft: &Value) -> Option<Plan> {
        let Some(object) = draft.as_object() else {
            self.schema_error(None, "draft plan must be a JSON object");
            return None;
        };

        let raw_intent = self.required_string(object, "rawIntent", None).unwrap_or_default();
        let id = self.optional_string(object, "id", None);
        let normalized_intent = self.optional_string(object, "normalizedIntent", None);
        let created_at = self.optional_timestamp(object);
        let declared_risk = self.optional_risk(object, "overallRisk", None);
        let requires_approval = self.optional_bool(object, "requiresApproval");
        let can_rollback = self.optional_bool(object, "canRollback");

        let steps = match object.get("steps") {
            Some(Value::Array(items)) => {
                if items.is_empty() {
                    self.schema_error(None, "steps must not be empty");
                }
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(index, item)| self.read_step(index, item))
                    .collect()
            }
            Some(_) => {
                self.schema_error(None, "steps must be an array");
                Vec::new()
            }
            None => {
                self.schema_error(None, "missing required field 'steps'");
                Vec::new()
            }
        };

        let overall_risk = declared_risk.unwrap_or_else(|| {
            self.classifier
                .overall(steps.iter().map(|step: &PlanStep| step.risk))
        });

        Some(Plan {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            normalized_intent: normalized_intent.unwrap_or_else(|| normalize_intent(&raw_intent)),
            raw_intent,
            steps,
            overall_risk,
            created_at: created_at.unwrap_or_else(Utc::now),
            requires_approval: requires_approval.unwrap_or(overall_risk.is_abort_tier()),
            can_rollback: can_rollback.unwrap_or(false),
        })
    }

    fn read_step(&mut self, index: usize, item: &Value) -> Option<PlanStep> {
        let Some(object) = item.as_object() else {
            self.schema_error(None, format!("step at index {index} must be an object"));
            return None;
        };

        let id = match object.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(number)) => number.to_string(),
            Some(_) => {
                self.schema_error(None, format!("step at index {index}: 'id' must be a string"));
                return None;
            }
            None => {
                self.schema_error(None, format!("step at index {index}: missing required field 'id'"));
                return None;
            }
        };
        let step_id = Some(id.as_str());

        let human_action = self.required_string(object, "humanAction", step_id);
        let operation_name = self.required_string(object, "operationName", step_id);

        let parameters: Option<Parameters> = match object.get("parameters") {
            Some(Value::Object(map)) => Some(map.clone().into_iter().collect()),
            Some(_) => {
                self.schema_error(step_id, "'parameters' must be an object");
                None
            }
            None => {
                self.schema_error(step_id, "missing required field 'parameters'");
                None
            }
        };

        let conditions = match object.get("conditions") {
            None | Some(Value::Null) => Some(Vec::new()),
            Some(Value::Array(items)) => {
                let mut parsed = Vec::with_capacity(items.len());
                let mut intact = true;
                for (position, item) in items.iter().enumerate() {
                    match self.read_condition(&id, position, item) {
                        Some(condition) => parsed.push(condition),
                        None => intact = false,
                    }
                }
                intact.then_some(parsed)
            }
            Some(_) => {
                self.schema_error(step_id, "'conditions' must be an array");
                None
            }
        };

        let declared_risk = self.optional_risk(object, "risk", step_id);
        let status = match object.get("status") {
            None | Some(Value::Null) => Some(StepStatus::Pending),
            Some(Value::String(raw)) => match StepStatus::parse(raw) {
                Some(status) => Some(status),
                None => {
                    self.schema_error(step_id, format!("unknown step status '{raw}'"));
                    None
                }
            },
            Some(_) => {
                self.schema_error(step_id, "'status' must be a string");
                None
            }
        };

        let (human_action, operation_name, parameters, conditions, status) =
            (human_action?, operation_name?, parameters?, conditions?, status?);

        let risk = declared_risk.unwrap_or_else(|| {
            let descriptor = self.registry.descriptor(&operation_name);
            self.classifier.classify_step(descriptor.as_ref(), &parameters)
        });

        Some(PlanStep {
            id,
            human_action,
            operation_name,
            parameters,
            conditions,
            risk,
            status,
            result: None,
            error: None,
        })
    }

    fn read_condition(&mut self, step_id: &str, position: usize, item: &Value) -> Option<Condition> {
        let step = Some(step_id);
        let Some(object) = item.as_object() else {
            self.schema_error(step, format!("condition {position} must be an object"));
            return None;
        };
        let label = format!("condition {position}");

        let kind = match object.get("kind").and_then(Value::as_str) {
            Some(raw) => ConditionKind::parse(raw).or_else(|| {
                self.schema_error(step, format!("{label}: unknown kind '{raw}'"));
                None
            }),
            None => {
                self.schema_error(step, format!("{label}: missing string 'kind'"));
                None
            }
        };

        let operator = match object.get("operator").and_then(Value::as_str) {
            Some(raw) => ComparisonOperator::parse(raw).or_else(|| {
                self.schema_error(step, format!("{label}: unknown operator '{raw}'"));
                None
            }),
            None => {
                self.schema_error(step, format!("{label}: missing string 'operator'"));
                None
            }
        };

        let value = match object.get("value") {
            Some(Value::Number(number)) => number.as_f64().map(ConditionValue::Number),
            Some(Value::String(text)) => Some(ConditionValue::Text(text.clone())),
            Some(_) => {
                self.schema_error(step, format!("{label}: 'value' must be a number or string"));
                None
            }
            None => {
                self.schema_error(step, format!("{label}: missing 'value'"));
                None
            }
        };

        let field = self.optional_string(object, "field", step);
        let description = self.optional_string(object, "description", step);
        let symbol = self.optional_string(object, "symbol", step);

        let (kind, operator, value) = (kind?, operator?, value?);
        // Numeric kinds carry numbers; "0.10" from a draft becomes 0.10.
        let numeric_kind = matches!(
            kind,
            ConditionKind::Balance | ConditionKind::Price | ConditionKind::Volatility
        );
        let value = match value.as_number() {
            Some(number) if numeric_kind => ConditionValue::Number(number),
            _ => value,
        };

        Some(Condition {
            kind,
            field: field.unwrap_or_else(|| match kind {
                ConditionKind::Custom => String::new(),
                other => other.name().to_string(),
            }),
            operator,
            value,
            description: description.unwrap_or_default(),
            symbol,
        })
    }

    fn required_string(
        &mut self,
        object: &Map<String, Value>,
        key: &str,
        step_id: Option<&str>,
    ) -> Option<String> {
        match object.get(key) {
            Some(Value::String(value)) => Some(value.clone()),
            Some(_) => {
                self.schema_error(step_id, format!("'{key}' must be a string"));
                None
            }
            None => {
                self.schema_error(step_id, format!("missing required field '{key}'"));
                None
            }
        }
    }

    fn optional_string(
        &mut self,
        object: &Map<String, Value>,
        key: &str,
        step_id: Option<&str>,
    ) -> Option<String> {
        match object.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(_) => {
                self.schema_error(step_id, format!("'{key}' must be a string"));
                None
            }
        }
    }

    fn optional_bool(&mut self, object: &Map<String, Value>, key: &str) -> Option<bool> {
        match object.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Bool(value)) => Some(*value),
            Some(_) => {
                self.schema_error(None, format!("'{key}' must be a boolean"));
                None
            }
        }
    }

    fn optional_risk(
        &mut self,
        object: &Map<String, Value>,
        key: &str,
        step_id: Option<&str>,
    ) -> Option<RiskLevel> {
        let raw = self.optional_string(object, key, step_id)?;
        let parsed = RiskLevel::parse(&raw);
        if parsed.is_none() {
            self.schema_error(
                step_id,
                format!("'{key}' must be one of low, medium, high, critical; got '{raw}'"),
            );
        }
        parsed
    }

    fn optional_timestamp(&mut self, object: &Map<String, Value>) -> Option<DateTime<Utc>> {
        let raw = self.optional_string(object, "createdAt", None)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(timestamp) => Some(timestamp.with_timezone(&Utc)),
            Err(err) => {
                self.schema_error(None, format!("'createdAt' is not an RFC 3339 timestamp: {err}"));
                None
            }
        }
    }
}
