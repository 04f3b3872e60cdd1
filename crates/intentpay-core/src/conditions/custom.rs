use super::compare::{compare_numbers, compare_text};
use super::{ConditionCheck, ConditionOutcome, EvaluationContext};
use crate::types::Condition;
use async_trait::async_trait;
use serde_json::Value;

/// Looks `field` up in the execution state written by earlier steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateCheck;

#[async_trait]
impl ConditionCheck for StateCheck {
    async fn evaluate(
        &self,
        condition: &Condition,
        context: &EvaluationContext<'_>,
    ) -> ConditionOutcome {
        let Some(actual) = context.state.get(&condition.field) else {
            return ConditionOutcome::unmet(format!(
                "field '{}' not found in execution state",
                condition.field
            ));
        };

        if let (Some(actual_number), Some(expected)) =
            (numeric_value(actual), condition.value.as_number())
        {
            let met = compare_numbers(actual_number, condition.operator, expected);
            return ConditionOutcome::decided(
                met,
                format!(
                    "{} = {} {} {}: {}",
                    condition.field,
                    actual_number,
                    condition.operator,
                    expected,
                    if met { "satisfied" } else { "not satisfied" }
                ),
            )
            .with_actual(actual.clone());
        }

        let actual_text = text_value(actual);
        let expected_text = condition.value.as_text();
        match compare_text(&actual_text, condition.operator, &expected_text) {
            Some(met) => ConditionOutcome::decided(
                met,
                format!(
                    "{} = '{}' {} '{}': {}",
                    condition.field,
                    actual_text,
                    condition.operator,
                    expected_text,
                    if met { "satisfied" } else { "not satisfied" }
                ),
            )
            .with_actual(actual.clone()),
            None => ConditionOutcome::unmet(format!(
                "cannot apply {} to non-numeric field '{}' (value '{}')",
                condition.operator, condition.field, actual_text
            ))
            .with_actual(actual.clone()),
        }
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => crate::units::parse_amount(text),
        _ => None,
    }
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
