use super::compare::compare_numbers;
use super::{ConditionCheck, ConditionOutcome, EvaluationContext};
use crate::types::Condition;
use async_trait::async_trait;

/// Acting account's token balance against the expected value.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceCheck;

#[async_trait]
impl ConditionCheck for BalanceCheck {
    async fn evaluate(
        &self,
        condition: &Condition,
        context: &EvaluationContext<'_>,
    ) -> ConditionOutcome {
        let token = condition
            .symbol
            .as_deref()
            .unwrap_or(context.default_token);

        let Some(expected) = condition.value.as_number() else {
            return ConditionOutcome::unmet(format!(
                "balance condition expects a numeric value, got '{}'",
                condition.value
            ));
        };

        let balance = match context.ledger.get_balance(token, context.account).await {
            Ok(balance) => balance,
            Err(err) => {
                return ConditionOutcome::unmet(format!(
                    "balance query for {} on {} failed: {}",
                    token, context.account, err
                ));
            }
        };

        let observed = serde_json::to_value(&balance).ok();
        let Some(actual) = balance.amount_f64() else {
            return ConditionOutcome::unmet(format!(
                "ledger returned a non-numeric balance '{}' for {}",
                balance.amount, token
            ))
            .with_observed(observed);
        };

        let met = compare_numbers(actual, condition.operator, expected);
        let reason = format!(
            "balance {} {} {} {}: {}",
            balance.amount,
            balance.symbol,
            condition.operator,
            expected,
            if met { "satisfied" } else { "not satisfied" }
        );

        ConditionOutcome::decided(met, reason)
            .with_actual(actual)
            .with_observed(observed)
    }
}
