//! Condition evaluation.
//!
//! Each [`ConditionKind`] has one [`ConditionCheck`] implementation and the
//! [`ConditionEvaluator`] picks it with a match. Collaborator failures never escape:
//! they come back as an unmet [`ConditionOutcome`] carrying the reason.

pub mod balance;
pub mod compare;
pub mod custom;
pub mod market;

use crate::ledger::LedgerClient;
use crate::market::MarketDataConnector;
use crate::state::ExecutionState;
use crate::types::{Condition, ConditionKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use balance::BalanceCheck;
pub use custom::StateCheck;
pub use market::{MarketCheck, MarketSession};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionOutcome {
    pub met: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<Value>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_data: Option<Value>,
}

impl ConditionOutcome {
    pub fn met(reason: impl Into<String>) -> Self {
        Self {
            met: true,
            actual_value: None,
            reason: reason.into(),
            observed_data: None,
        }
    }

    pub fn unmet(reason: impl Into<String>) -> Self {
        Self {
            met: false,
            actual_value: None,
            reason: reason.into(),
            observed_data: None,
        }
    }

    pub fn decided(met: bool, reason: impl Into<String>) -> Self {
        if met {
            Self::met(reason)
        } else {
            Self::unmet(reason)
        }
    }

    pub fn with_actual(mut self, actual: impl Into<Value>) -> Self {
        self.actual_value = Some(actual.into());
        self
    }

    pub fn with_observed(mut self, observed: Option<Value>) -> Self {
        self.observed_data = observed;
        self
    }
}

/// Everything a check may look at.
pub struct EvaluationContext<'a> {
    pub account: &'a str,
    pub default_token: &'a str,
    pub ledger: &'a dyn LedgerClient,
    pub market: &'a MarketSession,
    pub state: &'a ExecutionState,
}

/// One implementation per condition kind family.
#[async_trait]
pub trait ConditionCheck: Send + Sync {
    async fn evaluate(
        &self,
        condition: &Condition,
        context: &EvaluationContext<'_>,
    ) -> ConditionOutcome;
}

/// Result of evaluating a step's conditions in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConditionsVerdict {
    /// Outcomes up to and including the first unmet condition.
    pub outcomes: Vec<ConditionOutcome>,
}

impl ConditionsVerdict {
    /// Vacuously true for a step without conditions.
    pub fn all_met(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.met)
    }

    pub fn first_unmet(&self) -> Option<&ConditionOutcome> {
        self.outcomes.iter().find(|outcome| !outcome.met)
    }
}

/// Evaluates conditions for one acting account.
///
/// The market-data connection is opened on first use and its outcome kept for the
/// evaluator's lifetime.
pub struct ConditionEvaluator {
    account: String,
    default_token: String,
    ledger: Arc<dyn LedgerClient>,
    market: MarketSession,
}

impl ConditionEvaluator {
    pub fn new(
        account: impl Into<String>,
        default_token: impl Into<String>,
        ledger: Arc<dyn LedgerClient>,
        market: Arc<dyn MarketDataConnector>,
    ) -> Self {
        Self {
            account: account.into(),
            default_token: default_token.into(),
            ledger,
            market: MarketSession::new(market),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn default_token(&self) -> &str {
        &self.default_token
    }

    pub async fn evaluate(&self, condition: &Condition, state: &ExecutionState) -> ConditionOutcome {
        let context = EvaluationContext {
            account: &self.account,
            default_token: &self.default_token,
            ledger: self.ledger.as_ref(),
            market: &self.market,
            state,
        };

        let outcome = match condition.kind {
            ConditionKind::Balance => BalanceCheck.evaluate(condition, &context).await,
            ConditionKind::Price | ConditionKind::Volatility | ConditionKind::Trend => {
                MarketCheck.evaluate(condition, &context).await
            }
            ConditionKind::Custom => StateCheck.evaluate(condition, &context).await,
        };

        tracing::debug!(
            kind = %condition.kind,
            condition = %condition.label(),
            met = outcome.met,
            reason = %outcome.reason,
            "condition evaluated"
        );
        outcome
    }

    /// Conjunctive evaluation in declaration order, stopping at the first unmet one.
    pub async fn evaluate_all(
        &self,
        conditions: &[Condition],
        state: &ExecutionState,
    ) -> ConditionsVerdict {
        let mut verdict = ConditionsVerdict::default();
        for condition in conditions {
            let outcome = self.evaluate(condition, state).await;
            let met = outcome.met;
            verdict.outcomes.push(outcome);
            if !met {
                break;
            }
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketQuote;
    use crate::state::CURRENT_BALANCE;
    use crate::testing::{StaticConnector, StubLedger, UnreachableConnector};
    use crate::types::{ComparisonOperator, ConditionValue};

    fn evaluator(balance: &str) -> ConditionEvaluator {
        ConditionEvaluator::new(
            "0xsender",
            "CRO",
            Arc::new(StubLedger::with_balance(balance)),
            Arc::new(StaticConnector::new(vec![
                MarketQuote::new("CRO", 0.12).with_change_24h(3.5)
            ])),
        )
    }

    #[tokio::test]
    async fn empty_condition_list_is_vacuously_met() {
        let verdict = evaluator("1")
            .evaluate_all(&[], &ExecutionState::new())
            .await;
        assert!(verdict.all_met());
        assert!(verdict.outcomes.is_empty());
    }

    #[tokio::test]
    async fn evaluation_stops_at_first_unmet_condition() {
        let conditions = vec![
            Condition::balance_at_least(1_000.0),
            Condition::market(
                ConditionKind::Price,
                "CRO",
                ComparisonOperator::GreaterThan,
                ConditionValue::Number(0.10),
            ),
        ];

        let verdict = evaluator("50")
            .evaluate_all(&conditions, &ExecutionState::new())
            .await;

        assert!(!verdict.all_met());
        assert_eq!(verdict.outcomes.len(), 1);
        assert!(verdict.first_unmet().unwrap().reason.contains("balance"));
    }

    #[tokio::test]
    async fn dispatches_each_kind() {
        let evaluator = evaluator("100");
        let mut state = ExecutionState::new();
        state.record(CURRENT_BALANCE, 100.0);

        let conditions = vec![
            Condition::balance_at_least(5.0),
            Condition::market(
                ConditionKind::Trend,
                "CRO",
                ComparisonOperator::Equal,
                ConditionValue::Text("bullish".into()),
            ),
            Condition::new(
                ConditionKind::Custom,
                CURRENT_BALANCE,
                ComparisonOperator::GreaterThan,
                ConditionValue::Number(99.0),
            ),
        ];

        let verdict = evaluator.evaluate_all(&conditions, &state).await;
        assert!(verdict.all_met(), "{:?}", verdict);
        assert_eq!(verdict.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn unreachable_market_only_affects_market_conditions() {
        let evaluator = ConditionEvaluator::new(
            "0xsender",
            "CRO",
            Arc::new(StubLedger::with_balance("100")),
            Arc::new(UnreachableConnector::new("quotes-api")),
        );
        let state = ExecutionState::new();

        let price = Condition::market(
            ConditionKind::Price,
            "CRO",
            ComparisonOperator::GreaterThan,
            ConditionValue::Number(0.10),
        );
        let outcome = evaluator.evaluate(&price, &state).await;
        assert!(!outcome.met);
        assert!(outcome.reason.contains("unreachable"));

        let balance = evaluator
            .evaluate(&Condition::balance_at_least(5.0), &state)
            .await;
        assert!(balance.met);
    }
}
