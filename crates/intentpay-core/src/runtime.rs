//! Wiring for one signing account: registry, nonce coordinator, validator and
//! classifier built once and shared by every engine handed out.

use crate::builtin::{register_all, AccountLedger};
use crate::conditions::ConditionEvaluator;
use crate::config::EngineConfig;
use crate::engine::ExecutionEngine;
use crate::error::PlanError;
use crate::ledger::LedgerClient;
use crate::market::MarketDataConnector;
use crate::nonce::NonceCoordinator;
use crate::operations::{Operation, OperationRegistry};
use crate::prepare::{inspect_draft, validate_and_prepare, PreparedPlan};
use crate::risk::RiskClassifier;
use crate::types::Plan;
use crate::validator::{PlanValidator, ValidationReport};
use serde_json::Value;
use std::sync::Arc;

pub struct PaymentRuntime {
    config: EngineConfig,
    ledger: Arc<dyn LedgerClient>,
    market: Arc<dyn MarketDataConnector>,
    nonces: Arc<NonceCoordinator>,
    registry: Arc<OperationRegistry>,
    validator: PlanValidator,
    classifier: RiskClassifier,
}

impl PaymentRuntime {
    /// Build the runtime with the built-in operations registered.
    pub fn bootstrap(
        config: EngineConfig,
        ledger: Arc<dyn LedgerClient>,
        market: Arc<dyn MarketDataConnector>,
    ) -> Self {
        Self::bootstrap_with(config, ledger, market, Vec::new())
    }

    /// Same as [`PaymentRuntime::bootstrap`], plus caller-supplied operations.
    /// An extra operation replaces a built-in of the same name.
    pub fn bootstrap_with(
        config: EngineConfig,
        ledger: Arc<dyn LedgerClient>,
        market: Arc<dyn MarketDataConnector>,
        extra: Vec<Arc<dyn Operation>>,
    ) -> Self {
        let nonces = Arc::new(NonceCoordinator::new(
            config.account.clone(),
            ledger.clone(),
            config.nonce.clone(),
        ));
        let account = AccountLedger::new(config.token.clone(), ledger.clone(), nonces.clone());

        let mut registry = OperationRegistry::new();
        register_all(&mut registry, &account, market.clone());
        for operation in extra {
            registry.register(operation);
        }

        tracing::info!(
            account = %config.account,
            token = %config.token,
            operations = ?registry.names(),
            "payment runtime ready"
        );

        Self {
            validator: PlanValidator::new(config.validator.clone()),
            classifier: RiskClassifier::new(config.risk_bands.clone()),
            config,
            ledger,
            market,
            nonces,
            registry: Arc::new(registry),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn nonces(&self) -> Arc<NonceCoordinator> {
        self.nonces.clone()
    }

    pub fn validator(&self) -> &PlanValidator {
        &self.validator
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    pub fn prepare(&self, draft: &Value) -> Result<PreparedPlan, PlanError> {
        validate_and_prepare(draft, &self.registry, &self.classifier, &self.validator)
    }

    /// Report for a draft without rejecting it.
    pub fn inspect(&self, draft: &Value) -> (Option<Plan>, ValidationReport) {
        inspect_draft(draft, &self.registry, &self.classifier, &self.validator)
    }

    /// A fresh engine with empty state. Engines from one runtime share its nonce
    /// coordinator, so they may run concurrently against the same account.
    pub fn engine(&self) -> ExecutionEngine {
        let evaluator = ConditionEvaluator::new(
            self.config.account.clone(),
            self.config.token.clone(),
            self.ledger.clone(),
            self.market.clone(),
        );
        ExecutionEngine::new(self.registry.clone(), evaluator, self.validator.clone())
    }
}

impl std::fmt::Debug for PaymentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentRuntime")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecuteOptions;
    use crate::testing::{StaticConnector, StubLedger, RECIPIENT, SENDER};
    use crate::types::StepStatus;
    use serde_json::json;

    #[tokio::test]
    async fn prepare_then_execute() {
        let ledger = Arc::new(StubLedger::with_balance("100"));
        let runtime = PaymentRuntime::bootstrap(
            EngineConfig::default().with_account(SENDER),
            ledger.clone(),
            Arc::new(StaticConnector::new(Vec::new())),
        );

        let prepared = runtime
            .prepare(&json!({
                "rawIntent": "send 5 CRO",
                "steps": [{
                    "id": "1",
                    "humanAction": "send 5 CRO",
                    "operationName": "transfer",
                    "parameters": {"to": RECIPIENT, "amount": "5"},
                    "conditions": [{"kind": "balance", "operator": ">=", "value": 5}]
                }]
            }))
            .unwrap();

        let result = runtime
            .engine()
            .execute(prepared.plan, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(result.plan.steps[0].status, StepStatus::Completed);
        assert_eq!(ledger.transfers()[0].from, SENDER);
    }
}
