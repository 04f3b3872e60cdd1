use async_trait::async_trait;
use intentpay_adapters::{Fixture, InMemoryLedger, StaticMarketData, UnreachableMarketData};
use intentpay_core::state::{CURRENT_BALANCE, LAST_TX_HASH};
use intentpay_core::{
    ComparisonOperator, Condition, ConditionEvaluator, ConditionKind, ConditionValue,
    EngineConfig, ExecuteOptions, ExecutionState, ExecutionSummary, IssueCheck, MarketDataClient,
    MarketDataConnector, MarketQuote, PaymentRuntime, PlanError, RiskLevel, StepStatus,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SENDER: &str = "0x1111111111111111111111111111111111111111";
const RECIPIENT: &str = "0x2222222222222222222222222222222222222222";

fn funded_ledger(amount: &str) -> Arc<InMemoryLedger> {
    Arc::new(
        InMemoryLedger::new()
            .with_token("CRO", 18)
            .fund(SENDER, "CRO", amount)
            .unwrap(),
    )
}

fn runtime(ledger: Arc<InMemoryLedger>) -> PaymentRuntime {
    PaymentRuntime::bootstrap(
        EngineConfig::default().with_account(SENDER),
        ledger,
        Arc::new(StaticMarketData::new([
            MarketQuote::new("CRO", 0.12).with_change_24h(3.4)
        ])),
    )
}

fn balance_then_transfer(amount: &str) -> Value {
    json!({
        "rawIntent": format!("Check my balance and send {amount} CRO to {RECIPIENT}"),
        "steps": [
            {
                "id": "1",
                "humanAction": "Check CRO balance",
                "operationName": "getBalance",
                "parameters": {}
            },
            {
                "id": "2",
                "humanAction": format!("Send {amount} CRO"),
                "operationName": "transfer",
                "parameters": {"to": RECIPIENT, "amount": amount},
                "conditions": [{
                    "kind": "balance",
                    "field": "balance",
                    "operator": ">=",
                    "value": amount,
                    "description": "enough CRO to cover the transfer"
                }]
            }
        ]
    })
}

fn single_transfer(amount: &str) -> Value {
    json!({
        "rawIntent": format!("send {amount} CRO"),
        "steps": [{
            "id": "1",
            "humanAction": "send",
            "operationName": "transfer",
            "parameters": {"to": RECIPIENT, "amount": amount},
            "conditions": [{"kind": "balance", "operator": ">=", "value": amount}]
        }]
    })
}

#[tokio::test]
async fn guarded_transfer_with_sufficient_balance_completes() {
    let ledger = funded_ledger("100");
    let runtime = runtime(ledger.clone());

    let prepared = runtime.prepare(&balance_then_transfer("5")).unwrap();
    let result = runtime
        .engine()
        .execute(prepared.plan, ExecuteOptions::default())
        .await
        .unwrap();

    assert!(result
        .plan
        .steps
        .iter()
        .all(|step| step.status == StepStatus::Completed));
    assert_eq!(result.summary.completed, 2);
    assert!(!result.summary.aborted);

    let settled = ledger.settled().await;
    assert_eq!(settled.len(), 1);
    assert_eq!(
        result.execution_state.get(LAST_TX_HASH),
        Some(&Value::String(settled[0].tx_hash.clone()))
    );
    assert_eq!(result.execution_state.get(CURRENT_BALANCE), Some(&json!(100.0)));
    assert_eq!(ledger.balance_of(RECIPIENT, "CRO").await.as_deref(), Some("5"));
    assert_eq!(ledger.balance_of(SENDER, "CRO").await.as_deref(), Some("95"));
}

#[tokio::test]
async fn insufficient_balance_on_critical_transfer_aborts() {
    let ledger = funded_ledger("50");
    let runtime = runtime(ledger.clone());

    let prepared = runtime.prepare(&balance_then_transfer("1000000")).unwrap();
    assert_eq!(prepared.plan.steps[1].risk, RiskLevel::Critical);
    assert!(prepared.plan.requires_approval);

    let result = runtime
        .engine()
        .execute(prepared.plan, ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(
        result.summary,
        ExecutionSummary {
            total: 2,
            completed: 1,
            failed: 0,
            skipped: 1,
            aborted: true,
        }
    );
    assert_eq!(result.plan.steps[1].status, StepStatus::Skipped);
    assert!(result.plan.steps[1]
        .error
        .as_deref()
        .unwrap()
        .contains("not satisfied"));
    assert!(ledger.settled().await.is_empty());
}

#[tokio::test]
async fn unreachable_market_degrades_price_condition_to_unmet() {
    let market = Arc::new(UnreachableMarketData::new("quotes-api", "connection refused"));
    let evaluator = ConditionEvaluator::new(SENDER, "CRO", funded_ledger("100"), market.clone());
    let condition = Condition::market(
        ConditionKind::Price,
        "CRO",
        ComparisonOperator::GreaterThan,
        ConditionValue::Number(0.10),
    );

    let outcome = evaluator.evaluate(&condition, &ExecutionState::new()).await;
    assert!(!outcome.met);
    assert!(outcome.reason.contains("quotes-api"));
    assert!(outcome.reason.contains("unreachable"));

    evaluator.evaluate(&condition, &ExecutionState::new()).await;
    assert_eq!(market.connection_attempts(), 1);
}

/// Refuses the first connection, then serves quotes.
struct RecoveringMarket {
    quotes: StaticMarketData,
    attempts: AtomicUsize,
}

#[async_trait]
impl MarketDataConnector for RecoveringMarket {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn connect(&self) -> Result<Arc<dyn MarketDataClient>, PlanError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(PlanError::Market("transient blip".to_string()));
        }
        self.quotes.connect().await
    }
}

#[tokio::test]
async fn quote_step_recovers_after_one_failed_connect() {
    let market = Arc::new(RecoveringMarket {
        quotes: StaticMarketData::new([MarketQuote::new("CRO", 0.12)]),
        attempts: AtomicUsize::new(0),
    });
    let runtime = PaymentRuntime::bootstrap(
        EngineConfig::default().with_account(SENDER),
        funded_ledger("100"),
        market.clone(),
    );
    let draft = json!({
        "rawIntent": "quote CRO",
        "steps": [{
            "id": "1",
            "humanAction": "Fetch the CRO price",
            "operationName": "getQuote",
            "parameters": {"symbol": "CRO"}
        }]
    });

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let prepared = runtime.prepare(&draft).unwrap();
        let result = runtime
            .engine()
            .execute(prepared.plan, ExecuteOptions::default())
            .await
            .unwrap();
        let step = &result.plan.steps[0];
        if step.status == StepStatus::Failed {
            assert_eq!(
                step.error.as_deref(),
                Some("Market data error: market data service 'flaky' is unreachable: transient blip")
            );
        }
        statuses.push(step.status);
    }

    assert_eq!(
        statuses,
        vec![StepStatus::Failed, StepStatus::Completed, StepStatus::Completed]
    );
    assert_eq!(market.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exponent_amount_is_rejected_before_execution() {
    let runtime = runtime(funded_ledger("100"));

    for amount in ["5e0", "+5"] {
        let err = runtime.prepare(&single_transfer(amount)).unwrap_err();
        let PlanError::Validation(report) = err else {
            panic!("expected a validation error for {amount}");
        };
        assert!(report
            .errors
            .iter()
            .any(|issue| issue.check == IssueCheck::Parameters
                && issue.message.contains("not a plain decimal number")));
    }
}

#[tokio::test]
async fn unknown_operation_is_rejected_before_execution() {
    let runtime = runtime(funded_ledger("100"));
    let err = runtime
        .prepare(&json!({
            "rawIntent": "do the impossible",
            "steps": [{
                "id": "1",
                "humanAction": "???",
                "operationName": "doesNotExist",
                "parameters": {}
            }]
        }))
        .unwrap_err();

    let PlanError::Validation(report) = err else {
        panic!("expected a validation error");
    };
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].check, IssueCheck::Operation);
    assert!(report.errors[0].message.contains("doesNotExist"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_plans_share_one_gap_free_nonce_sequence() {
    let ledger = funded_ledger("1000");
    let runtime = runtime(ledger.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let plan = runtime.prepare(&single_transfer("1")).unwrap().plan;
        let mut engine = runtime.engine();
        handles.push(tokio::spawn(async move {
            engine.execute(plan, ExecuteOptions::default()).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.summary.completed, 1, "{:?}", result.plan.steps[0].error);
    }

    let mut nonces: Vec<u64> = ledger.settled().await.iter().map(|t| t.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, (0..8).collect::<Vec<_>>());
    assert_eq!(ledger.balance_of(SENDER, "CRO").await.as_deref(), Some("992"));
}

#[tokio::test]
async fn batch_transfer_uses_consecutive_nonces() {
    let ledger = funded_ledger("100");
    let runtime = runtime(ledger.clone());

    let prepared = runtime
        .prepare(&json!({
            "rawIntent": "split 9 CRO between two friends",
            "steps": [{
                "id": "pay",
                "humanAction": "pay both",
                "operationName": "batchTransfer",
                "parameters": {"recipients": [
                    {"to": RECIPIENT, "amount": "4"},
                    {"to": "0x4444444444444444444444444444444444444444", "amount": "5"}
                ]},
                "conditions": [{"kind": "balance", "operator": ">=", "value": 9}]
            }]
        }))
        .unwrap();

    let result = runtime
        .engine()
        .execute(prepared.plan, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.summary.completed, 1);

    let nonces: Vec<u64> = ledger.settled().await.iter().map(|t| t.nonce).collect();
    assert_eq!(nonces, vec![0, 1]);
    assert_eq!(ledger.balance_of(SENDER, "CRO").await.as_deref(), Some("91"));
}

#[tokio::test]
async fn submission_failure_resets_nonce_cache() {
    let ledger = funded_ledger("100");
    let runtime = runtime(ledger.clone());
    let nonces = runtime.nonces();

    let first = runtime.prepare(&single_transfer("1")).unwrap().plan;
    runtime
        .engine()
        .execute(first, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(nonces.snapshot().await.next, Some(1));

    ledger.fail_next_transfers(1, "connection reset by peer").await;
    let failing = runtime.prepare(&single_transfer("1")).unwrap().plan;
    let result = runtime
        .engine()
        .execute(failing, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.summary.failed, 1);
    assert!(result.plan.steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("connection reset by peer"));
    assert_eq!(nonces.snapshot().await.next, None);

    let queries_before = ledger.sequence_queries().await;
    let retry = runtime.prepare(&single_transfer("1")).unwrap().plan;
    let result = runtime
        .engine()
        .execute(retry, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.summary.completed, 1);
    assert_eq!(ledger.sequence_queries().await, queries_before + 1);
    assert_eq!(ledger.next_nonce(SENDER).await, 2);
}

#[tokio::test(start_paused = true)]
async fn stale_cache_requeries_the_ledger_once() {
    let ledger = funded_ledger("100");
    let runtime = runtime(ledger.clone());

    for _ in 0..2 {
        let plan = runtime.prepare(&single_transfer("1")).unwrap().plan;
        runtime.engine().execute(plan, ExecuteOptions::default()).await.unwrap();
    }
    assert_eq!(ledger.sequence_queries().await, 1);

    tokio::time::advance(Duration::from_millis(2_000)).await;
    let plan = runtime.prepare(&single_transfer("1")).unwrap().plan;
    runtime.engine().execute(plan, ExecuteOptions::default()).await.unwrap();
    assert_eq!(ledger.sequence_queries().await, 2);
    assert_eq!(ledger.next_nonce(SENDER).await, 3);
}

#[tokio::test]
async fn conditions_can_chain_on_earlier_results() {
    let ledger = funded_ledger("100");
    let runtime = runtime(ledger.clone());

    let prepared = runtime
        .prepare(&json!({
            "rawIntent": "if CRO is bullish and above 10 cents, send 5 CRO then confirm",
            "steps": [
                {
                    "id": "send",
                    "humanAction": "send 5 CRO",
                    "operationName": "transfer",
                    "parameters": {"to": RECIPIENT, "amount": "5"},
                    "conditions": [
                        {"kind": "trend", "operator": "=", "value": "bullish", "symbol": "CRO"},
                        {"kind": "price", "operator": ">", "value": "0.10", "symbol": "CRO"},
                        {"kind": "balance", "operator": ">=", "value": 5}
                    ]
                },
                {
                    "id": "confirm",
                    "humanAction": "check balance after sending",
                    "operationName": "getBalance",
                    "parameters": {},
                    "conditions": [
                        {"kind": "custom", "field": "step_send_status", "operator": "=", "value": "completed"}
                    ]
                }
            ]
        }))
        .unwrap();

    let result = runtime
        .engine()
        .execute(prepared.plan, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.summary.completed, 2, "{:?}", result.plan.steps);
    assert_eq!(result.execution_state.get(CURRENT_BALANCE), Some(&json!(95.0)));
}

#[tokio::test]
async fn audit_fingerprint_matches_the_accepted_plan() {
    let runtime = runtime(funded_ledger("100"));
    let prepared = runtime.prepare(&balance_then_transfer("5")).unwrap();
    let fingerprint = prepared.plan.fingerprint().unwrap();

    let result = runtime
        .engine()
        .execute(prepared.plan, ExecuteOptions::default())
        .await
        .unwrap();
    let audit = result.audit_record().unwrap();

    assert_eq!(audit.plan_fingerprint, fingerprint);
    assert_eq!(audit.steps.len(), 2);
    assert_eq!(audit.summary, result.summary);
}

#[tokio::test]
async fn fixture_seeds_a_dry_run() {
    let fixture = Fixture::from_json(&format!(
        r#"{{
            "tokens": {{"CRO": 18}},
            "balances": {{"{SENDER}": {{"CRO": "20"}}}},
            "market_unreachable": true
        }}"#
    ))
    .unwrap();
    let ledger = Arc::new(fixture.ledger().unwrap());
    let runtime = PaymentRuntime::bootstrap(
        EngineConfig::default().with_account(SENDER),
        ledger.clone(),
        fixture.market(),
    );

    let prepared = runtime
        .prepare(&json!({
            "rawIntent": "send 5 CRO if price is above 10 cents",
            "steps": [{
                "id": "1",
                "humanAction": "send",
                "operationName": "transfer",
                "parameters": {"to": RECIPIENT, "amount": "5"},
                "conditions": [
                    {"kind": "price", "operator": ">", "value": 0.1, "symbol": "CRO"},
                    {"kind": "balance", "operator": ">=", "value": 5}
                ]
            }]
        }))
        .unwrap();

    let result = runtime
        .engine()
        .execute(prepared.plan, ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.plan.steps[0].status, StepStatus::Skipped);
    assert!(result.plan.steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("unreachable"));
    assert!(!result.summary.aborted);
    assert!(ledger.settled().await.is_empty());
}
