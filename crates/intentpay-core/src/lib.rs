//! Conditional execution engine for intent-driven payments.
//!
//! A draft plan proposed from a natural-language intent is validated into a typed
//! [`Plan`], then executed step by step: each step's conditions are evaluated against
//! live ledger and market data and against the results of earlier steps, mutating
//! calls are serialized per account by the [`NonceCoordinator`], and a failed or
//! unmet `high`/`critical` step aborts the remainder of the plan.

#![deny(unsafe_code)]

pub mod audit;
pub mod builtin;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod market;
pub mod nonce;
pub mod operations;
pub mod prepare;
pub mod risk;
pub mod runtime;
pub mod state;
pub mod types;
pub mod units;
pub mod validator;

#[cfg(test)]
mod testing;

pub use audit::{ExecutionAudit, StepAudit};
pub use builtin::{register_all, AccountLedger, RecipientKind};
pub use conditions::{ConditionEvaluator, ConditionOutcome, ConditionsVerdict, MarketSession};
pub use config::EngineConfig;
pub use engine::{ExecuteOptions, ExecutionEngine, ExecutionResult, ExecutionSummary};
pub use error::PlanError;
pub use ledger::{
    is_valid_address, BlockTag, FeeEstimate, FeeRequest, LedgerClient, TokenBalance,
    TransferReceipt, TransferRequest,
};
pub use market::{MarketDataClient, MarketDataConnector, MarketQuote};
pub use nonce::{NonceConfig, NonceCoordinator, NonceSnapshot};
pub use operations::{
    Operation, OperationDescriptor, OperationRegistry, ParameterShape,
};
pub use prepare::{inspect_draft, validate_and_prepare, PreparedPlan};
pub use risk::{RiskBands, RiskClassifier};
pub use runtime::PaymentRuntime;
pub use state::ExecutionState;
pub use types::{
    ComparisonOperator, Condition, ConditionKind, ConditionValue, Parameters, Plan, PlanStep,
    RiskLevel, StepStatus, TrendDirection,
};
pub use units::{format_units, parse_units};
pub use validator::{IssueCheck, PlanValidator, ValidationIssue, ValidationReport, ValidatorConfig};
