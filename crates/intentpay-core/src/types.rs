use crate::error::PlanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// String-keyed parameter record handed to an operation.
pub type Parameters = BTreeMap<String, Value>;

/// Safety classification driving the abort policy.
///
/// Ordering is defined by [`RiskLevel::rank`], never by the textual name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Failures or unmet conditions at this tier abort the remaining plan.
    pub fn is_abort_tier(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    /// Highest tier in `levels`, `None` when empty.
    pub fn max_of(levels: impl IntoIterator<Item = RiskLevel>) -> Option<RiskLevel> {
        levels.into_iter().max()
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-step lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// `pending -> skipped` is the abort shortcut; everything else goes through
    /// `in_progress`.
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Skipped)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Skipped)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Balance,
    Price,
    Volatility,
    Trend,
    Custom,
}

impl ConditionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Balance => "balance",
            Self::Price => "price",
            Self::Volatility => "volatility",
            Self::Trend => "trend",
            Self::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "balance" => Some(Self::Balance),
            "price" => Some(Self::Price),
            "volatility" => Some(Self::Volatility),
            "trend" => Some(Self::Trend),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Market-backed kinds need a `symbol`.
    pub fn is_market(self) -> bool {
        matches!(self, Self::Price | Self::Volatility | Self::Trend)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Trend)
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "=", alias = "==")]
    Equal,
    #[serde(rename = "!=", alias = "≠")]
    NotEqual,
    #[serde(rename = ">=", alias = "≥")]
    GreaterOrEqual,
    #[serde(rename = "<=", alias = "≤")]
    LessOrEqual,
}

impl ComparisonOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            ">" => Some(Self::GreaterThan),
            "<" => Some(Self::LessThan),
            "=" | "==" => Some(Self::Equal),
            "!=" | "≠" => Some(Self::NotEqual),
            ">=" | "≥" => Some(Self::GreaterOrEqual),
            "<=" | "≤" => Some(Self::LessOrEqual),
            _ => None,
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Self::Equal | Self::NotEqual)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Market direction derived from the 24h change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendDirection {
    /// Band edge in percent; moves strictly beyond it are directional.
    pub const BAND_PCT: f64 = 2.0;

    pub fn from_change_pct(change_24h: f64) -> Self {
        if change_24h > Self::BAND_PCT {
            Self::Bullish
        } else if change_24h < -Self::BAND_PCT {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bullish" => Some(Self::Bullish),
            "bearish" => Some(Self::Bearish),
            "neutral" => Some(Self::Neutral),
            _ => None,
        }
    }
}

/// Expected value on the right-hand side of a condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    Text(String),
}

impl ConditionValue {
    /// Numbers, or text that parses as one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Predicate gating a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub kind: ConditionKind,
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: ConditionValue,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl Condition {
    pub fn new(
        kind: ConditionKind,
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: ConditionValue,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            operator,
            value,
            description: String::new(),
            symbol: None,
        }
    }

    pub fn balance_at_least(amount: f64) -> Self {
        Self::new(
            ConditionKind::Balance,
            "balance",
            ComparisonOperator::GreaterOrEqual,
            ConditionValue::Number(amount),
        )
        .with_description(format!("balance must be at least {amount}"))
    }

    pub fn market(
        kind: ConditionKind,
        symbol: impl Into<String>,
        operator: ComparisonOperator,
        value: ConditionValue,
    ) -> Self {
        Self::new(kind, kind.name(), operator, value).with_symbol(symbol)
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn label(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!(
                "{}({}) {} {}",
                self.kind, symbol, self.operator, self.value
            ),
            None => format!("{} {} {}", self.field, self.operator, self.value),
        }
    }
}

/// One mapped operation plus its guards and risk tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub human_action: String,
    pub operation_name: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub risk: RiskLevel,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanStep {
    pub fn new(
        id: impl Into<String>,
        human_action: impl Into<String>,
        operation_name: impl Into<String>,
        risk: RiskLevel,
    ) -> Self {
        Self {
            id: id.into(),
            human_action: human_action.into(),
            operation_name: operation_name.into(),
            parameters: Parameters::new(),
            conditions: Vec::new(),
            risk,
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn has_balance_guard(&self) -> bool {
        self.conditions
            .iter()
            .any(|condition| condition.kind == ConditionKind::Balance)
    }

    pub fn transition(&mut self, next: StepStatus) -> Result<(), PlanError> {
        if !self.status.can_transition_to(next) {
            return Err(PlanError::status_violation(
                &self.id,
                self.status.name(),
                next.name(),
            ));
        }
        self.status = next;
        Ok(())
    }
}

/// Validated, ordered sequence of steps derived from a payment intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub raw_intent: String,
    pub normalized_intent: String,
    pub steps: Vec<PlanStep>,
    pub overall_risk: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub requires_approval: bool,
    pub can_rollback: bool,
}

impl Plan {
    /// Build a plan whose overall risk is derived from its steps.
    pub fn new(raw_intent: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        let raw_intent = raw_intent.into();
        let overall_risk = RiskLevel::max_of(steps.iter().map(|step| step.risk))
            .unwrap_or(RiskLevel::Low);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            normalized_intent: normalize_intent(&raw_intent),
            raw_intent,
            steps,
            overall_risk,
            created_at: Utc::now(),
            requires_approval: overall_risk.is_abort_tier(),
            can_rollback: false,
        }
    }

    pub fn highest_step_risk(&self) -> Option<RiskLevel> {
        RiskLevel::max_of(self.steps.iter().map(|step| step.risk))
    }

    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    pub fn all_pending(&self) -> bool {
        self.steps
            .iter()
            .all(|step| step.status == StepStatus::Pending)
    }

    /// BLAKE3 digest of the plan's static content.
    ///
    /// Step `status`, `result` and `error` are excluded so the digest is stable
    /// across an execution.
    pub fn fingerprint(&self) -> Result<String, PlanError> {
        let mut material = serde_json::to_value(self)?;
        if let Some(steps) = material.get_mut("steps").and_then(Value::as_array_mut) {
            for step in steps {
                if let Some(object) = step.as_object_mut() {
                    object.remove("status");
                    object.remove("result");
                    object.remove("error");
                }
            }
        }
        let bytes = serde_json::to_vec(&material)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// Collapse whitespace and lowercase.
pub fn normalize_intent(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
