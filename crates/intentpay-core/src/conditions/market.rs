use super::compare::{compare_numbers, compare_text};
use super::{ConditionCheck, ConditionOutcome, EvaluationContext};
use crate::market::{MarketDataClient, MarketDataConnector};
use crate::types::{Condition, ConditionKind, TrendDirection};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Lazily opened market-data connection.
///
/// The first caller connects; success or failure is then reused for the session's
/// lifetime, so an unreachable service costs one attempt per evaluator.
pub struct MarketSession {
    connector: Arc<dyn MarketDataConnector>,
    client: OnceCell<Result<Arc<dyn MarketDataClient>, String>>,
}

impl MarketSession {
    pub fn new(connector: Arc<dyn MarketDataConnector>) -> Self {
        Self {
            connector,
            client: OnceCell::new(),
        }
    }

    pub fn connector_name(&self) -> &str {
        self.connector.name()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.client.get(), Some(Ok(_)))
    }

    pub async fn client(&self) -> Result<Arc<dyn MarketDataClient>, String> {
        self.client
            .get_or_init(|| async {
                match self.connector.connect().await {
                    Ok(client) => {
                        tracing::debug!(connector = %self.connector.name(), "market data connected");
                        Ok(client)
                    }
                    Err(err) => {
                        tracing::warn!(
                            connector = %self.connector.name(),
                            error = %err,
                            "market data unreachable; market conditions will report unmet"
                        );
                        Err(err.detail())
                    }
                }
            })
            .await
            .clone()
    }
}

/// Price, volatility and trend conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketCheck;

#[async_trait]
impl ConditionCheck for MarketCheck {
    async fn evaluate(
        &self,
        condition: &Condition,
        context: &EvaluationContext<'_>,
    ) -> ConditionOutcome {
        let Some(symbol) = condition.symbol.as_deref() else {
            return ConditionOutcome::unmet(format!(
                "{} condition requires a symbol",
                condition.kind
            ));
        };

        let client = match context.market.client().await {
            Ok(client) => client,
            Err(err) => {
                return ConditionOutcome::unmet(format!(
                    "market data service '{}' is unreachable; cannot evaluate {} for {}: {}",
                    context.market.connector_name(),
                    condition.kind,
                    symbol,
                    err
                ));
            }
        };

        let quote = match client.get_quote(symbol).await {
            Ok(quote) => quote,
            Err(err) => {
                return ConditionOutcome::unmet(format!(
                    "quote lookup for {} failed: {}",
                    symbol, err
                ));
            }
        };
        let observed = serde_json::to_value(&quote).ok();

        let outcome = match condition.kind {
            ConditionKind::Price => numeric(condition, "price", symbol, Some(quote.price)),
            ConditionKind::Volatility => numeric(
                condition,
                "volatility",
                symbol,
                quote.effective_volatility(),
            ),
            ConditionKind::Trend => trend(condition, symbol, quote.change_24h),
            other => ConditionOutcome::unmet(format!(
                "{} is not a market condition",
                other
            )),
        };

        outcome.with_observed(observed)
    }
}

fn numeric(
    condition: &Condition,
    metric: &str,
    symbol: &str,
    actual: Option<f64>,
) -> ConditionOutcome {
    let Some(actual) = actual else {
        return ConditionOutcome::unmet(format!("no {metric} data available for {symbol}"));
    };
    let Some(expected) = condition.value.as_number() else {
        return ConditionOutcome::unmet(format!(
            "{metric} condition expects a numeric value, got '{}'",
            condition.value
        ));
    };

    let met = compare_numbers(actual, condition.operator, expected);
    ConditionOutcome::decided(
        met,
        format!(
            "{symbol} {metric} {actual} {} {expected}: {}",
            condition.operator,
            if met { "satisfied" } else { "not satisfied" }
        ),
    )
    .with_actual(actual)
}

fn trend(condition: &Condition, symbol: &str, change_24h: Option<f64>) -> ConditionOutcome {
    let Some(change) = change_24h else {
        return ConditionOutcome::unmet(format!("no 24h change available for {symbol}"));
    };
    let expected_text = condition.value.as_text();
    let Some(expected) = TrendDirection::parse(&expected_text) else {
        return ConditionOutcome::unmet(format!(
            "unknown trend '{expected_text}', expected bullish, bearish or neutral"
        ));
    };

    let actual = TrendDirection::from_change_pct(change);
    match compare_text(actual.name(), condition.operator, expected.name()) {
        Some(met) => ConditionOutcome::decided(
            met,
            format!(
                "{symbol} trend is {} ({change:+.2}% 24h) {} {}: {}",
                actual.name(),
                condition.operator,
                expected.name(),
                if met { "satisfied" } else { "not satisfied" }
            ),
        )
        .with_actual(actual.name()),
        None => ConditionOutcome::unmet(format!(
            "trend conditions support only = and !=, got {}",
            condition.operator
        )),
    }
}
