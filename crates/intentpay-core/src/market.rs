use crate::error::PlanError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketQuote {
    pub symbol: String,
    pub price: f64,
    /// 24h change in percent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
    /// Direct volatility figure in percent, when the provider has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<f64>,
}

impl MarketQuote {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change_24h: None,
            volatility: None,
        }
    }

    pub fn with_change_24h(mut self, change_24h: f64) -> Self {
        self.change_24h = Some(change_24h);
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    /// Direct volatility, falling back to the absolute 24h change.
    pub fn effective_volatility(&self) -> Option<f64> {
        self.volatility.or(self.change_24h.map(f64::abs))
    }
}

/// Spot market lookups.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<MarketQuote, PlanError>;
}

/// Establishes a session with the market-data collaborator.
///
/// Callers connect lazily and keep the outcome for their own lifetime.
#[async_trait]
pub trait MarketDataConnector: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<Arc<dyn MarketDataClient>, PlanError>;
}
