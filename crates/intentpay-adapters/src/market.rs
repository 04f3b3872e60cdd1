use async_trait::async_trait;
use intentpay_core::{MarketDataClient, MarketDataConnector, MarketQuote, PlanError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Serves a fixed quote table and counts how often callers connect.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    quotes: Arc<BTreeMap<String, MarketQuote>>,
    connections: AtomicUsize,
}

impl StaticMarketData {
    pub fn new(quotes: impl IntoIterator<Item = MarketQuote>) -> Self {
        Self {
            quotes: Arc::new(
                quotes
                    .into_iter()
                    .map(|quote| (quote.symbol.to_ascii_uppercase(), quote))
                    .collect(),
            ),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn connection_attempts(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct QuoteTable {
    quotes: Arc<BTreeMap<String, MarketQuote>>,
}

#[async_trait]
impl MarketDataClient for QuoteTable {
    async fn get_quote(&self, symbol: &str) -> Result<MarketQuote, PlanError> {
        self.quotes
            .get(&symbol.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| PlanError::Market(format!("no quote available for {symbol}")))
    }
}

#[async_trait]
impl MarketDataConnector for StaticMarketData {
    fn name(&self) -> &str {
        "static"
    }

    async fn connect(&self) -> Result<Arc<dyn MarketDataClient>, PlanError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(QuoteTable {
            quotes: self.quotes.clone(),
        }))
    }
}

/// A market-data service that never answers.
#[derive(Debug)]
pub struct UnreachableMarketData {
    name: String,
    reason: String,
    connections: AtomicUsize,
}

impl UnreachableMarketData {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn connection_attempts(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataConnector for UnreachableMarketData {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Arc<dyn MarketDataClient>, PlanError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(connector = %self.name, "refusing market data connection");
        Err(PlanError::Market(self.reason.clone()))
    }
}
