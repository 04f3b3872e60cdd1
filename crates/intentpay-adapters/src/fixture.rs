use crate::ledger::InMemoryLedger;
use crate::market::{StaticMarketData, UnreachableMarketData};
use intentpay_core::{MarketDataConnector, MarketQuote, PlanError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// JSON description of a local ledger and market, used to seed dry runs.
///
/// ```json
/// {
///   "tokens": {"CRO": 18},
///   "balances": {"0x1111…": {"CRO": "100"}},
///   "contracts": ["0x3333…"],
///   "quotes": [{"symbol": "CRO", "price": 0.12, "change_24h": 3.1}]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Fixture {
    /// Token symbol -> decimals.
    pub tokens: BTreeMap<String, u8>,
    /// Account -> token -> decimal amount.
    pub balances: BTreeMap<String, BTreeMap<String, String>>,
    pub contracts: Vec<String>,
    pub quotes: Vec<MarketQuote>,
    /// Serve no quotes at all; market conditions degrade to unmet.
    pub market_unreachable: bool,
}

impl Fixture {
    pub fn from_json(raw: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn ledger(&self) -> Result<InMemoryLedger, PlanError> {
        let mut ledger = self
            .tokens
            .iter()
            .fold(InMemoryLedger::new(), |ledger, (symbol, decimals)| {
                ledger.with_token(symbol.clone(), *decimals)
            });
        for (account, holdings) in &self.balances {
            for (token, amount) in holdings {
                ledger = ledger.fund(account, token, amount)?;
            }
        }
        Ok(self
            .contracts
            .iter()
            .fold(ledger, |ledger, address| ledger.with_contract(address)))
    }

    pub fn market(&self) -> Arc<dyn MarketDataConnector> {
        if self.market_unreachable {
            Arc::new(UnreachableMarketData::new("fixture", "market data disabled by fixture"))
        } else {
            Arc::new(StaticMarketData::new(self.quotes.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_ledger_from_json() {
        let fixture = Fixture::from_json(
            r#"{
                "tokens": {"CRO": 18, "USDC": 6},
                "balances": {"0x1111111111111111111111111111111111111111": {"CRO": "100", "USDC": "2.5"}},
                "quotes": [{"symbol": "CRO", "price": 0.12}]
            }"#,
        )
        .unwrap();

        let ledger = fixture.ledger().unwrap();
        let account = "0x1111111111111111111111111111111111111111";
        assert_eq!(ledger.balance_of(account, "USDC").await.as_deref(), Some("2.5"));
        assert_eq!(ledger.balance_of(account, "CRO").await.as_deref(), Some("100"));
        assert_eq!(fixture.market().name(), "static");
    }

    #[test]
    fn unknown_token_in_balances_is_rejected() {
        let fixture = Fixture::from_json(r#"{"balances": {"0x1": {"DOGE": "1"}}}"#).unwrap();
        assert!(fixture.ledger().is_err());
    }
}
