//! Stub collaborators shared by the unit tests in this crate.

use crate::error::PlanError;
use crate::ledger::{
    BlockTag, FeeEstimate, FeeRequest, LedgerClient, TokenBalance, TransferReceipt,
    TransferRequest,
};
use crate::market::{MarketDataClient, MarketDataConnector, MarketQuote};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SENDER: &str = "0x1111111111111111111111111111111111111111";
pub const RECIPIENT: &str = "0x2222222222222222222222222222222222222222";
pub const CONTRACT: &str = "0x3333333333333333333333333333333333333333";

pub struct StubLedger {
    balance: Result<String, String>,
    transfer_failure: Option<String>,
    pending: AtomicU64,
    balance_queries: Mutex<Vec<String>>,
    transfers: Mutex<Vec<TransferRequest>>,
    contracts: BTreeSet<String>,
}

impl StubLedger {
    pub fn with_balance(amount: &str) -> Self {
        Self {
            balance: Ok(amount.to_string()),
            transfer_failure: None,
            pending: AtomicU64::new(0),
            balance_queries: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            contracts: BTreeSet::from([CONTRACT.to_ascii_lowercase()]),
        }
    }

    pub fn failing_balance(reason: &str) -> Self {
        Self {
            balance: Err(reason.to_string()),
            ..Self::with_balance("0")
        }
    }

    pub fn failing_transfers(mut self, reason: &str) -> Self {
        self.transfer_failure = Some(reason.to_string());
        self
    }

    pub fn balance_queries(&self) -> Vec<String> {
        self.balance_queries.lock().unwrap().clone()
    }

    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for StubLedger {
    async fn get_balance(&self, token: &str, _account: &str) -> Result<TokenBalance, PlanError> {
        self.balance_queries.lock().unwrap().push(token.to_string());
        match &self.balance {
            Ok(amount) => Ok(TokenBalance {
                amount: amount.clone(),
                raw_amount: amount.clone(),
                decimals: 0,
                symbol: token.to_string(),
            }),
            Err(reason) => Err(PlanError::Ledger(reason.clone())),
        }
    }

    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, PlanError> {
        if let Some(reason) = &self.transfer_failure {
            return Err(PlanError::Ledger(reason.clone()));
        }
        let expected = self.pending.load(Ordering::SeqCst);
        let nonce = request.nonce.unwrap_or(expected);
        if nonce != expected {
            return Err(PlanError::Ledger(format!(
                "nonce mismatch: expected {expected}, got {nonce}"
            )));
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.transfers.lock().unwrap().push(request);
        Ok(TransferReceipt {
            tx_hash: format!("0xtx{nonce:04}"),
            nonce,
        })
    }

    async fn next_sequence_number(&self, _account: &str, _tag: BlockTag) -> Result<u64, PlanError> {
        Ok(self.pending.load(Ordering::SeqCst))
    }

    async fn get_code(&self, address: &str) -> Result<Vec<u8>, PlanError> {
        if self.contracts.contains(&address.to_ascii_lowercase()) {
            Ok(vec![0x60, 0x80])
        } else {
            Ok(Vec::new())
        }
    }

    async fn estimate_fee(&self, _request: FeeRequest) -> Result<FeeEstimate, PlanError> {
        Ok(FeeEstimate {
            gas_limit: 21_000,
            gas_price_gwei: 5_000.0,
            total_fee: "0.105".to_string(),
        })
    }
}

pub struct StaticConnector {
    quotes: Arc<BTreeMap<String, MarketQuote>>,
    connects: AtomicUsize,
}

impl StaticConnector {
    pub fn new(quotes: Vec<MarketQuote>) -> Self {
        Self {
            quotes: Arc::new(
                quotes
                    .into_iter()
                    .map(|quote| (quote.symbol.clone(), quote))
                    .collect(),
            ),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

struct StaticClient {
    quotes: Arc<BTreeMap<String, MarketQuote>>,
}

#[async_trait]
impl MarketDataClient for StaticClient {
    async fn get_quote(&self, symbol: &str) -> Result<MarketQuote, PlanError> {
        self.quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| PlanError::Market(format!("no quote for {symbol}")))
    }
}

#[async_trait]
impl MarketDataConnector for StaticConnector {
    fn name(&self) -> &str {
        "static"
    }

    async fn connect(&self) -> Result<Arc<dyn MarketDataClient>, PlanError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StaticClient {
            quotes: self.quotes.clone(),
        }))
    }
}

pub struct UnreachableConnector {
    name: String,
    attempts: AtomicUsize,
}

impl UnreachableConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataConnector for UnreachableConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Arc<dyn MarketDataClient>, PlanError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PlanError::Market("connection refused".to_string()))
    }
}

/// Fails the first `failures` connects, then behaves like `inner`.
pub struct FlakyConnector {
    inner: StaticConnector,
    failures: usize,
    attempts: AtomicUsize,
}

impl FlakyConnector {
    pub fn new(failures: usize, quotes: Vec<MarketQuote>) -> Self {
        Self {
            inner: StaticConnector::new(quotes),
            failures,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataConnector for FlakyConnector {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn connect(&self) -> Result<Arc<dyn MarketDataClient>, PlanError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(PlanError::Market("transient blip".to_string()));
        }
        self.inner.connect().await
    }
}
