use async_trait::async_trait;
use intentpay_core::units::{format_units, parse_units};
use intentpay_core::{
    BlockTag, FeeEstimate, FeeRequest, LedgerClient, PlanError, TokenBalance, TransferReceipt,
    TransferRequest,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

/// Decimals of the chain's native token, used for fee amounts.
const NATIVE_DECIMALS: u8 = 18;
const TRANSFER_GAS: u64 = 21_000;
const CONTRACT_TRANSFER_GAS: u64 = 65_000;

/// A transfer the ledger accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettledTransfer {
    pub tx_hash: String,
    pub token: String,
    pub from: String,
    pub to: String,
    pub raw_amount: u128,
    pub nonce: u64,
}

#[derive(Debug, Default)]
struct Book {
    decimals: BTreeMap<String, u8>,
    balances: BTreeMap<(String, String), u128>,
    next_nonce: BTreeMap<String, u64>,
    contracts: BTreeSet<String>,
    injected_failures: usize,
    failure_reason: String,
    settled: Vec<SettledTransfer>,
    sequence_queries: usize,
}

impl Book {
    fn decimals_of(&self, token: &str) -> Result<u8, PlanError> {
        self.decimals
            .get(token)
            .copied()
            .ok_or_else(|| PlanError::Ledger(format!("unknown token {token}")))
    }
}

/// Deterministic single-process ledger.
///
/// Transactions are included the moment they are accepted, so the pending and latest
/// sequence numbers always agree. Nonces must arrive in exact order: a reused or
/// skipped nonce is rejected the way a node rejects it.
#[derive(Debug)]
pub struct InMemoryLedger {
    book: Mutex<Book>,
    gas_price_gwei: u64,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Book::default()),
            gas_price_gwei: 5_000,
        }
    }

    pub fn with_token(mut self, symbol: impl Into<String>, decimals: u8) -> Self {
        self.book.get_mut().decimals.insert(symbol.into(), decimals);
        self
    }

    /// Credit `amount` (decimal string) of `token` to `account`.
    pub fn fund(mut self, account: &str, token: &str, amount: &str) -> Result<Self, PlanError> {
        let book = self.book.get_mut();
        let raw = parse_units(amount, book.decimals_of(token)?)?;
        *book
            .balances
            .entry((normalize(account), token.to_string()))
            .or_default() += raw;
        Ok(self)
    }

    pub fn with_contract(mut self, address: &str) -> Self {
        self.book.get_mut().contracts.insert(normalize(address));
        self
    }

    pub fn with_gas_price_gwei(mut self, gas_price_gwei: u64) -> Self {
        self.gas_price_gwei = gas_price_gwei;
        self
    }

    /// Reject the next `count` transfers with `reason` before they reach the book.
    pub async fn fail_next_transfers(&self, count: usize, reason: impl Into<String>) {
        let mut book = self.book.lock().await;
        book.injected_failures = count;
        book.failure_reason = reason.into();
    }

    pub async fn balance_of(&self, account: &str, token: &str) -> Option<String> {
        let book = self.book.lock().await;
        let decimals = book.decimals.get(token).copied()?;
        let raw = book
            .balances
            .get(&(normalize(account), token.to_string()))
            .copied()
            .unwrap_or(0);
        Some(format_units(raw, decimals))
    }

    pub async fn settled(&self) -> Vec<SettledTransfer> {
        self.book.lock().await.settled.clone()
    }

    pub async fn next_nonce(&self, account: &str) -> u64 {
        self.book
            .lock()
            .await
            .next_nonce
            .get(&normalize(account))
            .copied()
            .unwrap_or(0)
    }

    /// How many times a sequence number has been read.
    pub async fn sequence_queries(&self) -> usize {
        self.book.lock().await.sequence_queries
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_balance(&self, token: &str, account: &str) -> Result<TokenBalance, PlanError> {
        let book = self.book.lock().await;
        let decimals = book.decimals_of(token)?;
        let raw = book
            .balances
            .get(&(normalize(account), token.to_string()))
            .copied()
            .unwrap_or(0);
        Ok(TokenBalance {
            amount: format_units(raw, decimals),
            raw_amount: raw.to_string(),
            decimals,
            symbol: token.to_string(),
        })
    }

    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, PlanError> {
        let mut book = self.book.lock().await;

        if book.injected_failures > 0 {
            book.injected_failures -= 1;
            return Err(PlanError::Ledger(book.failure_reason.clone()));
        }

        let from = normalize(&request.from);
        let expected = book.next_nonce.get(&from).copied().unwrap_or(0);
        let nonce = request.nonce.unwrap_or(expected);
        if nonce < expected {
            return Err(PlanError::Ledger(format!(
                "nonce too low: {nonce} already used by {} (next {expected})",
                request.from
            )));
        }
        if nonce > expected {
            return Err(PlanError::Ledger(format!(
                "nonce gap: got {nonce}, expected {expected} for {}",
                request.from
            )));
        }

        let decimals = book.decimals_of(&request.token)?;
        let raw = parse_units(&request.amount, decimals)?;
        if raw == 0 {
            return Err(PlanError::Ledger("transfer amount must be positive".to_string()));
        }
        let from_key = (from.clone(), request.token.clone());
        let available = book.balances.get(&from_key).copied().unwrap_or(0);
        if available < raw {
            return Err(PlanError::Ledger(format!(
                "insufficient funds: {} has {} {}, needs {}",
                request.from,
                format_units(available, decimals),
                request.token,
                request.amount
            )));
        }

        book.balances.insert(from_key, available - raw);
        *book
            .balances
            .entry((normalize(&request.to), request.token.clone()))
            .or_default() += raw;
        book.next_nonce.insert(from.clone(), nonce + 1);

        let tx_hash = transaction_hash(&from, &request, raw, nonce);
        book.settled.push(SettledTransfer {
            tx_hash: tx_hash.clone(),
            token: request.token.clone(),
            from,
            to: normalize(&request.to),
            raw_amount: raw,
            nonce,
        });
        tracing::debug!(tx_hash = %tx_hash, nonce, token = %request.token, "in-memory transfer settled");

        Ok(TransferReceipt { tx_hash, nonce })
    }

    async fn next_sequence_number(&self, account: &str, _tag: BlockTag) -> Result<u64, PlanError> {
        let mut book = self.book.lock().await;
        book.sequence_queries += 1;
        Ok(book.next_nonce.get(&normalize(account)).copied().unwrap_or(0))
    }

    async fn get_code(&self, address: &str) -> Result<Vec<u8>, PlanError> {
        let book = self.book.lock().await;
        if book.contracts.contains(&normalize(address)) {
            Ok(vec![0x60, 0x80, 0x60, 0x40, 0x52])
        } else {
            Ok(Vec::new())
        }
    }

    async fn estimate_fee(&self, request: FeeRequest) -> Result<FeeEstimate, PlanError> {
        let book = self.book.lock().await;
        book.decimals_of(&request.token)?;
        let gas_limit = if book.contracts.contains(&normalize(&request.to)) {
            CONTRACT_TRANSFER_GAS
        } else {
            TRANSFER_GAS
        };
        let fee_wei = u128::from(gas_limit) * u128::from(self.gas_price_gwei) * 1_000_000_000;
        Ok(FeeEstimate {
            gas_limit,
            gas_price_gwei: self.gas_price_gwei as f64,
            total_fee: format_units(fee_wei, NATIVE_DECIMALS),
        })
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

fn transaction_hash(from: &str, request: &TransferRequest, raw: u128, nonce: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(from.as_bytes());
    hasher.update(normalize(&request.to).as_bytes());
    hasher.update(request.token.as_bytes());
    hasher.update(&raw.to_le_bytes());
    hasher.update(&nonce.to_le_bytes());
    format!("0x{}", hasher.finalize().to_hex())
}
