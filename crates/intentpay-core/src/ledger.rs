use crate::error::PlanError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which view of the account's sequence number to read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    /// Includes transactions still sitting in the node's pending pool.
    Pending,
    Latest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBalance {
    /// Decimal-formatted amount.
    pub amount: String,
    /// Raw integer units, kept as a string so JSON consumers never lose precision.
    pub raw_amount: String,
    pub decimals: u8,
    pub symbol: String,
}

impl TokenBalance {
    pub fn amount_f64(&self) -> Option<f64> {
        crate::units::parse_amount(&self.amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRequest {
    pub token: String,
    pub from: String,
    pub to: String,
    /// Decimal-formatted amount.
    pub amount: String,
    /// Explicit sequence number override assigned by the nonce coordinator.
    pub nonce: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_hash: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeRequest {
    pub token: String,
    pub from: String,
    pub to: String,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeEstimate {
    pub gas_limit: u64,
    pub gas_price_gwei: f64,
    /// Decimal-formatted fee in the chain's native token.
    pub total_fee: String,
}

/// Ledger primitives against an EVM-compatible chain.
///
/// Key custody, signing and transport belong to the implementation.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_balance(&self, token: &str, account: &str) -> Result<TokenBalance, PlanError>;

    async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt, PlanError>;

    async fn next_sequence_number(&self, account: &str, tag: BlockTag)
        -> Result<u64, PlanError>;

    async fn get_code(&self, address: &str) -> Result<Vec<u8>, PlanError>;

    async fn estimate_fee(&self, request: FeeRequest) -> Result<FeeEstimate, PlanError>;
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_valid_address(candidate: &str) -> bool {
    candidate
        .strip_prefix("0x")
        .or_else(|| candidate.strip_prefix("0X"))
        .map(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}
