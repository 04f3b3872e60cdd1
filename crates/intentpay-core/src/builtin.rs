//! Ledger and market operations every registry starts with.

use crate::error::PlanError;
use crate::ledger::{is_valid_address, FeeRequest, LedgerClient, TransferReceipt, TransferRequest};
use crate::market::{MarketDataClient, MarketDataConnector};
use crate::nonce::NonceCoordinator;
use crate::operations::{
    amount_text, optional_str, required_str, Operation, OperationDescriptor, OperationRegistry,
    ParameterShape,
};
use crate::types::Parameters;
use crate::units::parse_transfer_amount;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub const GET_BALANCE: &str = "getBalance";
pub const TRANSFER: &str = "transfer";
pub const BATCH_TRANSFER: &str = "batchTransfer";
pub const ESTIMATE_FEE: &str = "estimateFee";
pub const CHECK_RECIPIENT: &str = "checkRecipient";
pub const GET_QUOTE: &str = "getQuote";

/// What sits at an address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Contract,
    ExternallyOwned,
    Unknown,
}

impl RecipientKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::ExternallyOwned => "externally_owned",
            Self::Unknown => "unknown",
        }
    }
}

/// Acting account plus the collaborators its operations share.
#[derive(Clone)]
pub struct AccountLedger {
    pub account: String,
    pub default_token: String,
    pub ledger: Arc<dyn LedgerClient>,
    pub nonces: Arc<NonceCoordinator>,
}

impl AccountLedger {
    pub fn new(
        default_token: impl Into<String>,
        ledger: Arc<dyn LedgerClient>,
        nonces: Arc<NonceCoordinator>,
    ) -> Self {
        Self {
            account: nonces.account().to_string(),
            default_token: default_token.into(),
            ledger,
            nonces,
        }
    }

    fn token<'a>(&'a self, operation: &str, parameters: &'a Parameters) -> Result<&'a str, PlanError> {
        Ok(optional_str(operation, parameters, "token")?.unwrap_or(&self.default_token))
    }

    async fn classify(&self, address: &str) -> Result<RecipientKind, PlanError> {
        let code = self.ledger.get_code(address).await?;
        Ok(if code.is_empty() {
            RecipientKind::ExternallyOwned
        } else {
            RecipientKind::Contract
        })
    }

    /// One nonce-coordinated transfer from the acting account.
    async fn send(&self, token: &str, to: &str, amount: &str) -> Result<TransferReceipt, PlanError> {
        let ledger = self.ledger.clone();
        let request = TransferRequest {
            token: token.to_string(),
            from: self.account.clone(),
            to: to.to_string(),
            amount: amount.to_string(),
            nonce: None,
        };

        let receipt = self
            .nonces
            .submit(move |nonce| async move {
                ledger
                    .transfer(TransferRequest {
                        nonce: Some(nonce),
                        ..request
                    })
                    .await
            })
            .await?;

        tracing::info!(
            account = %self.account,
            to = %to,
            token = %token,
            amount = %amount,
            nonce = receipt.nonce,
            tx_hash = %receipt.tx_hash,
            "transfer submitted"
        );
        Ok(receipt)
    }
}

/// `to` plus a strictly positive decimal `amount`, read from one transfer leg.
fn transfer_leg(operation: &str, parameters: &Parameters) -> Result<(String, String), PlanError> {
    let to = required_str(operation, parameters, "to")?;
    if !is_valid_address(to) {
        return Err(PlanError::invalid_parameters(
            operation,
            format!("invalid recipient address '{to}'"),
        ));
    }
    let amount = positive_amount(operation, parameters)?;
    Ok((to.to_string(), amount))
}

fn positive_amount(operation: &str, parameters: &Parameters) -> Result<String, PlanError> {
    let text = parameters
        .get("amount")
        .and_then(amount_text)
        .ok_or_else(|| PlanError::invalid_parameters(operation, "missing 'amount'"))?;
    match parse_transfer_amount(&text) {
        Some(value) if value > 0.0 => Ok(text),
        _ => Err(PlanError::invalid_parameters(
            operation,
            format!("amount '{text}' must be a positive decimal number"),
        )),
    }
}

pub struct GetBalanceOperation {
    account: AccountLedger,
}

impl GetBalanceOperation {
    pub fn new(account: AccountLedger) -> Self {
        Self { account }
    }
}

#[async_trait]
impl Operation for GetBalanceOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::read(GET_BALANCE, "Read the acting account's token balance")
    }

    async fn invoke(&self, parameters: &Parameters) -> Result<Value, PlanError> {
        let token = self.account.token(GET_BALANCE, parameters)?;
        let holder = optional_str(GET_BALANCE, parameters, "account")?.unwrap_or(&self.account.account);
        let balance = self.account.ledger.get_balance(token, holder).await?;

        Ok(json!({
            "account": holder,
            "balance": balance.amount,
            "rawBalance": balance.raw_amount,
            "decimals": balance.decimals,
            "symbol": balance.symbol,
        }))
    }
}

pub struct TransferOperation {
    account: AccountLedger,
}

impl TransferOperation {
    pub fn new(account: AccountLedger) -> Self {
        Self { account }
    }
}

#[async_trait]
impl Operation for TransferOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::mutating(
            TRANSFER,
            "Send tokens from the acting account",
            ParameterShape::Transfer,
        )
    }

    async fn invoke(&self, parameters: &Parameters) -> Result<Value, PlanError> {
        let (to, amount) = transfer_leg(TRANSFER, parameters)?;
        let token = self.account.token(TRANSFER, parameters)?;

        let recipient_kind = match self.account.classify(&to).await {
            Ok(kind) => kind,
            Err(err) => {
                tracing::warn!(to = %to, error = %err, "could not classify recipient");
                RecipientKind::Unknown
            }
        };

        let receipt = self.account.send(token, &to, &amount).await?;
        Ok(json!({
            "tx_hash": receipt.tx_hash,
            "nonce": receipt.nonce,
            "from": self.account.account,
            "to": to,
            "amount": amount,
            "token": token,
            "recipientKind": recipient_kind.name(),
        }))
    }
}

/// Pays several recipients; each leg is its own nonce-coordinated submission.
///
/// Legs are sent in order and the first failure stops the batch. Hashes of legs
/// already submitted are reported in the error message.
pub struct BatchTransferOperation {
    account: AccountLedger,
}

impl BatchTransferOperation {
    pub fn new(account: AccountLedger) -> Self {
        Self { account }
    }
}

#[async_trait]
impl Operation for BatchTransferOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::mutating(
            BATCH_TRANSFER,
            "Send tokens to several recipients",
            ParameterShape::BatchTransfer,
        )
    }

    async fn invoke(&self, parameters: &Parameters) -> Result<Value, PlanError> {
        let token = self.account.token(BATCH_TRANSFER, parameters)?;
        let recipients = parameters
            .get("recipients")
            .and_then(Value::as_array)
            .filter(|recipients| !recipients.is_empty())
            .ok_or_else(|| {
                PlanError::invalid_parameters(BATCH_TRANSFER, "'recipients' must be a non-empty array")
            })?;

        let mut legs = Vec::with_capacity(recipients.len());
        for (index, recipient) in recipients.iter().enumerate() {
            let leg: Parameters = recipient
                .as_object()
                .map(|object| object.clone().into_iter().collect())
                .ok_or_else(|| {
                    PlanError::invalid_parameters(BATCH_TRANSFER, format!("recipient {index} must be an object"))
                })?;
            legs.push(transfer_leg(BATCH_TRANSFER, &leg)?);
        }

        let mut transfers = Vec::with_capacity(legs.len());
        let mut hashes: Vec<String> = Vec::with_capacity(legs.len());
        let mut total = 0.0;
        for (to, amount) in legs {
            let receipt = self.account.send(token, &to, &amount).await.map_err(|err| {
                PlanError::OperationFailure {
                    operation: BATCH_TRANSFER.to_string(),
                    message: format!(
                        "transfer to {to} failed after {} submitted ({}): {err}",
                        hashes.len(),
                        hashes.join(", ")
                    ),
                }
            })?;
            total += parse_transfer_amount(&amount).unwrap_or(0.0);
            hashes.push(receipt.tx_hash.clone());
            transfers.push(json!({
                "to": to,
                "amount": amount,
                "tx_hash": receipt.tx_hash,
                "nonce": receipt.nonce,
            }));
        }

        Ok(json!({
            "tx_hashes": hashes,
            "transfers": transfers,
            "total_amount": total,
            "token": token,
        }))
    }
}

pub struct EstimateFeeOperation {
    account: AccountLedger,
}

impl EstimateFeeOperation {
    pub fn new(account: AccountLedger) -> Self {
        Self { account }
    }
}

#[async_trait]
impl Operation for EstimateFeeOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::read(ESTIMATE_FEE, "Estimate the fee for a transfer")
    }

    async fn invoke(&self, parameters: &Parameters) -> Result<Value, PlanError> {
        let (to, amount) = transfer_leg(ESTIMATE_FEE, parameters)?;
        let token = self.account.token(ESTIMATE_FEE, parameters)?;
        let estimate = self
            .account
            .ledger
            .estimate_fee(FeeRequest {
                token: token.to_string(),
                from: self.account.account.clone(),
                to,
                amount,
            })
            .await?;
        Ok(serde_json::to_value(estimate)?)
    }
}

pub struct CheckRecipientOperation {
    account: AccountLedger,
}

impl CheckRecipientOperation {
    pub fn new(account: AccountLedger) -> Self {
        Self { account }
    }
}

#[async_trait]
impl Operation for CheckRecipientOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::read(
            CHECK_RECIPIENT,
            "Tell a contract address from an externally-owned account",
        )
    }

    async fn invoke(&self, parameters: &Parameters) -> Result<Value, PlanError> {
        let address = match optional_str(CHECK_RECIPIENT, parameters, "address")? {
            Some(address) => address,
            None => required_str(CHECK_RECIPIENT, parameters, "to")?,
        };
        if !is_valid_address(address) {
            return Err(PlanError::invalid_parameters(
                CHECK_RECIPIENT,
                format!("invalid address '{address}'"),
            ));
        }

        let kind = self.account.classify(address).await?;
        Ok(json!({
            "address": address,
            "recipientKind": kind.name(),
            "isContract": kind == RecipientKind::Contract,
        }))
    }
}

/// Quotes through a lazily opened connection.
///
/// Only a successful connection is kept; a failed connect is retried on the
/// next invocation.
pub struct GetQuoteOperation {
    connector: Arc<dyn MarketDataConnector>,
    client: OnceCell<Arc<dyn MarketDataClient>>,
}

impl GetQuoteOperation {
    pub fn new(connector: Arc<dyn MarketDataConnector>) -> Self {
        Self {
            connector,
            client: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Operation for GetQuoteOperation {
    fn descriptor(&self) -> OperationDescriptor {
        OperationDescriptor::read(GET_QUOTE, "Fetch a market quote")
    }

    async fn invoke(&self, parameters: &Parameters) -> Result<Value, PlanError> {
        let symbol = required_str(GET_QUOTE, parameters, "symbol")?;
        let client = self
            .client
            .get_or_try_init(|| self.connector.connect())
            .await
            .map_err(|err| {
                tracing::warn!(
                    connector = %self.connector.name(),
                    error = %err,
                    "market data connect failed; will retry on next quote"
                );
                PlanError::Market(format!(
                    "market data service '{}' is unreachable: {}",
                    self.connector.name(),
                    err.detail()
                ))
            })?;
        let quote = client.get_quote(symbol).await?;
        Ok(serde_json::to_value(quote)?)
    }
}

/// Register every built-in operation for `account`.
pub fn register_all(
    registry: &mut OperationRegistry,
    account: &AccountLedger,
    market: Arc<dyn MarketDataConnector>,
) {
    registry.register(Arc::new(GetBalanceOperation::new(account.clone())));
    registry.register(Arc::new(TransferOperation::new(account.clone())));
    registry.register(Arc::new(BatchTransferOperation::new(account.clone())));
    registry.register(Arc::new(EstimateFeeOperation::new(account.clone())));
    registry.register(Arc::new(CheckRecipientOperation::new(account.clone())));
    registry.register(Arc::new(GetQuoteOperation::new(market)));
}
