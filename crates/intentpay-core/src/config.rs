use crate::error::PlanError;
use crate::nonce::NonceConfig;
use crate::risk::RiskBands;
use crate::validator::ValidatorConfig;
use serde::{Deserialize, Serialize};

/// Everything needed to stand up a [`crate::PaymentRuntime`] for one account.
///
/// Every field has a default, so a config file only names what it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Signing account all mutating operations act for.
    pub account: String,
    /// Token used when a step or balance condition names none.
    pub token: String,
    pub validator: ValidatorConfig,
    pub risk_bands: RiskBands,
    pub nonce: NonceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            account: "0x0000000000000000000000000000000000000000".to_string(),
            token: "CRO".to_string(),
            validator: ValidatorConfig::default(),
            risk_bands: RiskBands::default(),
            nonce: NonceConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }
}
