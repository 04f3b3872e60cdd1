use crate::operations::{amount_text, OperationDescriptor, ParameterShape};
use crate::types::{Parameters, RiskLevel};
use crate::units::parse_transfer_amount;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transfer amount bands, in token units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskBands {
    /// Transfers at or above this amount are at least medium risk.
    pub medium_from: f64,
    /// Transfers at or above this amount are at least high risk.
    pub high_from: f64,
    /// Transfers at or above this amount are critical.
    pub critical_from: f64,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            medium_from: 10.0,
            high_from: 100.0,
            critical_from: 1_000.0,
        }
    }
}

/// Assigns step tiers for drafts that omit them and reports where a declared tier
/// sits below what the amount bands imply.
#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    bands: RiskBands,
}

impl RiskClassifier {
    pub fn new(bands: RiskBands) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &RiskBands {
        &self.bands
    }

    pub fn classify_amount(&self, amount: f64) -> RiskLevel {
        if amount >= self.bands.critical_from {
            RiskLevel::Critical
        } else if amount >= self.bands.high_from {
            RiskLevel::High
        } else if amount >= self.bands.medium_from {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Tier implied by an operation and its parameters.
    ///
    /// Reads are low risk. Mutations of unknown shape are medium. Transfers follow
    /// the amount bands; an amount that cannot be read is treated as critical.
    pub fn classify_step(
        &self,
        descriptor: Option<&OperationDescriptor>,
        parameters: &Parameters,
    ) -> RiskLevel {
        let Some(descriptor) = descriptor else {
            return RiskLevel::Low;
        };

        match descriptor.shape {
            ParameterShape::Transfer => parameters
                .get("amount")
                .and_then(amount_text)
                .and_then(|text| parse_transfer_amount(&text))
                .map(|amount| self.classify_amount(amount))
                .unwrap_or(RiskLevel::Critical),
            ParameterShape::BatchTransfer => match batch_total(parameters) {
                Some(total) => self.classify_amount(total).max(RiskLevel::Medium),
                None => RiskLevel::Critical,
            },
            ParameterShape::Free if descriptor.mutating => RiskLevel::Medium,
            ParameterShape::Free => RiskLevel::Low,
        }
    }

    /// Overall tier for a set of step tiers.
    pub fn overall(&self, step_risks: impl IntoIterator<Item = RiskLevel>) -> RiskLevel {
        RiskLevel::max_of(step_risks).unwrap_or(RiskLevel::Low)
    }
}

fn batch_total(parameters: &Parameters) -> Option<f64> {
    let recipients = parameters.get("recipients")?.as_array()?;
    batch_amount(recipients)
}

/// Sum of a batch's recipient amounts, `None` if any amount is unreadable.
pub fn batch_amount(recipients: &[Value]) -> Option<f64> {
    recipients.iter().try_fold(0.0, |total, recipient| {
        recipient
            .get("amount")
            .and_then(amount_text)
            .and_then(|text| parse_transfer_amount(&text))
            .map(|amount| total + amount)
    })
}
