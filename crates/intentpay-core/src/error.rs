use crate::validator::ValidationReport;
use thiserror::Error;

/// Conditional execution engine errors.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Plan rejected: {}", render_report(.0))]
    Validation(ValidationReport),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Operation '{0}' is not registered")]
    OperationNotFound(String),

    #[error("Invalid parameters for '{operation}': {message}")]
    InvalidParameters { operation: String, message: String },

    #[error("Operation '{operation}' failed: {message}")]
    OperationFailure { operation: String, message: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Market data error: {0}")]
    Market(String),

    #[error("Nonce coordination error: {0}")]
    Nonce(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PlanError {
    pub fn status_violation(step_id: &str, from: &str, to: &str) -> Self {
        Self::InvariantViolation(format!(
            "step '{}' cannot move from '{}' to '{}'",
            step_id, from, to
        ))
    }

    pub fn invalid_parameters(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Message without the variant prefix, for embedding in another error.
    pub fn detail(&self) -> String {
        match self {
            Self::InvariantViolation(message)
            | Self::Ledger(message)
            | Self::Market(message)
            | Self::Nonce(message)
            | Self::Serialization(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

fn render_report(report: &ValidationReport) -> String {
    let messages = report
        .errors
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>();
    format!("{} error(s): {}", messages.len(), messages.join("; "))
}
