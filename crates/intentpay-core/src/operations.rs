use crate::error::PlanError;
use crate::types::Parameters;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parameter contract the validator applies to a step using this operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParameterShape {
    /// No structural checks beyond the parameter record being an object.
    Free,
    /// `to` address plus positive decimal `amount`.
    Transfer,
    /// `recipients: [{to, amount}]`, each checked like a transfer.
    BatchTransfer,
}

impl ParameterShape {
    pub fn is_transfer(self) -> bool {
        matches!(self, Self::Transfer | Self::BatchTransfer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    /// Issues a ledger-mutating call.
    pub mutating: bool,
    pub shape: ParameterShape,
}

impl OperationDescriptor {
    pub fn read(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            mutating: false,
            shape: ParameterShape::Free,
        }
    }

    pub fn mutating(
        name: impl Into<String>,
        description: impl Into<String>,
        shape: ParameterShape,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            mutating: true,
            shape,
        }
    }
}

/// Named capability a plan step can invoke.
///
/// Read-only and mutating operations are invoked the same way; anything mutating is
/// responsible for routing through the account's nonce coordinator.
#[async_trait]
pub trait Operation: Send + Sync {
    fn descriptor(&self) -> OperationDescriptor;

    async fn invoke(&self, parameters: &Parameters) -> Result<Value, PlanError>;
}

/// Name -> capability mapping shared by the validator and the engine.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            operations: BTreeMap::new(),
        }
    }

    /// Register under the descriptor name, replacing any previous entry.
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        self.operations
            .insert(operation.descriptor().name, operation);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn descriptor(&self, name: &str) -> Option<OperationDescriptor> {
        self.operations.get(name).map(|operation| operation.descriptor())
    }

    pub fn names(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }

    pub async fn invoke(&self, name: &str, parameters: &Parameters) -> Result<Value, PlanError> {
        let operation = self
            .get(name)
            .ok_or_else(|| PlanError::OperationNotFound(name.to_string()))?;
        operation.invoke(parameters).await
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.names())
            .finish()
    }
}

/// Required string parameter.
pub fn required_str<'a>(
    operation: &str,
    parameters: &'a Parameters,
    key: &str,
) -> Result<&'a str, PlanError> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PlanError::invalid_parameters(operation, format!("missing string '{key}'")))
}

/// Optional string parameter; present-but-not-a-string is an error.
pub fn optional_str<'a>(
    operation: &str,
    parameters: &'a Parameters,
    key: &str,
) -> Result<Option<&'a str>, PlanError> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(PlanError::invalid_parameters(
            operation,
            format!("'{key}' must be a string"),
        )),
    }
}

/// Amount parameters arrive as strings but drafts sometimes carry bare numbers.
pub fn amount_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
