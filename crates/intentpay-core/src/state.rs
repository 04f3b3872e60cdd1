use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CURRENT_BALANCE: &str = "current_balance";
pub const BALANCE_SYMBOL: &str = "balance_symbol";
pub const LAST_TX_HASH: &str = "last_tx_hash";
pub const LAST_TRANSFER_AMOUNT: &str = "last_transfer_amount";
pub const LAST_BATCH_TX_HASHES: &str = "last_batch_tx_hashes";
pub const LAST_QUOTE_PRICE: &str = "last_quote_price";
pub const LAST_QUOTE_SYMBOL: &str = "last_quote_symbol";

pub fn step_result_key(step_id: &str) -> String {
    format!("step_{step_id}_result")
}

pub fn step_status_key(step_id: &str) -> String {
    format!("step_{step_id}_status")
}

/// Key/value record of prior steps' observable results.
///
/// Entries are only ever added or refreshed; nothing is removed except by an
/// explicit [`ExecutionState::clear`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ExecutionState {
    entries: BTreeMap<String, Value>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_and_refreshes_entries() {
        let mut state = ExecutionState::new();
        state.record(CURRENT_BALANCE, 100.0);
        state.record(CURRENT_BALANCE, 95.0);
        state.record(step_result_key("1"), json!({"tx_hash": "0x01"}));

        assert_eq!(state.get(CURRENT_BALANCE), Some(&json!(95.0)));
        assert!(state.contains("step_1_result"));
        assert_eq!(state.len(), 2);

        state.clear();
        assert!(state.is_empty());
    }
}
