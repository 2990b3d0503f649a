//! JSON workload files: initial allocation, block context and transactions.

use crate::memory::{Account, MemoryState};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use strata_core::error::{StrataError, StrataResult};
use strata_core::{BlockContext, Transaction};

/// Initial account allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    #[serde(default)]
    pub alloc: BTreeMap<Address, Account>,
}

impl Genesis {
    pub fn into_state(self) -> MemoryState {
        MemoryState::from_accounts(self.alloc)
    }
}

/// Everything needed to replay one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub block: BlockContext,
    #[serde(default)]
    pub genesis: Genesis,
    pub transactions: Vec<Transaction>,
}

impl Workload {
    pub fn from_json(json: &str) -> StrataResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| StrataError::InvalidInput(format!("malformed workload: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> StrataResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StrataError::InvalidInput(format!("cannot read {}: {e}", path.display()))
        })?;
        let workload = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            accounts = workload.genesis.alloc.len(),
            txs = workload.transactions.len(),
            "loaded workload"
        );
        Ok(workload)
    }

    pub fn to_json(&self) -> StrataResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StrataError::Internal(format!("cannot serialize workload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use strata_core::StateDb;

    #[test]
    fn parses_minimal_workload() {
        let json = r#"{
            "genesis": { "alloc": {
                "0x0101010101010101010101010101010101010101": { "balance": "0x64" }
            }},
            "transactions": [{
                "from": "0x0101010101010101010101010101010101010101",
                "to": "0x0202020202020202020202020202020202020202",
                "value": "0x1",
                "gas": 21000
            }]
        }"#;
        let workload = Workload::from_json(json).unwrap();
        assert_eq!(workload.transactions.len(), 1);
        assert_eq!(workload.block, BlockContext::default());

        let state = workload.genesis.into_state();
        assert_eq!(
            state.balance(&Address::repeat_byte(1)),
            U256::from(100)
        );
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let err = Workload::from_json("{").unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }
}
