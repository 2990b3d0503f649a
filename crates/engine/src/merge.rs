//! Result collection, canonical-state commits and receipt building.

use strata_core::error::{StrataError, StrataResult};
use strata_core::{
    ExecutionResult, Receipt, ReceiptStatus, StateDb, Transaction, TxIndex, Wave,
};

/// Results of one sub-batch, addressed by local transaction index.
#[derive(Debug)]
pub struct ResultSlots {
    slots: Vec<Option<ExecutionResult>>,
}

impl ResultSlots {
    pub fn new(tx_count: usize) -> Self {
        Self {
            slots: vec![None; tx_count],
        }
    }

    /// Each slot is written exactly once.
    pub fn record(&mut self, result: ExecutionResult) -> StrataResult<()> {
        let index = result.index;
        match self.slots.get_mut(index) {
            None => Err(StrataError::Internal(format!(
                "result for unknown transaction {index}"
            ))),
            Some(Some(_)) => Err(StrataError::Internal(format!(
                "duplicate result for transaction {index}"
            ))),
            Some(slot) => {
                *slot = Some(result);
                Ok(())
            }
        }
    }

    pub fn get(&self, index: TxIndex) -> Option<&ExecutionResult> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn first_missing(&self) -> Option<TxIndex> {
        self.slots.iter().position(Option::is_none)
    }

    /// Replays the wave's state changes onto `state` in ascending index
    /// order. Members are ascending by construction.
    pub fn commit_wave<S: StateDb>(&self, wave: &Wave, state: &mut S) -> StrataResult<()> {
        for &index in &wave.members {
            let result = self.get(index).ok_or_else(|| {
                tracing::error!(index, wave = wave.id, "missing result at commit");
                StrataError::MissingResult { index }
            })?;
            state.apply_changes(&result.changes);
        }
        Ok(())
    }

    /// Receipts in ascending order. `offset` is the batch position of local
    /// index 0 and `cumulative_gas` the gas used before it.
    pub fn into_receipts(
        self,
        transactions: &[Transaction],
        offset: TxIndex,
        cumulative_gas: u64,
    ) -> StrataResult<Vec<Receipt>> {
        if let Some(index) = self.first_missing() {
            tracing::error!(index = offset + index, "missing result at receipt build");
            return Err(StrataError::MissingResult {
                index: offset + index,
            });
        }
        let results: Vec<ExecutionResult> = self.slots.into_iter().flatten().collect();
        Ok(build_receipts(transactions, results, offset, cumulative_gas))
    }
}

/// Builds receipts from complete, index-ordered results.
pub fn build_receipts(
    transactions: &[Transaction],
    results: Vec<ExecutionResult>,
    offset: TxIndex,
    mut cumulative_gas: u64,
) -> Vec<Receipt> {
    results
        .into_iter()
        .map(|result| {
            cumulative_gas += result.gas_used;
            let status = if result.is_success() {
                ReceiptStatus::Success
            } else {
                ReceiptStatus::Failed
            };
            Receipt {
                index: offset + result.index,
                tx_hash: transactions
                    .get(result.index)
                    .map(|tx| tx.hash)
                    .unwrap_or_default(),
                status,
                gas_used: result.gas_used,
                cumulative_gas_used: cumulative_gas,
                logs: result.logs,
                contract_address: result.contract_address,
                error: result.error,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, B256, U256};
    use strata_core::{StateChanges, TxError};
    use strata_state::MemoryState;

    fn result(index: TxIndex, gas_used: u64, error: Option<TxError>) -> ExecutionResult {
        ExecutionResult {
            index,
            gas_used,
            output: Bytes::new(),
            logs: vec![],
            error,
            changes: StateChanges::default(),
            contract_address: None,
        }
    }

    fn txs(n: usize) -> Vec<Transaction> {
        (0..n)
            .map(|i| Transaction {
                hash: B256::with_last_byte(i as u8),
                from: Address::repeat_byte(1),
                to: None,
                nonce: i as u64,
                value: U256::ZERO,
                gas: 0,
                input: Bytes::new(),
            })
            .collect()
    }

    #[test]
    fn cumulative_gas_is_running_sum_with_offset() {
        let mut slots = ResultSlots::new(3);
        // Arrival order does not matter.
        slots.record(result(2, 30, None)).unwrap();
        slots.record(result(0, 10, None)).unwrap();
        slots
            .record(result(1, 0, Some(TxError::Reverted)))
            .unwrap();

        let receipts = slots.into_receipts(&txs(3), 5, 100).unwrap();
        let cumulative: Vec<_> = receipts.iter().map(|r| r.cumulative_gas_used).collect();
        assert_eq!(cumulative, vec![110, 110, 140]);
        assert_eq!(receipts[0].index, 5);
        assert_eq!(receipts[2].tx_hash, B256::with_last_byte(2));
        assert_eq!(receipts[1].status, ReceiptStatus::Failed);
        assert!(receipts[2].is_success());
    }

    #[test]
    fn missing_result_is_fatal() {
        let mut slots = ResultSlots::new(2);
        slots.record(result(0, 1, None)).unwrap();
        assert_eq!(slots.first_missing(), Some(1));
        assert!(matches!(
            slots.into_receipts(&txs(2), 10, 0),
            Err(StrataError::MissingResult { index: 11 })
        ));
    }

    #[test]
    fn duplicate_results_are_rejected() {
        let mut slots = ResultSlots::new(1);
        slots.record(result(0, 1, None)).unwrap();
        assert!(slots.record(result(0, 1, None)).is_err());
        assert!(slots.record(result(4, 1, None)).is_err());
    }

    #[test]
    fn commit_replays_in_member_order() {
        let a = Address::repeat_byte(3);
        let mut first = result(0, 1, None);
        first.changes.account_mut(a).nonce = Some(1);
        let mut second = result(1, 1, None);
        second.changes.account_mut(a).balance = Some(U256::from(9));

        let mut slots = ResultSlots::new(2);
        slots.record(second).unwrap();
        slots.record(first).unwrap();

        let mut state = MemoryState::new();
        let wave = Wave {
            id: 0,
            members: vec![0, 1],
        };
        slots.commit_wave(&wave, &mut state).unwrap();
        assert_eq!(state.nonce(&a), 1);
        assert_eq!(state.balance(&a), U256::from(9));
    }
}
