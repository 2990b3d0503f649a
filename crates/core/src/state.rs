//! Capabilities the pipeline consumes from its host: state access,
//! transaction execution and sender derivation.

use crate::error::{StrataError, StrataResult};
use crate::types::{BlockContext, StateChanges, Transaction, TxOutcome};
use alloy_primitives::{Address, Bytes, U256};

/// Journal position returned by [`StateDb::snapshot`].
pub type SnapshotId = usize;

/// Account/storage state the pipeline reads, isolates and advances.
///
/// `copy` must return a view whose writes are invisible to the original and
/// to every other copy. It is called once per transaction per wave, so
/// implementations are expected to make it cheap (copy-on-write).
pub trait StateDb: Send + Sync + Sized {
    fn balance(&self, address: &Address) -> U256;
    fn set_balance(&mut self, address: Address, balance: U256);

    fn nonce(&self, address: &Address) -> u64;
    fn set_nonce(&mut self, address: Address, nonce: u64);

    fn code(&self, address: &Address) -> Bytes;
    fn set_code(&mut self, address: Address, code: Bytes);

    fn storage(&self, address: &Address, slot: &U256) -> U256;
    fn set_storage(&mut self, address: Address, slot: U256, value: U256);

    /// Isolated view descending from the current state.
    fn copy(&self) -> Self;

    fn snapshot(&mut self) -> SnapshotId;

    /// Undoes every write since `id`. `id` and any snapshot taken after it
    /// are released.
    fn revert_to_snapshot(&mut self, id: SnapshotId);

    /// Keeps the writes since `id` and releases it along with any snapshot
    /// taken after it. Once no snapshot is open the journal can be dropped.
    fn discard_snapshot(&mut self, id: SnapshotId);

    /// Replays recorded changes in address order.
    fn apply_changes(&mut self, changes: &StateChanges) {
        for (address, change) in &changes.accounts {
            if let Some(balance) = change.balance {
                self.set_balance(*address, balance);
            }
            if let Some(nonce) = change.nonce {
                self.set_nonce(*address, nonce);
            }
            if let Some(code) = &change.code {
                self.set_code(*address, code.clone());
            }
            for (slot, value) in &change.storage {
                self.set_storage(*address, *slot, *value);
            }
        }
    }
}

/// The opaque execution primitive (`apply(tx, block, state)`).
///
/// Implementations must leave `state` reflecting exactly `outcome.changes`:
/// the pipeline replays those changes onto canonical state, and the
/// sequential reference relies on the in-place writes.
pub trait TxExecutor<S: StateDb>: Send + Sync {
    fn apply(&self, tx: &Transaction, block: &BlockContext, state: &mut S) -> TxOutcome;
}

/// Sender derivation (signature recovery in a full client).
pub trait SenderRecovery: Send + Sync {
    fn recover_sender(&self, tx: &Transaction, chain_id: u64, block_number: u64)
        -> StrataResult<Address>;
}

impl<R: SenderRecovery + ?Sized> SenderRecovery for &R {
    fn recover_sender(
        &self,
        tx: &Transaction,
        chain_id: u64,
        block_number: u64,
    ) -> StrataResult<Address> {
        (**self).recover_sender(tx, chain_id, block_number)
    }
}

/// Trusts the `from` field carried by the transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredSender;

impl SenderRecovery for DeclaredSender {
    fn recover_sender(
        &self,
        tx: &Transaction,
        _chain_id: u64,
        _block_number: u64,
    ) -> StrataResult<Address> {
        if tx.from == Address::ZERO {
            return Err(StrataError::SenderRecovery(format!(
                "transaction {} has no sender",
                tx.hash
            )));
        }
        Ok(tx.from)
    }
}
