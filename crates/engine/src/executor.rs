//! Transaction executors.
//!
//! [`RevmExecutor`] runs full EVM semantics through `revm`;
//! [`TransferExecutor`] is a native value-transfer machine used for
//! reference runs, synthetic workloads and tests. Both report only the
//! state that actually changed, so replaying a result never overwrites a
//! sibling's write with a stale value.

use alloy_primitives::{Address, Bytes, U256};
use revm::context::result::{ExecutionResult as EvmResult, Output};
use revm::context::{Context, TxEnv};
use revm::database::CacheDB;
use revm::handler::{ExecuteEvm, MainBuilder, MainContext};
use revm::primitives::TxKind;
use revm::state::EvmState;
use strata_core::{BlockContext, StateChanges, StateDb, Transaction, TxError, TxExecutor, TxOutcome};
use strata_state::StateDbRef;

/// Base cost of any transaction.
pub const TX_BASE_GAS: u64 = 21_000;

/// Extra cost of a contract creation.
pub const TX_CREATE_GAS: u64 = 32_000;

pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    if tx.is_create() {
        TX_BASE_GAS + TX_CREATE_GAS
    } else {
        TX_BASE_GAS
    }
}

/// Runs `tx` through `executor` after the sender balance check.
///
/// A sender that cannot cover `value` is rejected with zero gas and leaves
/// `state` untouched.
pub fn execute_checked<S, E>(
    executor: &E,
    tx: &Transaction,
    block: &BlockContext,
    state: &mut S,
) -> TxOutcome
where
    S: StateDb,
    E: TxExecutor<S> + ?Sized,
{
    let balance = state.balance(&tx.from);
    if balance < tx.value {
        return TxOutcome::rejected(TxError::InsufficientBalance {
            balance,
            required: tx.value,
        });
    }
    executor.apply(tx, block, state)
}

// ---------------------------------------------------------------------------
// Change tracking
// ---------------------------------------------------------------------------

/// Pre-execution account fields, diffed against the post state.
struct Touched {
    address: Address,
    balance: U256,
    nonce: u64,
    code: Bytes,
}

impl Touched {
    fn capture<S: StateDb>(state: &S, address: Address) -> Self {
        Self {
            address,
            balance: state.balance(&address),
            nonce: state.nonce(&address),
            code: state.code(&address),
        }
    }
}

fn diff_accounts<S: StateDb>(state: &S, touched: &[Touched]) -> StateChanges {
    let mut changes = StateChanges::default();
    for pre in touched {
        let balance = state.balance(&pre.address);
        let nonce = state.nonce(&pre.address);
        let code = state.code(&pre.address);
        let change = changes.account_mut(pre.address);
        if balance != pre.balance {
            change.balance = Some(balance);
        }
        if nonce != pre.nonce {
            change.nonce = Some(nonce);
        }
        if code != pre.code {
            change.code = Some(code);
        }
    }
    changes.prune();
    changes
}

// ---------------------------------------------------------------------------
// Native transfers
// ---------------------------------------------------------------------------

/// Value transfers and creations without an interpreter.
///
/// Calls move `value` and bump the sender nonce; call data is ignored.
/// Creations install the call data as the new account's code.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferExecutor;

impl<S: StateDb> TxExecutor<S> for TransferExecutor {
    fn apply(&self, tx: &Transaction, _block: &BlockContext, state: &mut S) -> TxOutcome {
        let required = intrinsic_gas(tx);
        if tx.gas < required {
            return TxOutcome::rejected(TxError::IntrinsicGas {
                limit: tx.gas,
                required,
            });
        }
        let expected = state.nonce(&tx.from);
        if tx.nonce != expected {
            return TxOutcome::rejected(TxError::NonceMismatch {
                expected,
                got: tx.nonce,
            });
        }
        let balance = state.balance(&tx.from);
        if balance < tx.value {
            return TxOutcome::rejected(TxError::InsufficientBalance {
                balance,
                required: tx.value,
            });
        }

        let target = tx.to.unwrap_or_else(|| tx.from.create(tx.nonce));
        let touched = [Touched::capture(state, tx.from), Touched::capture(state, target)];

        state.set_nonce(tx.from, expected + 1);
        // The nonce bump survives a failed creation.
        let snapshot = tx.is_create().then(|| state.snapshot());

        let from_balance = state.balance(&tx.from);
        state.set_balance(tx.from, from_balance - tx.value);
        let to_balance = state.balance(&target);
        state.set_balance(target, to_balance.saturating_add(tx.value));

        let mut error = None;
        let mut contract_address = None;
        if let Some(snapshot) = snapshot {
            if state.nonce(&target) != 0 || !state.code(&target).is_empty() {
                state.revert_to_snapshot(snapshot);
                error = Some(TxError::CreateCollision);
            } else {
                state.set_nonce(target, 1);
                state.set_code(target, tx.input.clone());
                state.discard_snapshot(snapshot);
                contract_address = Some(target);
            }
        }

        TxOutcome {
            gas_used: if error.is_some() { tx.gas } else { required },
            output: Bytes::new(),
            logs: Vec::new(),
            error,
            changes: diff_accounts(state, &touched),
            contract_address,
        }
    }
}

// ---------------------------------------------------------------------------
// revm
// ---------------------------------------------------------------------------

/// Full EVM execution with `revm`.
///
/// Each call builds a fresh EVM over a `CacheDB` layered on the isolated
/// view, so the view only changes once the result has been diffed back in.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevmExecutor;

impl<S: StateDb> TxExecutor<S> for RevmExecutor {
    fn apply(&self, tx: &Transaction, block: &BlockContext, state: &mut S) -> TxOutcome {
        let expected = state.nonce(&tx.from);
        if tx.nonce != expected {
            return TxOutcome::rejected(TxError::NonceMismatch {
                expected,
                got: tx.nonce,
            });
        }
        let required = intrinsic_gas(tx);
        if tx.gas < required {
            return TxOutcome::rejected(TxError::IntrinsicGas {
                limit: tx.gas,
                required,
            });
        }

        let tx_env = match TxEnv::builder()
            .caller(tx.from)
            .kind(match tx.to {
                Some(addr) => TxKind::Call(addr),
                None => TxKind::Create,
            })
            .data(tx.input.clone())
            .value(tx.value)
            .gas_limit(tx.gas)
            .nonce(tx.nonce)
            .chain_id(Some(block.chain_id))
            .build()
        {
            Ok(env) => env,
            Err(e) => {
                return TxOutcome::rejected(TxError::Rejected {
                    reason: format!("invalid tx env: {e:?}"),
                })
            }
        };

        let (result, evm_state) = {
            let mut ctx = Context::mainnet().with_db(CacheDB::new(StateDbRef::new(&*state)));
            ctx.block.number = U256::from(block.number);
            ctx.block.timestamp = U256::from(block.timestamp);
            ctx.block.beneficiary = block.coinbase;
            ctx.block.gas_limit = block.gas_limit;
            ctx.block.basefee = 0;
            ctx.cfg.chain_id = block.chain_id;
            ctx.cfg.disable_block_gas_limit = true;
            ctx.cfg.disable_base_fee = true;
            ctx.cfg.disable_eip3607 = true;

            let mut evm = ctx.build_mainnet();
            let result = evm.transact_one(tx_env);
            let evm_state = evm.finalize();
            (result, evm_state)
        };

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(tx_hash = %tx.hash, error = ?e, "evm rejected transaction");
                return TxOutcome::rejected(TxError::Rejected {
                    reason: format!("{e:?}"),
                });
            }
        };

        let changes = evm_changes(&*state, &evm_state);
        state.apply_changes(&changes);

        let (error, contract_address) = match &result {
            EvmResult::Success {
                output: Output::Create(_, address),
                ..
            } => (None, *address),
            EvmResult::Success { .. } => (None, None),
            EvmResult::Revert { .. } => (Some(TxError::Reverted), None),
            EvmResult::Halt { reason, .. } => (
                Some(TxError::Halted {
                    reason: format!("{reason:?}"),
                }),
                None,
            ),
        };

        tracing::debug!(
            tx_hash = %tx.hash,
            gas_used = result.gas_used(),
            success = result.is_success(),
            "evm execution done"
        );

        TxOutcome {
            gas_used: result.gas_used(),
            output: result.output().cloned().unwrap_or_default(),
            logs: result.logs().to_vec(),
            error,
            changes,
            contract_address,
        }
    }
}

/// Touched accounts whose fields differ from the pre-execution view.
fn evm_changes<S: StateDb>(pre: &S, evm_state: &EvmState) -> StateChanges {
    let mut changes = StateChanges::default();
    for (address, account) in evm_state {
        if !account.is_touched() {
            continue;
        }
        let change = changes.account_mut(*address);
        if account.info.balance != pre.balance(address) {
            change.balance = Some(account.info.balance);
        }
        if account.info.nonce != pre.nonce(address) {
            change.nonce = Some(account.info.nonce);
        }
        if let Some(code) = &account.info.code {
            let bytes = code.original_bytes();
            if !bytes.is_empty() && bytes != pre.code(address) {
                change.code = Some(bytes);
            }
        }
        for (slot, value) in &account.storage {
            if value.is_changed() && value.present_value != pre.storage(address, slot) {
                change.storage.insert(*slot, value.present_value);
            }
        }
    }
    changes.prune();
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use strata_state::{Account, MemoryState};

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn funded(balance: u64) -> MemoryState {
        MemoryState::from_accounts([(addr(1), Account::with_balance(U256::from(balance)))])
    }

    fn transfer(value: u64) -> Transaction {
        Transaction {
            hash: B256::ZERO,
            from: addr(1),
            to: Some(addr(2)),
            nonce: 0,
            value: U256::from(value),
            gas: 21_000,
            input: Bytes::new(),
        }
    }

    #[test]
    fn transfer_moves_value_and_bumps_nonce() {
        let mut state = funded(100);
        let out = TransferExecutor.apply(&transfer(40), &BlockContext::default(), &mut state);

        assert!(out.error.is_none());
        assert_eq!(out.gas_used, TX_BASE_GAS);
        assert_eq!(state.balance(&addr(1)), U256::from(60));
        assert_eq!(state.balance(&addr(2)), U256::from(40));
        assert_eq!(state.nonce(&addr(1)), 1);

        let sender = &out.changes.accounts[&addr(1)];
        assert_eq!(sender.balance, Some(U256::from(60)));
        assert_eq!(sender.nonce, Some(1));
        assert_eq!(out.changes.accounts[&addr(2)].nonce, None);
    }

    #[test]
    fn checked_execution_rejects_underfunded_sender_without_mutation() {
        let mut state = funded(10);
        let before = state.digest();
        let out = execute_checked(&TransferExecutor, &transfer(11), &BlockContext::default(), &mut state);

        assert_eq!(
            out.error,
            Some(TxError::InsufficientBalance {
                balance: U256::from(10),
                required: U256::from(11)
            })
        );
        assert_eq!(out.gas_used, 0);
        assert!(out.changes.is_empty());
        assert_eq!(state.digest(), before);
    }

    #[test]
    fn wrong_nonce_is_rejected() {
        let mut state = funded(100);
        let tx = Transaction {
            nonce: 5,
            ..transfer(1)
        };
        let out = TransferExecutor.apply(&tx, &BlockContext::default(), &mut state);
        assert_eq!(out.error, Some(TxError::NonceMismatch { expected: 0, got: 5 }));
        assert!(out.changes.is_empty());
    }

    #[test]
    fn creation_installs_code_at_derived_address() {
        let mut state = funded(100);
        let tx = Transaction {
            to: None,
            gas: 60_000,
            input: Bytes::from_static(&[0x60, 0x00]),
            ..transfer(5)
        };
        let out = TransferExecutor.apply(&tx, &BlockContext::default(), &mut state);

        let created = addr(1).create(0);
        assert_eq!(out.contract_address, Some(created));
        assert_eq!(out.gas_used, TX_BASE_GAS + TX_CREATE_GAS);
        assert_eq!(state.code(&created).as_ref(), &[0x60, 0x00]);
        assert_eq!(state.balance(&created), U256::from(5));
    }

    #[test]
    fn creations_leave_no_open_journal() {
        let mut state = funded(100);
        let create = Transaction {
            to: None,
            gas: 60_000,
            ..transfer(5)
        };
        let out = TransferExecutor.apply(&create, &BlockContext::default(), &mut state);
        assert!(out.error.is_none());
        assert_eq!(state.journal_len(), 0);

        let next = Transaction {
            nonce: 1,
            ..transfer(1)
        };
        TransferExecutor.apply(&next, &BlockContext::default(), &mut state);
        assert_eq!(state.journal_len(), 0);

        let mut collided = funded(100);
        collided.insert_account(
            addr(1).create(0),
            Account {
                nonce: 1,
                ..Account::default()
            },
        );
        let out = TransferExecutor.apply(&create, &BlockContext::default(), &mut collided);
        assert_eq!(out.error, Some(TxError::CreateCollision));
        assert_eq!(collided.journal_len(), 0);
    }

    #[test]
    fn creation_collision_keeps_only_the_nonce_bump() {
        let created = addr(1).create(0);
        let mut state = funded(100);
        state.insert_account(
            created,
            Account {
                nonce: 1,
                ..Account::default()
            },
        );
        let tx = Transaction {
            to: None,
            gas: 60_000,
            ..transfer(5)
        };
        let out = TransferExecutor.apply(&tx, &BlockContext::default(), &mut state);

        assert_eq!(out.error, Some(TxError::CreateCollision));
        assert_eq!(out.gas_used, 60_000);
        assert_eq!(state.balance(&addr(1)), U256::from(100));
        assert_eq!(state.nonce(&addr(1)), 1);
        assert_eq!(out.changes.accounts.len(), 1);
    }

    #[test]
    fn revm_value_transfer() {
        let mut state = funded(1_000_000);
        let out = RevmExecutor.apply(&transfer(250), &BlockContext::default(), &mut state);

        assert!(out.error.is_none(), "{:?}", out.error);
        assert_eq!(out.gas_used, TX_BASE_GAS);
        assert_eq!(state.balance(&addr(2)), U256::from(250));
        assert_eq!(state.balance(&addr(1)), U256::from(1_000_000 - 250));
        assert_eq!(state.nonce(&addr(1)), 1);
        assert_eq!(out.changes.accounts[&addr(2)].balance, Some(U256::from(250)));
    }

    #[test]
    fn revm_create_deploys_runtime_code() {
        // PUSH1 0x2a PUSH1 0 MSTORE8 PUSH1 1 PUSH1 0 RETURN -> runtime code 0x2a
        let init = Bytes::from_static(&[0x60, 0x2a, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3]);
        let mut state = funded(1_000_000);
        let tx = Transaction {
            to: None,
            gas: 100_000,
            input: init,
            ..transfer(0)
        };
        let out = RevmExecutor.apply(&tx, &BlockContext::default(), &mut state);

        let created = addr(1).create(0);
        assert!(out.error.is_none(), "{:?}", out.error);
        assert_eq!(out.contract_address, Some(created));
        assert_eq!(state.code(&created).as_ref(), &[0x2a]);
    }

    #[test]
    fn revm_revert_is_a_failed_outcome() {
        // PUSH1 0 PUSH1 0 REVERT
        let code = Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xfd]);
        let mut state = funded(1_000_000);
        state.insert_account(
            addr(2),
            Account {
                code,
                ..Account::default()
            },
        );
        let tx = Transaction {
            gas: 50_000,
            ..transfer(0)
        };
        let out = RevmExecutor.apply(&tx, &BlockContext::default(), &mut state);

        assert_eq!(out.error, Some(TxError::Reverted));
        assert_eq!(state.nonce(&addr(1)), 1);
    }
}
