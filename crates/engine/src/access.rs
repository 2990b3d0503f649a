//! Static access-set prediction.
//!
//! Predicts the state locations a transaction reads and writes from its
//! envelope and call data alone, without executing it. Account fields use
//! the pseudo slots of [`StateKey`]; recognized token calls resolve their
//! Solidity mapping slots on the called contract.

use alloy_primitives::{keccak256, Address, B256};
use rayon::prelude::*;
use strata_core::{
    AccessFlags, AccessSet, BlockContext, DeclaredSender, SenderRecovery, StateKey, Transaction,
    TxIndex,
};

/// Mapping slot holding `balanceOf` in the standard token layout.
pub const BALANCES_SLOT: u64 = 0;

/// Mapping slot holding `allowance` in the standard token layout.
pub const ALLOWANCES_SLOT: u64 = 1;

// ---------------------------------------------------------------------------
// Recognized calls
// ---------------------------------------------------------------------------

/// Call data shapes the analyzer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownCall {
    /// `transfer(address,uint256)`
    Transfer,
    /// `transferFrom(address,address,uint256)`
    TransferFrom,
    /// `approve(address,uint256)`
    Approve,
}

const KNOWN_CALLS: &[([u8; 4], KnownCall)] = &[
    ([0xa9, 0x05, 0x9c, 0xbb], KnownCall::Transfer),
    ([0x23, 0xb8, 0x72, 0xdd], KnownCall::TransferFrom),
    ([0x09, 0x5e, 0xa7, 0xb3], KnownCall::Approve),
];

impl KnownCall {
    pub fn lookup(selector: [u8; 4]) -> Option<Self> {
        KNOWN_CALLS
            .iter()
            .find(|(s, _)| *s == selector)
            .map(|(_, call)| *call)
    }

    /// ABI-encoded address arguments preceding the amount.
    fn address_args(&self) -> usize {
        match self {
            KnownCall::Transfer | KnownCall::Approve => 1,
            KnownCall::TransferFrom => 2,
        }
    }
}

/// Address in the `n`-th 32-byte ABI word after the selector.
fn abi_address(input: &[u8], n: usize) -> Option<Address> {
    let start = 4 + n * 32;
    input
        .get(start + 12..start + 32)
        .map(Address::from_slice)
}

/// `keccak256(pad32(key) ++ pad32(slot))`.
pub fn mapping_slot(key: &Address, slot: B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[12..32].copy_from_slice(key.as_slice());
    buf[32..].copy_from_slice(slot.as_slice());
    keccak256(buf)
}

/// Storage slot of `balanceOf[owner]`.
pub fn balance_slot(owner: &Address) -> B256 {
    mapping_slot(owner, B256::with_last_byte(BALANCES_SLOT as u8))
}

/// Storage slot of `allowance[owner][spender]`.
pub fn allowance_slot(owner: &Address, spender: &Address) -> B256 {
    let inner = mapping_slot(owner, B256::with_last_byte(ALLOWANCES_SLOT as u8));
    mapping_slot(spender, inner)
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Builds one [`AccessSet`] per transaction.
pub struct AccessAnalyzer<R = DeclaredSender> {
    recovery: R,
    chain_id: u64,
    block_number: u64,
}

impl AccessAnalyzer<DeclaredSender> {
    pub fn new(block: &BlockContext) -> Self {
        Self::with_recovery(DeclaredSender, block)
    }
}

impl<R: SenderRecovery> AccessAnalyzer<R> {
    pub fn with_recovery(recovery: R, block: &BlockContext) -> Self {
        Self {
            recovery,
            chain_id: block.chain_id,
            block_number: block.number,
        }
    }

    /// Never fails: an unrecoverable sender yields an opaque set.
    pub fn analyze(&self, index: TxIndex, tx: &Transaction) -> AccessSet {
        let sender = match self
            .recovery
            .recover_sender(tx, self.chain_id, self.block_number)
        {
            Ok(sender) => sender,
            Err(e) => {
                tracing::warn!(index, tx_hash = %tx.hash, error = %e, "analysis failed, treating as opaque");
                return AccessSet::opaque(index);
            }
        };

        let mut set = AccessSet::new(index);
        set.add(StateKey::balance(sender), AccessFlags::READ_WRITE);
        set.add(StateKey::nonce(sender), AccessFlags::READ_WRITE);

        match tx.to {
            Some(to) => {
                set.add(StateKey::balance(to), AccessFlags::READ_WRITE);
                set.add(StateKey::code(to), AccessFlags::CODE_READ);
                inspect_call_data(&mut set, sender, to, &tx.input);
            }
            None => {
                let created = sender.create(tx.nonce);
                set.add(StateKey::code(created), AccessFlags::CREATE);
            }
        }
        set
    }

    /// Index-aligned with `transactions`.
    pub fn analyze_batch(&self, transactions: &[Transaction]) -> Vec<AccessSet> {
        let sets: Vec<AccessSet> = transactions
            .par_iter()
            .enumerate()
            .map(|(index, tx)| self.analyze(index, tx))
            .collect();
        tracing::debug!(
            txs = sets.len(),
            opaque = sets.iter().filter(|s| s.is_opaque()).count(),
            "access sets built"
        );
        sets
    }
}

fn inspect_call_data(set: &mut AccessSet, sender: Address, token: Address, input: &[u8]) {
    let Some(call) = input
        .get(..4)
        .and_then(|s| <[u8; 4]>::try_from(s).ok())
        .and_then(KnownCall::lookup)
    else {
        return;
    };
    // Address arguments plus the amount word.
    if input.len() < 4 + (call.address_args() + 1) * 32 {
        return;
    }

    let mut touch = |slot: B256| set.add(StateKey::new(token, slot), AccessFlags::READ_WRITE);
    match call {
        KnownCall::Transfer => {
            let Some(recipient) = abi_address(input, 0) else {
                return;
            };
            touch(balance_slot(&sender));
            touch(balance_slot(&recipient));
        }
        KnownCall::TransferFrom => {
            let (Some(owner), Some(recipient)) = (abi_address(input, 0), abi_address(input, 1))
            else {
                return;
            };
            touch(balance_slot(&owner));
            touch(balance_slot(&recipient));
            touch(allowance_slot(&owner, &sender));
        }
        KnownCall::Approve => {
            let Some(spender) = abi_address(input, 0) else {
                return;
            };
            touch(allowance_slot(&sender, &spender));
        }
    }
}
