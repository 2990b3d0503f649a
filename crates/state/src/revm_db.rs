//! Read-only revm database over any [`StateDb`].
//!
//! Wrapped in a `CacheDB` by the executor, this gives revm a per-transaction
//! write layer that falls through to the isolated view on reads.

use alloy_primitives::{keccak256, Address, B256, U256};
use revm::database_interface::DatabaseRef;
use revm::state::{AccountInfo, Bytecode};
use std::convert::Infallible;
use strata_core::StateDb;

pub struct StateDbRef<'a, S> {
    state: &'a S,
}

impl<'a, S: StateDb> StateDbRef<'a, S> {
    pub fn new(state: &'a S) -> Self {
        Self { state }
    }
}

impl<S: StateDb> DatabaseRef for StateDbRef<'_, S> {
    type Error = Infallible;

    fn basic_ref(&self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        let balance = self.state.balance(&address);
        let nonce = self.state.nonce(&address);
        let code = self.state.code(&address);
        if balance.is_zero() && nonce == 0 && code.is_empty() {
            return Ok(None);
        }
        let bytecode = Bytecode::new_raw(code);
        let code_hash = bytecode.hash_slow();
        Ok(Some(AccountInfo::new(balance, nonce, code_hash, bytecode)))
    }

    // Code is always inlined by `basic_ref`.
    fn code_by_hash_ref(&self, _code_hash: B256) -> Result<Bytecode, Self::Error> {
        Ok(Bytecode::default())
    }

    fn storage_ref(&self, address: Address, index: U256) -> Result<U256, Self::Error> {
        Ok(self.state.storage(&address, &index))
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        Ok(keccak256(number.to_string().as_bytes()))
    }
}
