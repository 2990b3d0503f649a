//! In-memory [`StateDb`] with account-granular copy-on-write.
//!
//! The account map sits behind an `Arc` and every account behind its own
//! `Arc`, so [`StateDb::copy`] is a pointer bump. The first write in a copy
//! clones the map of pointers (not the accounts), and each account is cloned
//! only when that copy writes to it.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strata_core::{SnapshotId, StateDb};

/// Full account record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
    pub storage: BTreeMap<U256, U256>,
}

impl Account {
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    /// No balance, nonce, code or storage: indistinguishable from absent.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code.is_empty() && self.storage.is_empty()
    }
}

/// Previous version of an account, restored on revert.
#[derive(Debug, Clone)]
struct JournalEntry {
    address: Address,
    prev: Option<Arc<Account>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    accounts: Arc<HashMap<Address, Arc<Account>>>,
    journal: Vec<JournalEntry>,
    /// Open snapshot ids, innermost last. Writes are journaled only while
    /// one is open; copies start with none.
    open: Vec<SnapshotId>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_accounts<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (Address, Account)>,
    {
        let map = accounts
            .into_iter()
            .filter(|(_, account)| !account.is_empty())
            .map(|(address, account)| (address, Arc::new(account)))
            .collect();
        Self {
            accounts: Arc::new(map),
            ..Self::default()
        }
    }

    pub fn insert_account(&mut self, address: Address, account: Account) {
        self.record(address);
        Arc::make_mut(&mut self.accounts).insert(address, Arc::new(account));
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Non-empty accounts in address order.
    pub fn dump(&self) -> BTreeMap<Address, Account> {
        self.accounts
            .iter()
            .filter(|(_, account)| !account.is_empty())
            .map(|(address, account)| (*address, account.as_ref().clone()))
            .collect()
    }

    /// Order-independent fingerprint of the full state.
    pub fn digest(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.accounts.len() * 96);
        for (address, account) in self.dump() {
            buf.extend_from_slice(address.as_slice());
            buf.extend_from_slice(&account.balance.to_be_bytes::<32>());
            buf.extend_from_slice(&account.nonce.to_be_bytes());
            buf.extend_from_slice(keccak256(&account.code).as_slice());
            for (slot, value) in &account.storage {
                if value.is_zero() {
                    continue;
                }
                buf.extend_from_slice(&slot.to_be_bytes::<32>());
                buf.extend_from_slice(&value.to_be_bytes::<32>());
            }
        }
        keccak256(buf)
    }

    /// Journal entries held for open snapshots.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Closes `id` and everything nested in it. Returns `false` for an id
    /// that is not open.
    fn release(&mut self, id: SnapshotId) -> bool {
        let Some(pos) = self.open.iter().rposition(|&s| s == id) else {
            return false;
        };
        self.open.truncate(pos);
        if self.open.is_empty() {
            self.journal.clear();
        }
        true
    }

    fn record(&mut self, address: Address) {
        if !self.open.is_empty() {
            let prev = self.accounts.get(&address).cloned();
            self.journal.push(JournalEntry { address, prev });
        }
    }

    fn account_mut(&mut self, address: Address) -> &mut Account {
        self.record(address);
        let entry = Arc::make_mut(&mut self.accounts)
            .entry(address)
            .or_default();
        Arc::make_mut(entry)
    }
}

impl StateDb for MemoryState {
    fn balance(&self, address: &Address) -> U256 {
        self.account(address).map_or(U256::ZERO, |a| a.balance)
    }

    fn set_balance(&mut self, address: Address, balance: U256) {
        self.account_mut(address).balance = balance;
    }

    fn nonce(&self, address: &Address) -> u64 {
        self.account(address).map_or(0, |a| a.nonce)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.account_mut(address).nonce = nonce;
    }

    fn code(&self, address: &Address) -> Bytes {
        self.account(address)
            .map(|a| a.code.clone())
            .unwrap_or_default()
    }

    fn set_code(&mut self, address: Address, code: Bytes) {
        self.account_mut(address).code = code;
    }

    fn storage(&self, address: &Address, slot: &U256) -> U256 {
        self.account(address)
            .and_then(|a| a.storage.get(slot).copied())
            .unwrap_or(U256::ZERO)
    }

    fn set_storage(&mut self, address: Address, slot: U256, value: U256) {
        let account = self.account_mut(address);
        if value.is_zero() {
            account.storage.remove(&slot);
        } else {
            account.storage.insert(slot, value);
        }
    }

    fn copy(&self) -> Self {
        Self {
            accounts: Arc::clone(&self.accounts),
            journal: Vec::new(),
            open: Vec::new(),
        }
    }

    fn snapshot(&mut self) -> SnapshotId {
        let id = self.journal.len();
        self.open.push(id);
        id
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) {
        if !self.open.contains(&id) {
            tracing::warn!(snapshot = id, "revert to unknown snapshot ignored");
            return;
        }
        while self.journal.len() > id {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            let accounts = Arc::make_mut(&mut self.accounts);
            match entry.prev {
                Some(prev) => {
                    accounts.insert(entry.address, prev);
                }
                None => {
                    accounts.remove(&entry.address);
                }
            }
        }
        self.release(id);
    }

    fn discard_snapshot(&mut self, id: SnapshotId) {
        if !self.release(id) {
            tracing::warn!(snapshot = id, "discard of unknown snapshot ignored");
        }
    }
}

impl PartialEq for MemoryState {
    fn eq(&self, other: &Self) -> bool {
        self.dump() == other.dump()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{AccountChange, StateChanges};

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn funded() -> MemoryState {
        MemoryState::from_accounts([
            (addr(1), Account::with_balance(U256::from(100))),
            (addr(2), Account::with_balance(U256::from(50))),
        ])
    }

    #[test]
    fn copies_are_isolated_from_each_other_and_the_original() {
        let base = funded();
        let mut a = base.copy();
        let mut b = base.copy();

        a.set_balance(addr(1), U256::from(1));
        b.set_storage(addr(2), U256::from(7), U256::from(9));

        assert_eq!(base.balance(&addr(1)), U256::from(100));
        assert_eq!(b.balance(&addr(1)), U256::from(100));
        assert_eq!(a.storage(&addr(2), &U256::from(7)), U256::ZERO);
        assert_eq!(a.balance(&addr(1)), U256::from(1));
        assert_eq!(b.storage(&addr(2), &U256::from(7)), U256::from(9));
    }

    #[test]
    fn revert_restores_previous_values_and_removes_new_accounts() {
        let mut state = funded();
        let snap = state.snapshot();
        state.set_balance(addr(1), U256::from(5));
        state.set_nonce(addr(3), 1);
        state.set_code(addr(3), Bytes::from_static(&[0x60, 0x00]));

        state.revert_to_snapshot(snap);

        assert_eq!(state.balance(&addr(1)), U256::from(100));
        assert!(state.account(&addr(3)).is_none());
    }

    #[test]
    fn nested_snapshots_revert_independently() {
        let mut state = funded();
        let outer = state.snapshot();
        state.set_nonce(addr(1), 1);
        let inner = state.snapshot();
        state.set_nonce(addr(1), 2);

        state.revert_to_snapshot(inner);
        assert_eq!(state.nonce(&addr(1)), 1);
        state.revert_to_snapshot(outer);
        assert_eq!(state.nonce(&addr(1)), 0);
        assert_eq!(state.journal_len(), 0);
    }

    #[test]
    fn discarding_the_outer_snapshot_stops_journaling() {
        let mut state = funded();
        let outer = state.snapshot();
        state.set_balance(addr(1), U256::from(7));
        let inner = state.snapshot();
        state.set_balance(addr(2), U256::from(8));

        state.discard_snapshot(inner);
        assert_eq!(state.journal_len(), 2);
        state.discard_snapshot(outer);
        assert_eq!(state.journal_len(), 0);

        state.set_storage(addr(1), U256::from(1), U256::from(1));
        assert_eq!(state.journal_len(), 0);
        assert_eq!(state.balance(&addr(1)), U256::from(7));
        assert_eq!(state.balance(&addr(2)), U256::from(8));
    }

    #[test]
    fn discarded_inner_writes_still_revert_with_the_outer() {
        let mut state = funded();
        let outer = state.snapshot();
        let inner = state.snapshot();
        state.set_nonce(addr(1), 3);
        state.discard_snapshot(inner);

        state.revert_to_snapshot(outer);
        assert_eq!(state.nonce(&addr(1)), 0);
    }

    #[test]
    fn apply_changes_replays_all_fields() {
        let mut state = funded();
        let mut changes = StateChanges::default();
        *changes.account_mut(addr(2)) = AccountChange {
            balance: Some(U256::from(75)),
            nonce: Some(4),
            code: Some(Bytes::from_static(&[0xfe])),
            storage: [(U256::from(1), U256::from(2))].into_iter().collect(),
        };

        state.apply_changes(&changes);

        assert_eq!(state.balance(&addr(2)), U256::from(75));
        assert_eq!(state.nonce(&addr(2)), 4);
        assert_eq!(state.code(&addr(2)).as_ref(), &[0xfe]);
        assert_eq!(state.storage(&addr(2), &U256::from(1)), U256::from(2));
    }

    #[test]
    fn zero_storage_is_not_part_of_the_digest() {
        let mut a = funded();
        let b = funded();
        a.set_storage(addr(1), U256::from(3), U256::from(1));
        a.set_storage(addr(1), U256::from(3), U256::ZERO);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a, b);
    }
}
