//! Domain types for the Strata execution pipeline.

use crate::error::TxError;
use alloy_primitives::{keccak256, Address, Bytes, Log, B256, U256};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::time::Duration;

/// Position of a transaction inside the submitted batch.
///
/// Stable for the lifetime of a run: it orders receipts, breaks ties and
/// is the only direction dependency edges are allowed to point (downwards).
pub type TxIndex = usize;

// ---------------------------------------------------------------------------
// Transaction and block context
// ---------------------------------------------------------------------------

/// EVM transaction as consumed by the pipeline. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub hash: B256,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub nonce: u64,
    #[serde(default)]
    pub value: U256,
    pub gas: u64,
    /// `Bytes` (ref-counted) so cloning into worker tasks stays cheap.
    #[serde(default)]
    pub input: Bytes,
}

impl Transaction {
    /// Contract creation (no recipient).
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Leading four bytes of call data, if present.
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.input.as_ref().get(..4).map(|s| [s[0], s[1], s[2], s[3]])
    }

    /// Address a creation transaction deploys to (`sender` + `nonce`).
    pub fn create_address(&self) -> Option<Address> {
        self.is_create().then(|| self.from.create(self.nonce))
    }
}

/// Block-level execution environment handed to every transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
    pub chain_id: u64,
}

impl Default for BlockContext {
    fn default() -> Self {
        Self {
            number: 0,
            timestamp: 0,
            coinbase: Address::ZERO,
            gas_limit: 30_000_000,
            chain_id: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// State locations and access sets
// ---------------------------------------------------------------------------

/// A unique `(account, slot)` pair in state.
///
/// Account fields (balance, nonce, code) are addressed through pseudo slots
/// derived from a field tag and the account address, so a single key type
/// covers both account fields and contract storage.
///
/// `#[repr(C)]` for stable layout: `Address(20) + B256(32)` = 52 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct StateKey {
    pub address: Address,
    pub slot: B256,
}

impl StateKey {
    pub const fn new(address: Address, slot: B256) -> Self {
        Self { address, slot }
    }

    /// `keccak256("balance" ++ address)`.
    pub fn balance(address: Address) -> Self {
        Self::new(address, field_slot(b"balance", &address))
    }

    /// `keccak256("nonce" ++ address)`.
    pub fn nonce(address: Address) -> Self {
        Self::new(address, field_slot(b"nonce", &address))
    }

    /// `keccak256("code" ++ address)`.
    pub fn code(address: Address) -> Self {
        Self::new(address, field_slot(b"code", &address))
    }
}

fn field_slot(tag: &[u8], address: &Address) -> B256 {
    let mut buf = Vec::with_capacity(tag.len() + 20);
    buf.extend_from_slice(tag);
    buf.extend_from_slice(address.as_slice());
    keccak256(buf)
}

/// Access flags for one location. Observations merge with boolean OR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub code_read: bool,
}

impl AccessFlags {
    pub const READ: Self = Self::new(true, false, false, false);
    pub const WRITE: Self = Self::new(false, true, false, false);
    pub const READ_WRITE: Self = Self::new(true, true, false, false);
    pub const CODE_READ: Self = Self::new(true, false, false, true);
    pub const CREATE: Self = Self::new(false, true, true, false);

    pub const fn new(read: bool, write: bool, create: bool, code_read: bool) -> Self {
        Self {
            read,
            write,
            create,
            code_read,
        }
    }

    #[inline]
    pub fn merge(&mut self, other: Self) {
        self.read |= other.read;
        self.write |= other.write;
        self.create |= other.create;
        self.code_read |= other.code_read;
    }

    /// Hazard between an earlier access (`earlier`) and this later one.
    /// Read/read is never a hazard.
    #[inline]
    pub fn hazard_after(&self, earlier: &Self) -> Option<ConflictKind> {
        if self.write && earlier.write {
            Some(ConflictKind::WriteWrite)
        } else if self.read && earlier.write {
            Some(ConflictKind::ReadAfterWrite)
        } else if self.write && earlier.read {
            Some(ConflictKind::WriteAfterRead)
        } else {
            None
        }
    }
}

/// One observed access: location plus merged flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub location: StateKey,
    pub flags: AccessFlags,
}

/// Predicted state accesses of a single transaction.
///
/// Built once by the analyzer and read-only afterwards. An *opaque* set is
/// produced when analysis fails; it conflicts with every other transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSet {
    pub tx_index: TxIndex,
    records: BTreeMap<Address, BTreeMap<B256, AccessFlags>>,
    opaque: bool,
}

impl AccessSet {
    pub fn new(tx_index: TxIndex) -> Self {
        Self {
            tx_index,
            ..Self::default()
        }
    }

    /// Access set for a transaction whose footprint could not be predicted.
    pub fn opaque(tx_index: TxIndex) -> Self {
        Self {
            tx_index,
            records: BTreeMap::new(),
            opaque: true,
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub fn add(&mut self, location: StateKey, flags: AccessFlags) {
        self.records
            .entry(location.address)
            .or_default()
            .entry(location.slot)
            .or_default()
            .merge(flags);
    }

    pub fn get(&self, location: &StateKey) -> Option<AccessFlags> {
        self.records
            .get(&location.address)
            .and_then(|slots| slots.get(&location.slot))
            .copied()
    }

    /// Records in `(address, slot)` order.
    pub fn records(&self) -> impl Iterator<Item = AccessRecord> + '_ {
        self.records.iter().flat_map(|(address, slots)| {
            slots.iter().map(move |(slot, flags)| AccessRecord {
                location: StateKey::new(*address, *slot),
                flags: *flags,
            })
        })
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> + '_ {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First location where `self` (the later transaction) conflicts with
    /// `earlier`. Opaque sets conflict with everything.
    pub fn conflict_after(&self, earlier: &AccessSet) -> Option<(Option<StateKey>, ConflictKind)> {
        if self.opaque || earlier.opaque {
            return Some((None, ConflictKind::Opaque));
        }
        for (address, slots) in &self.records {
            let Some(other_slots) = earlier.records.get(address) else {
                continue;
            };
            for (slot, flags) in slots {
                if let Some(kind) = other_slots.get(slot).and_then(|e| flags.hazard_after(e)) {
                    return Some((Some(StateKey::new(*address, *slot)), kind));
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

/// Why two transactions were ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    WriteWrite,
    /// Later transaction reads what an earlier one writes.
    ReadAfterWrite,
    /// Later transaction writes what an earlier one reads.
    WriteAfterRead,
    /// One side could not be analyzed.
    Opaque,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::WriteWrite => "WAW",
            ConflictKind::ReadAfterWrite => "RAW",
            ConflictKind::WriteAfterRead => "WAR",
            ConflictKind::Opaque => "OPAQUE",
        }
    }
}

/// Edges attributed to one `(location, hazard)` pair.
///
/// Each edge is attributed to the first location (in key order) that
/// witnesses it, so the `edges` of all entries never exceed the graph's
/// edge count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contention {
    pub location: StateKey,
    pub kind: ConflictKind,
    /// Transactions at either end of an attributed edge.
    pub affected_txs: usize,
    pub edges: usize,
}

/// Transaction index -> lower indices it depends on.
///
/// Edges built through [`DependencyGraph::add_dependency`] always point to a
/// strictly lower index, which keeps the graph acyclic. `from_map` accepts
/// arbitrary edges so the scheduler's anomaly handling can be exercised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    deps: Vec<SmallVec<[TxIndex; 4]>>,
    /// One entry per contended `(location, hazard)`, not per edge.
    pub contention: Vec<Contention>,
}

impl DependencyGraph {
    pub fn new(tx_count: usize) -> Self {
        Self {
            deps: vec![SmallVec::new(); tx_count],
            contention: Vec::new(),
        }
    }

    /// Builds a graph from raw `(index, dependencies)` pairs without
    /// validating edge direction.
    pub fn from_map<I, D>(tx_count: usize, map: I) -> Self
    where
        I: IntoIterator<Item = (TxIndex, D)>,
        D: IntoIterator<Item = TxIndex>,
    {
        let mut graph = Self::new(tx_count);
        for (index, deps) in map {
            if index >= tx_count {
                continue;
            }
            let entry = &mut graph.deps[index];
            for dep in deps {
                if let Err(pos) = entry.binary_search(&dep) {
                    entry.insert(pos, dep);
                }
            }
        }
        graph
    }

    /// Records `later -> earlier`. Returns `false` for duplicates and for
    /// edges that do not point strictly downwards.
    pub fn add_dependency(&mut self, later: TxIndex, earlier: TxIndex) -> bool {
        if earlier >= later || later >= self.deps.len() {
            return false;
        }
        let entry = &mut self.deps[later];
        match entry.binary_search(&earlier) {
            Ok(_) => false,
            Err(pos) => {
                entry.insert(pos, earlier);
                true
            }
        }
    }

    /// Edges not attributed to any location (opaque, address or chain).
    pub fn unwitnessed_edges(&self) -> usize {
        let witnessed: usize = self.contention.iter().map(|c| c.edges).sum();
        self.edge_count().saturating_sub(witnessed)
    }

    /// Sorted dependencies of `index`.
    pub fn dependencies(&self, index: TxIndex) -> &[TxIndex] {
        self.deps.get(index).map_or(&[][..], |d| d.as_slice())
    }

    pub fn has_dependency(&self, later: TxIndex, earlier: TxIndex) -> bool {
        self.dependencies(later).binary_search(&earlier).is_ok()
    }

    /// Reverse adjacency: for each index, the indices that depend on it.
    pub fn dependents(&self) -> Vec<Vec<TxIndex>> {
        let mut out = vec![Vec::new(); self.deps.len()];
        for (later, deps) in self.deps.iter().enumerate() {
            for &earlier in deps {
                if let Some(slot) = out.get_mut(earlier) {
                    slot.push(later);
                }
            }
        }
        out
    }

    pub fn edge_count(&self) -> usize {
        self.deps.iter().map(SmallVec::len).sum()
    }

    /// Number of transactions covered.
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A set of mutually independent transactions, ascending by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub id: usize,
    pub members: Vec<TxIndex>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Ordered waves partitioning a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub waves: Vec<Wave>,
    /// Indices placed by deadlock breaking rather than by readiness.
    pub forced: Vec<TxIndex>,
}

impl Schedule {
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn tx_count(&self) -> usize {
        self.waves.iter().map(Wave::len).sum()
    }

    pub fn max_width(&self) -> usize {
        self.waves.iter().map(Wave::len).max().unwrap_or(0)
    }

    pub fn avg_width(&self) -> f64 {
        if self.waves.is_empty() {
            return 0.0;
        }
        self.tx_count() as f64 / self.waves.len() as f64
    }

    /// Every wave holds exactly one transaction.
    pub fn is_sequential(&self) -> bool {
        self.waves.iter().all(|w| w.len() == 1)
    }

    /// Wave position of each transaction, `None` when unscheduled.
    pub fn wave_of(&self, tx_count: usize) -> Vec<Option<usize>> {
        let mut out = vec![None; tx_count];
        for wave in &self.waves {
            for &i in &wave.members {
                if let Some(slot) = out.get_mut(i) {
                    *slot = Some(wave.id);
                }
            }
        }
        out
    }

    /// Waves as plain index lists.
    pub fn as_groups(&self) -> Vec<Vec<TxIndex>> {
        self.waves.iter().map(|w| w.members.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Execution results and state changes
// ---------------------------------------------------------------------------

/// Post-execution values of one account, only for fields that changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountChange {
    pub balance: Option<U256>,
    pub nonce: Option<u64>,
    pub code: Option<Bytes>,
    pub storage: BTreeMap<U256, U256>,
}

impl AccountChange {
    pub fn is_empty(&self) -> bool {
        self.balance.is_none()
            && self.nonce.is_none()
            && self.code.is_none()
            && self.storage.is_empty()
    }
}

/// Writes performed by one transaction, replayed onto canonical state in
/// ascending transaction order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChanges {
    pub accounts: BTreeMap<Address, AccountChange>,
}

impl StateChanges {
    pub fn account_mut(&mut self, address: Address) -> &mut AccountChange {
        self.accounts.entry(address).or_default()
    }

    /// Drops accounts whose change turned out empty.
    pub fn prune(&mut self) {
        self.accounts.retain(|_, change| !change.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.values().all(AccountChange::is_empty)
    }

    pub fn touched(&self) -> impl Iterator<Item = &Address> + '_ {
        self.accounts.keys()
    }
}

/// Outcome of one execution, before it is tied to a batch position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutcome {
    pub gas_used: u64,
    pub output: Bytes,
    pub logs: Vec<Log>,
    pub error: Option<TxError>,
    pub changes: StateChanges,
    pub contract_address: Option<Address>,
}

impl TxOutcome {
    /// Rejected before any state was touched.
    pub fn rejected(error: TxError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Per-transaction result, populated exactly once by the executing worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub index: TxIndex,
    pub gas_used: u64,
    pub output: Bytes,
    pub logs: Vec<Log>,
    pub error: Option<TxError>,
    pub changes: StateChanges,
    pub contract_address: Option<Address>,
}

impl ExecutionResult {
    pub fn from_outcome(index: TxIndex, outcome: TxOutcome) -> Self {
        Self {
            index,
            gas_used: outcome.gas_used,
            output: outcome.output,
            logs: outcome.logs,
            error: outcome.error,
            changes: outcome.changes,
            contract_address: outcome.contract_address,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Receipts and run output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    Failed,
}

/// Externally visible record of one transaction's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub index: TxIndex,
    pub tx_hash: B256,
    pub status: ReceiptStatus,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
    pub contract_address: Option<Address>,
    pub error: Option<TxError>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Counters for one sub-batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubBatchStats {
    pub id: usize,
    /// Index of the first transaction of the sub-batch in the full batch.
    pub offset: TxIndex,
    pub tx_count: usize,
    pub waves: usize,
    pub max_wave_width: usize,
    pub dependency_edges: usize,
    pub forced_advancements: usize,
    pub max_shards: usize,
    pub gas_used: u64,
    pub elapsed: Duration,
}

/// Counters for a full run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub tx_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub gas_used: u64,
    pub waves: usize,
    pub sub_batches: Vec<SubBatchStats>,
    pub workers: usize,
    pub elapsed: Duration,
    pub tps: f64,
}

/// Receipts plus totals returned by a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockOutput {
    pub receipts: Vec<Receipt>,
    pub total_gas_used: u64,
    pub stats: BatchStats,
}

// Compile-time layout assertions.
const _: () = assert!(std::mem::size_of::<StateKey>() == 52);
const _: () = assert!(std::mem::align_of::<StateKey>() == 1);
