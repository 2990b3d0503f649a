//! State backends for Strata: copy-on-write in-memory state, the revm
//! database adapter and JSON workload loading.

pub mod genesis;
pub mod memory;
pub mod revm_db;

pub use genesis::{Genesis, Workload};
pub use memory::{Account, MemoryState};
pub use revm_db::StateDbRef;
