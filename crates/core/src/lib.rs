//! Domain models, host capabilities, configuration and error definitions.
//!
//! Foundation crate -- no threading or I/O dependencies.

pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use config::{ConflictMode, DependencyAnalysis, ParallelConfig};
pub use error::{StrataError, StrataResult, TxError};
pub use state::{DeclaredSender, SenderRecovery, SnapshotId, StateDb, TxExecutor};
pub use types::{
    AccessFlags, AccessRecord, AccessSet, AccountChange, BatchStats, BlockContext, BlockOutput,
    ConflictKind, Contention, DependencyGraph, ExecutionResult, Receipt, ReceiptStatus, Schedule,
    StateChanges, StateKey, SubBatchStats, Transaction, TxIndex, TxOutcome, Wave,
};
