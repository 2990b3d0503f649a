//! Centralized error types for the Strata workspace.

use crate::types::{BlockOutput, TxIndex};
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Batch-level error. Any of these aborts `run_parallel`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StrataError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported conflict-resolution mode: {0}")]
    UnsupportedMode(String),

    #[error("Sender recovery failed: {0}")]
    SenderRecovery(String),

    #[error("No result recorded for transaction {index}")]
    MissingResult { index: TxIndex },

    #[error("Transaction {index} scheduled before its dependency {dependency} was committed")]
    DependencyViolation { index: TxIndex, dependency: TxIndex },

    #[error(
        "Batch timed out after {} ms ({} receipts completed)",
        .elapsed_ms,
        .partial.receipts.len()
    )]
    Timeout {
        elapsed_ms: u64,
        /// Output of the sub-batches that finished before the deadline.
        partial: Box<BlockOutput>,
    },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StrataResult<T> = Result<T, StrataError>;

/// Per-transaction failure. Lives inside an execution result and ends up as
/// a failed receipt; it never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxError {
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: U256, required: U256 },

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("intrinsic gas too low: limit {limit}, need {required}")]
    IntrinsicGas { limit: u64, required: u64 },

    #[error("contract address collision")]
    CreateCollision,

    #[error("execution reverted")]
    Reverted,

    #[error("execution halted: {reason}")]
    Halted { reason: String },

    #[error("transaction rejected: {reason}")]
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_error_serializes_with_kind_tag() {
        let err = TxError::NonceMismatch {
            expected: 3,
            got: 1,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "nonce_mismatch");
        assert_eq!(json["expected"], 3);
    }

    #[test]
    fn timeout_message_counts_partial_receipts() {
        let err = StrataError::Timeout {
            elapsed_ms: 12,
            partial: Box::default(),
        };
        assert_eq!(
            err.to_string(),
            "Batch timed out after 12 ms (0 receipts completed)"
        );
    }
}
