//! Row-oriented export of runs.
//!
//! Three row schemas:
//! - [`RunSummaryRow`]: one per run
//! - [`WaveRow`]: one per scheduled wave
//! - [`ReceiptRow`]: one per transaction
//!
//! Rows are written as NDJSON by [`json_stream::JsonStreamSink`].

pub mod json_stream;

use serde::Serialize;
use strata_core::{BlockOutput, Receipt, Schedule};

// ---------------------------------------------------------------------------
// Serializable row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunSummaryRow {
    pub row: &'static str,
    pub block_number: u64,
    pub total_txs: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub gas_used: u64,
    pub waves: u32,
    pub sub_batches: u32,
    pub workers: u32,
    pub elapsed_ms: u64,
    pub tps: f64,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaveRow {
    pub row: &'static str,
    pub block_number: u64,
    pub wave: u32,
    pub width: u32,
    pub first_tx: u32,
    pub last_tx: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptRow {
    pub row: &'static str,
    pub block_number: u64,
    pub index: u32,
    pub tx_hash: String,
    pub status: String,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub logs: u32,
    pub contract_address: Option<String>,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

impl RunSummaryRow {
    pub fn from_output(block_number: u64, output: &BlockOutput) -> Self {
        let stats = &output.stats;
        Self {
            row: "summary",
            block_number,
            total_txs: stats.tx_count as u32,
            succeeded: stats.succeeded as u32,
            failed: stats.failed as u32,
            gas_used: output.total_gas_used,
            waves: stats.waves as u32,
            sub_batches: stats.sub_batches.len() as u32,
            workers: stats.workers as u32,
            elapsed_ms: stats.elapsed.as_millis() as u64,
            tps: (stats.tps * 100.0).round() / 100.0,
            created_at_ms: now_ms(),
        }
    }
}

impl WaveRow {
    pub fn from_schedule(block_number: u64, schedule: &Schedule) -> Vec<Self> {
        schedule
            .waves
            .iter()
            .map(|w| WaveRow {
                row: "wave",
                block_number,
                wave: w.id as u32,
                width: w.len() as u32,
                first_tx: w.members.first().copied().unwrap_or_default() as u32,
                last_tx: w.members.last().copied().unwrap_or_default() as u32,
            })
            .collect()
    }
}

impl ReceiptRow {
    pub fn from_receipt(block_number: u64, receipt: &Receipt) -> Self {
        Self {
            row: "receipt",
            block_number,
            index: receipt.index as u32,
            tx_hash: format!("{}", receipt.tx_hash),
            status: if receipt.is_success() {
                "success".into()
            } else {
                "failed".into()
            },
            gas_used: receipt.gas_used,
            cumulative_gas_used: receipt.cumulative_gas_used,
            logs: receipt.logs.len() as u32,
            contract_address: receipt.contract_address.map(|a| format!("{a}")),
            error: receipt.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
