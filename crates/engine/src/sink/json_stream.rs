//! NDJSON (newline-delimited JSON) stream sink.
//!
//! Each row is serialized directly to the writer without an intermediate
//! `String`.
//!
//! ```ignore
//! let mut sink = JsonStreamSink::stdout();
//! sink.write_summary(&summary)?;
//! sink.write_rows(&receipts)?;
//! ```

use super::RunSummaryRow;
use serde::Serialize;
use std::io::{self, BufWriter, Write};

/// Wraps any `Write` in a `BufWriter` for batch I/O.
pub struct JsonStreamSink<W: Write> {
    writer: BufWriter<W>,
    rows_written: usize,
}

impl JsonStreamSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonStreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
            rows_written: 0,
        }
    }

    pub fn write_summary(&mut self, row: &RunSummaryRow) -> io::Result<()> {
        self.write_row(row)
    }

    /// Write wave or receipt rows.
    pub fn write_rows<T: Serialize>(&mut self, rows: &[T]) -> io::Result<()> {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    fn write_row<T: Serialize>(&mut self, row: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, row).map_err(io::Error::other)?;
        self.writer.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flush and return how many rows were written.
    pub fn finish(mut self) -> io::Result<usize> {
        self.writer.flush()?;
        Ok(self.rows_written)
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ReceiptRow, WaveRow};
    use alloy_primitives::B256;
    use strata_core::{BlockOutput, Receipt, ReceiptStatus, Schedule, TxError, Wave};

    #[test]
    fn one_json_object_per_line() {
        let mut buf = Vec::new();
        let mut sink = JsonStreamSink::new(&mut buf);

        let output = BlockOutput::default();
        let schedule = Schedule {
            waves: vec![
                Wave {
                    id: 0,
                    members: vec![0, 2],
                },
                Wave {
                    id: 1,
                    members: vec![1],
                },
            ],
            forced: vec![],
        };
        let receipt = Receipt {
            index: 1,
            tx_hash: B256::ZERO,
            status: ReceiptStatus::Failed,
            gas_used: 0,
            cumulative_gas_used: 21_000,
            logs: vec![],
            contract_address: None,
            error: Some(TxError::Reverted),
        };

        sink.write_summary(&RunSummaryRow::from_output(9, &output))
            .unwrap();
        sink.write_rows(&WaveRow::from_schedule(9, &schedule)).unwrap();
        sink.write_rows(&[ReceiptRow::from_receipt(9, &receipt)])
            .unwrap();
        assert_eq!(sink.rows_written(), 4);
        assert_eq!(sink.finish().unwrap(), 4);

        let output = String::from_utf8(buf).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["row"], "summary");
        assert_eq!(lines[1]["width"], 2);
        assert_eq!(lines[2]["first_tx"], 1);
        assert_eq!(lines[3]["status"], "failed");
        assert_eq!(lines[3]["error"], "execution reverted");
    }
}
