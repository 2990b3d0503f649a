//! Human-readable run report.
//!
//! Summarizes a schedule (and, after execution, its output) with wave
//! statistics and the storage locations that serialize the batch most.

use alloy_primitives::{Address, B256};
use std::time::Duration;
use strata_core::{BlockOutput, ConflictKind, DependencyGraph, Schedule};

/// Aggregated contention on one `(address, slot, hazard)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub address: Address,
    pub slot: B256,
    pub kind: ConflictKind,
    /// Unique transactions touching the location.
    pub affected_txs: usize,
    /// Pairwise edges witnessed by the location.
    pub conflicts: usize,
    /// `conflicts / affected_txs`.
    pub density: f64,
}

impl Hotspot {
    pub fn severity(&self) -> &'static str {
        match self.density {
            d if d >= 5.0 => "CRITICAL",
            d if d >= 3.0 => "HIGH",
            d if d >= 1.0 => "MEDIUM",
            _ => "LOW",
        }
    }
}

#[derive(Debug)]
pub struct Report {
    pub block_number: u64,
    pub total_txs: usize,
    pub dependency_edges: usize,
    pub waves: usize,
    pub max_wave_width: usize,
    pub avg_wave_width: f64,
    pub forced: usize,
    /// Edges without a single witnessing location (opaque, address, chain).
    pub unwitnessed_edges: usize,
    pub hotspots: Vec<Hotspot>,
    pub execution: Option<ExecutionSummary>,
}

#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub gas_used: u64,
    pub sub_batches: usize,
    pub workers: usize,
    pub elapsed: Duration,
    pub tps: f64,
}

impl Report {
    /// Plan-only report.
    pub fn build(block_number: u64, graph: &DependencyGraph, schedule: &Schedule) -> Self {
        let mut hotspots: Vec<Hotspot> = graph
            .contention
            .iter()
            .map(|c| {
                let density = c.edges as f64 / c.affected_txs.max(1) as f64;
                Hotspot {
                    address: c.location.address,
                    slot: c.location.slot,
                    kind: c.kind,
                    affected_txs: c.affected_txs,
                    conflicts: c.edges,
                    density: (density * 100.0).round() / 100.0,
                }
            })
            .collect();

        // Worst offenders first, ties broken by location for stable output.
        hotspots.sort_by(|a, b| {
            b.density
                .total_cmp(&a.density)
                .then_with(|| (a.address, a.slot).cmp(&(b.address, b.slot)))
        });

        Report {
            block_number,
            total_txs: graph.len(),
            dependency_edges: graph.edge_count(),
            waves: schedule.len(),
            max_wave_width: schedule.max_width(),
            avg_wave_width: schedule.avg_width(),
            forced: schedule.forced.len(),
            unwitnessed_edges: graph.unwitnessed_edges(),
            hotspots,
            execution: None,
        }
    }

    pub fn with_output(mut self, output: &BlockOutput) -> Self {
        self.execution = Some(ExecutionSummary {
            succeeded: output.stats.succeeded,
            failed: output.stats.failed,
            gas_used: output.total_gas_used,
            sub_batches: output.stats.sub_batches.len(),
            workers: output.stats.workers,
            elapsed: output.stats.elapsed,
            tps: output.stats.tps,
        });
        self
    }

    /// Render as a boxed text report, listing at most `limit` hotspots.
    pub fn render(&self, limit: usize) -> String {
        let mut out = String::new();
        let line = |out: &mut String, label: &str, value: String| {
            out.push_str(&format!("║  {label:<20}{value:>38} ║\n"));
        };

        out.push('\n');
        out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        out.push_str("║                     STRATA EXECUTION PLAN                    ║\n");
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        line(&mut out, "Block:", self.block_number.to_string());
        line(&mut out, "Transactions:", self.total_txs.to_string());
        line(&mut out, "Dependency edges:", self.dependency_edges.to_string());
        line(&mut out, "Waves:", self.waves.to_string());
        line(&mut out, "Max wave width:", self.max_wave_width.to_string());
        line(&mut out, "Avg wave width:", format!("{:.2}", self.avg_wave_width));
        if self.forced > 0 {
            line(&mut out, "Forced advances:", self.forced.to_string());
        }

        if let Some(exec) = &self.execution {
            out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            line(&mut out, "Succeeded:", exec.succeeded.to_string());
            line(&mut out, "Failed:", exec.failed.to_string());
            line(&mut out, "Gas used:", exec.gas_used.to_string());
            line(&mut out, "Sub-batches:", exec.sub_batches.to_string());
            line(&mut out, "Workers:", exec.workers.to_string());
            line(&mut out, "Elapsed:", format!("{:?}", exec.elapsed));
            line(&mut out, "Throughput (tx/s):", format!("{:.0}", exec.tps));
        }

        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        if self.hotspots.is_empty() {
            out.push_str("║  No storage contention.                                      ║\n");
        } else {
            out.push_str("║  CONTENTION HOTSPOTS                                         ║\n");
            for (i, h) in self.hotspots.iter().take(limit).enumerate() {
                out.push_str("║                                                              ║\n");
                out.push_str(&format!(
                    "║  {}. [{}] {}\n",
                    i + 1,
                    h.severity(),
                    h.address
                ));
                out.push_str(&format!("║     Slot: {}\n", h.slot));
                out.push_str(&format!(
                    "║     Hazard: {}  |  Txs: {}  |  Conflicts: {}  |  Density: {:.2}\n",
                    h.kind.as_str(),
                    h.affected_txs,
                    h.conflicts,
                    h.density
                ));
            }
        }
        out.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_dependency_graph, build_sequential_graph};
    use crate::schedule::schedule;
    use strata_core::{AccessFlags, AccessSet, StateKey};

    fn hot_graph() -> DependencyGraph {
        let key = StateKey::balance(Address::repeat_byte(1));
        let sets: Vec<_> = (0..4)
            .map(|i| {
                let mut s = AccessSet::new(i);
                s.add(key, AccessFlags::READ_WRITE);
                s
            })
            .collect();
        build_dependency_graph(&sets)
    }

    #[test]
    fn hotspot_density_counts_pairs_per_tx() {
        let g = hot_graph();
        let report = Report::build(7, &g, &schedule(&g));
        assert_eq!(report.hotspots.len(), 1);
        let h = &report.hotspots[0];
        assert_eq!(h.affected_txs, 4);
        assert_eq!(h.conflicts, 6);
        assert_eq!(h.density, 1.5);
        assert_eq!(h.severity(), "MEDIUM");
        assert_eq!(report.waves, 4);
    }

    #[test]
    fn chain_edges_are_unwitnessed() {
        let g = build_sequential_graph(3);
        let report = Report::build(0, &g, &schedule(&g));
        assert!(report.hotspots.is_empty());
        assert_eq!(report.unwitnessed_edges, 2);
        assert!(report.render(5).contains("No storage contention"));
    }

    #[test]
    fn render_includes_execution_section() {
        let g = hot_graph();
        let output = BlockOutput::default();
        let text = Report::build(7, &g, &schedule(&g)).with_output(&output).render(3);
        assert!(text.contains("STRATA EXECUTION PLAN"));
        assert!(text.contains("Succeeded:"));
        assert!(text.contains("RAW") || text.contains("WAW"));
    }
}
