//! Dependency graph construction from per-transaction access sets.

use smallvec::SmallVec;
use std::collections::HashMap;
use strata_core::{
    AccessFlags, AccessSet, ConflictKind, Contention, DependencyGraph, StateKey, Transaction,
    TxIndex,
};

/// Builds the exact dependency graph of a batch.
///
/// Uses a two-phase approach:
///   1. Reverse-index every `location -> [(tx, flags)]`, accessors in
///      ascending index order.
///   2. For each location with 2+ accessors, emit `later -> earlier` edges
///      where at least one side writes.
///
/// Each new edge is counted against the first location (in key order)
/// that produces it; the graph keeps one [`Contention`] per
/// `(location, hazard)`, never a record per edge. Opaque sets are wired
/// to every other transaction.
pub fn build_dependency_graph(access_sets: &[AccessSet]) -> DependencyGraph {
    let mut graph = DependencyGraph::new(access_sets.len());

    let mut location_index: HashMap<StateKey, SmallVec<[(TxIndex, AccessFlags); 4]>> =
        HashMap::new();
    let mut opaque = Vec::new();

    for (index, set) in access_sets.iter().enumerate() {
        if set.is_opaque() {
            opaque.push(index);
            continue;
        }
        for record in set.records() {
            location_index
                .entry(record.location)
                .or_default()
                .push((index, record.flags));
        }
    }

    // Sorted so edge attribution is deterministic.
    let mut shared: Vec<_> = location_index
        .into_iter()
        .filter(|(_, accessors)| accessors.len() > 1)
        .collect();
    shared.sort_unstable_by_key(|(location, _)| *location);

    for (location, accessors) in &shared {
        let mut tallies: SmallVec<[Tally; 3]> = SmallVec::new();
        for (b, (later, later_flags)) in accessors.iter().enumerate() {
            for (a, (earlier, earlier_flags)) in accessors[..b].iter().enumerate() {
                let Some(kind) = later_flags.hazard_after(earlier_flags) else {
                    continue;
                };
                if !graph.add_dependency(*later, *earlier) {
                    continue;
                }
                let tally = match tallies.iter_mut().position(|t| t.kind == kind) {
                    Some(pos) => &mut tallies[pos],
                    None => {
                        tallies.push(Tally::new(kind, accessors.len()));
                        let last = tallies.len() - 1;
                        &mut tallies[last]
                    }
                };
                tally.edges += 1;
                tally.involved[a] = true;
                tally.involved[b] = true;
            }
        }
        for tally in tallies {
            graph.contention.push(Contention {
                location: *location,
                kind: tally.kind,
                affected_txs: tally.involved.iter().filter(|&&i| i).count(),
                edges: tally.edges,
            });
        }
    }

    let n = access_sets.len();
    for &o in &opaque {
        for earlier in 0..o {
            graph.add_dependency(o, earlier);
        }
        for later in o + 1..n {
            graph.add_dependency(later, o);
        }
    }

    tracing::debug!(
        txs = n,
        locations = shared.len(),
        edges = graph.edge_count(),
        opaque = opaque.len(),
        "dependency graph built"
    );
    graph
}

/// Edges one location contributes under a single hazard.
struct Tally {
    kind: ConflictKind,
    edges: usize,
    /// Accessor positions at either end of a counted edge.
    involved: Vec<bool>,
}

impl Tally {
    fn new(kind: ConflictKind, accessors: usize) -> Self {
        Self {
            kind,
            edges: 0,
            involved: vec![false; accessors],
        }
    }
}

/// Coarse graph: two transactions conflict iff they touch a common
/// account (sender, recipient or created address).
///
/// A superset of the exact graph, usable without access sets.
pub fn build_address_graph(transactions: &[Transaction]) -> DependencyGraph {
    let mut graph = DependencyGraph::new(transactions.len());
    let mut by_address: HashMap<_, Vec<TxIndex>> = HashMap::new();

    for (index, tx) in transactions.iter().enumerate() {
        let mut touched: SmallVec<[_; 2]> = SmallVec::new();
        touched.push(tx.from);
        if let Some(target) = tx.to.or_else(|| tx.create_address()) {
            if target != tx.from {
                touched.push(target);
            }
        }
        for address in touched {
            let earlier = by_address.entry(address).or_default();
            for &e in earlier.iter() {
                graph.add_dependency(index, e);
            }
            earlier.push(index);
        }
    }

    tracing::debug!(
        txs = transactions.len(),
        edges = graph.edge_count(),
        "address graph built"
    );
    graph
}

/// Chain graph: every transaction depends on its predecessor.
pub fn build_sequential_graph(tx_count: usize) -> DependencyGraph {
    let mut graph = DependencyGraph::new(tx_count);
    for later in 1..tx_count {
        graph.add_dependency(later, later - 1);
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, B256, U256};

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn set(index: TxIndex, records: &[(StateKey, AccessFlags)]) -> AccessSet {
        let mut s = AccessSet::new(index);
        for (k, f) in records {
            s.add(*k, *f);
        }
        s
    }

    fn transfer(from: u8, to: u8) -> Transaction {
        Transaction {
            hash: B256::ZERO,
            from: addr(from),
            to: Some(addr(to)),
            nonce: 0,
            value: U256::from(1),
            gas: 21_000,
            input: Bytes::new(),
        }
    }

    #[test]
    fn write_write_creates_edge_with_witness() {
        let key = StateKey::balance(addr(1));
        let sets = vec![
            set(0, &[(key, AccessFlags::WRITE)]),
            set(1, &[(key, AccessFlags::WRITE)]),
        ];
        let g = build_dependency_graph(&sets);
        assert_eq!(g.dependencies(1), &[0]);
        assert_eq!(g.contention.len(), 1);
        assert_eq!(g.contention[0].location, key);
        assert_eq!(g.contention[0].kind, ConflictKind::WriteWrite);
    }

    #[test]
    fn read_read_creates_no_edge() {
        let key = StateKey::balance(addr(1));
        let sets = vec![
            set(0, &[(key, AccessFlags::READ)]),
            set(1, &[(key, AccessFlags::READ)]),
        ];
        assert_eq!(build_dependency_graph(&sets).edge_count(), 0);
    }

    #[test]
    fn write_after_read_is_an_edge() {
        let key = StateKey::nonce(addr(1));
        let sets = vec![
            set(0, &[(key, AccessFlags::READ)]),
            set(1, &[(key, AccessFlags::WRITE)]),
        ];
        let g = build_dependency_graph(&sets);
        assert!(g.has_dependency(1, 0));
        assert_eq!(g.contention[0].kind, ConflictKind::WriteAfterRead);
    }

    #[test]
    fn every_conflicting_pair_is_connected() {
        let key = StateKey::balance(addr(7));
        let sets: Vec<_> = (0..4).map(|i| set(i, &[(key, AccessFlags::READ_WRITE)])).collect();
        let g = build_dependency_graph(&sets);
        assert_eq!(g.dependencies(3), &[0, 1, 2]);
        assert_eq!(g.edge_count(), 6);
    }

    #[test]
    fn hot_location_keeps_one_contention_entry() {
        let key = StateKey::balance(addr(7));
        let sets: Vec<_> = (0..200).map(|i| set(i, &[(key, AccessFlags::READ_WRITE)])).collect();
        let g = build_dependency_graph(&sets);
        assert_eq!(g.edge_count(), 200 * 199 / 2);
        assert_eq!(g.contention.len(), 1);
        assert_eq!(g.contention[0].edges, g.edge_count());
        assert_eq!(g.contention[0].affected_txs, 200);
        assert_eq!(g.unwitnessed_edges(), 0);
    }

    #[test]
    fn edge_is_attributed_to_one_location_only() {
        let a = StateKey::balance(addr(1));
        let b = StateKey::balance(addr(2));
        let both = [(a, AccessFlags::READ_WRITE), (b, AccessFlags::READ_WRITE)];
        let g = build_dependency_graph(&[set(0, &both), set(1, &both)]);
        assert_eq!(g.edge_count(), 1);
        let attributed: usize = g.contention.iter().map(|c| c.edges).sum();
        assert_eq!(attributed, 1);
    }

    #[test]
    fn opaque_set_links_to_everything() {
        let sets = vec![
            set(0, &[(StateKey::balance(addr(1)), AccessFlags::READ_WRITE)]),
            AccessSet::opaque(1),
            set(2, &[(StateKey::balance(addr(2)), AccessFlags::READ_WRITE)]),
        ];
        let g = build_dependency_graph(&sets);
        assert_eq!(g.dependencies(1), &[0]);
        assert_eq!(g.dependencies(2), &[1]);
        assert_eq!(g.unwitnessed_edges(), 2);
    }

    #[test]
    fn address_graph_links_shared_accounts() {
        let txs = vec![transfer(1, 2), transfer(3, 4), transfer(2, 5), transfer(6, 6)];
        let g = build_address_graph(&txs);
        assert_eq!(g.dependencies(1), &[] as &[TxIndex]);
        assert_eq!(g.dependencies(2), &[0]);
        assert_eq!(g.dependencies(3), &[] as &[TxIndex]);
    }

    #[test]
    fn sequential_graph_is_a_chain() {
        let g = build_sequential_graph(4);
        assert_eq!(g.dependencies(0), &[] as &[TxIndex]);
        assert_eq!(g.dependencies(3), &[2]);
        assert_eq!(g.edge_count(), 3);
    }
}
