//! Wave scheduling: topological layering of the dependency graph.

use strata_core::error::{StrataError, StrataResult};
use strata_core::{DependencyGraph, Schedule, TxIndex, Wave};

/// Layers `graph` into waves of mutually independent transactions.
///
/// Each round takes every unscheduled index whose dependencies are all in
/// earlier waves. A round that selects nothing can only follow from a
/// malformed graph; the lowest unscheduled index is then forced into a wave
/// of its own and the anomaly is logged.
pub fn schedule(graph: &DependencyGraph) -> Schedule {
    let n = graph.len();
    let dependents = graph.dependents();
    let mut pending: Vec<usize> = (0..n).map(|i| graph.dependencies(i).len()).collect();
    let mut scheduled = vec![false; n];
    let mut remaining = n;

    let mut ready: Vec<TxIndex> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut out = Schedule::default();

    while remaining > 0 {
        if ready.is_empty() {
            let Some(forced) = (0..n).find(|&i| !scheduled[i]) else {
                break;
            };
            tracing::error!(
                index = forced,
                unresolved = pending[forced],
                wave = out.waves.len(),
                "no transaction ready, forcing advancement"
            );
            out.forced.push(forced);
            ready.push(forced);
        }

        let mut members = std::mem::take(&mut ready);
        members.sort_unstable();
        for &i in &members {
            scheduled[i] = true;
        }
        remaining -= members.len();

        for &i in &members {
            for &d in &dependents[i] {
                if scheduled[d] {
                    continue;
                }
                pending[d] = pending[d].saturating_sub(1);
                if pending[d] == 0 {
                    ready.push(d);
                }
            }
        }

        out.waves.push(Wave {
            id: out.waves.len(),
            members,
        });
    }

    tracing::debug!(
        txs = n,
        waves = out.waves.len(),
        max_width = out.max_width(),
        forced = out.forced.len(),
        "schedule built"
    );
    out
}

/// Checks that `schedule` partitions `graph`'s indices, that waves are
/// ascending and internally independent, and that every dependency sits in
/// an earlier wave.
pub fn validate(schedule: &Schedule, graph: &DependencyGraph) -> StrataResult<()> {
    let n = graph.len();
    let mut wave_of = vec![None; n];

    for (pos, wave) in schedule.waves.iter().enumerate() {
        if wave.id != pos {
            return Err(StrataError::Internal(format!(
                "wave at position {pos} has id {}",
                wave.id
            )));
        }
        if wave.members.windows(2).any(|w| w[0] >= w[1]) {
            return Err(StrataError::Internal(format!(
                "wave {pos} is not strictly ascending"
            )));
        }
        for &i in &wave.members {
            match wave_of.get_mut(i) {
                None => {
                    return Err(StrataError::Internal(format!(
                        "wave {pos} holds unknown transaction {i}"
                    )))
                }
                Some(Some(prev)) => {
                    return Err(StrataError::Internal(format!(
                        "transaction {i} scheduled in waves {prev} and {pos}"
                    )))
                }
                Some(slot) => *slot = Some(pos),
            }
        }
    }

    for (index, wave) in wave_of.iter().enumerate() {
        let Some(wave) = wave else {
            return Err(StrataError::MissingResult { index });
        };
        for &dep in graph.dependencies(index) {
            match wave_of.get(dep).copied().flatten() {
                Some(dep_wave) if dep_wave < *wave => {}
                _ => {
                    return Err(StrataError::DependencyViolation {
                        index,
                        dependency: dep,
                    })
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_sequential_graph;

    #[test]
    fn independent_transactions_share_one_wave() {
        let g = DependencyGraph::new(3);
        let s = schedule(&g);
        assert_eq!(s.as_groups(), vec![vec![0, 1, 2]]);
        assert!(s.forced.is_empty());
    }

    #[test]
    fn diamond_layers_into_three_waves() {
        let g = DependencyGraph::from_map(
            5,
            [
                (0, vec![]),
                (1, vec![]),
                (2, vec![0]),
                (3, vec![1]),
                (4, vec![2, 3]),
            ],
        );
        let s = schedule(&g);
        assert_eq!(s.as_groups(), vec![vec![0, 1], vec![2, 3], vec![4]]);
        validate(&s, &g).unwrap();
    }

    #[test]
    fn scheduling_is_idempotent() {
        let g = DependencyGraph::from_map(6, [(3, vec![0]), (4, vec![3, 1]), (5, vec![2])]);
        assert_eq!(schedule(&g), schedule(&g));
    }

    #[test]
    fn chain_yields_single_member_waves() {
        let g = build_sequential_graph(4);
        let s = schedule(&g);
        assert!(s.is_sequential());
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn cycle_is_broken_by_forced_advancement() {
        let g = DependencyGraph::from_map(3, [(0, vec![1]), (1, vec![0])]);
        let s = schedule(&g);
        assert_eq!(s.tx_count(), 3);
        assert_eq!(s.waves[0].members, vec![2]);
        assert_eq!(s.forced, vec![0]);
        assert_eq!(s.waves[1].members, vec![0]);
        assert_eq!(s.waves[2].members, vec![1]);
    }

    #[test]
    fn dangling_dependency_is_forced() {
        let g = DependencyGraph::from_map(2, [(1, vec![7])]);
        let s = schedule(&g);
        assert_eq!(s.as_groups(), vec![vec![0], vec![1]]);
        assert_eq!(s.forced, vec![1]);
    }

    #[test]
    fn validate_rejects_same_wave_dependency() {
        let g = DependencyGraph::from_map(2, [(1, vec![0])]);
        let bad = Schedule {
            waves: vec![Wave {
                id: 0,
                members: vec![0, 1],
            }],
            forced: vec![],
        };
        assert!(matches!(
            validate(&bad, &g),
            Err(StrataError::DependencyViolation {
                index: 1,
                dependency: 0
            })
        ));
    }

    #[test]
    fn validate_rejects_missing_transaction() {
        let g = DependencyGraph::new(2);
        let partial = Schedule {
            waves: vec![Wave {
                id: 0,
                members: vec![0],
            }],
            forced: vec![],
        };
        assert!(validate(&partial, &g).is_err());
    }
}
