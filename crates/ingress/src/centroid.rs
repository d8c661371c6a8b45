use std::sync::Arc;

use dashmap::DashMap;
use fxhash::FxBuildHasher;

use crate::topology::TopologyTable;
use crate::{ProcId, ProcSet, ProcSetWords};

/// Elects the master for a vertex from the positions of its mirrors.
///
/// The winner is the process minimizing the torus-hop sum to every mirror,
/// with ties resolved towards the lowest pid. Every process in the cluster is
/// a candidate, not only the mirrors themselves; a winner that holds no
/// replica yet becomes one during master installation.
///
/// Elections are deterministic, so results are memoized by the canonical
/// mirror-set key and shared across worker threads.
pub struct CentroidSelector {
    topology: Arc<TopologyTable>,
    memo: DashMap<ProcSetWords, ProcId, FxBuildHasher>,
}

impl CentroidSelector {
    pub fn new(topology: Arc<TopologyTable>) -> Self {
        Self {
            topology,
            memo: DashMap::with_hasher(FxBuildHasher::default()),
        }
    }

    pub fn elect(&self, mirrors: &ProcSet) -> ProcId {
        assert!(
            !mirrors.is_empty(),
            "centroid election over an empty mirror set"
        );

        let key = mirrors.words();
        if let Some(pid) = self.memo.get(&key) {
            return *pid;
        }

        let num_procs = self.topology.num_procs();
        let mut best_hops = u64::MAX;
        let mut best_pid = ProcId::MAX;

        for candidate in 0..num_procs {
            let mut hops = 0_u64;
            for mirror in mirrors.iter() {
                if mirror as usize == candidate {
                    continue;
                }
                hops += self.topology.hop_distance(candidate as ProcId, mirror) as u64;
            }
            if hops < best_hops {
                best_hops = hops;
                best_pid = candidate as ProcId;
            }
        }

        assert!(
            (best_pid as usize) < num_procs,
            "centroid election produced no candidate"
        );

        self.memo.insert(key, best_pid);
        best_pid
    }

    #[cfg(test)]
    fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TorusConfig;

    fn selector(coords: Vec<Vec<i64>>) -> CentroidSelector {
        let topology = Arc::new(TopologyTable::new(coords, TorusConfig::default()).unwrap());
        CentroidSelector::new(topology)
    }

    fn set(pids: &[ProcId]) -> ProcSet {
        pids.iter().copied().collect()
    }

    #[test]
    fn singleton_mirror_set_elects_itself() {
        let s = selector(vec![vec![0, 0, 0], vec![4, 0, 0], vec![0, 4, 0]]);

        // The mirror itself has hop sum zero; anything else pays the trip.
        assert_eq!(s.elect(&set(&[1])), 1);
    }

    #[test]
    fn elects_minimal_hop_sum() {
        // pid 1 sits between pids 0 and 2 on one axis.
        let s = selector(vec![vec![0, 0, 0], vec![2, 0, 0], vec![4, 0, 0]]);

        assert_eq!(s.elect(&set(&[0, 2])), 1);
    }

    #[test]
    fn ties_resolve_to_lowest_pid() {
        // All processes co-located: every candidate has hop sum zero.
        let s = selector(vec![vec![0, 0, 0]; 4]);

        assert_eq!(s.elect(&set(&[2, 3])), 0);
    }

    #[test]
    fn repeated_elections_hit_the_memo() {
        let s = selector(vec![
            vec![0, 0, 0],
            vec![0, 0, 1],
            vec![0, 1, 0],
            vec![1, 0, 0],
        ]);

        let mirrors = set(&[0, 2, 3]);
        let first = s.elect(&mirrors);
        assert_eq!(s.memo_len(), 1);

        for _ in 0..1000 {
            assert_eq!(s.elect(&mirrors), first);
        }
        assert_eq!(s.memo_len(), 1);

        // A different set is a different memo entry.
        let other = s.elect(&set(&[1, 2]));
        assert_eq!(s.memo_len(), 2);
        assert!((other as usize) < 4);
    }
}
