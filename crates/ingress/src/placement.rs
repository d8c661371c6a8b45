//! Streaming edge-placement policies.
//!
//! A policy maps an edge to the process that will own it, balancing the
//! per-process edge counts against vertex replication. All variants break
//! ties by hashing the direction-independent edge pair, so the decision for
//! `(s, t)` and `(t, s)` is identical.

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::topology::TopologyTable;
use crate::{ProcId, ProcSet, VertexId};

const EPSILON: f64 = 1.0;
const SCORE_TOLERANCE: f64 = 1e-5;

/// Normalizes the topology term into the magnitude of the coverage bonuses.
const TOPOLOGY_SCORE_SCALE: f64 = 30.0;

/// Which rule decides the owning process of an edge.
#[derive(Clone, Copy, Debug)]
pub enum Policy {
    /// Hash of the edge pair; stateless and perfectly balanced in
    /// expectation.
    Random,
    /// Prefer processes already hosting an endpoint, modulated by a
    /// load-balance term.
    Greedy { usehash: bool, userecent: bool },
    /// Greedy plus a precomputed score rewarding candidates geometrically
    /// close to both endpoints' hash-default processes.
    GreedyTopology { usehash: bool, userecent: bool },
    /// Greedy with the coverage bonus weighted by relative endpoint degree,
    /// keeping low-degree vertices intact and cutting high-degree ones.
    Hdrf { usehash: bool, userecent: bool },
}

/// Direction-independent hash of an edge.
pub fn hash_edge(source: VertexId, target: VertexId) -> u64 {
    fxhash::hash64(&(source.min(target), source.max(target)))
}

pub fn hash_vertex(vid: VertexId) -> u64 {
    fxhash::hash64(&vid)
}

#[derive(Clone, Copy, PartialEq)]
enum Flavor {
    Coverage,
    Topology,
    Hdrf,
}

#[derive(Default)]
struct VertexPlacement {
    /// Which processes received an edge of this vertex so far.
    mask: ProcSet,
    /// True degree counter, maintained by the HDRF rule only.
    degree: usize,
}

struct PlacementState {
    proc_num_edges: Vec<usize>,
    vertices: FxHashMap<VertexId, VertexPlacement>,
}

/// Decides the owning process for every ingested edge.
///
/// The greedy rules read and update shared running state (endpoint masks,
/// per-process edge counts, HDRF degrees), so placement from multiple threads
/// is serialized by an internal mutex.
pub struct EdgeDecision {
    policy: Policy,
    num_procs: usize,
    coords_score: Vec<f64>,
    state: Mutex<PlacementState>,
}

impl EdgeDecision {
    pub fn new(policy: Policy, topology: &TopologyTable) -> Self {
        let num_procs = topology.num_procs();
        let coords_score = match policy {
            Policy::GreedyTopology { .. } => topology_scores(topology),
            _ => Vec::new(),
        };

        Self {
            policy,
            num_procs,
            coords_score,
            state: Mutex::new(PlacementState {
                proc_num_edges: vec![0; num_procs],
                vertices: FxHashMap::default(),
            }),
        }
    }

    pub fn num_procs(&self) -> usize {
        self.num_procs
    }

    /// Assigns `(source, target)` to a process in `[0, P)`.
    pub fn edge_to_proc(&self, source: VertexId, target: VertexId) -> ProcId {
        let pid = match self.policy {
            Policy::Random => (hash_edge(source, target) % self.num_procs as u64) as ProcId,
            Policy::Greedy { usehash, userecent } => {
                self.place_greedy(source, target, None, Flavor::Coverage, usehash, userecent)
            }
            Policy::GreedyTopology { usehash, userecent } => {
                self.place_greedy(source, target, None, Flavor::Topology, usehash, userecent)
            }
            Policy::Hdrf { usehash, userecent } => {
                self.place_greedy(source, target, None, Flavor::Hdrf, usehash, userecent)
            }
        };
        assert!((pid as usize) < self.num_procs);
        pid
    }

    /// Hashes `(source, target)` into an explicit candidate list.
    pub fn random_among(
        &self,
        source: VertexId,
        target: VertexId,
        candidates: &[ProcId],
    ) -> ProcId {
        assert!(!candidates.is_empty(), "empty candidate list");
        candidates[(hash_edge(source, target) % candidates.len() as u64) as usize]
    }

    /// Greedy scoring restricted to an explicit candidate list.
    pub fn greedy_among(
        &self,
        source: VertexId,
        target: VertexId,
        candidates: &[ProcId],
    ) -> ProcId {
        assert!(!candidates.is_empty(), "empty candidate list");
        self.place_greedy(
            source,
            target,
            Some(candidates),
            Flavor::Coverage,
            false,
            false,
        )
    }

    fn place_greedy(
        &self,
        source: VertexId,
        target: VertexId,
        candidates: Option<&[ProcId]>,
        flavor: Flavor,
        usehash: bool,
        userecent: bool,
    ) -> ProcId {
        let mut state = self.state.lock();
        let state = &mut *state;
        let num_procs = self.num_procs as u64;

        let min_edges = *state.proc_num_edges.iter().min().unwrap();
        let max_edges = *state.proc_num_edges.iter().max().unwrap();

        let src_mask = state
            .vertices
            .get(&source)
            .map(|v| v.mask)
            .unwrap_or_default();
        let dst_mask = state
            .vertices
            .get(&target)
            .map(|v| v.mask)
            .unwrap_or_default();

        // Relative degrees for the HDRF weighting, counting the edge that is
        // being placed.
        let (f_src, f_dst) = if flavor == Flavor::Hdrf {
            let src_degree = state.vertices.get(&source).map_or(0, |v| v.degree) + 1;
            let dst_degree = state.vertices.get(&target).map_or(0, |v| v.degree) + 1;
            let sum = (src_degree + dst_degree) as f64;
            (src_degree as f64 / sum, dst_degree as f64 / sum)
        } else {
            (0.0, 0.0)
        };

        let (src_hash_pid, dst_hash_pid) = if flavor == Flavor::Topology {
            (
                (hash_vertex(source) % num_procs) as usize,
                (hash_vertex(target) % num_procs) as usize,
            )
        } else {
            (0, 0)
        };

        let candidate_at =
            |slot: usize| candidates.map_or(slot as ProcId, |list| list[slot]);
        let slots = candidates.map_or(self.num_procs, <[ProcId]>::len);

        let mut scores = Vec::with_capacity(slots);
        let mut max_score = f64::NEG_INFINITY;

        for slot in 0..slots {
            let pid = candidate_at(slot);
            let i = pid as usize;

            let sd = src_mask.contains(pid) as usize
                + (usehash && source % num_procs == pid as u64) as usize;
            let td = dst_mask.contains(pid) as usize
                + (usehash && target % num_procs == pid as u64) as usize;

            let bal = (max_edges - state.proc_num_edges[i]) as f64
                / (EPSILON + (max_edges - min_edges) as f64);

            let coverage = match flavor {
                Flavor::Coverage => ((sd > 0) as u8 + (td > 0) as u8) as f64,
                Flavor::Topology => {
                    ((sd > 0) as u8 + (td > 0) as u8) as f64
                        + self.coords_score
                            [(src_hash_pid * self.num_procs + dst_hash_pid) * self.num_procs + i]
                }
                Flavor::Hdrf => {
                    let sd_score = if sd > 0 { 1.0 + (1.0 - f_src) } else { 0.0 };
                    let td_score = if td > 0 { 1.0 + (1.0 - f_dst) } else { 0.0 };
                    sd_score + td_score
                }
            };

            let score = bal + coverage;
            max_score = max_score.max(score);
            scores.push(score);
        }

        let mut top_procs = Vec::with_capacity(slots);
        for (slot, score) in scores.iter().enumerate() {
            if (score - max_score).abs() < SCORE_TOLERANCE {
                top_procs.push(candidate_at(slot));
            }
        }

        let best = top_procs[(hash_edge(source, target) % top_procs.len() as u64) as usize];
        assert!((best as usize) < self.num_procs);

        let src_entry = state.vertices.entry(source).or_default();
        if userecent {
            src_entry.mask.clear();
        }
        src_entry.mask.insert(best);
        if flavor == Flavor::Hdrf {
            src_entry.degree += 1;
        }

        let dst_entry = state.vertices.entry(target).or_default();
        if userecent {
            dst_entry.mask.clear();
        }
        dst_entry.mask.insert(best);
        if flavor == Flavor::Hdrf {
            dst_entry.degree += 1;
        }

        state.proc_num_edges[best as usize] += 1;

        best
    }

    #[cfg(test)]
    fn mask_of(&self, vid: VertexId) -> ProcSet {
        self.state
            .lock()
            .vertices
            .get(&vid)
            .map(|v| v.mask)
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn degree_of(&self, vid: VertexId) -> usize {
        self.state.lock().vertices.get(&vid).map_or(0, |v| v.degree)
    }

    #[cfg(test)]
    fn edge_counts(&self) -> Vec<usize> {
        self.state.lock().proc_num_edges.clone()
    }
}

/// Precomputes the placement reward for every `(src, dst, candidate)` pid
/// triple: candidates close to both endpoints' hash-default processes, and
/// equidistant between them, score highest.
fn topology_scores(topology: &TopologyTable) -> Vec<f64> {
    let p = topology.num_procs();
    let mut scores = vec![0.0; p * p * p];

    for src in 0..p {
        for dst in 0..p {
            let src_dst = topology.hop_distance(src as ProcId, dst as ProcId) as f64;
            for cand in 0..p {
                let src_can = topology.hop_distance(src as ProcId, cand as ProcId) as f64;
                let dst_can = topology.hop_distance(dst as ProcId, cand as ProcId) as f64;
                scores[(src * p + dst) * p + cand] = ((2.0 * src_dst - (src_can + dst_can))
                    / (EPSILON + src_dst)
                    + (src_dst - (src_can - dst_can).abs()) / (EPSILON + src_dst))
                    / TOPOLOGY_SCORE_SCALE;
            }
        }
    }

    scores
}
