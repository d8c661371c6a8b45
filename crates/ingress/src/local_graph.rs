use std::sync::atomic::Ordering::{AcqRel, Acquire};
use std::time::Instant;

use atomic::Atomic;
use log::info;
use rayon::prelude::*;

use crate::Lvid;

/// Represents the target of an edge and its associated value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Target<EV> {
    pub target: Lvid,
    pub value: EV,
}

impl<EV> Target<EV> {
    pub fn new(target: Lvid, value: EV) -> Self {
        Self { target, value }
    }
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Outgoing,
    Incoming,
}

/// A Compressed-Sparse-Row adjacency over local vertex ids.
///
/// For a vertex `u`, `offsets[u]` is the start of its neighbor list in
/// `targets` and `offsets[u + 1] - offsets[u]` its degree. Vertices beyond
/// the indexed range (added after the last rebuild) have degree zero.
struct Csr<EV> {
    offsets: Box<[usize]>,
    targets: Box<[Target<EV>]>,
}

impl<EV> Csr<EV> {
    fn empty() -> Self {
        Self {
            offsets: vec![0].into_boxed_slice(),
            targets: Box::new([]),
        }
    }

    #[inline]
    fn degree(&self, node: Lvid) -> usize {
        if node + 1 >= self.offsets.len() {
            return 0;
        }
        self.offsets[node + 1] - self.offsets[node]
    }

    #[inline]
    fn targets(&self, node: Lvid) -> &[Target<EV>] {
        if node + 1 >= self.offsets.len() {
            return &[];
        }
        &self.targets[self.offsets[node]..self.offsets[node + 1]]
    }
}

#[repr(transparent)]
struct SharedMut<T>(*mut T);

unsafe impl<T: Send> Send for SharedMut<T> {}
unsafe impl<T: Sync> Sync for SharedMut<T> {}

impl<T> SharedMut<T> {
    /// # Safety
    ///
    /// `count` must stay within the allocation behind the pointer.
    unsafe fn add(&self, count: usize) -> *mut T {
        self.0.add(count)
    }
}

/// The process-local part of the distributed graph.
///
/// Edges are staged as `(source, target, value)` triples addressed by local
/// vertex id; [`LocalGraph::finalize`] (re)builds the outgoing and incoming
/// CSRs from the full staged list, so it can be called again after further
/// ingest rounds.
pub struct LocalGraph<EV> {
    node_count: usize,
    edges: Vec<(Lvid, Lvid, EV)>,
    csr_out: Csr<EV>,
    csr_inc: Csr<EV>,
}

impl<EV> Default for LocalGraph<EV> {
    fn default() -> Self {
        Self::new()
    }
}

impl<EV> LocalGraph<EV> {
    pub fn new() -> Self {
        Self {
            node_count: 0,
            edges: Vec::new(),
            csr_out: Csr::empty(),
            csr_inc: Csr::empty(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn reserve_edges(&mut self, additional: usize) {
        self.edges.reserve(additional);
    }

    /// Grows the vertex space; new vertices are isolated until edges arrive.
    pub fn resize(&mut self, node_count: usize) {
        assert!(node_count >= self.node_count);
        self.node_count = node_count;
    }

    pub fn add_edge(&mut self, source: Lvid, target: Lvid, value: EV) {
        self.node_count = self.node_count.max(source.max(target) + 1);
        self.edges.push((source, target, value));
    }

    pub fn num_out_edges(&self, node: Lvid) -> usize {
        self.csr_out.degree(node)
    }

    pub fn num_in_edges(&self, node: Lvid) -> usize {
        self.csr_inc.degree(node)
    }

    pub fn out_neighbors(&self, node: Lvid) -> &[Target<EV>] {
        self.csr_out.targets(node)
    }

    pub fn in_neighbors(&self, node: Lvid) -> &[Target<EV>] {
        self.csr_inc.targets(node)
    }

    /// Staged edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (Lvid, Lvid, &EV)> + '_ {
        self.edges.iter().map(|(s, t, v)| (*s, *t, v))
    }
}

impl<EV: Copy + Send + Sync> LocalGraph<EV> {
    /// Rebuilds both adjacency structures from the staged edge list.
    pub fn finalize(&mut self) {
        let start = Instant::now();
        self.csr_out = build_csr(&self.edges, self.node_count, Direction::Outgoing);
        self.csr_inc = build_csr(&self.edges, self.node_count, Direction::Incoming);
        info!(
            "Built local graph ({} vertices, {} edges) in {:?}",
            self.node_count,
            self.edges.len(),
            start.elapsed()
        );
    }
}

fn build_csr<EV: Copy + Send + Sync>(
    edges: &[(Lvid, Lvid, EV)],
    node_count: usize,
    direction: Direction,
) -> Csr<EV> {
    if node_count == 0 {
        return Csr::empty();
    }

    let mut degrees = Vec::with_capacity(node_count);
    degrees.resize_with(node_count, || Atomic::new(0_usize));

    edges.par_iter().for_each(|&(s, t, _)| {
        let node = match direction {
            Direction::Outgoing => s,
            Direction::Incoming => t,
        };
        degrees[node].fetch_add(1, AcqRel);
    });

    let offsets = prefix_sum_atomic(degrees);
    let edge_count = offsets[node_count].load(Acquire);

    let mut targets = Vec::<Target<EV>>::with_capacity(edge_count);
    let targets_ptr = SharedMut(targets.as_mut_ptr());

    // The offsets are a prefix sum of the degrees, so fetch_add hands every
    // edge a distinct position and concurrent writers never overlap.
    edges.par_iter().for_each(|&(s, t, v)| {
        let (node, other) = match direction {
            Direction::Outgoing => (s, t),
            Direction::Incoming => (t, s),
        };
        let offset = offsets[node].fetch_add(1, Acquire);

        // SAFETY: offset is unique per edge and below edge_count.
        unsafe {
            targets_ptr.add(offset).write(Target::new(other, v));
        }
    });

    // SAFETY: the loop above wrote exactly one target per staged edge.
    unsafe {
        targets.set_len(edge_count);
    }

    let mut offsets: Vec<usize> = offsets.into_iter().map(Atomic::into_inner).collect();

    // Every insert bumped its node's offset by one, shifting the array one
    // position to the right; rotate back to recover the real offsets.
    offsets.rotate_right(1);
    offsets[0] = 0;

    Csr {
        offsets: offsets.into_boxed_slice(),
        targets: targets.into_boxed_slice(),
    }
}

fn prefix_sum_atomic(degrees: Vec<Atomic<usize>>) -> Vec<Atomic<usize>> {
    let mut last = degrees.last().map(|d| d.load(Acquire)).unwrap_or(0);
    let mut sums = degrees
        .into_iter()
        .scan(0, |total, degree| {
            let value = *total;
            *total += degree.into_inner();
            Some(Atomic::new(value))
        })
        .collect::<Vec<_>>();

    last += sums.last().map(|d| d.load(Acquire)).unwrap_or(0);
    sums.push(Atomic::new(last));

    sums
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(Lvid, Lvid)]) -> LocalGraph<()> {
        let mut g = LocalGraph::new();
        for &(s, t) in edges {
            g.add_edge(s, t, ());
        }
        g.finalize();
        g
    }

    #[test]
    fn prefix_sum_atomic_test() {
        let degrees = vec![42, 0, 1337, 4, 2, 0]
            .into_iter()
            .map(Atomic::new)
            .collect::<Vec<_>>();

        let sums = prefix_sum_atomic(degrees)
            .into_iter()
            .map(Atomic::into_inner)
            .collect::<Vec<_>>();

        assert_eq!(sums, vec![0, 42, 42, 1379, 1383, 1385, 1385]);
    }

    #[test]
    fn degrees_follow_direction() {
        let g = graph(&[(0, 1), (0, 2), (1, 2), (2, 0)]);

        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 4);

        assert_eq!(g.num_out_edges(0), 2);
        assert_eq!(g.num_in_edges(0), 1);
        assert_eq!(g.num_out_edges(2), 1);
        assert_eq!(g.num_in_edges(2), 2);
    }

    #[test]
    fn neighbor_lists_cover_all_edges() {
        let g = graph(&[(0, 1), (0, 2), (1, 2)]);

        let mut out0 = g.out_neighbors(0).iter().map(|t| t.target).collect::<Vec<_>>();
        out0.sort_unstable();
        assert_eq!(out0, vec![1, 2]);

        let in2 = g.in_neighbors(2).iter().map(|t| t.target).collect::<Vec<_>>();
        assert_eq!(in2.len(), 2);
    }

    #[test]
    fn resized_vertices_are_isolated() {
        let mut g = graph(&[(0, 1)]);
        g.resize(5);

        assert_eq!(g.node_count(), 5);
        assert_eq!(g.num_out_edges(4), 0);
        assert_eq!(g.num_in_edges(4), 0);
        assert!(g.out_neighbors(4).is_empty());
    }

    #[test]
    fn refinalize_after_more_edges() {
        let mut g = graph(&[(0, 1)]);
        g.add_edge(1, 2, ());
        g.finalize();

        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.num_out_edges(1), 1);
        assert_eq!(g.num_in_edges(2), 1);
    }

    #[test]
    fn edge_values_survive_the_rebuild() {
        let mut g = LocalGraph::new();
        g.add_edge(0, 1, 7_u32);
        g.add_edge(0, 2, 9_u32);
        g.finalize();

        let mut out = g.out_neighbors(0).to_vec();
        out.sort_unstable_by_key(|t| t.target);
        assert_eq!(out, vec![Target::new(1, 7), Target::new(2, 9)]);
    }
}
