//! Streaming construction of a partitioned, replicated distributed graph.
//!
//! A fixed cluster of `P` worker processes ingests a stream of edges (and
//! optionally vertex payloads). A placement policy assigns every edge to
//! exactly one process; every vertex that appears on a process is replicated
//! there as a *mirror*, and one distinguished replica, the *master*, carries
//! the authoritative payload and aggregate metadata (degrees, mirror set).
//!
//! Ingest is two-phased: [`DistributedGraph::add_edge`] and
//! [`DistributedGraph::add_vertex`] buffer records into a P-way exchange, and
//! the collective [`DistributedGraph::finalize`] drains the buffers, builds
//! the process-local CSR graph, elects masters (by torus centroid over the
//! mirror set), and synchronizes per-vertex metadata.
//!
//! Communication goes through the [`cluster::Cluster`] trait. The in-process
//! [`cluster::LocalCluster`] runs every "process" on its own thread, which is
//! how the crate is tested:
//!
//! ```
//! use std::sync::Arc;
//!
//! use graph_ingress::prelude::*;
//!
//! let topology = Arc::new(TopologyTable::flat(2));
//!
//! let stats = LocalCluster::spawn(2, |cluster| {
//!     let mut graph: DistributedGraph<(), u32, _> =
//!         DistributedGraph::new(cluster, Policy::Random, Arc::clone(&topology));
//!
//!     if graph.pid() == 0 {
//!         graph.add_edge(1, 2, 42);
//!         graph.add_edge(2, 3, 43);
//!         graph.add_edge(3, 1, 44);
//!     }
//!     graph.finalize();
//!
//!     (graph.num_vertices(), graph.num_edges())
//! });
//!
//! assert_eq!(stats, vec![(3, 3), (3, 3)]);
//! ```

pub mod centroid;
pub mod cluster;
pub mod config;
pub mod exchange;
pub mod graph;
pub mod local_graph;
pub mod placement;
pub mod prelude;
pub mod topology;

pub use crate::centroid::CentroidSelector;
pub use crate::cluster::{Cluster, LocalCluster};
pub use crate::config::ClusterConfig;
pub use crate::graph::DistributedGraph;
pub use crate::placement::Policy;
pub use crate::topology::{TopologyTable, TorusConfig};

use bitvec::prelude::*;
use thiserror::Error;

/// Global vertex identifier. Caller-assigned and sparse.
pub type VertexId = u64;

/// Local vertex index, dense per process.
pub type Lvid = usize;

/// Process identifier in `[0, P)`.
pub type ProcId = u16;

/// Upper bound on the cluster size supported by [`ProcSet`].
pub const MAX_PROCS: usize = 256;

/// Backing words of a [`ProcSet`], used as a canonical memo key.
pub type ProcSetWords = [u64; MAX_PROCS / 64];

#[derive(Error, Debug)]
pub enum Error {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("malformed value {value:?} for environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("error while reading topology file")]
    TopologyIo {
        #[from]
        source: std::io::Error,
    },
    #[error("malformed topology file at line {line}: {reason}")]
    TopologyFormat { line: usize, reason: String },
    #[error("cluster size {procs} exceeds the supported maximum of {MAX_PROCS}")]
    TooManyProcs { procs: usize },
    #[error("topology table must cover at least one process")]
    EmptyTopology,
}

/// A fixed-size set of process ids, one bit per possible pid.
///
/// This is the wire representation of a vertex mirror set: masters store
/// `mirrors: ProcSet` and every replica stores `owner: ProcId`, so the
/// master/mirror relation is expressed purely through indices.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcSet {
    bits: BitArray<ProcSetWords>,
}

impl ProcSet {
    pub const EMPTY: Self = Self {
        bits: BitArray::ZERO,
    };

    pub fn new() -> Self {
        Self::EMPTY
    }

    pub fn insert(&mut self, pid: ProcId) {
        self.bits.set(pid as usize, true);
    }

    pub fn remove(&mut self, pid: ProcId) {
        self.bits.set(pid as usize, false);
    }

    pub fn contains(&self, pid: ProcId) -> bool {
        self.bits[pid as usize]
    }

    pub fn union(&mut self, other: &ProcSet) {
        for pid in other.iter() {
            self.insert(pid);
        }
    }

    pub fn clear(&mut self) {
        self.bits = BitArray::ZERO;
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    /// Iterates the member pids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ProcId> + '_ {
        self.bits.iter_ones().map(|pid| pid as ProcId)
    }

    /// Canonical representation, usable as a memo key.
    pub fn words(&self) -> ProcSetWords {
        self.bits.into_inner()
    }
}

impl FromIterator<ProcId> for ProcSet {
    fn from_iter<I: IntoIterator<Item = ProcId>>(iter: I) -> Self {
        let mut set = ProcSet::new();
        for pid in iter {
            set.insert(pid);
        }
        set
    }
}

impl std::fmt::Debug for ProcSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
