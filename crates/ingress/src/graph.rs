//! The distributed graph and its finalization protocol.
//!
//! Every process owns a slice of the edge set (decided by the placement
//! policy) and a replica of every vertex appearing in that slice. `finalize`
//! turns the buffered ingest into a coherent global state:
//!
//! 1. drain the edge exchange into the local CSR graph, assigning local ids
//!    to newly seen vertices, and install buffered vertex payloads;
//! 2. announce every new replica to the vertex's *preliminary master*, the
//!    hash-rendezvous process that collects the mirror set;
//! 3. elect the real master as the torus centroid of the mirrors and scatter
//!    `(vid, mirrors)` to it and `(master, vid)` to every mirror;
//! 4. install masters, creating replicas for "flying" vertices the winner
//!    had never seen;
//! 5. gather per-replica metadata (degrees, payload) onto the masters;
//! 6. exchange global statistics.
//!
//! Each step is separated by a cluster barrier; within a step no message
//! ordering is assumed.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use bitvec::prelude::*;
use fxhash::{FxHashMap, FxHashSet};
use log::info;
use rayon::prelude::*;

use crate::centroid::CentroidSelector;
use crate::cluster::Cluster;
use crate::exchange::BufferedExchange;
use crate::local_graph::LocalGraph;
use crate::placement::{hash_vertex, EdgeDecision, Policy};
use crate::topology::TopologyTable;
use crate::{Lvid, ProcId, ProcSet, VertexId};

/// Per-replica vertex bookkeeping.
///
/// Masters carry the authoritative payload and aggregate metadata; mirrors
/// keep their local degree counts and a pointer (`owner`) to the master.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexRecord<V> {
    pub gvid: VertexId,
    pub owner: ProcId,
    pub mirrors: ProcSet,
    pub num_in_edges: usize,
    pub num_out_edges: usize,
    pub vdata: V,
    /// Whether a payload was ingested for this replica. Only payload-holding
    /// replicas contribute their `vdata` to the metadata gather; the master's
    /// `vdata` is authoritative after `finalize` either way.
    pub has_data: bool,
}

impl<V: Default> VertexRecord<V> {
    fn new(gvid: VertexId, owner: ProcId) -> Self {
        Self {
            gvid,
            owner,
            mirrors: ProcSet::EMPTY,
            num_in_edges: 0,
            num_out_edges: 0,
            vdata: V::default(),
            has_data: false,
        }
    }
}

struct EdgeBufferRecord<E> {
    source: VertexId,
    target: VertexId,
    edata: E,
}

struct VertexBufferRecord<V> {
    vid: VertexId,
    vdata: V,
}

/// One replica's contribution to the metadata gather on the master.
struct NegotiatorRecord<V> {
    vid: VertexId,
    num_in_edges: usize,
    num_out_edges: usize,
    mirrors: ProcSet,
    has_data: bool,
    vdata: V,
}

impl<V> NegotiatorRecord<V> {
    fn merge(&mut self, other: Self) {
        self.num_in_edges += other.num_in_edges;
        self.num_out_edges += other.num_out_edges;
        self.mirrors.union(&other.mirrors);
        if other.has_data {
            self.vdata = other.vdata;
            self.has_data = true;
        }
    }
}

type VertexCombiner<V> = Box<dyn Fn(&mut V, &V) + Send + Sync>;

/// A partitioned, replicated graph under construction on one process.
pub struct DistributedGraph<V, E, C: Cluster> {
    cluster: C,
    decision: EdgeDecision,
    centroid: CentroidSelector,
    edge_exchange: BufferedExchange<EdgeBufferRecord<E>>,
    vertex_exchange: BufferedExchange<VertexBufferRecord<V>>,
    combiner: Option<VertexCombiner<V>>,
    vid2lvid: FxHashMap<VertexId, Lvid>,
    lvid2record: Vec<VertexRecord<V>>,
    local_graph: LocalGraph<E>,
    /// Rendezvous registry: for vids hashing to this process, the replicas
    /// announced so far, accumulated across finalize rounds.
    prelim_mirrors: FxHashMap<VertexId, ProcSet>,
    num_vertices: usize,
    num_edges: usize,
    num_replicas: usize,
    local_own_vertices: usize,
}

impl<V, E, C> DistributedGraph<V, E, C>
where
    V: Clone + Default + Send + Sync + 'static,
    E: Copy + Send + Sync + 'static,
    C: Cluster,
{
    pub fn new(cluster: C, policy: Policy, topology: Arc<TopologyTable>) -> Self {
        assert_eq!(
            topology.num_procs(),
            cluster.num_procs(),
            "topology table does not cover the cluster"
        );

        let decision = EdgeDecision::new(policy, &topology);
        let centroid = CentroidSelector::new(topology);
        let edge_exchange = BufferedExchange::new(&cluster, "ingress.edges");
        let vertex_exchange = BufferedExchange::new(&cluster, "ingress.vertices");

        cluster.barrier();

        Self {
            cluster,
            decision,
            centroid,
            edge_exchange,
            vertex_exchange,
            combiner: None,
            vid2lvid: FxHashMap::default(),
            lvid2record: Vec::new(),
            local_graph: LocalGraph::new(),
            prelim_mirrors: FxHashMap::default(),
            num_vertices: 0,
            num_edges: 0,
            num_replicas: 0,
            local_own_vertices: 0,
        }
    }

    pub fn pid(&self) -> ProcId {
        self.cluster.pid()
    }

    pub fn num_procs(&self) -> usize {
        self.cluster.num_procs()
    }

    /// Buffers an edge for its owning process. Non-blocking; safe to call
    /// from multiple ingest threads.
    pub fn add_edge(&self, source: VertexId, target: VertexId, edata: E) {
        let owner = self.decision.edge_to_proc(source, target);
        self.edge_exchange.send(
            owner,
            EdgeBufferRecord {
                source,
                target,
                edata,
            },
            ingest_lane(),
        );
    }

    /// Buffers a vertex payload for its hash-rendezvous process.
    pub fn add_vertex(&self, vid: VertexId, vdata: V) {
        let owner = self.preliminary_master(vid);
        self.vertex_exchange
            .send(owner, VertexBufferRecord { vid, vdata }, ingest_lane());
    }

    /// Installs the combiner applied when the same vid is added with several
    /// payloads. The default keeps the last write. Must be associative and
    /// commutative if ingest runs in parallel.
    pub fn set_duplicate_vertex_strategy(
        &mut self,
        combine: impl Fn(&mut V, &V) + Send + Sync + 'static,
    ) {
        self.combiner = Some(Box::new(combine));
    }

    fn preliminary_master(&self, vid: VertexId) -> ProcId {
        (hash_vertex(vid) % self.cluster.num_procs() as u64) as ProcId
    }

    /// Completes the local graph and the vertex records. Collective: every
    /// process must call `finalize` the same number of times.
    pub fn finalize(&mut self) {
        self.cluster.barrier();

        let first_time = self.cluster.all_reduce_sum(self.vid2lvid.len()) == 0;
        let self_pid = self.cluster.pid();

        if self_pid == 0 {
            info!("Finalizing graph");
        }

        let lvid_start: Lvid = self.vid2lvid.len();
        let mut vid2lvid_buffer: FxHashMap<VertexId, Lvid> = FxHashMap::default();
        let mut updated_lvids: BitVec = BitVec::repeat(false, lvid_start);

        // Flush any additional data; after the barrier delivery is complete.
        self.edge_exchange.flush();
        self.vertex_exchange.flush();
        self.cluster.barrier();

        let changed = self
            .cluster
            .all_reduce_sum(self.edge_exchange.len() + self.vertex_exchange.len());
        if changed == 0 {
            info!("Skipping finalization, nothing changed since the last one");
            return;
        }

        // ------------------------------------------------------------------
        // Construct the local graph.
        // ------------------------------------------------------------------
        self.local_graph.reserve_edges(self.edge_exchange.len());
        while let Some((_, batch)) = self.edge_exchange.recv() {
            for record in batch {
                let source_lvid = intern(
                    record.source,
                    &self.vid2lvid,
                    &mut vid2lvid_buffer,
                    &mut updated_lvids,
                    lvid_start,
                );
                let target_lvid = intern(
                    record.target,
                    &self.vid2lvid,
                    &mut vid2lvid_buffer,
                    &mut updated_lvids,
                    lvid_start,
                );
                self.local_graph.add_edge(source_lvid, target_lvid, record.edata);
            }
        }
        self.edge_exchange.clear();

        // ------------------------------------------------------------------
        // Install vertex payloads on their rendezvous process.
        // ------------------------------------------------------------------
        let mut pending_vdata: FxHashMap<Lvid, V> = FxHashMap::default();
        while let Some((_, batch)) = self.vertex_exchange.recv() {
            for record in batch {
                let lvid = intern(
                    record.vid,
                    &self.vid2lvid,
                    &mut vid2lvid_buffer,
                    &mut updated_lvids,
                    lvid_start,
                );
                if lvid < lvid_start {
                    let target = &mut self.lvid2record[lvid];
                    install_vdata(&self.combiner, &mut target.vdata, target.has_data, record.vdata);
                    target.has_data = true;
                } else {
                    match pending_vdata.entry(lvid) {
                        Entry::Occupied(mut entry) => {
                            install_vdata(&self.combiner, entry.get_mut(), true, record.vdata);
                        }
                        Entry::Vacant(entry) => {
                            entry.insert(record.vdata);
                        }
                    }
                }
            }
        }
        self.vertex_exchange.clear();

        self.local_graph.resize(lvid_start + vid2lvid_buffer.len());
        self.local_graph.finalize();

        // ------------------------------------------------------------------
        // Allocate records for this round's vertices; owners start out as the
        // rendezvous pick and are corrected by the handshake below.
        // ------------------------------------------------------------------
        let local_nverts = lvid_start + vid2lvid_buffer.len();
        self.lvid2record
            .resize_with(local_nverts, || VertexRecord::new(0, 0));
        for (&vid, &lvid) in &vid2lvid_buffer {
            let owner = self.preliminary_master(vid);
            let record = &mut self.lvid2record[lvid];
            record.gvid = vid;
            record.owner = owner;
        }
        for (lvid, vdata) in pending_vdata {
            let record = &mut self.lvid2record[lvid];
            record.vdata = vdata;
            record.has_data = true;
        }
        assert_eq!(self.lvid2record.len(), self.local_graph.node_count());

        // ------------------------------------------------------------------
        // Master handshake: announce new replicas to the rendezvous process.
        // ------------------------------------------------------------------
        let vid_exchange = BufferedExchange::<VertexId>::new(&self.cluster, "finalize.vids");
        for lvid in lvid_start..self.lvid2record.len() {
            let record = &self.lvid2record[lvid];
            vid_exchange.send(self.preliminary_master(record.gvid), record.gvid, 0);
        }
        vid_exchange.flush();
        self.cluster.barrier();

        let mut announced: FxHashSet<VertexId> = FxHashSet::default();
        while let Some((sender, batch)) = vid_exchange.recv() {
            for vid in batch {
                self.prelim_mirrors.entry(vid).or_default().insert(sender);
                announced.insert(vid);
            }
        }
        vid_exchange.clear();

        // ------------------------------------------------------------------
        // Elect the centroid master for every announced vertex, forward the
        // mirror set to it and the master's identity to every mirror.
        // ------------------------------------------------------------------
        let master_exchange =
            BufferedExchange::<(VertexId, ProcSet)>::new(&self.cluster, "finalize.mirrors");
        let owner_exchange =
            BufferedExchange::<(ProcId, VertexId)>::new(&self.cluster, "finalize.owners");

        for &vid in &announced {
            let mirrors = self.prelim_mirrors[&vid];
            let master = self.centroid.elect(&mirrors);
            // A flying master never announces itself; remember it here so
            // later rounds elect over the full replica set.
            if let Some(replicas) = self.prelim_mirrors.get_mut(&vid) {
                replicas.insert(master);
            }

            master_exchange.send(master, (vid, mirrors), 0);
            for mirror in mirrors.iter() {
                owner_exchange.send(mirror, (master, vid), 0);
            }
        }
        master_exchange.flush();
        owner_exchange.flush();
        self.cluster.barrier();

        // ------------------------------------------------------------------
        // Master installation.
        // ------------------------------------------------------------------
        // Owners assigned during this handshake; any further assignment to
        // the same replica must agree or the protocol is broken.
        let mut assigned_owners: FxHashMap<Lvid, ProcId> = FxHashMap::default();
        let mut flying_vids: FxHashMap<VertexId, ProcSet> = FxHashMap::default();
        while let Some((_, batch)) = master_exchange.recv() {
            for (vid, mirrors) in batch {
                if let Some(&lvid) = self.vid2lvid.get(&vid) {
                    let record = &mut self.lvid2record[lvid];
                    record.mirrors.union(&mirrors);
                    record.mirrors.remove(self_pid);
                    record.owner = self_pid;
                    assigned_owners.insert(lvid, self_pid);
                    updated_lvids.set(lvid, true);
                } else if let Some(&lvid) = vid2lvid_buffer.get(&vid) {
                    let record = &mut self.lvid2record[lvid];
                    record.mirrors.union(&mirrors);
                    record.mirrors.remove(self_pid);
                    record.owner = self_pid;
                    assigned_owners.insert(lvid, self_pid);
                } else {
                    let entry = flying_vids.entry(vid).or_default();
                    entry.union(&mirrors);
                    entry.remove(self_pid);
                }
            }
        }
        master_exchange.clear();

        // Mastership can land on a process that never saw the vertex; such
        // flying vertices grow the local graph by isolated replicas.
        for (vid, mirrors) in flying_vids {
            let lvid = lvid_start + vid2lvid_buffer.len();
            vid2lvid_buffer.insert(vid, lvid);
            let mut record = VertexRecord::new(vid, self_pid);
            record.mirrors = mirrors;
            self.lvid2record.push(record);
            assigned_owners.insert(lvid, self_pid);
        }
        self.local_graph.resize(self.lvid2record.len());
        self.cluster.barrier();

        // Merge in vid2lvid_buffer.
        if self.vid2lvid.is_empty() {
            self.vid2lvid = std::mem::take(&mut vid2lvid_buffer);
        } else {
            self.vid2lvid.reserve(vid2lvid_buffer.len());
            self.vid2lvid.extend(vid2lvid_buffer.drain());
        }
        assert_eq!(self.lvid2record.len(), self.vid2lvid.len());

        // Mirrors learn their master.
        while let Some((_, batch)) = owner_exchange.recv() {
            for (master, vid) in batch {
                let lvid = *self
                    .vid2lvid
                    .get(&vid)
                    .expect("master announced for a vertex without a replica here");
                match assigned_owners.entry(lvid) {
                    Entry::Occupied(entry) => {
                        assert_eq!(
                            *entry.get(),
                            master,
                            "conflicting owners announced for vertex {vid}"
                        );
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(master);
                    }
                }
                self.lvid2record[lvid].owner = master;
                if lvid < lvid_start {
                    updated_lvids.set(lvid, true);
                }
            }
        }
        owner_exchange.clear();
        self.cluster.barrier();

        // ------------------------------------------------------------------
        // Synchronize vertex metadata onto the masters.
        // ------------------------------------------------------------------
        let local_nverts_total = self.lvid2record.len();
        updated_lvids.resize(local_nverts_total, false);
        for lvid in lvid_start..local_nverts_total {
            updated_lvids.set(lvid, true);
        }

        let changed_lvids = if first_time {
            BitVec::repeat(true, local_nverts_total)
        } else {
            self.synchronize_changed_set(updated_lvids)
        };

        // Every changed replica records its local view of the degrees; the
        // gather below overwrites the master's copy with the global totals,
        // so mirrors keep their local counts.
        for lvid in 0..local_nverts_total {
            if changed_lvids[lvid] {
                let record = &mut self.lvid2record[lvid];
                record.num_in_edges = self.local_graph.num_in_edges(lvid);
                record.num_out_edges = self.local_graph.num_out_edges(lvid);
            }
        }

        let negotiator_exchange =
            BufferedExchange::<NegotiatorRecord<V>>::new(&self.cluster, "finalize.negotiators");
        {
            let records = &self.lvid2record;
            let local_graph = &self.local_graph;
            let changed_lvids = &changed_lvids;
            let exchange = &negotiator_exchange;

            (0..local_nverts_total).into_par_iter().for_each(|lvid| {
                if !changed_lvids[lvid] {
                    return;
                }
                let record = &records[lvid];
                let is_master = record.owner == self_pid;
                let contribution = NegotiatorRecord {
                    vid: record.gvid,
                    num_in_edges: local_graph.num_in_edges(lvid),
                    num_out_edges: local_graph.num_out_edges(lvid),
                    mirrors: if is_master {
                        record.mirrors
                    } else {
                        ProcSet::EMPTY
                    },
                    has_data: record.has_data,
                    vdata: if record.has_data {
                        record.vdata.clone()
                    } else {
                        V::default()
                    },
                };
                exchange.send(record.owner, contribution, ingest_lane());
            });
        }
        negotiator_exchange.flush();
        self.cluster.barrier();

        let mut aggregates: FxHashMap<VertexId, NegotiatorRecord<V>> = FxHashMap::default();
        while let Some((_, batch)) = negotiator_exchange.recv() {
            for contribution in batch {
                match aggregates.entry(contribution.vid) {
                    Entry::Occupied(mut entry) => entry.get_mut().merge(contribution),
                    Entry::Vacant(entry) => {
                        entry.insert(contribution);
                    }
                }
            }
        }
        negotiator_exchange.clear();

        for (vid, aggregate) in aggregates {
            let lvid = *self
                .vid2lvid
                .get(&vid)
                .expect("metadata gathered for a vertex without a replica here");
            let record = &mut self.lvid2record[lvid];
            assert_eq!(record.owner, self_pid, "metadata routed to a non-master");
            record.num_in_edges = aggregate.num_in_edges;
            record.num_out_edges = aggregate.num_out_edges;
            record.mirrors = aggregate.mirrors;
            // `has_data` stays local: were the master marked as a payload
            // holder here, a later round would see two contributors for the
            // same payload and the merge order would pick one arbitrarily.
            if aggregate.has_data {
                record.vdata = aggregate.vdata;
            }
        }
        self.cluster.barrier();

        self.exchange_global_info();
    }

    /// Agrees with mirrors and masters on the set of vids whose metadata must
    /// be re-synchronized: local dirty bits are OR-ed onto the master, then
    /// broadcast back over the master's mirror set.
    fn synchronize_changed_set(&self, updated_lvids: BitVec) -> BitVec {
        let self_pid = self.cluster.pid();
        let mut changed = updated_lvids;

        let changed_exchange =
            BufferedExchange::<VertexId>::new(&self.cluster, "finalize.changed");

        for lvid in 0..changed.len() {
            let record = &self.lvid2record[lvid];
            if changed[lvid] && record.owner != self_pid {
                changed_exchange.send(record.owner, record.gvid, 0);
            }
        }
        changed_exchange.flush();
        self.cluster.barrier();
        while let Some((_, batch)) = changed_exchange.recv() {
            for vid in batch {
                let lvid = *self
                    .vid2lvid
                    .get(&vid)
                    .expect("change notice for a vertex without a replica here");
                changed.set(lvid, true);
            }
        }
        changed_exchange.clear();

        for lvid in 0..changed.len() {
            let record = &self.lvid2record[lvid];
            if changed[lvid] && record.owner == self_pid {
                for mirror in record.mirrors.iter() {
                    changed_exchange.send(mirror, record.gvid, 0);
                }
            }
        }
        changed_exchange.flush();
        self.cluster.barrier();
        while let Some((_, batch)) = changed_exchange.recv() {
            for vid in batch {
                let lvid = *self
                    .vid2lvid
                    .get(&vid)
                    .expect("change notice for a vertex without a replica here");
                changed.set(lvid, true);
            }
        }
        changed_exchange.clear();

        changed
    }

    /// Exchanges per-process counts and fills the global statistics.
    fn exchange_global_info(&mut self) {
        let self_pid = self.cluster.pid();
        self.local_own_vertices = self
            .lvid2record
            .iter()
            .filter(|record| record.owner == self_pid)
            .count();

        self.num_edges = self
            .cluster
            .all_gather(self.local_graph.edge_count())
            .into_iter()
            .sum();
        self.num_vertices = self
            .cluster
            .all_gather(self.local_own_vertices)
            .into_iter()
            .sum();
        self.num_replicas = self
            .cluster
            .all_gather(self.vid2lvid.len())
            .into_iter()
            .sum();

        if self_pid == 0 {
            info!(
                "Graph info: {} vertices, {} edges, {} replicas, replication factor {:.2}",
                self.num_vertices,
                self.num_edges,
                self.num_replicas,
                self.replication_factor()
            );
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    pub fn num_replicas(&self) -> usize {
        self.num_replicas
    }

    pub fn replication_factor(&self) -> f64 {
        if self.num_vertices == 0 {
            0.0
        } else {
            self.num_replicas as f64 / self.num_vertices as f64
        }
    }

    pub fn num_local_vertices(&self) -> usize {
        self.vid2lvid.len()
    }

    pub fn num_local_edges(&self) -> usize {
        self.local_graph.edge_count()
    }

    pub fn num_local_own_vertices(&self) -> usize {
        self.local_own_vertices
    }

    pub fn lvid_of(&self, vid: VertexId) -> Option<Lvid> {
        self.vid2lvid.get(&vid).copied()
    }

    pub fn local_vertex(&self, lvid: Lvid) -> &VertexRecord<V> {
        &self.lvid2record[lvid]
    }

    pub fn is_master(&self, lvid: Lvid) -> bool {
        self.lvid2record[lvid].owner == self.cluster.pid()
    }

    pub fn local_graph(&self) -> &LocalGraph<E> {
        &self.local_graph
    }

    pub fn local_in_degree(&self, lvid: Lvid) -> usize {
        self.local_graph.num_in_edges(lvid)
    }

    pub fn local_out_degree(&self, lvid: Lvid) -> usize {
        self.local_graph.num_out_edges(lvid)
    }
}

fn ingest_lane() -> usize {
    rayon::current_thread_index().unwrap_or(0)
}

/// Resolves a vid to its local id, assigning the next id past the watermark
/// to first-time vids and marking pre-existing ones as updated.
fn intern(
    vid: VertexId,
    vid2lvid: &FxHashMap<VertexId, Lvid>,
    buffer: &mut FxHashMap<VertexId, Lvid>,
    updated_lvids: &mut BitVec,
    lvid_start: Lvid,
) -> Lvid {
    if let Some(&lvid) = vid2lvid.get(&vid) {
        updated_lvids.set(lvid, true);
        return lvid;
    }
    let next = lvid_start + buffer.len();
    *buffer.entry(vid).or_insert(next)
}

fn install_vdata<V>(
    combiner: &Option<VertexCombiner<V>>,
    slot: &mut V,
    has_data: bool,
    incoming: V,
) {
    match combiner {
        Some(combine) if has_data => combine(slot, &incoming),
        _ => *slot = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;

    fn single_proc<V, E, F, R>(run: F) -> R
    where
        V: Clone + Default + Send + Sync + 'static,
        E: Copy + Send + Sync + 'static,
        F: Fn(DistributedGraph<V, E, LocalCluster>) -> R + Send + Sync,
        R: Send,
    {
        LocalCluster::spawn(1, |cluster| {
            let graph = DistributedGraph::<V, E, _>::new(
                cluster,
                Policy::Random,
                Arc::new(TopologyTable::flat(1)),
            );
            run(graph)
        })
        .remove(0)
    }

    #[test]
    fn single_proc_finalize_builds_records() {
        let graph = single_proc::<(), (), _, _>(|mut graph| {
            graph.add_edge(10, 20, ());
            graph.add_edge(20, 30, ());
            graph.add_edge(10, 30, ());
            graph.finalize();
            graph
        });

        assert_eq!(graph.num_vertices(), 3);
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(graph.num_replicas(), 3);
        assert_eq!(graph.num_local_own_vertices(), 3);

        let lvid = graph.lvid_of(20).unwrap();
        let record = graph.local_vertex(lvid);
        assert!(graph.is_master(lvid));
        assert!(record.mirrors.is_empty());
        assert_eq!(record.num_in_edges, 1);
        assert_eq!(record.num_out_edges, 1);
    }

    #[test]
    fn vertex_payloads_land_on_the_record() {
        let graph = single_proc::<u64, (), _, _>(|mut graph| {
            graph.add_edge(1, 2, ());
            graph.add_vertex(1, 99);
            graph.finalize();
            graph
        });

        let record = graph.local_vertex(graph.lvid_of(1).unwrap());
        assert!(record.has_data);
        assert_eq!(record.vdata, 99);

        let other = graph.local_vertex(graph.lvid_of(2).unwrap());
        assert!(!other.has_data);
    }

    #[test]
    fn duplicate_payloads_use_the_combiner() {
        let graph = single_proc::<u64, (), _, _>(|mut graph| {
            graph.set_duplicate_vertex_strategy(|a, b| *a = (*a).max(*b));
            graph.add_vertex(7, 5);
            graph.add_vertex(7, 3);
            graph.add_vertex(7, 9);
            graph.finalize();
            graph
        });

        assert_eq!(graph.num_vertices(), 1);
        let record = graph.local_vertex(graph.lvid_of(7).unwrap());
        assert_eq!(record.vdata, 9);
    }

    #[test]
    fn duplicate_payloads_default_to_last_write() {
        let graph = single_proc::<u64, (), _, _>(|mut graph| {
            graph.add_vertex(7, 5);
            graph.add_vertex(7, 9);
            graph.add_vertex(7, 3);
            graph.finalize();
            graph
        });

        let record = graph.local_vertex(graph.lvid_of(7).unwrap());
        assert_eq!(record.vdata, 3);
    }

    #[test]
    fn incremental_ingest_extends_the_graph() {
        let graph = single_proc::<(), u32, _, _>(|mut graph| {
            graph.add_edge(1, 2, 7);
            graph.finalize();
            assert_eq!(graph.num_vertices(), 2);
            assert_eq!(graph.num_edges(), 1);

            graph.add_edge(2, 3, 8);
            graph.finalize();
            graph
        });

        assert_eq!(graph.num_vertices(), 3);
        assert_eq!(graph.num_edges(), 2);

        let lvid = graph.lvid_of(2).unwrap();
        let record = graph.local_vertex(lvid);
        assert_eq!(record.num_in_edges, 1);
        assert_eq!(record.num_out_edges, 1);
    }
}
