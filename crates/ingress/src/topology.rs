use fxhash::FxHashMap;
use log::warn;

use crate::{Error, ProcId, MAX_PROCS};

/// Geometry of the interconnect the processes are placed on.
///
/// Both the wrap-around width and the number of axes are parameters; the
/// defaults describe the 24-wide 3-D torus the placement heuristics were
/// tuned for. A table built without coordinates ([`TopologyTable::flat`])
/// makes every distance zero and turns the topology-aware paths into their
/// topology-oblivious counterparts.
#[derive(Clone, Copy, Debug)]
pub struct TorusConfig {
    pub wrap: i64,
    pub dims: usize,
}

impl Default for TorusConfig {
    fn default() -> Self {
        Self { wrap: 24, dims: 3 }
    }
}

/// Maps process ids to torus coordinates and answers hop-distance queries.
///
/// The full `P x P` distance matrix is computed once at construction, so
/// lookups are plain reads and the table can be shared immutably between the
/// placement policy and the centroid selector.
pub struct TopologyTable {
    coords: Vec<Vec<i64>>,
    coord2pid: FxHashMap<Vec<i64>, ProcId>,
    dist: Vec<u32>,
    num_procs: usize,
    config: TorusConfig,
}

impl TopologyTable {
    pub fn new(coords: Vec<Vec<i64>>, config: TorusConfig) -> Result<Self, Error> {
        assert!(config.wrap > 0, "torus wrap must be positive");
        if coords.is_empty() {
            return Err(Error::EmptyTopology);
        }
        if coords.len() > MAX_PROCS {
            return Err(Error::TooManyProcs {
                procs: coords.len(),
            });
        }

        let num_procs = coords.len();
        let coords: Vec<Vec<i64>> = coords
            .into_iter()
            .enumerate()
            .map(|(pid, mut coord)| {
                if coord.len() != config.dims {
                    warn!(
                        "topology row {} has {} axes, expected {}; adjusting",
                        pid,
                        coord.len(),
                        config.dims
                    );
                    coord.resize(config.dims, 0);
                }
                coord
            })
            .collect();

        // First-seen pid wins when several processes share a coordinate.
        let mut coord2pid = FxHashMap::default();
        for (pid, coord) in coords.iter().enumerate() {
            coord2pid
                .entry(coord.clone())
                .or_insert(pid as ProcId);
        }

        let mut dist = vec![0_u32; num_procs * num_procs];
        for a in 0..num_procs {
            for b in 0..num_procs {
                dist[a * num_procs + b] = torus_dist(&coords[a], &coords[b], config.wrap);
            }
        }

        Ok(Self {
            coords,
            coord2pid,
            dist,
            num_procs,
            config,
        })
    }

    /// A table with every process at the origin.
    pub fn flat(num_procs: usize) -> Self {
        let config = TorusConfig::default();
        Self::new(vec![vec![0; config.dims]; num_procs], config)
            .expect("flat topology for a non-empty cluster")
    }

    pub fn num_procs(&self) -> usize {
        self.num_procs
    }

    pub fn config(&self) -> TorusConfig {
        self.config
    }

    /// Torus hop distance between two processes.
    pub fn hop_distance(&self, a: ProcId, b: ProcId) -> u32 {
        self.dist[a as usize * self.num_procs + b as usize]
    }

    pub fn coord_of(&self, pid: ProcId) -> &[i64] {
        &self.coords[pid as usize]
    }

    /// The first-seen process at the given coordinate, if any.
    pub fn pid_at(&self, coord: &[i64]) -> Option<ProcId> {
        self.coord2pid.get(coord).copied()
    }
}

fn torus_dist(a: &[i64], b: &[i64], wrap: i64) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = (x - y).rem_euclid(wrap);
            d.min(wrap - d) as u32
        })
        .sum()
}
