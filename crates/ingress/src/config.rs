//! Cluster startup parameters read from the environment.
//!
//! A launcher exports `SPAWNID` (this process's pid), `SPAWNNODES` (the
//! comma-separated host list; its length defines `P`) and optionally
//! `TOPOLOGIES_FILE`, a text file with one coordinate row per process.
//! Anything malformed fails before any ingest happens.

use std::fs;

use log::info;

use crate::topology::{TopologyTable, TorusConfig};
use crate::{Error, ProcId, MAX_PROCS};

const SPAWN_ID: &str = "SPAWNID";
const SPAWN_NODES: &str = "SPAWNNODES";
const TOPOLOGIES_FILE: &str = "TOPOLOGIES_FILE";

/// Port of process 0; process `i` listens on `BASE_PORT + i`.
const BASE_PORT: u16 = 10000;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub pid: ProcId,
    /// `host:port` endpoints, indexed by pid.
    pub hosts: Vec<String>,
    /// Coordinate rows from the topology file, if one was configured.
    pub topologies: Option<Vec<Vec<i64>>>,
}

impl ClusterConfig {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let pid_raw = lookup(SPAWN_ID).ok_or(Error::MissingEnv(SPAWN_ID))?;
        let pid = pid_raw.trim().parse::<ProcId>().map_err(|_| Error::InvalidEnv {
            var: SPAWN_ID,
            value: pid_raw.clone(),
        })?;

        let nodes_raw = lookup(SPAWN_NODES).ok_or(Error::MissingEnv(SPAWN_NODES))?;
        let nodes = nodes_raw
            .split(',')
            .map(str::trim)
            .filter(|node| !node.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if nodes.is_empty() {
            return Err(Error::InvalidEnv {
                var: SPAWN_NODES,
                value: nodes_raw,
            });
        }
        if nodes.len() > MAX_PROCS {
            return Err(Error::TooManyProcs { procs: nodes.len() });
        }
        if pid as usize >= nodes.len() {
            return Err(Error::InvalidEnv {
                var: SPAWN_ID,
                value: pid_raw,
            });
        }

        let hosts = nodes
            .into_iter()
            .enumerate()
            .map(|(i, host)| format!("{}:{}", host, BASE_PORT as usize + i))
            .collect::<Vec<_>>();

        let topologies = match lookup(TOPOLOGIES_FILE) {
            Some(path) => {
                let content = fs::read_to_string(path.trim())?;
                Some(parse_topologies(&content, hosts.len())?)
            }
            None => None,
        };

        info!(
            "Configured process {} of {} ({})",
            pid,
            hosts.len(),
            if topologies.is_some() {
                "with topology"
            } else {
                "flat topology"
            }
        );

        Ok(Self {
            pid,
            hosts,
            topologies,
        })
    }

    pub fn num_procs(&self) -> usize {
        self.hosts.len()
    }

    /// Builds the topology table for this cluster; without a topology file
    /// every process sits at the origin.
    pub fn topology_table(&self, config: TorusConfig) -> Result<TopologyTable, Error> {
        match &self.topologies {
            Some(coords) => TopologyTable::new(coords.clone(), config),
            None => TopologyTable::new(vec![vec![0; config.dims]; self.num_procs()], config),
        }
    }
}

fn parse_topologies(content: &str, num_procs: usize) -> Result<Vec<Vec<i64>>, Error> {
    let mut rows = Vec::with_capacity(num_procs);

    for (index, line) in content.lines().take(num_procs).enumerate() {
        let row = line
            .split_whitespace()
            .map(|field| {
                field.parse::<i64>().map_err(|_| Error::TopologyFormat {
                    line: index + 1,
                    reason: format!("not an integer: {field:?}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if row.is_empty() {
            return Err(Error::TopologyFormat {
                line: index + 1,
                reason: "empty coordinate row".to_string(),
            });
        }
        rows.push(row);
    }

    if rows.len() < num_procs {
        return Err(Error::TopologyFormat {
            line: rows.len() + 1,
            reason: format!("expected {} rows, found {}", num_procs, rows.len()),
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn from(vars: &HashMap<String, String>) -> Result<ClusterConfig, Error> {
        ClusterConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn parses_pid_and_hosts() {
        let config = from(&env(&[
            ("SPAWNID", "1"),
            ("SPAWNNODES", "alpha,beta,gamma"),
        ]))
        .unwrap();

        assert_eq!(config.pid, 1);
        assert_eq!(config.num_procs(), 3);
        assert_eq!(
            config.hosts,
            vec!["alpha:10000", "beta:10001", "gamma:10002"]
        );
        assert!(config.topologies.is_none());
    }

    #[test]
    fn missing_spawn_id_fails() {
        let err = from(&env(&[("SPAWNNODES", "alpha")])).unwrap_err();
        assert!(matches!(err, Error::MissingEnv("SPAWNID")));
    }

    #[test]
    fn pid_out_of_range_fails() {
        let err = from(&env(&[("SPAWNID", "3"), ("SPAWNNODES", "a,b")])).unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { var: "SPAWNID", .. }));
    }

    #[test]
    fn reads_topology_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 0 0").unwrap();
        writeln!(file, "1 2 3").unwrap();

        let config = from(&env(&[
            ("SPAWNID", "0"),
            ("SPAWNNODES", "a,b"),
            ("TOPOLOGIES_FILE", file.path().to_str().unwrap()),
        ]))
        .unwrap();

        assert_eq!(
            config.topologies,
            Some(vec![vec![0, 0, 0], vec![1, 2, 3]])
        );

        let table = config.topology_table(TorusConfig::default()).unwrap();
        assert_eq!(table.hop_distance(0, 1), 6);
    }

    #[test]
    fn truncated_topology_file_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 0 0").unwrap();

        let err = from(&env(&[
            ("SPAWNID", "0"),
            ("SPAWNNODES", "a,b"),
            ("TOPOLOGIES_FILE", file.path().to_str().unwrap()),
        ]))
        .unwrap_err();

        assert!(matches!(err, Error::TopologyFormat { line: 2, .. }));
    }

    #[test]
    fn garbage_coordinates_fail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 x 0").unwrap();

        let err = from(&env(&[
            ("SPAWNID", "0"),
            ("SPAWNNODES", "a"),
            ("TOPOLOGIES_FILE", file.path().to_str().unwrap()),
        ]))
        .unwrap_err();

        assert!(matches!(err, Error::TopologyFormat { line: 1, .. }));
    }
}
