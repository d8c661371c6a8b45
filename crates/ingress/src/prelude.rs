pub use crate::centroid::CentroidSelector;
pub use crate::cluster::Cluster;
pub use crate::cluster::LocalCluster;
pub use crate::cluster::Mailbox;
pub use crate::config::ClusterConfig;
pub use crate::exchange::BufferedExchange;
pub use crate::graph::DistributedGraph;
pub use crate::graph::VertexRecord;
pub use crate::local_graph::LocalGraph;
pub use crate::local_graph::Target;
pub use crate::placement::EdgeDecision;
pub use crate::placement::Policy;
pub use crate::topology::TopologyTable;
pub use crate::topology::TorusConfig;

pub use crate::Error;
pub use crate::Lvid;
pub use crate::ProcId;
pub use crate::ProcSet;
pub use crate::VertexId;
pub use crate::MAX_PROCS;
