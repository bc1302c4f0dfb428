//! # raft-cluster
//!
//! why: exercise raft-core end to end without sockets
//! relations: depends on raft-core; used by multi-node scenario tests
//! what: in-process transport with partitions, local cluster harness

pub mod cluster;
pub mod network;

pub use cluster::LocalCluster;
pub use network::{LocalNetwork, LocalTransport};
