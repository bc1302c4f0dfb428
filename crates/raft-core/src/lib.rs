//! # raft-core
//!
//! why: implement the core raft consensus algorithm independent of any transport
//! relations: raft-cluster plugs an in-process transport into the RaftRpc seam
//! what: state machine, election logic, log management, message types, async driver

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod rpc;
pub mod runtime;
pub mod timer;

/// Identifier of a cluster member
pub type NodeId = u64;

pub use config::RaftConfig;
pub use error::{RaftError, Result};
pub use log::{LogEntry, RaftLog};
pub use message::{
    AppendEntriesRequest, AppendEntriesResponse, RaftMessage, VoteRequest, VoteResponse,
};
pub use node::{NodeState, NodeStatus, RaftNode, ReplicationOutcome};
pub use rpc::{RaftRpc, RpcError};
pub use runtime::Raft;
pub use timer::ElectionTimer;
