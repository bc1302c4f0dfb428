//! # error
//!
//! why: give callers typed failures instead of panics or bare booleans
//! relations: returned by config.rs validation and runtime.rs client calls
//! what: RaftError, crate-wide Result alias

use thiserror::Error;

use crate::NodeId;

#[derive(Error, Debug)]
pub enum RaftError {
    /// Commands are only accepted by the leader. The hint is whoever this node
    /// last heard from in its current term; callers must retry there themselves.
    #[error("Not the leader, last known leader is node {leader_hint:?}")]
    NotLeader { leader_hint: Option<NodeId> },

    #[error("Entry {index} reached {acknowledged} of {required} nodes needed for a majority")]
    ReplicationFailed {
        index: u64,
        acknowledged: usize,
        required: usize,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Node is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, RaftError>;
