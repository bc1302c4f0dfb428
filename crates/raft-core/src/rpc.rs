//! # rpc
//!
//! why: keep the consensus core independent of any transport
//! relations: implemented by transports (raft-cluster's LocalNetwork), called by runtime.rs
//! what: RaftRpc capability trait, RpcError

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::NodeId;

/// Transport-level failure. The core never reads term information out of one
/// of these; it simply counts the call as "no vote" or "no success".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("node {0} is not part of the cluster")]
    UnknownPeer(NodeId),

    #[error("node {0} attempted to call itself")]
    SelfTarget(NodeId),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Codec(e.to_string())
    }
}

/// Outbound half of the raft protocol.
///
/// Implementations own timeouts, retries at the socket level, and address
/// resolution. Calls may be issued concurrently for different targets.
#[async_trait]
pub trait RaftRpc: Send + Sync {
    async fn request_vote(
        &self,
        target: NodeId,
        request: VoteRequest,
    ) -> Result<VoteResponse, RpcError>;

    async fn append_entries(
        &self,
        target: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RpcError>;
}
