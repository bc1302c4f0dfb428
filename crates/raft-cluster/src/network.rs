//! # network
//!
//! why: let several raft nodes talk inside one process, with injectable partitions
//! relations: implements raft_core::RaftRpc; owned by cluster.rs
//! what: LocalNetwork registry, per-node LocalTransport, json encode/decode on every hop

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use raft_core::{
    AppendEntriesRequest, AppendEntriesResponse, NodeId, Raft, RaftMessage, RaftRpc, RpcError,
    VoteRequest, VoteResponse,
};
use tokio::sync::RwLock;

/// Registry of every node reachable in-process
#[derive(Default)]
pub struct LocalNetwork {
    nodes: RwLock<HashMap<NodeId, Raft>>,
    isolated: RwLock<HashSet<NodeId>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The transport `source` uses to reach its peers
    pub fn transport(self: &Arc<Self>, source: NodeId) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            source,
            network: Arc::downgrade(self),
        })
    }

    pub async fn register(&self, raft: Raft) {
        self.nodes.write().await.insert(raft.id(), raft);
    }

    /// Cut `id` off from everyone, in both directions
    pub async fn isolate(&self, id: NodeId) {
        tracing::info!(node_id = id, "Isolating node");
        self.isolated.write().await.insert(id);
    }

    pub async fn heal(&self, id: NodeId) {
        tracing::info!(node_id = id, "Healing node");
        self.isolated.write().await.remove(&id);
    }

    pub async fn is_isolated(&self, id: NodeId) -> bool {
        self.isolated.read().await.contains(&id)
    }

    async fn route(&self, from: NodeId, to: NodeId) -> Result<Raft, RpcError> {
        if from == to {
            return Err(RpcError::SelfTarget(from));
        }
        {
            let isolated = self.isolated.read().await;
            if isolated.contains(&from) || isolated.contains(&to) {
                return Err(RpcError::Unreachable(to));
            }
        }
        self.nodes
            .read()
            .await
            .get(&to)
            .cloned()
            .ok_or(RpcError::UnknownPeer(to))
    }
}

/// One node's view of the network. The registry owns the nodes and each
/// node owns its transport, so the way back to the registry is weak.
pub struct LocalTransport {
    source: NodeId,
    network: Weak<LocalNetwork>,
}

impl LocalTransport {
    fn network(&self, target: NodeId) -> Result<Arc<LocalNetwork>, RpcError> {
        self.network.upgrade().ok_or(RpcError::Unreachable(target))
    }
}

/// Encode and decode a message the way a wire hop would
fn transmit(message: RaftMessage) -> Result<RaftMessage, RpcError> {
    let wire = message.to_json()?;
    Ok(RaftMessage::from_json(&wire)?)
}

fn unexpected(message: &RaftMessage) -> RpcError {
    RpcError::Codec(format!("unexpected message for term {}", message.term()))
}

#[async_trait]
impl RaftRpc for LocalTransport {
    async fn request_vote(
        &self,
        target: NodeId,
        request: VoteRequest,
    ) -> Result<VoteResponse, RpcError> {
        let network = self.network(target)?;
        let peer = network.route(self.source, target).await?;
        let request = match transmit(request.into())? {
            RaftMessage::VoteRequest(request) => request,
            other => return Err(unexpected(&other)),
        };

        let response = peer.handle_request_vote(request).await;

        // the partition may have formed while the peer was working
        network.route(target, self.source).await?;
        match transmit(response.into())? {
            RaftMessage::VoteResponse(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn append_entries(
        &self,
        target: NodeId,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, RpcError> {
        let network = self.network(target)?;
        let peer = network.route(self.source, target).await?;
        let request = match transmit(request.into())? {
            RaftMessage::AppendEntries(request) => request,
            other => return Err(unexpected(&other)),
        };

        let response = peer.handle_append_entries(request).await;

        network.route(target, self.source).await?;
        match transmit(response.into())? {
            RaftMessage::AppendEntriesResponse(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }
}
