//! # cluster
//!
//! why: run a whole raft cluster in one process for scenario tests and simulations
//! relations: builds raft_core::Raft nodes wired through network.rs
//! what: LocalCluster harness, applied-entry collectors, leader discovery helpers

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use raft_core::{LogEntry, NodeId, NodeState, NodeStatus, Raft, RaftConfig, RaftError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::network::LocalNetwork;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A set of nodes `1..=size` sharing one in-process network
pub struct LocalCluster {
    network: Arc<LocalNetwork>,
    nodes: BTreeMap<NodeId, Raft>,
    applied: BTreeMap<NodeId, Arc<Mutex<Vec<LogEntry>>>>,
    collectors: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Build the cluster. Timing comes from `base`; node ids, membership and
    /// per-node seeds (`base.rng_seed` or 0, plus the node id) are filled in.
    pub async fn new(size: u64, base: RaftConfig) -> Result<Self, RaftError> {
        let members: Vec<NodeId> = (1..=size).collect();
        let seed_base = base.rng_seed.unwrap_or(0);
        let network = LocalNetwork::new();
        let mut nodes = BTreeMap::new();
        let mut applied = BTreeMap::new();
        let mut collectors = Vec::new();

        for id in members.iter().copied() {
            let config = RaftConfig {
                node_id: id,
                members: members.clone(),
                rng_seed: Some(seed_base + id),
                ..base.clone()
            };
            let (raft, mut applied_rx) = Raft::new(config, network.transport(id))?;
            network.register(raft.clone()).await;

            let sink = Arc::new(Mutex::new(Vec::new()));
            let collector_sink = sink.clone();
            collectors.push(tokio::spawn(async move {
                while let Some(entry) = applied_rx.recv().await {
                    tracing::trace!(node_id = id, index = entry.index, "Entry applied");
                    collector_sink.lock().await.push(entry);
                }
            }));

            nodes.insert(id, raft);
            applied.insert(id, sink);
        }

        Ok(Self {
            network,
            nodes,
            applied,
            collectors,
        })
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&Raft> {
        self.nodes.get(&id)
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    pub async fn start_all(&self) {
        for raft in self.nodes.values() {
            raft.start().await;
        }
    }

    pub async fn stop_all(&self) {
        for raft in self.nodes.values() {
            raft.stop().await;
        }
    }

    pub async fn isolate(&self, id: NodeId) {
        self.network.isolate(id).await;
    }

    pub async fn heal(&self, id: NodeId) {
        self.network.heal(id).await;
    }

    pub async fn statuses(&self) -> Vec<NodeStatus> {
        let mut statuses = Vec::with_capacity(self.nodes.len());
        for raft in self.nodes.values() {
            statuses.push(raft.status().await);
        }
        statuses
    }

    /// Every node that currently believes it is leader, with its term
    pub async fn leaders(&self) -> Vec<(NodeId, u64)> {
        self.statuses()
            .await
            .into_iter()
            .filter(|s| s.state == NodeState::Leader)
            .map(|s| (s.id, s.term))
            .collect()
    }

    /// Poll until a reachable node is leader; the highest term wins if an
    /// isolated former leader is still around.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<NodeId> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut best: Option<(NodeId, u64)> = None;
            for (id, term) in self.leaders().await {
                if self.network.is_isolated(id).await {
                    continue;
                }
                if best.map_or(true, |(_, t)| term > t) {
                    best = Some((id, term));
                }
            }
            if let Some((id, _)) = best {
                return Some(id);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Submit through whichever reachable node leads right now. Leader
    /// discovery is the client's job; this harness plays that client.
    pub async fn append(&self, command: Vec<u8>, timeout: Duration) -> Result<u64, RaftError> {
        let leader = self
            .wait_for_leader(timeout)
            .await
            .ok_or(RaftError::NotLeader { leader_hint: None })?;
        match self.nodes.get(&leader) {
            Some(raft) => raft.append_log(command).await,
            None => Err(RaftError::NotLeader { leader_hint: None }),
        }
    }

    /// Entries the node has applied so far, in the order they were delivered
    pub async fn applied(&self, id: NodeId) -> Vec<LogEntry> {
        match self.applied.get(&id) {
            Some(sink) => sink.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn log(&self, id: NodeId) -> Vec<LogEntry> {
        match self.nodes.get(&id) {
            Some(raft) => raft.log_entries().await,
            None => Vec::new(),
        }
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for collector in &self.collectors {
            collector.abort();
        }
    }
}
