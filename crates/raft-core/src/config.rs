//! # config
//!
//! why: describe a node's identity, cluster membership and timing for one run
//! relations: consumed by node.rs (quorum, peers) and runtime.rs/timer.rs (timing)
//! what: RaftConfig with serde defaults, json loading, validation

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RaftError, Result};
use crate::NodeId;

pub const DEFAULT_ELECTION_TIMEOUT_MS: u64 = 150;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 50;
pub const DEFAULT_MAX_REPLICATION_ATTEMPTS: usize = 5;
/// Upper bound on the election base; timeouts reach twice this value
pub const MAX_ELECTION_TIMEOUT_MS: u64 = 3_600_000;

/// Read-only configuration of a single raft node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Identifier of this node
    pub node_id: NodeId,
    /// Every cluster member, including this node
    pub members: Vec<NodeId>,
    /// Election timeouts are drawn uniformly from `[base, 2 * base)` milliseconds
    #[serde(default = "default_election_timeout")]
    pub election_timeout_ms: u64,
    /// Period between leader heartbeats in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
    /// Attempts per peer in one client-triggered replication round
    #[serde(default = "default_max_replication_attempts")]
    pub max_replication_attempts: usize,
    /// Seed for election jitter; `None` seeds from OS entropy
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_election_timeout() -> u64 {
    DEFAULT_ELECTION_TIMEOUT_MS
}

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

fn default_max_replication_attempts() -> usize {
    DEFAULT_MAX_REPLICATION_ATTEMPTS
}

impl RaftConfig {
    pub fn new(node_id: NodeId, members: Vec<NodeId>) -> Self {
        Self {
            node_id,
            members,
            election_timeout_ms: DEFAULT_ELECTION_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_replication_attempts: DEFAULT_MAX_REPLICATION_ATTEMPTS,
            rng_seed: None,
        }
    }

    pub fn with_election_timeout_ms(mut self, ms: u64) -> Self {
        self.election_timeout_ms = ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_max_replication_attempts(mut self, attempts: usize) -> Self {
        self.max_replication_attempts = attempts;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Parse and validate a JSON document
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: RaftConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(RaftError::InvalidConfig("members must not be empty".into()));
        }
        if !self.members.contains(&self.node_id) {
            return Err(RaftError::InvalidConfig(format!(
                "node {} is not listed in members",
                self.node_id
            )));
        }
        let unique: HashSet<_> = self.members.iter().collect();
        if unique.len() != self.members.len() {
            return Err(RaftError::InvalidConfig("members contain duplicates".into()));
        }
        if self.election_timeout_ms == 0 || self.election_timeout_ms > MAX_ELECTION_TIMEOUT_MS {
            return Err(RaftError::InvalidConfig(format!(
                "election_timeout_ms ({}) must be between 1 and {}",
                self.election_timeout_ms, MAX_ELECTION_TIMEOUT_MS
            )));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_interval_ms >= self.election_timeout_ms
        {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat_interval_ms ({}) must be positive and below election_timeout_ms ({})",
                self.heartbeat_interval_ms, self.election_timeout_ms
            )));
        }
        if self.max_replication_attempts == 0 {
            return Err(RaftError::InvalidConfig(
                "max_replication_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Members other than this node, in configuration order
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied().filter(move |id| *id != self.node_id)
    }

    /// Strict majority of the cluster, counting this node
    pub fn quorum_size(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
