//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: built and consumed by node.rs, carried by an RaftRpc transport
//! what: VoteRequest/Response, AppendEntriesRequest/Response, RaftMessage envelope

use serde::{Deserialize, Serialize};

use crate::{LogEntry, NodeId};

/// RequestVote arguments sent by a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// Reply to a RequestVote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

impl AppendEntriesRequest {
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry this request would leave on the follower
    pub fn last_index(&self) -> u64 {
        self.prev_log_index + self.entries.len() as u64
    }
}

/// Reply to an AppendEntries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
}

/// Envelope for every message exchanged between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum RaftMessage {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

impl RaftMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Term carried by any message
    pub fn term(&self) -> u64 {
        match self {
            RaftMessage::VoteRequest(m) => m.term,
            RaftMessage::VoteResponse(m) => m.term,
            RaftMessage::AppendEntries(m) => m.term,
            RaftMessage::AppendEntriesResponse(m) => m.term,
        }
    }
}

impl From<VoteRequest> for RaftMessage {
    fn from(m: VoteRequest) -> Self {
        RaftMessage::VoteRequest(m)
    }
}

impl From<VoteResponse> for RaftMessage {
    fn from(m: VoteResponse) -> Self {
        RaftMessage::VoteResponse(m)
    }
}

impl From<AppendEntriesRequest> for RaftMessage {
    fn from(m: AppendEntriesRequest) -> Self {
        RaftMessage::AppendEntries(m)
    }
}

impl From<AppendEntriesResponse> for RaftMessage {
    fn from(m: AppendEntriesResponse) -> Self {
        RaftMessage::AppendEntriesResponse(m)
    }
}
