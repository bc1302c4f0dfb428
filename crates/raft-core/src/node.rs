//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management; driven by runtime.rs
//! what: NodeState enum, RaftNode struct, election, replication and commit decisions
//!
//! Everything here is synchronous and deterministic. Timers, concurrency and
//! the network live in runtime.rs, which calls into this state machine while
//! holding its single lock.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::{LogEntry, RaftLog};
use crate::message::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::NodeId;

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    #[default]
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

/// What the leader learned from one AppendEntries round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationOutcome {
    /// The peer holds every entry through `match_index`
    Replicated { match_index: u64 },
    /// Consistency check failed; the next attempt starts at `next_index`
    Rejected { next_index: u64 },
    /// The reply belongs to an older term or this node is no longer leader
    Stale,
    /// The reply carried a higher term and this node is now a follower
    SteppedDown,
}

/// Read-only snapshot of a node, for dashboards and tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub state: NodeState,
    pub term: u64,
    pub voted_for: Option<NodeId>,
    pub leader_id: Option<NodeId>,
    pub log_length: u64,
    pub last_log_term: u64,
    pub commit_index: u64,
    pub last_applied: u64,
}

/// A single Raft node in the cluster
#[derive(Debug)]
pub struct RaftNode {
    /// Unique identifier for this node
    pub id: NodeId,
    pub config: RaftConfig,
    /// Current state (Follower, Candidate, or Leader)
    pub state: NodeState,
    /// Current term number
    pub current_term: u64,
    /// Node ID that received our vote in current term (if any)
    pub voted_for: Option<NodeId>,
    pub log: RaftLog,
    /// Highest index known to be committed
    pub commit_index: u64,
    /// Highest index handed to the application
    pub last_applied: u64,
    /// Leader this node last accepted AppendEntries from in the current term
    pub leader_id: Option<NodeId>,
    /// Votes collected in the current election, self included
    pub votes_received: Vec<NodeId>,
    // leader-only, empty otherwise
    pub next_index: HashMap<NodeId, u64>,
    pub match_index: HashMap<NodeId, u64>,
}

impl RaftNode {
    /// Create a new Raft node in Follower state
    pub fn new(config: RaftConfig) -> Self {
        Self {
            id: config.node_id,
            config,
            state: NodeState::Follower,
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            votes_received: Vec::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    pub fn quorum_size(&self) -> usize {
        self.config.quorum_size()
    }

    pub fn has_quorum(&self) -> bool {
        self.votes_received.len() >= self.quorum_size()
    }

    pub fn last_log_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last_term()
    }

    pub fn get_entry(&self, index: u64) -> Option<&LogEntry> {
        self.log.entry(index)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.id,
            state: self.state,
            term: self.current_term,
            voted_for: self.voted_for,
            leader_id: self.leader_id,
            log_length: self.log.last_index(),
            last_log_term: self.log.last_term(),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
        }
    }

    // -- state transitions --

    /// Begin a new election: bump the term, vote for ourselves and return the
    /// request to broadcast. A single-node cluster wins on the spot.
    pub fn start_election(&mut self) -> VoteRequest {
        self.current_term += 1;
        self.state = NodeState::Candidate;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes_received = vec![self.id];
        self.next_index.clear();
        self.match_index.clear();

        tracing::info!(node_id = self.id, term = self.current_term, "Starting election");

        let request = VoteRequest {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };

        if self.has_quorum() {
            self.become_leader();
        }
        request
    }

    /// Fall back to follower. A higher term is adopted and clears the vote;
    /// the same term keeps it, so a node never votes twice in one term.
    pub fn become_follower(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }
        if self.state != NodeState::Follower {
            tracing::info!(
                node_id = self.id,
                term = self.current_term,
                from = ?self.state,
                "Stepping down to follower"
            );
        }
        self.state = NodeState::Follower;
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
    }

    pub fn become_leader(&mut self) {
        self.state = NodeState::Leader;
        self.leader_id = Some(self.id);
        self.votes_received.clear();

        let next = self.log.len() as u64;
        let peers: Vec<NodeId> = self.config.peers().collect();
        self.next_index = peers.iter().map(|p| (*p, next)).collect();
        self.match_index = peers.iter().map(|p| (*p, 0)).collect();

        tracing::info!(
            node_id = self.id,
            term = self.current_term,
            last_log_index = self.log.last_index(),
            "Became leader"
        );
    }

    // -- election --

    /// Decide on a RequestVote. Returns the reply and whether the election
    /// timer should be reset (vote granted or a newer term adopted).
    pub fn handle_vote_request(&mut self, request: &VoteRequest) -> (VoteResponse, bool) {
        if request.candidate_id == self.id {
            tracing::warn!(node_id = self.id, "Rejecting vote request addressed to self");
            return (self.vote_response(false), false);
        }

        if request.term < self.current_term {
            tracing::debug!(
                node_id = self.id,
                candidate = request.candidate_id,
                term = request.term,
                current_term = self.current_term,
                "Rejecting vote request from stale term"
            );
            return (self.vote_response(false), false);
        }

        let mut reset = false;
        if request.term > self.current_term {
            self.become_follower(request.term);
            reset = true;
        }

        let free_to_vote = match self.voted_for {
            None => true,
            Some(id) => id == request.candidate_id,
        };
        let log_ok = self
            .log
            .is_up_to_date(request.last_log_index, request.last_log_term);
        let granted = free_to_vote && log_ok;

        if granted {
            self.voted_for = Some(request.candidate_id);
            reset = true;
        }

        tracing::debug!(
            node_id = self.id,
            candidate = request.candidate_id,
            term = self.current_term,
            granted,
            log_ok,
            "RequestVote decided"
        );

        (self.vote_response(granted), reset)
    }

    fn vote_response(&self, vote_granted: bool) -> VoteResponse {
        VoteResponse {
            term: self.current_term,
            vote_granted,
        }
    }

    /// Count a vote reply for the election started in `election_term`.
    /// Returns true only on the transition to leader.
    pub fn handle_vote_response(
        &mut self,
        from: NodeId,
        election_term: u64,
        response: &VoteResponse,
    ) -> bool {
        if response.term > self.current_term {
            self.become_follower(response.term);
            return false;
        }

        if self.state != NodeState::Candidate
            || self.current_term != election_term
            || response.term != election_term
        {
            return false;
        }

        if response.vote_granted
            && self.config.members.contains(&from)
            && !self.votes_received.contains(&from)
        {
            self.votes_received.push(from);
            tracing::debug!(
                node_id = self.id,
                peer_id = from,
                term = self.current_term,
                votes = self.votes_received.len(),
                needed = self.quorum_size(),
                "Received vote"
            );
        }

        if self.has_quorum() {
            self.become_leader();
            return true;
        }
        false
    }

    // -- replication, follower side --

    /// Decide on an AppendEntries. Returns the reply and whether the election
    /// timer should be reset (the request came from a current leader).
    pub fn handle_append_entries(
        &mut self,
        request: &AppendEntriesRequest,
    ) -> (AppendEntriesResponse, bool) {
        if request.leader_id == self.id {
            tracing::warn!(node_id = self.id, "Rejecting AppendEntries addressed to self");
            return (self.append_response(false), false);
        }

        if request.term < self.current_term {
            return (self.append_response(false), false);
        }

        if request.term > self.current_term || self.state != NodeState::Follower {
            if request.term == self.current_term && self.state == NodeState::Leader {
                tracing::error!(
                    node_id = self.id,
                    other_leader = request.leader_id,
                    term = self.current_term,
                    "Two leaders in one term"
                );
            }
            self.become_follower(request.term);
        }
        self.leader_id = Some(request.leader_id);

        if request.prev_log_index > 0
            && !self.log.matches(request.prev_log_index, request.prev_log_term)
        {
            tracing::debug!(
                node_id = self.id,
                prev_log_index = request.prev_log_index,
                prev_log_term = request.prev_log_term,
                last_log_index = self.log.last_index(),
                "Log inconsistent with leader"
            );
            return (self.append_response(false), true);
        }

        let misplaced = request
            .entries
            .iter()
            .enumerate()
            .any(|(offset, e)| e.index != request.prev_log_index + 1 + offset as u64);
        if misplaced {
            tracing::warn!(node_id = self.id, "Rejecting AppendEntries with non-contiguous entries");
            return (self.append_response(false), true);
        }

        for entry in &request.entries {
            match self.log.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    if entry.index <= self.commit_index {
                        tracing::error!(
                            node_id = self.id,
                            index = entry.index,
                            commit_index = self.commit_index,
                            "Leader tried to overwrite a committed entry"
                        );
                        return (self.append_response(false), true);
                    }
                    tracing::debug!(node_id = self.id, index = entry.index, "Truncating conflicting suffix");
                    self.log.truncate_from(entry.index);
                    self.log.append(entry.clone());
                }
                None => self.log.append(entry.clone()),
            }
        }

        if request.leader_commit > self.commit_index {
            // only what this request vouched for; anything past it may still conflict
            let new_commit = request.leader_commit.min(request.last_index());
            if new_commit > self.commit_index {
                self.commit_index = new_commit;
            }
        }

        (self.append_response(true), true)
    }

    fn append_response(&self, success: bool) -> AppendEntriesResponse {
        AppendEntriesResponse {
            term: self.current_term,
            success,
        }
    }

    // -- replication, leader side --

    /// Append a client command at the tail of the leader's log
    pub fn append_entry(&mut self, command: Vec<u8>) -> Result<LogEntry> {
        if !self.is_leader() {
            return Err(RaftError::NotLeader {
                leader_hint: self.leader_id,
            });
        }
        let entry = LogEntry::new(self.current_term, self.log.len() as u64, command);
        self.log.append(entry.clone());
        tracing::debug!(node_id = self.id, index = entry.index, term = entry.term, "Appended command to log");
        Ok(entry)
    }

    /// Build the AppendEntries for `peer`: everything from its next index to
    /// the tail, or an empty heartbeat when it is caught up.
    pub fn create_append_entries(&self, peer: NodeId) -> Option<AppendEntriesRequest> {
        if !self.is_leader() {
            return None;
        }
        let next = (*self.next_index.get(&peer)?).clamp(1, self.log.len() as u64);
        let prev_log_index = next - 1;
        Some(AppendEntriesRequest {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term: self.log.term_at(prev_log_index).unwrap_or(0),
            entries: self.log.entries_from(next),
            leader_commit: self.commit_index,
        })
    }

    /// Fold a peer's reply to `request` into next_index/match_index
    pub fn handle_append_entries_response(
        &mut self,
        peer: NodeId,
        request: &AppendEntriesRequest,
        response: &AppendEntriesResponse,
    ) -> ReplicationOutcome {
        if response.term > self.current_term {
            self.become_follower(response.term);
            return ReplicationOutcome::SteppedDown;
        }

        if !self.is_leader() || request.term != self.current_term {
            return ReplicationOutcome::Stale;
        }
        let Some(next) = self.next_index.get(&peer).copied() else {
            return ReplicationOutcome::Stale;
        };

        if response.success {
            let matched = request.last_index();
            let match_index = self.match_index.entry(peer).or_insert(0);
            *match_index = (*match_index).max(matched);
            let match_index = *match_index;
            self.next_index.insert(peer, next.max(matched + 1));
            return ReplicationOutcome::Replicated { match_index };
        }

        // only back off if nothing newer already moved next_index
        let next = if next == request.prev_log_index + 1 {
            let backed_off = next.saturating_sub(1).max(1);
            self.next_index.insert(peer, backed_off);
            backed_off
        } else {
            next
        };
        tracing::debug!(node_id = self.id, peer_id = peer, next_index = next, "Follower rejected entries");
        ReplicationOutcome::Rejected { next_index: next }
    }

    /// Move commit_index to the highest current-term index held by a
    /// majority. Entries from earlier terms only commit underneath one of
    /// those, never by counting replicas.
    pub fn advance_commit_index(&mut self) -> bool {
        if !self.is_leader() {
            return false;
        }
        let quorum = self.quorum_size();
        for index in (self.commit_index + 1..=self.log.last_index()).rev() {
            if self.log.term_at(index) != Some(self.current_term) {
                continue;
            }
            let replicated = 1 + self.match_index.values().filter(|m| **m >= index).count();
            if replicated >= quorum {
                tracing::debug!(node_id = self.id, commit_index = index, "Updated commit index");
                self.commit_index = index;
                return true;
            }
        }
        false
    }

    /// Committed entries not yet handed to the application, in index order
    pub fn take_entries_to_apply(&mut self) -> Vec<LogEntry> {
        if self.last_applied >= self.commit_index {
            return Vec::new();
        }
        let entries = self.log.range(self.last_applied + 1, self.commit_index);
        self.last_applied = self.commit_index;
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_as_follower() {
        let node = RaftNode::new(RaftConfig::new(1, vec![1, 2, 3]));
        assert_eq!(node.state, NodeState::Follower);
        assert_eq!(node.current_term, 0);
        assert_eq!(node.voted_for, None);
        assert!(node.log.is_empty());
    }

    #[test]
    fn status_reflects_state() {
        let mut node = RaftNode::new(RaftConfig::new(1, vec![1]));
        node.start_election();
        node.append_entry(b"a".to_vec()).unwrap();
        let status = node.status();
        assert_eq!(status.state, NodeState::Leader);
        assert_eq!(status.term, 1);
        assert_eq!(status.log_length, 1);
        assert_eq!(status.leader_id, Some(1));
    }

    #[test]
    fn single_node_commits_without_peers() {
        let mut node = RaftNode::new(RaftConfig::new(1, vec![1]));
        node.start_election();
        node.append_entry(b"a".to_vec()).unwrap();
        assert!(node.advance_commit_index());
        assert_eq!(node.commit_index, 1);
        assert_eq!(node.take_entries_to_apply().len(), 1);
    }
}
