//! # runtime
//!
//! why: drive the synchronous state machine with real timers and concurrent rpcs
//! relations: wraps node.rs behind one lock, calls peers through rpc.rs, times with timer.rs
//! what: Raft handle, election timer task, heartbeat task, replication rounds
//!
//! Every mutation of `RaftNode` happens while holding `Shared::inner`, and that
//! lock is never held across an rpc await. Outbound calls capture the term they
//! were issued in; replies are folded back in under the lock and dropped when
//! the term or role has moved on.
//!
//! Background tasks only hold a `Weak` reference between wakeups, so once the
//! last `Raft` handle is dropped they exit on their next tick.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::LogEntry;
use crate::message::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::node::{NodeState, NodeStatus, RaftNode, ReplicationOutcome};
use crate::rpc::RaftRpc;
use crate::timer::ElectionTimer;
use crate::NodeId;

/// Handle to a running raft node. Clones share the same node.
///
/// Background tasks run until `stop` is called or the last handle is dropped.
#[derive(Clone)]
pub struct Raft {
    shared: Arc<Shared>,
}

struct Shared {
    id: NodeId,
    config: RaftConfig,
    rpc: Arc<dyn RaftRpc>,
    inner: Mutex<Inner>,
    /// wakes the election timer when the deadline moves
    timer_reset: Arc<Notify>,
    applied_tx: mpsc::UnboundedSender<LogEntry>,
}

struct Inner {
    node: RaftNode,
    timer: ElectionTimer,
    election_deadline: Instant,
    running: bool,
    election_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl Inner {
    fn reset_election_timer(&mut self) {
        self.election_deadline = Instant::now() + self.timer.next_timeout();
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.election_task.take() {
            task.abort();
        }
        self.stop_heartbeat();
    }
}

impl Raft {
    /// Build a follower at term 0. The receiver yields every committed entry
    /// exactly once, in increasing index order.
    pub fn new(
        config: RaftConfig,
        rpc: Arc<dyn RaftRpc>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LogEntry>)> {
        config.validate()?;
        let (applied_tx, applied_rx) = mpsc::unbounded_channel();

        let mut timer = ElectionTimer::new(config.election_timeout_ms, config.rng_seed);
        let election_deadline = Instant::now() + timer.next_timeout();
        let inner = Inner {
            node: RaftNode::new(config.clone()),
            timer,
            election_deadline,
            running: false,
            election_task: None,
            heartbeat_task: None,
        };

        let shared = Arc::new(Shared {
            id: config.node_id,
            config,
            rpc,
            inner: Mutex::new(inner),
            timer_reset: Arc::new(Notify::new()),
            applied_tx,
        });
        Ok((Self { shared }, applied_rx))
    }

    pub fn id(&self) -> NodeId {
        self.shared.id
    }

    pub fn config(&self) -> &RaftConfig {
        &self.shared.config
    }

    /// Arm the election timer. Calling it on a running node does nothing.
    pub async fn start(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.running {
            return;
        }
        inner.running = true;
        inner.reset_election_timer();
        inner.election_task = Some(tokio::spawn(Shared::run_election_timer(Arc::downgrade(
            &self.shared,
        ))));
        if inner.node.is_leader() {
            self.shared.start_heartbeat(&mut inner);
        }
        tracing::info!(node_id = self.shared.id, term = inner.node.current_term, "Raft node started");
    }

    /// Disarm the election timer and stop heartbeating. In-flight rpcs finish
    /// in the background and their replies are still checked against the term.
    pub async fn stop(&self) {
        let mut inner = self.shared.inner.lock().await;
        if !inner.running {
            return;
        }
        inner.running = false;
        if let Some(task) = inner.election_task.take() {
            task.abort();
        }
        inner.stop_heartbeat();
        tracing::info!(node_id = self.shared.id, term = inner.node.current_term, "Raft node stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.shared.inner.lock().await.running
    }

    // -- inbound rpc handlers --

    pub async fn handle_request_vote(&self, request: VoteRequest) -> VoteResponse {
        let mut inner = self.shared.inner.lock().await;
        let term_before = inner.node.current_term;
        let (response, reset) = inner.node.handle_vote_request(&request);
        self.shared.settle(&mut inner, term_before, reset);
        response
    }

    pub async fn handle_append_entries(&self, request: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut inner = self.shared.inner.lock().await;
        let term_before = inner.node.current_term;
        let (response, reset) = inner.node.handle_append_entries(&request);
        self.shared.settle(&mut inner, term_before, reset);
        response
    }

    // -- client surface --

    /// Append `command` on the leader and replicate it for one round.
    ///
    /// Returns the entry's index once a majority (self included) holds it.
    /// There is no forwarding: on a follower this fails with `NotLeader` and
    /// the caller has to find the leader itself.
    pub async fn append_log(&self, command: Vec<u8>) -> Result<u64> {
        let shared = &self.shared;
        let (index, term) = {
            let mut inner = shared.inner.lock().await;
            if !inner.running {
                return Err(RaftError::Stopped);
            }
            let entry = inner.node.append_entry(command)?;
            if inner.node.advance_commit_index() {
                let term = inner.node.current_term;
                shared.settle(&mut inner, term, false);
            }
            (entry.index, entry.term)
        };

        let required = shared.config.quorum_size();
        let mut acknowledged = 1;
        let mut rounds = JoinSet::new();
        for peer in shared.config.peers() {
            rounds.spawn(shared.clone().replicate_to(peer, term, index));
        }

        while acknowledged < required {
            match rounds.join_next().await {
                Some(Ok(true)) => acknowledged += 1,
                Some(Ok(false)) => {}
                Some(Err(e)) => {
                    tracing::warn!(node_id = shared.id, error = %e, "Replication task failed");
                }
                None => break,
            }
        }
        // stragglers keep running; their results only move next/match index
        rounds.detach_all();

        if acknowledged >= required {
            tracing::debug!(node_id = shared.id, index, term, acknowledged, "Entry replicated to majority");
            Ok(index)
        } else {
            tracing::warn!(node_id = shared.id, index, acknowledged, required, "Replication round failed");
            Err(RaftError::ReplicationFailed {
                index,
                acknowledged,
                required,
            })
        }
    }

    // -- observers --

    pub async fn state(&self) -> NodeState {
        self.shared.inner.lock().await.node.state
    }

    pub async fn current_term(&self) -> u64 {
        self.shared.inner.lock().await.node.current_term
    }

    pub async fn commit_index(&self) -> u64 {
        self.shared.inner.lock().await.node.commit_index
    }

    pub async fn last_applied(&self) -> u64 {
        self.shared.inner.lock().await.node.last_applied
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        self.shared.inner.lock().await.node.leader_id
    }

    pub async fn status(&self) -> NodeStatus {
        self.shared.inner.lock().await.node.status()
    }

    /// Copy of the whole log, sentinel included
    pub async fn log_entries(&self) -> Vec<LogEntry> {
        let inner = self.shared.inner.lock().await;
        inner.node.log.iter().cloned().collect()
    }
}

impl Shared {
    /// Bookkeeping after any mutation of the node: drop the heartbeat if we
    /// are no longer leader, re-arm the election timer when asked to or when
    /// a newer term was adopted, and hand newly committed entries out.
    fn settle(&self, inner: &mut Inner, term_before: u64, reset: bool) {
        if !inner.node.is_leader() {
            inner.stop_heartbeat();
        }
        if reset || inner.node.current_term > term_before {
            inner.reset_election_timer();
            self.timer_reset.notify_one();
        }
        for entry in inner.node.take_entries_to_apply() {
            if self.applied_tx.send(entry).is_err() {
                tracing::trace!(node_id = self.id, "Applied-entry receiver dropped");
            }
        }
    }

    fn start_heartbeat(self: &Arc<Self>, inner: &mut Inner) {
        inner.stop_heartbeat();
        let term = inner.node.current_term;
        inner.heartbeat_task = Some(tokio::spawn(Shared::run_heartbeats(
            Arc::downgrade(self),
            self.config.heartbeat_interval(),
            term,
        )));
    }

    async fn run_election_timer(this: Weak<Self>) {
        loop {
            let (deadline, reset) = {
                let Some(shared) = this.upgrade() else {
                    return;
                };
                let deadline = shared.inner.lock().await.election_deadline;
                (deadline, shared.timer_reset.clone())
            };
            tokio::select! {
                _ = time::sleep_until(deadline) => {}
                _ = reset.notified() => continue,
            }

            let Some(shared) = this.upgrade() else {
                return;
            };
            shared.on_election_deadline().await;
        }
    }

    /// The election deadline may have passed: start an election unless the
    /// deadline moved meanwhile or this node leads.
    async fn on_election_deadline(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if Instant::now() < inner.election_deadline {
            return;
        }
        if inner.node.is_leader() {
            inner.reset_election_timer();
            return;
        }

        tracing::info!(
            node_id = self.id,
            term = inner.node.current_term,
            "Election timeout, starting election"
        );
        let request = inner.node.start_election();
        inner.reset_election_timer();
        if inner.node.is_leader() {
            self.start_heartbeat(&mut inner);
            return;
        }
        tokio::spawn(self.clone().run_election(request));
    }

    async fn run_election(self: Arc<Self>, request: VoteRequest) {
        let term = request.term;
        let mut calls = JoinSet::new();
        for peer in self.config.peers() {
            let rpc = self.rpc.clone();
            let request = request.clone();
            calls.spawn(async move { (peer, rpc.request_vote(peer, request).await) });
        }

        while let Some(joined) = calls.join_next().await {
            let (peer, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::warn!(node_id = self.id, error = %e, "Vote request task failed");
                    continue;
                }
            };
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(node_id = self.id, peer_id = peer, error = %e, "Vote request failed");
                    continue;
                }
            };

            let mut inner = self.inner.lock().await;
            let term_before = inner.node.current_term;
            let won = inner.node.handle_vote_response(peer, term, &response);
            self.settle(&mut inner, term_before, false);
            if won {
                if inner.running {
                    self.start_heartbeat(&mut inner);
                }
                break;
            }
            if inner.node.state != NodeState::Candidate || inner.node.current_term != term {
                break;
            }
        }
        calls.detach_all();
    }

    /// Heartbeat loop for one leader term. A peer whose previous call has not
    /// returned yet is skipped for that tick.
    async fn run_heartbeats(this: Weak<Self>, period: Duration, term: u64) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: HashMap<NodeId, JoinHandle<()>> = HashMap::new();
        loop {
            ticker.tick().await;
            let Some(shared) = this.upgrade() else {
                return;
            };
            in_flight.retain(|_, call| !call.is_finished());

            let requests: Vec<(NodeId, AppendEntriesRequest)> = {
                let inner = shared.inner.lock().await;
                if !inner.node.is_leader() || inner.node.current_term != term {
                    return;
                }
                shared
                    .config
                    .peers()
                    .filter(|peer| !in_flight.contains_key(peer))
                    .filter_map(|peer| inner.node.create_append_entries(peer).map(|r| (peer, r)))
                    .collect()
            };
            for (peer, request) in requests {
                let shared = shared.clone();
                let call = tokio::spawn(async move {
                    shared.send_append_entries(peer, request).await;
                });
                in_flight.insert(peer, call);
            }
        }
    }

    /// One AppendEntries round trip. `None` means the transport failed and
    /// nothing was changed.
    async fn send_append_entries(
        self: &Arc<Self>,
        peer: NodeId,
        request: AppendEntriesRequest,
    ) -> Option<ReplicationOutcome> {
        let response = match self.rpc.append_entries(peer, request.clone()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::trace!(node_id = self.id, peer_id = peer, error = %e, "AppendEntries failed");
                return None;
            }
        };

        let mut inner = self.inner.lock().await;
        let term_before = inner.node.current_term;
        let outcome = inner
            .node
            .handle_append_entries_response(peer, &request, &response);
        if let ReplicationOutcome::Replicated { .. } = outcome {
            inner.node.advance_commit_index();
        }
        self.settle(&mut inner, term_before, false);
        Some(outcome)
    }

    /// Bounded retry loop pushing the log to `peer` until it holds `index`
    async fn replicate_to(self: Arc<Self>, peer: NodeId, term: u64, index: u64) -> bool {
        for attempt in 1..=self.config.max_replication_attempts {
            let request = {
                let inner = self.inner.lock().await;
                if !inner.node.is_leader() || inner.node.current_term != term {
                    return false;
                }
                if inner.node.match_index.get(&peer).copied().unwrap_or(0) >= index {
                    return true;
                }
                match inner.node.create_append_entries(peer) {
                    Some(request) => request,
                    None => return false,
                }
            };

            match self.send_append_entries(peer, request).await {
                Some(ReplicationOutcome::Replicated { match_index }) if match_index >= index => {
                    return true;
                }
                Some(ReplicationOutcome::Replicated { .. }) | Some(ReplicationOutcome::Rejected { .. }) => {
                    tracing::debug!(node_id = self.id, peer_id = peer, attempt, index, "Retrying replication");
                }
                Some(ReplicationOutcome::Stale) | Some(ReplicationOutcome::SteppedDown) | None => {
                    return false;
                }
            }
        }
        tracing::debug!(node_id = self.id, peer_id = peer, index, "Replication attempts exhausted");
        false
    }
}
