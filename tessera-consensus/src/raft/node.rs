use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_common::env::{Command, LogEntry};
use tessera_common::{NodeId, TesseraError};
use tracing::{debug, error, info, warn};

use super::config::RaftConfig;
use super::log::RaftLog;
use super::message::{
    AppendEntriesArgs, AppendEntriesReply, Envelope, RaftMessage, RequestVoteArgs, RequestVoteReply,
};
use super::state::{HardState, Role};
use crate::error::ConsensusError;

/// Work produced by the state machine since the last call to [`RaftNode::ready`].
///
/// The caller must persist `hard_state`, apply `truncate_from` and then
/// append `entries` to stable storage before sending `messages`.
/// `committed` entries are handed out exactly once, in index order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Ready {
    pub hard_state: Option<HardState>,
    pub truncate_from: Option<u64>,
    pub entries: Vec<LogEntry>,
    pub messages: Vec<Envelope>,
    pub committed: Vec<LogEntry>,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        self.hard_state.is_none()
            && self.truncate_from.is_none()
            && self.entries.is_empty()
            && self.messages.is_empty()
            && self.committed.is_empty()
    }
}

pub struct RaftNode {
    id: NodeId,
    peers: Vec<NodeId>,
    config: RaftConfig,

    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    log: RaftLog,
    commit_index: u64,
    last_applied: u64,
    leader_id: Option<NodeId>,

    votes: BTreeSet<NodeId>,
    next_index: BTreeMap<NodeId, u64>,
    match_index: BTreeMap<NodeId, u64>,
    recent_active: BTreeSet<NodeId>,

    election_elapsed: u64,
    randomized_timeout: u64,
    heartbeat_elapsed: u64,
    quorum_elapsed: u64,
    rng: StdRng,

    outbox: Vec<Envelope>,
    persisted: HardState,
    unstable_from: Option<u64>,
    truncated_from: Option<u64>,
}

impl RaftNode {
    pub fn new(
        id: NodeId,
        members: impl IntoIterator<Item = NodeId>,
        config: RaftConfig,
    ) -> Result<Self, ConsensusError> {
        Self::restore(id, members, config, HardState::default(), Vec::new())
    }

    /// Rebuilds a node from what a previous incarnation persisted.
    /// Commit and apply progress are volatile and start from zero.
    pub fn restore(
        id: NodeId,
        members: impl IntoIterator<Item = NodeId>,
        config: RaftConfig,
        hard_state: HardState,
        entries: Vec<LogEntry>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;

        for (i, entry) in entries.iter().enumerate() {
            if entry.index != i as u64 + 1 {
                return Err(ConsensusError::Storage(TesseraError::Storage(format!(
                    "persisted log is not contiguous at position {} (found index {})",
                    i + 1,
                    entry.index
                ))));
            }
        }

        let mut peers: Vec<NodeId> = members.into_iter().filter(|m| *m != id).collect();
        peers.sort();
        peers.dedup();

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(mix_seed(seed, &id)),
            None => StdRng::from_entropy(),
        };
        let randomized_timeout = rng.gen_range(config.election_timeout_min..=config.election_timeout_max);

        Ok(Self {
            id,
            peers,
            config,
            role: Role::Follower,
            current_term: hard_state.current_term,
            voted_for: hard_state.voted_for.clone(),
            log: RaftLog::from_entries(entries),
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            votes: BTreeSet::new(),
            next_index: BTreeMap::new(),
            match_index: BTreeMap::new(),
            recent_active: BTreeSet::new(),
            election_elapsed: 0,
            randomized_timeout,
            heartbeat_elapsed: 0,
            quorum_elapsed: 0,
            rng,
            outbox: Vec::new(),
            persisted: hard_state,
            unstable_from: None,
            truncated_from: None,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    pub fn leader_id(&self) -> Option<&NodeId> {
        self.leader_id.as_ref()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn peers(&self) -> &[NodeId] {
        &self.peers
    }

    /// All members, self included, in sorted order.
    pub fn members(&self) -> Vec<NodeId> {
        let mut all = self.peers.clone();
        all.push(self.id.clone());
        all.sort();
        all
    }

    pub fn quorum(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    pub fn hard_state(&self) -> HardState {
        HardState {
            current_term: self.current_term,
            voted_for: self.voted_for.clone(),
        }
    }

    /// Advances logical time by one tick.
    pub fn tick(&mut self) {
        match self.role {
            Role::Leader => self.tick_leader(),
            Role::Follower | Role::Candidate => {
                self.election_elapsed += 1;
                if self.election_elapsed >= self.randomized_timeout {
                    self.campaign();
                }
            }
        }
    }

    fn tick_leader(&mut self) {
        self.quorum_elapsed += 1;
        if self.config.check_quorum && self.quorum_elapsed >= self.config.election_timeout_max {
            self.quorum_elapsed = 0;
            let active = self.recent_active.len() + 1;
            self.recent_active.clear();
            if active < self.quorum() {
                warn!(
                    "⚠️ {} lost contact with the majority ({}/{}) in term {}, stepping down",
                    self.id,
                    active,
                    self.peers.len() + 1,
                    self.current_term
                );
                tracing::info!(target: "consensus", "EVENT:STEP_DOWN node={} term={} reason=check_quorum", self.id, self.current_term);
                self.become_follower(self.current_term, None);
                return;
            }
        }

        self.heartbeat_elapsed += 1;
        if self.heartbeat_elapsed >= self.config.heartbeat_interval {
            self.heartbeat_elapsed = 0;
            self.broadcast_append();
        }
    }

    /// Feeds one inbound message into the state machine.
    pub fn step(&mut self, envelope: Envelope) -> Result<(), ConsensusError> {
        if envelope.to != self.id {
            return Err(ConsensusError::Misrouted {
                to: envelope.to,
                local: self.id.clone(),
            });
        }
        if !self.peers.contains(&envelope.from) {
            return Err(ConsensusError::UnknownPeer(envelope.from));
        }

        let from = envelope.from;
        let msg_term = envelope.message.term();
        if msg_term > self.current_term {
            let leader = match &envelope.message {
                RaftMessage::AppendEntries(args) => Some(args.leader_id.clone()),
                _ => None,
            };
            debug!(
                "{} observed term {} from {} ({}), current term {}",
                self.id,
                msg_term,
                from,
                envelope.message.kind(),
                self.current_term
            );
            self.become_follower(msg_term, leader);
        }

        match envelope.message {
            RaftMessage::RequestVote(args) => self.handle_request_vote(from, args),
            RaftMessage::RequestVoteResponse(reply) => self.handle_vote_response(from, reply),
            RaftMessage::AppendEntries(args) => self.handle_append_entries(from, args),
            RaftMessage::AppendEntriesResponse(reply) => self.handle_append_response(from, reply),
        }
        Ok(())
    }

    /// Appends a command to the leader's log and returns its index.
    pub fn propose(&mut self, command: Command) -> Result<u64, ConsensusError> {
        self.ensure_leader()?;
        let index = self.log.last_index() + 1;
        debug!("{} proposing '{}' at index {} term {}", self.id, command.idempotency_key, index, self.current_term);
        tracing::info!(target: "consensus", "EVENT:PROPOSE node={} term={} index={} key={}", self.id, self.current_term, index, command.idempotency_key);
        self.append_local(LogEntry::command(self.current_term, index, command));
        Ok(index)
    }

    /// Replicates a seal marker for evidence range `[start_seq, end_seq]`.
    pub fn propose_seal(&mut self, start_seq: u64, end_seq: u64) -> Result<u64, ConsensusError> {
        self.ensure_leader()?;
        let index = self.log.last_index() + 1;
        tracing::info!(target: "consensus", "EVENT:PROPOSE_SEAL node={} term={} index={} start={} end={}", self.id, self.current_term, index, start_seq, end_seq);
        self.append_local(LogEntry::seal(self.current_term, index, start_seq, end_seq));
        Ok(index)
    }

    fn ensure_leader(&self) -> Result<(), ConsensusError> {
        if self.role != Role::Leader {
            return Err(ConsensusError::NotLeader {
                leader: self.leader_id.clone(),
            });
        }
        Ok(())
    }

    fn append_local(&mut self, entry: LogEntry) {
        let index = entry.index;
        self.log.append(entry);
        self.mark_unstable(index);
        self.maybe_commit();
        self.broadcast_append();
    }

    /// Drains everything produced since the previous call.
    pub fn ready(&mut self) -> Ready {
        let hs = self.hard_state();
        let hard_state = if hs != self.persisted {
            self.persisted = hs.clone();
            Some(hs)
        } else {
            None
        };

        let truncate_from = self.truncated_from.take();
        let entries = match self.unstable_from.take() {
            Some(from) => self.log.entries_from(from, usize::MAX),
            None => Vec::new(),
        };

        let committed = if self.commit_index > self.last_applied {
            let batch = self.log.slice(self.last_applied + 1, self.commit_index);
            self.last_applied = self.commit_index;
            batch
        } else {
            Vec::new()
        };

        Ready {
            hard_state,
            truncate_from,
            entries,
            messages: std::mem::take(&mut self.outbox),
            committed,
        }
    }

    fn handle_request_vote(&mut self, from: NodeId, args: RequestVoteArgs) {
        let can_vote = match &self.voted_for {
            None => true,
            Some(v) => *v == from,
        };
        let granted = args.term == self.current_term
            && can_vote
            && self.log.is_up_to_date(args.last_log_index, args.last_log_term);

        if granted {
            self.voted_for = Some(from.clone());
            self.reset_election_timer();
            info!("🗳️ {} votes for {} in term {}", self.id, from, self.current_term);
        } else {
            debug!(
                "{} rejects vote for {} (term {} vs {}, voted_for={:?})",
                self.id, from, args.term, self.current_term, self.voted_for
            );
        }

        self.send(
            from,
            RaftMessage::RequestVoteResponse(RequestVoteReply {
                term: self.current_term,
                vote_granted: granted,
            }),
        );
    }

    fn handle_vote_response(&mut self, from: NodeId, reply: RequestVoteReply) {
        if self.role != Role::Candidate || reply.term != self.current_term || !reply.vote_granted {
            return;
        }
        self.votes.insert(from);
        if self.votes.len() >= self.quorum() {
            self.become_leader();
        }
    }

    fn handle_append_entries(&mut self, from: NodeId, args: AppendEntriesArgs) {
        if args.term < self.current_term {
            self.send(
                from,
                RaftMessage::AppendEntriesResponse(AppendEntriesReply {
                    term: self.current_term,
                    success: false,
                    match_index: 0,
                }),
            );
            return;
        }

        match self.role {
            Role::Candidate => self.become_follower(args.term, Some(args.leader_id.clone())),
            Role::Leader => {
                error!(
                    "{} received AppendEntries from {} while leading term {}",
                    self.id, args.leader_id, self.current_term
                );
                return;
            }
            Role::Follower => {
                self.leader_id = Some(args.leader_id.clone());
                self.reset_election_timer();
            }
        }

        if !self.log.matches(args.prev_log_index, args.prev_log_term) {
            let hint = self.conflict_hint(args.prev_log_index);
            debug!(
                "{} log mismatch at {} (term {}), hinting {}",
                self.id, args.prev_log_index, args.prev_log_term, hint
            );
            self.send(
                from,
                RaftMessage::AppendEntriesResponse(AppendEntriesReply {
                    term: self.current_term,
                    success: false,
                    match_index: hint,
                }),
            );
            return;
        }

        let mut last_new = args.prev_log_index;
        for entry in args.entries {
            let index = entry.index;
            match self.log.term_at(index) {
                Some(t) if t == entry.term => {}
                Some(_) => {
                    if index <= self.commit_index {
                        error!(
                            "{} refusing to overwrite committed index {} (commit_index {})",
                            self.id, index, self.commit_index
                        );
                        return;
                    }
                    self.log.truncate_from(index);
                    self.mark_truncated(index);
                    self.log.append(entry);
                    self.mark_unstable(index);
                }
                None => {
                    if index != self.log.last_index() + 1 {
                        warn!("{} got non-contiguous entry {} from {}", self.id, index, from);
                        break;
                    }
                    self.log.append(entry);
                    self.mark_unstable(index);
                }
            }
            last_new = index;
        }

        if args.leader_commit > self.commit_index {
            let new_commit = args.leader_commit.min(last_new);
            if new_commit > self.commit_index {
                self.commit_index = new_commit;
                debug!("{} advanced commit_index to {}", self.id, new_commit);
            }
        }

        self.send(
            from,
            RaftMessage::AppendEntriesResponse(AppendEntriesReply {
                term: self.current_term,
                success: true,
                match_index: last_new,
            }),
        );
    }

    /// Highest index that may still match the leader, skipping back over
    /// the whole conflicting term.
    fn conflict_hint(&self, prev_log_index: u64) -> u64 {
        match self.log.term_at(prev_log_index) {
            None => self.log.last_index(),
            Some(conflict_term) => {
                let mut i = prev_log_index.saturating_sub(1);
                while i > self.commit_index && self.log.term_at(i) == Some(conflict_term) {
                    i -= 1;
                }
                i
            }
        }
    }

    fn handle_append_response(&mut self, from: NodeId, reply: AppendEntriesReply) {
        if self.role != Role::Leader || reply.term != self.current_term {
            return;
        }
        self.recent_active.insert(from.clone());

        let matched = self.match_index.get(&from).copied().unwrap_or(0);
        let next = self.next_index.get(&from).copied().unwrap_or(1);

        if reply.success {
            let matched = matched.max(reply.match_index);
            self.match_index.insert(from.clone(), matched);
            self.next_index.insert(from.clone(), next.max(matched + 1));
            self.maybe_commit();
            if matched < self.log.last_index() {
                self.send_append(&from);
            }
        } else {
            let backed_off = next.saturating_sub(1).min(reply.match_index + 1).max(matched + 1).max(1);
            self.next_index.insert(from.clone(), backed_off);
            debug!("{} rewinds next_index for {} to {}", self.id, from, backed_off);
            self.send_append(&from);
        }
    }

    fn campaign(&mut self) {
        self.role = Role::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id.clone());
        self.leader_id = None;
        self.votes.clear();
        self.votes.insert(self.id.clone());
        self.reset_election_timer();

        info!("{} starts election for term {}", self.id, self.current_term);
        tracing::info!(target: "consensus", "EVENT:ELECTION node={} term={}", self.id, self.current_term);

        if self.votes.len() >= self.quorum() {
            self.become_leader();
            return;
        }

        let args = RequestVoteArgs {
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        for peer in self.peers.clone() {
            self.send(peer, RaftMessage::RequestVote(args.clone()));
        }
    }

    fn become_follower(&mut self, term: u64, leader: Option<NodeId>) {
        let previous = self.role;
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
        }
        self.role = Role::Follower;
        self.leader_id = leader;
        self.votes.clear();
        self.recent_active.clear();
        self.reset_election_timer();
        if previous != Role::Follower {
            info!("{} becomes follower in term {} (was {})", self.id, self.current_term, previous);
        }
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = Some(self.id.clone());
        self.heartbeat_elapsed = 0;
        self.quorum_elapsed = 0;
        self.recent_active.clear();

        let next = self.log.last_index() + 1;
        self.next_index = self.peers.iter().map(|p| (p.clone(), next)).collect();
        self.match_index = self.peers.iter().map(|p| (p.clone(), 0)).collect();

        info!("👑 {} elected leader for term {}", self.id, self.current_term);
        tracing::info!(target: "consensus", "EVENT:LEADER node={} term={}", self.id, self.current_term);

        let index = self.log.last_index() + 1;
        self.log.append(LogEntry::noop(self.current_term, index));
        self.mark_unstable(index);

        self.maybe_commit();
        self.broadcast_append();
    }

    fn maybe_commit(&mut self) {
        let quorum = self.quorum();
        let mut n = self.log.last_index();
        while n > self.commit_index {
            // Only entries from the current term are committed by counting.
            if self.log.term_at(n) != Some(self.current_term) {
                break;
            }
            let replicated = 1 + self
                .peers
                .iter()
                .filter(|p| self.match_index.get(*p).copied().unwrap_or(0) >= n)
                .count();
            if replicated >= quorum {
                self.commit_index = n;
                tracing::info!(target: "consensus", "EVENT:COMMIT node={} term={} index={} replicas={}", self.id, self.current_term, n, replicated);
                return;
            }
            n -= 1;
        }
    }

    fn broadcast_append(&mut self) {
        for peer in self.peers.clone() {
            self.send_append(&peer);
        }
    }

    fn send_append(&mut self, peer: &NodeId) {
        let next = self.next_index.get(peer).copied().unwrap_or(self.log.last_index() + 1);
        let prev_log_index = next - 1;
        let prev_log_term = self.log.term_at(prev_log_index).unwrap_or(0);
        let entries = self.log.entries_from(next, self.config.max_entries_per_message);
        let args = AppendEntriesArgs {
            term: self.current_term,
            leader_id: self.id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
        };
        self.send(peer.clone(), RaftMessage::AppendEntries(args));
    }

    fn send(&mut self, to: NodeId, message: RaftMessage) {
        self.outbox.push(Envelope {
            from: self.id.clone(),
            to,
            message,
        });
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        self.randomized_timeout = self
            .rng
            .gen_range(self.config.election_timeout_min..=self.config.election_timeout_max);
    }

    fn mark_unstable(&mut self, index: u64) {
        self.unstable_from = Some(self.unstable_from.map_or(index, |u| u.min(index)));
    }

    fn mark_truncated(&mut self, index: u64) {
        self.truncated_from = Some(self.truncated_from.map_or(index, |t| t.min(index)));
        self.mark_unstable(index);
    }
}

/// Per-node seed so members sharing a configured seed still draw
/// different timeouts.
fn mix_seed(seed: u64, id: &NodeId) -> u64 {
    id.as_str()
        .bytes()
        .fold(seed ^ 0x9e37_79b9_7f4a_7c15, |acc, b| acc.rotate_left(5).wrapping_mul(31).wrapping_add(b as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::env::{CommandKind, EntryPayload};

    fn cfg() -> RaftConfig {
        RaftConfig {
            election_timeout_min: 10,
            election_timeout_max: 20,
            heartbeat_interval: 3,
            max_entries_per_message: 16,
            check_quorum: true,
            seed: Some(7),
        }
    }

    fn ids(n: usize) -> Vec<NodeId> {
        (1..=n).map(|i| NodeId(format!("n{}", i))).collect()
    }

    fn node(id: &str, n: usize) -> RaftNode {
        RaftNode::new(NodeId::from(id), ids(n), cfg()).unwrap()
    }

    fn env(from: &str, to: &str, message: RaftMessage) -> Envelope {
        Envelope { from: NodeId::from(from), to: NodeId::from(to), message }
    }

    fn cmd(key: &str) -> Command {
        Command::new(CommandKind::Chat, key, b"hello".to_vec())
    }

    fn tick_until_candidate(node: &mut RaftNode) {
        for _ in 0..=cfg().election_timeout_max {
            node.tick();
            if node.role() == Role::Candidate {
                return;
            }
        }
        panic!("node never started an election");
    }

    fn elect(node: &mut RaftNode) {
        tick_until_candidate(node);
        let term = node.term();
        let me = node.id().as_str().to_string();
        for peer in node.peers().to_vec() {
            let _ = node.step(env(
                peer.as_str(),
                &me,
                RaftMessage::RequestVoteResponse(RequestVoteReply { term, vote_granted: true }),
            ));
            if node.is_leader() {
                return;
            }
        }
        panic!("node did not become leader");
    }

    fn ack(node: &mut RaftNode, from: &str, match_index: u64) {
        let term = node.term();
        let me = node.id().as_str().to_string();
        node.step(env(
            from,
            &me,
            RaftMessage::AppendEntriesResponse(AppendEntriesReply { term, success: true, match_index }),
        ))
        .unwrap();
    }

    #[test]
    fn quorum_for_3_node_cluster() {
        assert_eq!(node("n1", 3).quorum(), 2);
        assert_eq!(node("n1", 5).quorum(), 3);
        assert_eq!(node("n1", 4).quorum(), 3);
    }

    #[test]
    fn single_node_wins_election_immediately() {
        let mut n = node("n1", 1);
        tick_until_leader_alone(&mut n);
        assert!(n.is_leader());
        let ready = n.ready();
        assert_eq!(ready.committed.len(), 1);
        assert_eq!(ready.committed[0].payload, EntryPayload::Noop);
        assert!(ready.messages.is_empty());

        let idx = n.propose(cmd("solo")).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(n.commit_index(), 2);
    }

    #[test]
    fn seal_markers_replicate_like_commands() {
        let mut follower = node("n2", 3);
        assert!(matches!(follower.propose_seal(1, 4), Err(ConsensusError::NotLeader { .. })));

        let mut n = node("n1", 3);
        elect(&mut n);
        n.ready();
        let idx = n.propose_seal(1, 4).unwrap();
        assert_eq!(n.log().entry(idx).map(|e| e.payload.clone()), Some(EntryPayload::Seal { start_seq: 1, end_seq: 4 }));

        ack(&mut n, "n2", idx);
        let ready = n.ready();
        assert_eq!(ready.committed.last().map(|e| e.index), Some(idx));
        assert_eq!(ready.committed.last().and_then(|e| e.as_command()), None);
    }

    fn tick_until_leader_alone(n: &mut RaftNode) {
        for _ in 0..=cfg().election_timeout_max {
            n.tick();
            if n.is_leader() {
                return;
            }
        }
    }

    #[test]
    fn follower_campaigns_after_timeout() {
        let mut n = node("n1", 3);
        for _ in 0..cfg().election_timeout_min - 1 {
            n.tick();
        }
        assert_eq!(n.role(), Role::Follower);
        tick_until_candidate(&mut n);
        assert_eq!(n.term(), 1);
        assert_eq!(n.voted_for(), Some(&NodeId::from("n1")));

        let ready = n.ready();
        assert_eq!(ready.hard_state.as_ref().map(|h| h.current_term), Some(1));
        let votes: Vec<_> = ready
            .messages
            .iter()
            .filter(|m| matches!(m.message, RaftMessage::RequestVote(_)))
            .collect();
        assert_eq!(votes.len(), 2);
    }

    #[test]
    fn reject_vote_for_lower_term() {
        let mut n = node("n1", 3);
        elect(&mut n);
        let term = n.term();
        n.ready();

        n.step(env(
            "n2",
            "n1",
            RaftMessage::RequestVote(RequestVoteArgs {
                term: term - 1,
                candidate_id: NodeId::from("n2"),
                last_log_index: 10,
                last_log_term: 10,
            }),
        ))
        .unwrap();

        let ready = n.ready();
        let reply = ready.messages.iter().find_map(|m| match &m.message {
            RaftMessage::RequestVoteResponse(r) => Some(r.clone()),
            _ => None,
        });
        assert_eq!(reply, Some(RequestVoteReply { term, vote_granted: false }));
        assert!(n.is_leader());
    }

    #[test]
    fn grants_at_most_one_vote_per_term() {
        let mut n = node("n1", 3);
        let ask = |candidate: &str| {
            env(
                candidate,
                "n1",
                RaftMessage::RequestVote(RequestVoteArgs {
                    term: 1,
                    candidate_id: NodeId::from(candidate),
                    last_log_index: 0,
                    last_log_term: 0,
                }),
            )
        };
        n.step(ask("n2")).unwrap();
        n.step(ask("n3")).unwrap();
        n.step(ask("n2")).unwrap();

        let grants: Vec<(String, bool)> = n
            .ready()
            .messages
            .into_iter()
            .filter_map(|m| match m.message {
                RaftMessage::RequestVoteResponse(r) => Some((m.to.0, r.vote_granted)),
                _ => None,
            })
            .collect();
        assert_eq!(
            grants,
            vec![("n2".to_string(), true), ("n3".to_string(), false), ("n2".to_string(), true)]
        );
        assert_eq!(n.voted_for(), Some(&NodeId::from("n2")));
    }

    #[test]
    fn reject_vote_for_stale_log() {
        let log = vec![LogEntry::noop(1, 1), LogEntry::noop(2, 2)];
        let hs = HardState { current_term: 2, voted_for: None };
        let mut n = RaftNode::restore(NodeId::from("n1"), ids(3), cfg(), hs, log).unwrap();

        n.step(env(
            "n2",
            "n1",
            RaftMessage::RequestVote(RequestVoteArgs {
                term: 3,
                candidate_id: NodeId::from("n2"),
                last_log_index: 5,
                last_log_term: 1,
            }),
        ))
        .unwrap();

        assert_eq!(n.term(), 3);
        assert_eq!(n.voted_for(), None);
    }

    #[test]
    fn new_leader_appends_noop_and_heartbeats() {
        let mut n = node("n1", 3);
        elect(&mut n);
        let ready = n.ready();
        assert_eq!(ready.entries.len(), 1);
        assert_eq!(ready.entries[0].payload, EntryPayload::Noop);
        assert_eq!(ready.entries[0].term, n.term());
        let appends = ready
            .messages
            .iter()
            .filter(|m| matches!(m.message, RaftMessage::AppendEntries(_)))
            .count();
        assert_eq!(appends, 2);
    }

    #[test]
    fn cannot_commit_entries_from_previous_term() {
        let log = vec![LogEntry::command(1, 1, cmd("old"))];
        let hs = HardState { current_term: 1, voted_for: None };
        let mut n = RaftNode::restore(NodeId::from("n1"), ids(3), cfg(), hs, log).unwrap();
        elect(&mut n);
        assert_eq!(n.term(), 2);

        // n2 holds the term-1 entry only: a majority has it, but it is not
        // from the current term.
        ack(&mut n, "n2", 1);
        assert_eq!(n.commit_index(), 0);

        ack(&mut n, "n2", 2);
        assert_eq!(n.commit_index(), 2);
        let committed = n.ready().committed;
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].idempotency_key(), Some("old"));
    }

    #[test]
    fn append_entries_truncates_conflicting_entries() {
        let log = vec![LogEntry::noop(1, 1), LogEntry::command(1, 2, cmd("a")), LogEntry::command(1, 3, cmd("b"))];
        let hs = HardState { current_term: 1, voted_for: None };
        let mut n = RaftNode::restore(NodeId::from("n1"), ids(3), cfg(), hs, log).unwrap();

        n.step(env(
            "n2",
            "n1",
            RaftMessage::AppendEntries(AppendEntriesArgs {
                term: 2,
                leader_id: NodeId::from("n2"),
                prev_log_index: 1,
                prev_log_term: 1,
                entries: vec![LogEntry::noop(2, 2)],
                leader_commit: 2,
            }),
        ))
        .unwrap();

        assert_eq!(n.log().last_index(), 2);
        assert_eq!(n.log().term_at(2), Some(2));
        assert_eq!(n.commit_index(), 2);
        assert_eq!(n.leader_id(), Some(&NodeId::from("n2")));

        let ready = n.ready();
        assert_eq!(ready.truncate_from, Some(2));
        assert_eq!(ready.entries, vec![LogEntry::noop(2, 2)]);
        let reply = ready.messages.iter().find_map(|m| match &m.message {
            RaftMessage::AppendEntriesResponse(r) => Some(r.clone()),
            _ => None,
        });
        assert_eq!(reply, Some(AppendEntriesReply { term: 2, success: true, match_index: 2 }));
    }

    #[test]
    fn mismatch_reply_carries_conflict_hint() {
        let mut n = node("n1", 3);
        n.step(env(
            "n2",
            "n1",
            RaftMessage::AppendEntries(AppendEntriesArgs {
                term: 1,
                leader_id: NodeId::from("n2"),
                prev_log_index: 7,
                prev_log_term: 1,
                entries: vec![],
                leader_commit: 0,
            }),
        ))
        .unwrap();
        let reply = n.ready().messages.into_iter().find_map(|m| match m.message {
            RaftMessage::AppendEntriesResponse(r) => Some(r),
            _ => None,
        });
        assert_eq!(reply, Some(AppendEntriesReply { term: 1, success: false, match_index: 0 }));
    }

    #[test]
    fn failure_response_decrements_next_index() {
        let mut n = node("n1", 3);
        elect(&mut n);
        for i in 0..5 {
            n.propose(cmd(&format!("k{}", i))).unwrap();
        }
        n.ready();
        let term = n.term();

        n.step(env(
            "n2",
            "n1",
            RaftMessage::AppendEntriesResponse(AppendEntriesReply { term, success: false, match_index: 0 }),
        ))
        .unwrap();

        let retry = n.ready().messages.into_iter().find_map(|m| match m.message {
            RaftMessage::AppendEntries(a) if m.to.as_str() == "n2" => Some(a),
            _ => None,
        });
        let retry = retry.expect("leader retries n2");
        assert_eq!(retry.prev_log_index, 0);
        assert_eq!(retry.entries.len(), 6);
    }

    #[test]
    fn propose_on_follower_returns_not_leader() {
        let mut n = node("n2", 3);
        n.step(env(
            "n1",
            "n2",
            RaftMessage::AppendEntries(AppendEntriesArgs {
                term: 1,
                leader_id: NodeId::from("n1"),
                prev_log_index: 0,
                prev_log_term: 0,
                entries: vec![],
                leader_commit: 0,
            }),
        ))
        .unwrap();
        match n.propose(cmd("x")) {
            Err(ConsensusError::NotLeader { leader }) => assert_eq!(leader, Some(NodeId::from("n1"))),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn higher_term_reply_forces_step_down() {
        let mut n = node("n1", 3);
        elect(&mut n);
        let term = n.term();
        n.step(env(
            "n3",
            "n1",
            RaftMessage::AppendEntriesResponse(AppendEntriesReply { term: term + 3, success: false, match_index: 0 }),
        ))
        .unwrap();
        assert_eq!(n.role(), Role::Follower);
        assert_eq!(n.term(), term + 3);
        assert_eq!(n.voted_for(), None);
        assert_eq!(n.leader_id(), None);
    }

    #[test]
    fn leader_steps_down_without_quorum() {
        let mut n = node("n1", 3);
        elect(&mut n);
        for _ in 0..cfg().election_timeout_max {
            n.tick();
        }
        assert_eq!(n.role(), Role::Follower);
    }

    #[test]
    fn leader_with_acks_keeps_leadership() {
        let mut n = node("n1", 3);
        elect(&mut n);
        for _ in 0..(cfg().election_timeout_max * 3) {
            n.tick();
            if n.role() == Role::Leader {
                ack(&mut n, "n2", 0);
            }
        }
        assert!(n.is_leader());
    }

    #[test]
    fn committed_entries_are_handed_out_once() {
        let mut n = node("n1", 3);
        elect(&mut n);
        n.propose(cmd("a")).unwrap();
        ack(&mut n, "n2", 2);
        let first = n.ready().committed;
        assert_eq!(first.iter().map(|e| e.index).collect::<Vec<_>>(), vec![1, 2]);
        ack(&mut n, "n2", 2);
        assert!(n.ready().committed.is_empty());
        assert_eq!(n.last_applied(), 2);
    }

    #[test]
    fn rejects_unknown_and_misrouted_messages() {
        let mut n = node("n1", 3);
        let msg = RaftMessage::RequestVoteResponse(RequestVoteReply { term: 1, vote_granted: true });
        assert!(matches!(n.step(env("n9", "n1", msg.clone())), Err(ConsensusError::UnknownPeer(_))));
        assert!(matches!(n.step(env("n2", "n3", msg)), Err(ConsensusError::Misrouted { .. })));
    }

    #[test]
    fn restore_rejects_gapped_log() {
        let log = vec![LogEntry::noop(1, 1), LogEntry::noop(1, 3)];
        assert!(RaftNode::restore(NodeId::from("n1"), ids(3), cfg(), HardState::default(), log).is_err());
    }
}
