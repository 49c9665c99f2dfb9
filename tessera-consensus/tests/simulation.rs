//! Deterministic cluster simulation over the pure Raft state machine.
//!
//! Each run is driven by a seeded RNG: message order, drops, crashes and
//! client proposals are all reproducible. After every step the harness
//! checks election safety, state-machine safety and leader completeness;
//! log matching is checked at the end of each run.

use std::collections::{BTreeMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tessera_common::env::{Command, CommandKind, LogEntry};
use tessera_common::NodeId;
use tessera_consensus::storage::{persist_ready, MemoryStorage};
use tessera_consensus::{Envelope, RaftConfig, RaftNode, RaftStorage};

const MIN_TIMEOUT: u64 = 10;
const MAX_TIMEOUT: u64 = 20;

fn config(seed: u64, min: u64, max: u64, heartbeat: u64) -> RaftConfig {
    RaftConfig {
        election_timeout_min: min,
        election_timeout_max: max,
        heartbeat_interval: heartbeat,
        max_entries_per_message: 8,
        check_quorum: true,
        seed: Some(seed),
    }
}

struct Sim {
    rng: StdRng,
    config: RaftConfig,
    members: Vec<NodeId>,
    nodes: BTreeMap<NodeId, RaftNode>,
    storage: BTreeMap<NodeId, MemoryStorage>,
    inflight: Vec<Envelope>,
    blocked: HashSet<(NodeId, NodeId)>,
    drop_rate: f64,
    committed: BTreeMap<u64, LogEntry>,
    leaders: BTreeMap<u64, NodeId>,
    next_key: u64,
}

impl Sim {
    fn new(size: usize, seed: u64, config: RaftConfig) -> Self {
        let members: Vec<NodeId> = (1..=size).map(|i| NodeId(format!("n{}", i))).collect();
        let mut nodes = BTreeMap::new();
        let mut storage = BTreeMap::new();
        for id in &members {
            nodes.insert(id.clone(), RaftNode::new(id.clone(), members.clone(), config.clone()).unwrap());
            storage.insert(id.clone(), MemoryStorage::new());
        }
        Self {
            rng: StdRng::seed_from_u64(seed),
            config,
            members,
            nodes,
            storage,
            inflight: Vec::new(),
            blocked: HashSet::new(),
            drop_rate: 0.0,
            committed: BTreeMap::new(),
            leaders: BTreeMap::new(),
            next_key: 0,
        }
    }

    fn process_ready(&mut self, id: &NodeId) {
        let Some(node) = self.nodes.get_mut(id) else { return };
        let ready = node.ready();
        let storage = self.storage.get_mut(id).unwrap();
        persist_ready(storage, &ready).unwrap();

        for entry in ready.committed {
            match self.committed.get(&entry.index) {
                Some(existing) => assert_eq!(existing, &entry, "two different entries applied at index {}", entry.index),
                None => {
                    self.committed.insert(entry.index, entry);
                }
            }
        }
        self.inflight.extend(ready.messages);

        let node = &self.nodes[id];
        if node.is_leader() {
            let term = node.term();
            match self.leaders.get(&term) {
                Some(existing) => assert_eq!(existing, id, "two leaders in term {}", term),
                None => {
                    for (index, entry) in &self.committed {
                        assert_eq!(
                            node.log().entry(*index),
                            Some(entry),
                            "leader {} of term {} is missing committed index {}",
                            id,
                            term,
                            index
                        );
                    }
                    self.leaders.insert(term, id.clone());
                }
            }
        }
    }

    fn tick(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for id in &ids {
            self.nodes.get_mut(id).unwrap().tick();
            self.process_ready(id);
        }
        self.deliver();
    }

    fn deliver(&mut self) {
        let mut batch = std::mem::take(&mut self.inflight);
        batch.shuffle(&mut self.rng);
        for envelope in batch {
            if self.blocked.contains(&(envelope.from.clone(), envelope.to.clone())) {
                continue;
            }
            if self.drop_rate > 0.0 && self.rng.gen_bool(self.drop_rate) {
                continue;
            }
            let to = envelope.to.clone();
            let Some(node) = self.nodes.get_mut(&to) else { continue };
            node.step(envelope).unwrap();
            self.process_ready(&to);
        }
    }

    fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    fn leader(&self) -> Option<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.is_leader())
            .max_by_key(|n| n.term())
            .map(|n| n.id().clone())
    }

    fn propose_via(&mut self, id: &NodeId) -> Option<u64> {
        self.next_key += 1;
        let command = Command::new(CommandKind::Chat, format!("k-{}", self.next_key), b"msg".to_vec());
        let index = self.nodes.get_mut(id)?.propose(command).ok()?;
        self.process_ready(id);
        Some(index)
    }

    fn propose(&mut self) -> Option<u64> {
        let leader = self.leader()?;
        self.propose_via(&leader)
    }

    fn crash(&mut self, id: &NodeId) {
        self.nodes.remove(id);
    }

    fn restart(&mut self, id: &NodeId) {
        let storage = &self.storage[id];
        let node = RaftNode::restore(
            id.clone(),
            self.members.clone(),
            self.config.clone(),
            storage.load_hard_state().unwrap(),
            storage.load_log().unwrap(),
        )
        .unwrap();
        self.nodes.insert(id.clone(), node);
    }

    fn partition(&mut self, minority: &[NodeId]) {
        for a in minority {
            for b in &self.members {
                if !minority.contains(b) {
                    self.blocked.insert((a.clone(), b.clone()));
                    self.blocked.insert((b.clone(), a.clone()));
                }
            }
        }
    }

    fn heal(&mut self) {
        self.blocked.clear();
    }

    fn run_until_leader(&mut self, limit: u64) -> Option<(NodeId, u64)> {
        for t in 1..=limit {
            self.tick();
            if let Some(leader) = self.leader() {
                return Some((leader, t));
            }
        }
        None
    }

    fn assert_log_matching(&self) {
        let nodes: Vec<&RaftNode> = self.nodes.values().collect();
        for (i, a) in nodes.iter().enumerate() {
            for b in nodes.iter().skip(i + 1) {
                let upto = a.log().last_index().min(b.log().last_index());
                for index in (1..=upto).rev() {
                    if a.log().term_at(index) == b.log().term_at(index) {
                        assert_eq!(
                            a.log().slice(1, index),
                            b.log().slice(1, index),
                            "logs of {} and {} share ({}, term) but differ before it",
                            a.id(),
                            b.id(),
                            index
                        );
                        break;
                    }
                }
            }
        }
    }
}

#[test]
fn elects_exactly_one_leader_in_a_quiet_cluster() {
    for seed in 0..10 {
        let mut sim = Sim::new(3, seed, config(seed, MIN_TIMEOUT, MAX_TIMEOUT, 3));
        let (leader, _) = sim.run_until_leader(10 * MAX_TIMEOUT).expect("a leader is elected");
        sim.run(5 * MAX_TIMEOUT);
        assert_eq!(sim.leader(), Some(leader.clone()), "seed {}: leadership should be stable", seed);
        let leaders = sim.nodes.values().filter(|n| n.is_leader()).count();
        assert_eq!(leaders, 1);
    }
}

#[test]
fn safety_holds_under_drops_crashes_and_restarts() {
    for seed in 0..12 {
        let mut sim = Sim::new(5, seed, config(seed, MIN_TIMEOUT, MAX_TIMEOUT, 3));
        sim.drop_rate = 0.05;
        let mut down: Option<NodeId> = None;

        for tick in 0..1500u64 {
            sim.tick();
            if sim.rng.gen_bool(0.2) {
                sim.propose();
            }
            if tick % 150 == 75 {
                match down.take() {
                    Some(id) => sim.restart(&id),
                    None => {
                        let victim = sim.members[sim.rng.gen_range(0..sim.members.len())].clone();
                        sim.crash(&victim);
                        down = Some(victim);
                    }
                }
            }
        }
        if let Some(id) = down {
            sim.restart(&id);
        }
        sim.drop_rate = 0.0;
        sim.run(10 * MAX_TIMEOUT);
        sim.assert_log_matching();
        assert!(!sim.committed.is_empty(), "seed {}: cluster made no progress", seed);
    }
}

#[test]
fn killed_leader_is_replaced_within_two_election_timeouts() {
    let (min, max) = (50, 150);
    for seed in 0..5 {
        let mut sim = Sim::new(3, seed, config(seed, min, max, 5));
        let (old_leader, _) = sim.run_until_leader(10 * max).expect("initial leader");
        sim.run(2 * 5);
        sim.crash(&old_leader);

        let (new_leader, elapsed) = sim.run_until_leader(10 * max).expect("replacement leader");
        assert_ne!(new_leader, old_leader);
        assert!(elapsed <= 2 * max, "seed {}: took {} ticks to replace the leader", seed, elapsed);
    }
}

#[test]
fn committed_entries_survive_leader_crash() {
    let mut sim = Sim::new(3, 42, config(42, MIN_TIMEOUT, MAX_TIMEOUT, 3));
    let (leader, _) = sim.run_until_leader(10 * MAX_TIMEOUT).unwrap();
    for _ in 0..5 {
        sim.propose_via(&leader).unwrap();
    }
    sim.run(3 * MAX_TIMEOUT);
    let committed_before: Vec<u64> = sim.committed.keys().copied().collect();
    assert!(committed_before.len() >= 6, "noop plus five commands should commit");

    sim.crash(&leader);
    let (new_leader, _) = sim.run_until_leader(10 * MAX_TIMEOUT).unwrap();
    let log = sim.nodes[&new_leader].log();
    for index in committed_before {
        assert_eq!(log.entry(index), sim.committed.get(&index));
    }
}

#[test]
fn minority_partition_cannot_commit_and_rejoins_cleanly() {
    let mut sim = Sim::new(5, 7, config(7, MIN_TIMEOUT, MAX_TIMEOUT, 3));
    let (old_leader, _) = sim.run_until_leader(10 * MAX_TIMEOUT).unwrap();
    sim.run(MAX_TIMEOUT);
    let old_term = sim.nodes[&old_leader].term();

    let buddy = sim.members.iter().find(|m| **m != old_leader).unwrap().clone();
    let minority = vec![old_leader.clone(), buddy.clone()];
    sim.partition(&minority);

    let stranded = sim.propose_via(&old_leader).expect("old leader still accepts proposals");
    let committed_before = sim.committed.len();

    sim.run(4 * MAX_TIMEOUT);
    assert!(
        sim.nodes[&old_leader].commit_index() < stranded,
        "minority leader must not commit its proposal"
    );
    assert!(!sim.nodes[&old_leader].is_leader(), "check-quorum steps the stranded leader down");

    let majority_leader = sim
        .nodes
        .values()
        .filter(|n| n.is_leader() && !minority.contains(n.id()))
        .map(|n| n.id().clone())
        .next()
        .expect("majority side elects a leader");
    assert!(sim.nodes[&majority_leader].term() > old_term);
    for _ in 0..3 {
        sim.propose_via(&majority_leader).unwrap();
    }
    sim.run(2 * MAX_TIMEOUT);
    assert!(sim.committed.len() > committed_before);

    sim.heal();
    let mut converged = false;
    for _ in 0..50 {
        sim.run(MAX_TIMEOUT);
        let commits: HashSet<u64> = sim.nodes.values().map(|n| n.commit_index()).collect();
        if sim.leader().is_some() && commits.len() == 1 {
            converged = true;
            break;
        }
    }
    assert!(converged, "cluster did not converge after healing");
    sim.assert_log_matching();

    for id in &minority {
        let node = &sim.nodes[id];
        let key_at_stranded = node.log().entry(stranded).and_then(|e| e.idempotency_key());
        assert_ne!(key_at_stranded, Some("k-1"), "{} kept the uncommitted entry", id);
    }
}
