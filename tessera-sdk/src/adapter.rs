use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tessera_common::env::{ClusterStatus, Command, SubmitReply, TxResult};
use tessera_common::{ErrorCode, NodeId};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::client::{HttpNodeClient, NodeClient};
use crate::error::{ClientError, ClusterError};

/// Bounded retries with exponential backoff between attempts.
///
/// The wait comes before each retry, never after the last attempt: with
/// the defaults a failing submit makes 3 attempts and waits 100ms then
/// 200ms. Raising `max_attempts` continues the series (400ms, 800ms...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based): 100ms, 200ms, 400ms...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(self.multiplier.saturating_pow(retry))
    }

    /// Every wait a request that never succeeds goes through, in order.
    pub fn waits(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|retry| self.backoff(retry))
    }
}

/// Codes a node answers with when it cannot serve anyone: a halted
/// evidence chain or an internal failure. Another node may still be fine.
fn node_unhealthy(code: ErrorCode) -> bool {
    matches!(code, ErrorCode::ChainCorruption | ErrorCode::Internal)
}

/// What the adapter believes about the current leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderHint {
    pub node_id: Option<NodeId>,
    pub endpoint: String,
    pub term: u64,
}

/// Cluster-aware client. Holds its own leader cache, so several adapters
/// can coexist in one process.
pub struct ClusterAdapter<C: NodeClient = HttpNodeClient> {
    endpoints: Vec<String>,
    client: C,
    policy: RetryPolicy,
    leader: RwLock<Option<LeaderHint>>,
    cursor: AtomicUsize,
}

impl ClusterAdapter<HttpNodeClient> {
    pub fn new(endpoints: Vec<String>) -> Result<Self, ClusterError> {
        let client = HttpNodeClient::new(HttpNodeClient::DEFAULT_TIMEOUT).map_err(|e| ClusterError::Setup(e.to_string()))?;
        Self::with_client(endpoints, client, RetryPolicy::default())
    }
}

impl<C: NodeClient> ClusterAdapter<C> {
    pub fn with_client(endpoints: Vec<String>, client: C, policy: RetryPolicy) -> Result<Self, ClusterError> {
        if endpoints.is_empty() {
            return Err(ClusterError::NoEndpoints);
        }
        Ok(Self {
            endpoints,
            client,
            policy,
            leader: RwLock::new(None),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub async fn cached_leader(&self) -> Option<LeaderHint> {
        self.leader.read().await.clone()
    }

    /// Submits `command` and returns the node's result.
    ///
    /// Duplicate and validation results come back as-is on the first
    /// answer. Redirects, `NOT_LEADER`, timeouts and unreachable nodes are
    /// retried within the policy. A node that reports itself halted is
    /// dropped from the cache and the next one is tried.
    pub async fn submit(&self, command: &Command) -> Result<TxResult, ClusterError> {
        let mut last_error = String::from("no attempt made");
        let mut waits = self.policy.waits();

        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                if let Some(wait) = waits.next() {
                    tokio::time::sleep(wait).await;
                }
            }
            let endpoint = self.target().await;
            debug!("submit '{}' attempt {} -> {}", command.idempotency_key, attempt + 1, endpoint);

            match self.client.submit(&endpoint, command).await {
                Ok(SubmitReply::Result(result)) => match result.error_code {
                    Some(code) if code.is_transient() => {
                        last_error = format!("{}: {}", code, result.error_message.unwrap_or_default());
                        self.forget(&endpoint).await;
                    }
                    Some(code) if node_unhealthy(code) => {
                        last_error = format!("{} {}: {}", endpoint, code, result.error_message.unwrap_or_default());
                        self.skip(&endpoint).await;
                    }
                    _ => {
                        self.remember(LeaderHint {
                            node_id: Some(result.leader_node_id.clone()),
                            endpoint,
                            term: result.leader_term,
                        })
                        .await;
                        return Ok(result);
                    }
                },
                Ok(SubmitReply::Redirect {
                    leader_id,
                    leader_endpoint,
                    term,
                }) => {
                    last_error = format!("{} redirected (term {})", endpoint, term);
                    self.forget(&endpoint).await;
                    if let Some(leader_endpoint) = leader_endpoint {
                        self.remember(LeaderHint {
                            node_id: leader_id,
                            endpoint: leader_endpoint,
                            term,
                        })
                        .await;
                    }
                }
                Ok(SubmitReply::Error { code, message }) => {
                    if !code.is_transient() && code != ErrorCode::ClusterUnavailable && !node_unhealthy(code) {
                        return Err(ClusterError::Rejected { code, message });
                    }
                    if node_unhealthy(code) {
                        warn!("{} cannot serve requests ({}): {}", endpoint, code, message);
                    }
                    last_error = format!("{} {}: {}", endpoint, code, message);
                    self.skip(&endpoint).await;
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.on_client_error(&endpoint, &e).await;
                }
            }
        }

        warn!(
            "giving up on '{}' after {} attempts: {}",
            command.idempotency_key, self.policy.max_attempts, last_error
        );
        Err(ClusterError::Unavailable {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// First status answer, cached leader first, then the configured order.
    pub async fn status(&self) -> Result<ClusterStatus, ClusterError> {
        let mut last_error = String::from("no node answered");
        for endpoint in self.discovery_order().await {
            match self.client.status(&endpoint).await {
                Ok(status) => {
                    self.learn(&status).await;
                    return Ok(status);
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(ClusterError::Unavailable {
            attempts: self.endpoints.len() as u32,
            last_error,
        })
    }

    /// Asks nodes for their view until one names a leader.
    pub async fn discover_leader(&self) -> Option<LeaderHint> {
        for endpoint in self.discovery_order().await {
            match self.client.status(&endpoint).await {
                Ok(status) => {
                    if let Some(hint) = self.learn(&status).await {
                        return Some(hint);
                    }
                }
                Err(e) => debug!("status from {} failed: {}", endpoint, e),
            }
        }
        None
    }

    async fn target(&self) -> String {
        if let Some(hint) = self.leader.read().await.as_ref() {
            return hint.endpoint.clone();
        }
        match self.discover_leader().await {
            Some(hint) => hint.endpoint,
            // Any node will redirect us.
            None => self.endpoints[self.cursor.load(Ordering::Relaxed) % self.endpoints.len()].clone(),
        }
    }

    async fn discovery_order(&self) -> Vec<String> {
        let start = self.cursor.load(Ordering::Relaxed);
        let mut order = Vec::with_capacity(self.endpoints.len() + 1);
        if let Some(hint) = self.leader.read().await.as_ref() {
            order.push(hint.endpoint.clone());
        }
        for i in 0..self.endpoints.len() {
            let endpoint = &self.endpoints[(start + i) % self.endpoints.len()];
            if !order.contains(endpoint) {
                order.push(endpoint.clone());
            }
        }
        order
    }

    async fn learn(&self, status: &ClusterStatus) -> Option<LeaderHint> {
        let endpoint = status.leader_endpoint.clone()?;
        let hint = LeaderHint {
            node_id: status.leader_node_id.clone(),
            endpoint,
            term: status.current_term,
        };
        self.remember(hint.clone()).await;
        Some(hint)
    }

    /// Keeps the hint unless the cache already holds a newer term.
    async fn remember(&self, hint: LeaderHint) {
        let mut cached = self.leader.write().await;
        match cached.as_ref() {
            Some(current) if current.term > hint.term => {}
            _ => *cached = Some(hint),
        }
    }

    async fn forget(&self, endpoint: &str) {
        let mut cached = self.leader.write().await;
        if cached.as_ref().is_some_and(|h| h.endpoint == endpoint) {
            *cached = None;
        }
    }

    /// Moves the round-robin cursor past `endpoint`.
    fn advance(&self, endpoint: &str) {
        if let Some(pos) = self.endpoints.iter().position(|e| e == endpoint) {
            self.cursor.store((pos + 1) % self.endpoints.len(), Ordering::Relaxed);
        } else {
            self.cursor.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn on_client_error(&self, endpoint: &str, error: &ClientError) {
        debug!("{} failed: {}", endpoint, error);
        self.skip(endpoint).await;
    }

    /// Stops targeting `endpoint` until discovery points back at it.
    async fn skip(&self, endpoint: &str) {
        self.forget(endpoint).await;
        self.advance(endpoint);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tessera_common::env::{CommandKind, NodeInfo};

    use super::*;

    /// Replays canned answers per endpoint and records every submit.
    #[derive(Default)]
    struct Scripted {
        submits: Mutex<HashMap<String, VecDeque<Result<SubmitReply, ClientError>>>>,
        statuses: HashMap<String, ClusterStatus>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn on_submit(self, endpoint: &str, reply: Result<SubmitReply, ClientError>) -> Self {
            self.submits
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        fn with_status(mut self, endpoint: &str, status: ClusterStatus) -> Self {
            self.statuses.insert(endpoint.to_string(), status);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeClient for Scripted {
        async fn submit(&self, endpoint: &str, _command: &Command) -> Result<SubmitReply, ClientError> {
            self.calls.lock().unwrap().push(endpoint.to_string());
            self.submits
                .lock()
                .unwrap()
                .get_mut(endpoint)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Err(ClientError::Timeout(endpoint.to_string())))
        }

        async fn status(&self, endpoint: &str) -> Result<ClusterStatus, ClientError> {
            self.statuses.get(endpoint).cloned().ok_or_else(|| ClientError::Connect {
                endpoint: endpoint.to_string(),
                reason: "refused".into(),
            })
        }
    }

    const N1: &str = "http://n1";
    const N2: &str = "http://n2";
    const N3: &str = "http://n3";

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn adapter(client: &Arc<Scripted>) -> ClusterAdapter<Arc<Scripted>> {
        ClusterAdapter::with_client(vec![N1.into(), N2.into(), N3.into()], Arc::clone(client), fast()).unwrap()
    }

    fn cmd() -> Command {
        Command::new(CommandKind::Bounty, "bounty-7", b"claim".to_vec())
    }

    fn led_by(id: &str, endpoint: &str, term: u64) -> ClusterStatus {
        ClusterStatus {
            reporting_node: NodeId::from(id),
            leader_node_id: Some(NodeId::from(id)),
            leader_endpoint: Some(endpoint.to_string()),
            current_term: term,
            commit_index: 4,
            nodes: vec![NodeInfo {
                node_id: NodeId::from(id),
                endpoint: endpoint.to_string(),
                is_leader: true,
                is_reachable: true,
                last_heartbeat: None,
            }],
        }
    }

    fn committed(leader: &str, term: u64) -> SubmitReply {
        SubmitReply::Result(TxResult::committed(vec!["evt-1".into()], NodeId::from(leader), term, 5))
    }

    #[test]
    fn default_backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        let series: Vec<u64> = (0..3).map(|i| p.backoff(i).as_millis() as u64).collect();
        assert_eq!(series, vec![100, 200, 400]);

        // Only the waits between attempts are taken.
        let waits: Vec<u64> = p.waits().map(|d| d.as_millis() as u64).collect();
        assert_eq!(waits, vec![100, 200]);
        let longer = RetryPolicy { max_attempts: 4, ..p };
        assert_eq!(longer.waits().last(), Some(Duration::from_millis(400)));
        let single = RetryPolicy { max_attempts: 1, ..p };
        assert_eq!(single.waits().count(), 0);
    }

    #[tokio::test]
    async fn failing_submit_waits_between_attempts_only() {
        let client = Arc::new(Scripted::default());
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(20),
            ..RetryPolicy::default()
        };
        let adapter =
            ClusterAdapter::with_client(vec![N1.into(), N2.into(), N3.into()], Arc::clone(&client), policy).unwrap();

        let started = std::time::Instant::now();
        let err = adapter.submit(&cmd()).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, ClusterError::Unavailable { attempts: 3, .. }));
        assert_eq!(client.calls().len(), 3);
        // 20ms + 40ms; an 80ms wait after the last attempt would be wasted.
        assert!(elapsed >= Duration::from_millis(60), "waited {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(140), "waited {:?}", elapsed);
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        assert!(matches!(
            ClusterAdapter::with_client(Vec::new(), Scripted::default(), fast()),
            Err(ClusterError::NoEndpoints)
        ));
    }

    #[tokio::test]
    async fn follows_redirect_and_caches_leader() {
        let client = Arc::new(
            Scripted::default()
                .on_submit(
                    N1,
                    Ok(SubmitReply::Redirect {
                        leader_id: Some(NodeId::from("n2")),
                        leader_endpoint: Some(N2.into()),
                        term: 3,
                    }),
                )
                .on_submit(N2, Ok(committed("n2", 3))),
        );
        let adapter = adapter(&client);

        let result = adapter.submit(&cmd()).await.unwrap();
        assert!(result.committed);
        assert_eq!(client.calls(), vec![N1, N2]);
        assert_eq!(adapter.cached_leader().await.unwrap().endpoint, N2);
    }

    #[tokio::test]
    async fn discovery_goes_straight_to_leader() {
        let client = Arc::new(
            Scripted::default()
                .with_status(N1, led_by("n3", N3, 2))
                .on_submit(N3, Ok(committed("n3", 2))),
        );
        let adapter = adapter(&client);

        adapter.submit(&cmd()).await.unwrap();
        assert_eq!(client.calls(), vec![N3]);
    }

    #[tokio::test]
    async fn duplicate_and_validation_results_are_not_retried() {
        let dup = TxResult::duplicate(vec!["evt-1".into()], NodeId::from("n1"), 2, 9);
        let bad = TxResult::rejected(ErrorCode::ValidationFailed, "empty payload", NodeId::from("n1"), 2, 9);
        let client = Arc::new(
            Scripted::default()
                .with_status(N1, led_by("n1", N1, 2))
                .on_submit(N1, Ok(SubmitReply::Result(dup.clone())))
                .on_submit(N1, Ok(SubmitReply::Result(bad.clone()))),
        );
        let adapter = adapter(&client);

        assert_eq!(adapter.submit(&cmd()).await.unwrap(), dup);
        assert_eq!(adapter.submit(&cmd()).await.unwrap(), bad);
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn not_leader_is_retried_elsewhere() {
        let client = Arc::new(
            Scripted::default()
                .with_status(N1, led_by("n1", N1, 2))
                .on_submit(N1, Ok(SubmitReply::error(ErrorCode::NotLeader, "stepped down")))
                .on_submit(N1, Ok(committed("n1", 3))),
        );
        let adapter = adapter(&client);

        let result = adapter.submit(&cmd()).await.unwrap();
        assert_eq!(result.leader_term, 3);
        assert_eq!(client.calls(), vec![N1, N1]);
    }

    #[tokio::test]
    async fn timeouts_rotate_through_nodes_then_give_up() {
        let client = Arc::new(Scripted::default());
        let adapter = adapter(&client);

        let err = adapter.submit(&cmd()).await.unwrap_err();
        assert!(matches!(err, ClusterError::Unavailable { attempts: 3, .. }));
        assert_eq!(err.code(), ErrorCode::ClusterUnavailable);
        assert_eq!(client.calls(), vec![N1, N2, N3]);
    }

    #[tokio::test]
    async fn halted_node_is_skipped_for_a_healthy_leader() {
        let client = Arc::new(
            Scripted::default()
                .with_status(N2, led_by("n2", N2, 3))
                .on_submit(N1, Ok(SubmitReply::error(ErrorCode::ChainCorruption, "evidence chain halted")))
                .on_submit(N2, Ok(committed("n2", 3)))
                .on_submit(N2, Ok(committed("n2", 3))),
        );
        let adapter = adapter(&client);
        adapter
            .remember(LeaderHint { node_id: Some(NodeId::from("n1")), endpoint: N1.into(), term: 2 })
            .await;

        let result = adapter.submit(&cmd()).await.unwrap();
        assert!(result.committed);
        assert_eq!(client.calls(), vec![N1, N2]);
        assert_eq!(adapter.cached_leader().await.unwrap().endpoint, N2);

        // The halted node is no longer targeted.
        adapter.submit(&cmd()).await.unwrap();
        assert_eq!(client.calls(), vec![N1, N2, N2]);
    }

    #[tokio::test]
    async fn internal_failure_moves_on_to_the_next_node() {
        let client = Arc::new(
            Scripted::default()
                .on_submit(N1, Ok(SubmitReply::error(ErrorCode::Internal, "storage writer stopped")))
                .on_submit(N2, Ok(committed("n2", 4))),
        );
        let adapter = adapter(&client);

        let result = adapter.submit(&cmd()).await.unwrap();
        assert_eq!(result.leader_term, 4);
        assert_eq!(client.calls(), vec![N1, N2]);
    }

    #[tokio::test]
    async fn all_nodes_halted_is_unavailable() {
        let halted = || Ok(SubmitReply::error(ErrorCode::ChainCorruption, "halted"));
        let client = Arc::new(
            Scripted::default()
                .on_submit(N1, halted())
                .on_submit(N2, halted())
                .on_submit(N3, halted()),
        );
        let adapter = adapter(&client);

        let err = adapter.submit(&cmd()).await.unwrap_err();
        assert!(matches!(&err, ClusterError::Unavailable { attempts: 3, last_error } if last_error.contains("CHAIN_CORRUPTION")));
        assert_eq!(client.calls(), vec![N1, N2, N3]);
        assert!(adapter.cached_leader().await.is_none());
    }

    #[tokio::test]
    async fn other_permanent_errors_are_final() {
        let client = Arc::new(
            Scripted::default()
                .with_status(N1, led_by("n1", N1, 2))
                .on_submit(N1, Ok(SubmitReply::error(ErrorCode::ValidationFailed, "unknown kind"))),
        );
        let adapter = adapter(&client);

        let err = adapter.submit(&cmd()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn older_terms_do_not_replace_cached_leader() {
        let client = Arc::new(Scripted::default());
        let adapter = adapter(&client);
        adapter
            .remember(LeaderHint { node_id: Some(NodeId::from("n2")), endpoint: N2.into(), term: 5 })
            .await;
        adapter
            .remember(LeaderHint { node_id: Some(NodeId::from("n1")), endpoint: N1.into(), term: 4 })
            .await;
        assert_eq!(adapter.cached_leader().await.unwrap().endpoint, N2);

        adapter
            .remember(LeaderHint { node_id: Some(NodeId::from("n3")), endpoint: N3.into(), term: 6 })
            .await;
        assert_eq!(adapter.cached_leader().await.unwrap().endpoint, N3);
    }
}
