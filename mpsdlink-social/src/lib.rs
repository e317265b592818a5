use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use mpsdlink_health::{HealthProbe, HealthSample};
use mpsdlink_log::trace_if;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock, Semaphore};

const SOCIAL_BASE: &str = "https://social.xboxlive.com";

/// The minimal capability a [`FriendGraph`] needs from an authenticated
/// identity: its XUID and the authorization header to act as that identity.
#[derive(Debug, Clone)]
pub struct FriendIdentity {
    pub xuid: String,
    pub auth_header: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    Unknown,
    Pending,
    Established,
}

#[derive(Debug, Clone)]
pub enum FriendEvent {
    FriendshipEstablished { from: String, to: String },
    FriendRequestAccepted { identity: String, follower: String },
}

#[derive(Debug, Clone)]
pub struct FriendGraphConfig {
    pub max_concurrent_requests: usize,
    pub request_delay: Duration,
}

impl Default for FriendGraphConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            request_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FollowStatus {
    #[serde(default, rename = "isFollowedByCaller")]
    is_followed_by_caller: bool,
}

/// Maintains a complete directed follow graph across a pool of bot
/// identities so a bidirectional follow (friendship, in Xbox Live's model)
/// exists between every ordered pair.
pub struct FriendGraph {
    client: Client,
    identities: Vec<FriendIdentity>,
    config: FriendGraphConfig,
    edges: RwLock<HashMap<(String, String), EdgeState>>,
    events: broadcast::Sender<FriendEvent>,
}

impl FriendGraph {
    pub fn new(identities: Vec<FriendIdentity>, config: FriendGraphConfig) -> (Arc<Self>, broadcast::Receiver<FriendEvent>) {
        let (tx, rx) = broadcast::channel(128);
        (
            Arc::new(Self {
                client: Client::new(),
                identities,
                config,
                edges: RwLock::new(HashMap::new()),
                events: tx,
            }),
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FriendEvent> {
        self.events.subscribe()
    }

    /// Ensures every ordered pair `(A, B)` of distinct identities is
    /// followed, batched at `max_concurrent_requests` via a semaphore, with
    /// `request_delay` separating batches to respect Xbox Live's soft limit.
    pub async fn establish_all(&self) {
        let pairs = self.ordered_pairs();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));
        let batch_size = self.config.max_concurrent_requests.max(1);

        for batch in pairs.chunks(batch_size) {
            let mut handles = Vec::with_capacity(batch.len());
            for (from, to) in batch.iter().cloned() {
                let semaphore = semaphore.clone();
                let this = self;
                handles.push(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    this.ensure_edge(&from, &to).await;
                });
            }
            futures::future::join_all(handles).await;
            tokio::time::sleep(self.config.request_delay).await;
        }
    }

    /// Clears cached edge state and re-runs [`Self::establish_all`].
    pub async fn refresh(&self) {
        self.edges.write().await.clear();
        self.establish_all().await;
    }

    /// For each identity, finds other identities that follow it but are not
    /// yet followed back, and auto-follows them. Scoped to the closed pool
    /// of configured identities rather than the caller's full follower list.
    pub async fn poll_incoming(&self) {
        let edges_snapshot = self.edges.read().await.clone();
        for a in &self.identities {
            for b in &self.identities {
                if a.xuid == b.xuid {
                    continue;
                }
                let reverse_established = edges_snapshot
                    .get(&(b.xuid.clone(), a.xuid.clone()))
                    .map(|s| *s == EdgeState::Established)
                    .unwrap_or(false);
                let forward_established = edges_snapshot
                    .get(&(a.xuid.clone(), b.xuid.clone()))
                    .map(|s| *s == EdgeState::Established)
                    .unwrap_or(false);

                if reverse_established && !forward_established {
                    self.ensure_edge(a, b).await;
                    let _ = self.events.send(FriendEvent::FriendRequestAccepted {
                        identity: a.xuid.clone(),
                        follower: b.xuid.clone(),
                    });
                }
            }
        }
    }

    /// Healthy iff at least half of the `N·(N-1)` expected directed edges
    /// are established.
    pub async fn health_check(&self) -> HealthSample {
        let n = self.identities.len();
        let expected = n.saturating_mul(n.saturating_sub(1));
        if expected == 0 {
            return HealthSample::healthy();
        }
        let established = self
            .edges
            .read()
            .await
            .values()
            .filter(|s| **s == EdgeState::Established)
            .count();
        let fraction = established as f64 / expected as f64;
        if fraction >= 0.5 {
            HealthSample::healthy()
        } else {
            HealthSample::unhealthy(format!(
                "only {}/{} friendship edges established ({:.0}%)",
                established,
                expected,
                fraction * 100.0
            ))
        }
    }

    fn ordered_pairs(&self) -> Vec<(FriendIdentity, FriendIdentity)> {
        let mut pairs = Vec::new();
        for a in &self.identities {
            for b in &self.identities {
                if a.xuid != b.xuid {
                    pairs.push((a.clone(), b.clone()));
                }
            }
        }
        pairs
    }

    async fn ensure_edge(&self, from: &FriendIdentity, to: &FriendIdentity) {
        self.edges
            .write()
            .await
            .insert((from.xuid.clone(), to.xuid.clone()), EdgeState::Pending);

        if self.already_following(from, &to.xuid).await {
            self.mark_established(from, to).await;
            return;
        }

        let url = format!("{}/users/me/people/xuid({})", SOCIAL_BASE, to.xuid);
        let result = self
            .client
            .put(&url)
            .header("Authorization", &from.auth_header)
            .header("x-xbl-contract-version", "1")
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                self.mark_established(from, to).await;
            }
            Ok(resp) => {
                warn!(
                    "follow request {} -> {} failed with status {}",
                    from.xuid,
                    to.xuid,
                    resp.status()
                );
            }
            Err(e) => {
                warn!("follow request {} -> {} failed: {}", from.xuid, to.xuid, e);
            }
        }
    }

    async fn already_following(&self, from: &FriendIdentity, to_xuid: &str) -> bool {
        let url = format!("{}/users/me/people/xuid({})", SOCIAL_BASE, to_xuid);
        let resp = match self
            .client
            .get(&url)
            .header("Authorization", &from.auth_header)
            .header("x-xbl-contract-version", "1")
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => r,
            _ => return false,
        };
        let status: Result<FollowStatus, _> = resp.json().await;
        let following = status.map(|s| s.is_followed_by_caller).unwrap_or(false);
        trace_if!("SOCIAL", "existence check {} -> {}: {}", from.xuid, to_xuid, following);
        following
    }

    async fn mark_established(&self, from: &FriendIdentity, to: &FriendIdentity) {
        self.edges
            .write()
            .await
            .insert((from.xuid.clone(), to.xuid.clone()), EdgeState::Established);
        debug!("friendship established {} -> {}", from.xuid, to.xuid);
        let _ = self.events.send(FriendEvent::FriendshipEstablished {
            from: from.xuid.clone(),
            to: to.xuid.clone(),
        });
    }
}

#[async_trait]
impl HealthProbe for FriendGraph {
    async fn check(&self) -> HealthSample {
        self.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(xuid: &str) -> FriendIdentity {
        FriendIdentity {
            xuid: xuid.to_string(),
            auth_header: format!("XBL3.0 x=hash;{}", "t".repeat(120)),
        }
    }

    #[tokio::test]
    async fn health_check_is_unhealthy_with_no_established_edges() {
        let (graph, _rx) = FriendGraph::new(vec![identity("1"), identity("2")], FriendGraphConfig::default());
        let sample = graph.health_check().await;
        assert!(!sample.healthy);
    }

    #[tokio::test]
    async fn health_check_is_healthy_for_a_single_identity() {
        let (graph, _rx) = FriendGraph::new(vec![identity("1")], FriendGraphConfig::default());
        let sample = graph.health_check().await;
        assert!(sample.healthy);
    }

    #[tokio::test]
    async fn mark_established_updates_edge_and_emits_event() {
        let (graph, mut rx) = FriendGraph::new(vec![identity("1"), identity("2")], FriendGraphConfig::default());
        let a = identity("1");
        let b = identity("2");
        graph.mark_established(&a, &b).await;

        let edges = graph.edges.read().await;
        assert_eq!(edges.get(&("1".to_string(), "2".to_string())), Some(&EdgeState::Established));
        drop(edges);

        let event = rx.try_recv().expect("event should be emitted");
        assert!(matches!(event, FriendEvent::FriendshipEstablished { from, to } if from == "1" && to == "2"));
    }
}
