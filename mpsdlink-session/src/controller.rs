use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use mpsdlink_health::{HealthProbe, HealthSample};
use rand::Rng;
use reqwest::Client;
use tokio::sync::{broadcast, watch, Mutex};

use crate::body::{build_create_body, build_heartbeat_body, build_join_body};
use crate::consts::{MPSD_BASE, MPSD_CONTRACT_VERSION, SERVICE_CONFIG_ID, SESSION_TEMPLATE};
use crate::error::SessionError;
use crate::model::{ServerInfo, SessionEvent, SessionIdentity, SessionState};

#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub auto_recover: bool,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(60),
            auto_recover: true,
        }
    }
}

struct Inner {
    state: SessionState,
    session_name: Option<String>,
    last_heartbeat: Option<chrono::DateTime<Utc>>,
    attempts: u32,
}

/// Owns the single MPSD session for one game server: creation, member
/// join-up, heartbeat, and the bounded reconnect ladder on failure.
pub struct SessionController {
    server: ServerInfo,
    identities: Vec<SessionIdentity>,
    tuning: SessionTuning,
    client: Client,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl SessionController {
    /// `identities[0]` is always the host, per configuration order.
    pub fn new(server: ServerInfo, identities: Vec<SessionIdentity>, tuning: SessionTuning) -> (Arc<Self>, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(32);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            Arc::new(Self {
                server,
                identities,
                tuning,
                client: Client::new(),
                inner: Mutex::new(Inner {
                    state: SessionState::Offline,
                    session_name: None,
                    last_heartbeat: None,
                    attempts: 0,
                }),
                events: tx,
                cancel_tx,
                cancel_rx,
            }),
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn host(&self) -> &SessionIdentity {
        &self.identities[0]
    }

    /// Idempotent: if a session is already `Active`, it is stopped and a
    /// fresh one is created with a new, never-reused `sessionName`.
    pub async fn create(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Active {
            self.do_stop(&mut inner).await;
        }
        match self.do_create(&mut inner).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("session create failed for {}: {}", self.server.id, e);
                self.attempt_reconnect(&mut inner).await;
                Err(e)
            }
        }
    }

    /// Replaces `properties.custom` with a freshly computed block. Called on
    /// a fixed interval by the owning supervisor.
    pub async fn heartbeat(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Active {
            return Err(SessionError::NotActive);
        }
        match self.do_heartbeat(&inner).await {
            Ok(()) => {
                inner.last_heartbeat = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                warn!("heartbeat failed for {}: {}", self.server.id, e);
                self.attempt_reconnect(&mut inner).await;
                Err(e)
            }
        }
    }

    /// Observability snapshot of the session this controller currently owns.
    pub async fn record(&self) -> crate::model::SessionRecord {
        let inner = self.inner.lock().await;
        crate::model::SessionRecord {
            session_name: inner.session_name.clone().unwrap_or_default(),
            host_xuid: self.host().xuid.clone(),
            member_xuids: self.identities.iter().map(|i| i.xuid.clone()).collect(),
            last_heartbeat: inner.last_heartbeat,
            reconnect_attempts: inner.attempts,
            running: inner.state == SessionState::Active,
        }
    }

    pub async fn health_check(&self) -> HealthSample {
        let inner = self.inner.lock().await;
        if inner.state != SessionState::Active {
            return HealthSample::unhealthy(format!("session not active (state: {:?})", inner.state));
        }
        if let Some(last) = inner.last_heartbeat {
            let max_gap = self.tuning.heartbeat_interval * 2;
            let elapsed = Utc::now().signed_duration_since(last).to_std().unwrap_or(Duration::ZERO);
            if elapsed > max_gap {
                return HealthSample::unhealthy(format!(
                    "last heartbeat {} ago exceeds {:?}",
                    humanize(elapsed),
                    max_gap
                ));
            }
        }
        HealthSample::healthy()
    }

    /// Best-effort DELETE of the session, then transition to `Offline`.
    /// Cancels any pending reconnect backoff.
    pub async fn stop(&self) {
        let _ = self.cancel_tx.send(true);
        let mut inner = self.inner.lock().await;
        self.do_stop(&mut inner).await;
    }

    async fn do_create(&self, inner: &mut Inner) -> Result<(), SessionError> {
        let session_name = format!("FriendConnect-{}-{}", self.server.id, Utc::now().timestamp_millis());
        let host = self.host();
        let body = build_create_body(&self.server, &host.xuid, self.identities.len() as u32);

        let url = self.session_url(&session_name);
        let resp = self
            .client
            .put(&url)
            .header("Authorization", &host.auth_header)
            .header("Content-Type", "application/json")
            .header("x-xbl-contract-version", MPSD_CONTRACT_VERSION)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SessionError::HttpStatus(status, text));
        }

        inner.session_name = Some(session_name.clone());
        inner.last_heartbeat = Some(Utc::now());
        inner.attempts = 0;
        self.set_state(inner, SessionState::Registered);

        self.join_members(&session_name).await;

        self.set_state(inner, SessionState::Active);
        info!("session {} created for server {}", session_name, self.server.id);
        Ok(())
    }

    async fn join_members(&self, session_name: &str) {
        let url = self.session_url(session_name);
        for member in self.identities.iter().skip(1) {
            let body = build_join_body();
            let result = self
                .client
                .put(&url)
                .header("Authorization", &member.auth_header)
                .header("Content-Type", "application/json")
                .header("x-xbl-contract-version", MPSD_CONTRACT_VERSION)
                .json(&body)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => warn!("member {} failed to join session {}: {}", member.xuid, session_name, resp.status()),
                Err(e) => warn!("member {} failed to join session {}: {}", member.xuid, session_name, e),
            }
        }
    }

    async fn do_heartbeat(&self, inner: &Inner) -> Result<(), SessionError> {
        let session_name = inner.session_name.as_ref().ok_or(SessionError::NotActive)?;
        let host = self.host();
        let body = build_heartbeat_body(&self.server, &host.xuid, self.identities.len() as u32);

        let url = self.session_url(session_name);
        let resp = self
            .client
            .put(&url)
            .header("Authorization", &host.auth_header)
            .header("Content-Type", "application/json")
            .header("x-xbl-contract-version", MPSD_CONTRACT_VERSION)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SessionError::HttpStatus(status, text));
        }
        Ok(())
    }

    async fn do_stop(&self, inner: &mut Inner) {
        if let Some(session_name) = inner.session_name.take() {
            let url = self.session_url(&session_name);
            let result = self
                .client
                .delete(&url)
                .header("Authorization", &self.host().auth_header)
                .header("x-xbl-contract-version", MPSD_CONTRACT_VERSION)
                .send()
                .await;
            if let Err(e) = result {
                warn!("best-effort session delete failed for {}: {}", session_name, e);
            }
        }
        inner.last_heartbeat = None;
        inner.attempts = 0;
        self.set_state(inner, SessionState::Offline);
    }

    /// Bounded reconnect loop (never literal recursion): sleeps
    /// `reconnect_delay · 2^(attempt-1)` (capped), races the sleep against
    /// `Stop()`'s cancellation signal, and retries `do_create`. After
    /// `max_reconnect_attempts` consecutive failures, transitions to
    /// `Failed` and emits exactly one error event.
    async fn attempt_reconnect(&self, inner: &mut Inner) {
        if !self.tuning.auto_reconnect {
            self.set_state(inner, SessionState::Failed);
            return;
        }
        self.set_state(inner, SessionState::Reconnecting);
        let mut cancel_rx = self.cancel_rx.clone();

        for attempt in 1..=self.tuning.max_reconnect_attempts {
            inner.attempts = attempt;
            let backoff = self.reconnect_backoff(attempt);

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        return;
                    }
                }
            }

            match self.do_create(inner).await {
                Ok(()) => return,
                Err(e) => warn!(
                    "reconnect attempt {}/{} for {} failed: {}",
                    attempt, self.tuning.max_reconnect_attempts, self.server.id, e
                ),
            }
        }

        self.set_state(inner, SessionState::Failed);
        let _ = self.events.send(SessionEvent::Error("max reconnect attempts exceeded".into()));
    }

    /// Jitter only ever adds to the exponential floor, never subtracts from
    /// it: a caller retrying after `reconnect_backoff(k)` is guaranteed to
    /// have waited at least `reconnect_delay · 2^(k-1)`.
    fn reconnect_backoff(&self, attempt: u32) -> Duration {
        let exp = self.tuning.reconnect_delay.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
        let capped = exp.min(self.tuning.max_reconnect_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(1.0..=1.2);
        Duration::from_secs_f64(capped * jitter)
    }

    fn session_url(&self, session_name: &str) -> String {
        format!(
            "{}/serviceconfigs/{}/sessionTemplates/{}/sessions/{}",
            MPSD_BASE, SERVICE_CONFIG_ID, SESSION_TEMPLATE, session_name
        )
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        let _ = self.events.send(SessionEvent::StateChanged(state));
    }
}

#[async_trait]
impl HealthProbe for SessionController {
    async fn check(&self) -> HealthSample {
        self.health_check().await
    }
}

fn humanize(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(xuid: &str) -> SessionIdentity {
        SessionIdentity {
            xuid: xuid.to_string(),
            auth_header: format!("XBL3.0 x=hash;{}", "t".repeat(120)),
        }
    }

    fn server() -> ServerInfo {
        ServerInfo {
            id: "main-server".into(),
            host_name: "Host".into(),
            world_name: "World".into(),
            address: "play.example.com".into(),
            port: 19132,
            protocol: 589,
            version: "1.20.40".into(),
            max_players: 40,
        }
    }

    #[tokio::test]
    async fn starts_offline_and_unhealthy() {
        let (controller, _rx) = SessionController::new(server(), vec![identity("1"), identity("2")], SessionTuning::default());
        let sample = controller.health_check().await;
        assert!(!sample.healthy);
    }

    #[tokio::test]
    async fn heartbeat_before_create_returns_not_active() {
        let (controller, _rx) = SessionController::new(server(), vec![identity("1")], SessionTuning::default());
        let result = controller.heartbeat().await;
        assert!(matches!(result, Err(SessionError::NotActive)));
    }

    #[test]
    fn reconnect_backoff_grows_and_never_dips_below_the_exponential_floor() {
        let (controller, _rx) = SessionController::new(server(), vec![identity("1")], SessionTuning::default());
        let reconnect_delay = controller.tuning.reconnect_delay.as_secs_f64();
        let max_delay = controller.tuning.max_reconnect_delay.as_secs_f64();

        let first = controller.reconnect_backoff(1);
        assert!(first.as_secs_f64() >= reconnect_delay);
        assert!(first.as_secs_f64() <= reconnect_delay * 1.2 + 0.001);

        for attempt in 1..=10 {
            let floor = (reconnect_delay * 2f64.powi(attempt as i32 - 1)).min(max_delay);
            let backoff = controller.reconnect_backoff(attempt);
            assert!(backoff.as_secs_f64() >= floor - 0.001);
        }
    }

    #[tokio::test]
    async fn stop_before_create_is_a_no_op() {
        let (controller, _rx) = SessionController::new(server(), vec![identity("1")], SessionTuning::default());
        controller.stop().await;
        let sample = controller.health_check().await;
        assert!(!sample.healthy);
    }
}
