use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use mpsdlink_auth::{AuthPipeline, AuthTuning, Identity, Title, TokenStore, UserCodePresenter};
use mpsdlink_health::{HealthProbe, HealthSample};
use mpsdlink_session::{ServerInfo, SessionController, SessionIdentity, SessionTuning};
use mpsdlink_social::{FriendGraph, FriendGraphConfig, FriendIdentity};
use tokio::sync::{broadcast, watch, RwLock};

use crate::config::ServerConfig;
use crate::demo;

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Initialized,
    RecoveryFailed(String),
    Stopped,
}

/// Composes Auth → FriendGraph → SessionController for one configured game
/// server and drives its heartbeat and recovery.
pub struct ServerSupervisor {
    server: ServerConfig,
    demo_mode: bool,
    token_store: TokenStore,
    presenter: Arc<dyn UserCodePresenter>,
    session_tuning: SessionTuning,
    friend_config: FriendGraphConfig,
    auth_tuning: AuthTuning,
    max_inactivity: Duration,
    identities: RwLock<Vec<Identity>>,
    friend_graph: RwLock<Option<Arc<FriendGraph>>>,
    session: RwLock<Option<Arc<SessionController>>>,
    initialized: AtomicBool,
    recovering: AtomicBool,
    last_activity: RwLock<DateTime<Utc>>,
    heartbeat_cancel: RwLock<Option<watch::Sender<bool>>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl ServerSupervisor {
    pub fn new(
        server: ServerConfig,
        demo_mode: bool,
        token_store: TokenStore,
        presenter: Arc<dyn UserCodePresenter>,
        session_tuning: SessionTuning,
        friend_config: FriendGraphConfig,
        auth_tuning: AuthTuning,
        max_inactivity: Duration,
    ) -> (Arc<Self>, broadcast::Receiver<SupervisorEvent>) {
        let (tx, rx) = broadcast::channel(16);
        (
            Arc::new(Self {
                server,
                demo_mode,
                token_store,
                presenter,
                session_tuning,
                friend_config,
                auth_tuning,
                max_inactivity,
                identities: RwLock::new(Vec::new()),
                friend_graph: RwLock::new(None),
                session: RwLock::new(None),
                initialized: AtomicBool::new(false),
                recovering: AtomicBool::new(false),
                last_activity: RwLock::new(Utc::now()),
                heartbeat_cancel: RwLock::new(None),
                events: tx,
            }),
            rx,
        )
    }

    pub fn server_id(&self) -> &str {
        &self.server.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Runs the full pipeline: authenticate identities sequentially, build a
    /// complete friendship graph among them, then create the MPSD session.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), String> {
        let identities = self.authenticate_all().await?;
        *self.identities.write().await = identities.clone();

        let friend_identities: Vec<FriendIdentity> = identities
            .iter()
            .map(|i| FriendIdentity {
                xuid: i.xuid.clone(),
                auth_header: i.auth_header(),
            })
            .collect();
        let (friend_graph, _friend_rx) = FriendGraph::new(friend_identities, self.friend_config.clone());
        if !self.demo_mode {
            friend_graph.establish_all().await;
        }
        *self.friend_graph.write().await = Some(friend_graph);

        let session_identities: Vec<SessionIdentity> = identities
            .iter()
            .map(|i| SessionIdentity {
                xuid: i.xuid.clone(),
                auth_header: i.auth_header(),
            })
            .collect();
        let server_info = ServerInfo {
            id: self.server.id.clone(),
            host_name: self.server.host_name.clone(),
            world_name: self.server.world_name.clone(),
            address: self.server.address.clone(),
            port: self.server.port,
            protocol: self.server.protocol,
            version: self.server.version.clone(),
            max_players: self.server.max_players,
        };
        let (session, _session_rx) = SessionController::new(server_info, session_identities, self.session_tuning.clone());
        if !self.demo_mode {
            session.create().await.map_err(|e| e.to_string())?;
        }
        *self.session.write().await = Some(session);

        self.initialized.store(true, Ordering::SeqCst);
        *self.last_activity.write().await = Utc::now();
        self.spawn_heartbeat_loop().await;
        let _ = self.events.send(SupervisorEvent::Initialized);
        info!("server supervisor '{}' initialized", self.server.id);
        Ok(())
    }

    async fn authenticate_all(&self) -> Result<Vec<Identity>, String> {
        let mut identities = Vec::with_capacity(self.server.identities.len());
        if self.demo_mode {
            for email in &self.server.identities {
                identities.push(demo::fake_identity(email, Title::default()));
            }
            return Ok(identities);
        }

        let pipeline = AuthPipeline::new(self.token_store.clone(), self.auth_tuning);
        for email in &self.server.identities {
            let identity = pipeline
                .authenticate(email, Title::default(), self.presenter.as_ref())
                .await
                .map_err(|e| format!("authentication failed for {}: {}", email, e))?;
            identities.push(identity);
        }
        Ok(identities)
    }

    /// Registers the cancel sender before spawning the loop task, so a
    /// `stop()` that runs immediately after `initialize()` is guaranteed to
    /// observe it rather than racing the task that would otherwise store it.
    async fn spawn_heartbeat_loop(self: &Arc<Self>) {
        let (tx, mut cancel_rx) = watch::channel(false);
        *self.heartbeat_cancel.write().await = Some(tx);

        let this = self.clone();
        let interval = self.session_tuning.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let session = this.session.read().await.clone();
                        if let Some(session) = session {
                            if !this.demo_mode {
                                if let Err(e) = session.heartbeat().await {
                                    warn!("heartbeat failed for '{}': {}", this.server.id, e);
                                }
                            }
                            *this.last_activity.write().await = Utc::now();
                        }
                    }
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Re-entrant calls while a recovery is already in flight are a no-op.
    pub async fn recover(self: &Arc<Self>) {
        if self.recovering.swap(true, Ordering::SeqCst) {
            return;
        }

        let result = self.recover_inner().await;
        self.recovering.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            error!("recovery failed for '{}': {}", self.server.id, e);
            let _ = self.events.send(SupervisorEvent::RecoveryFailed(e));
        }
    }

    async fn recover_inner(self: &Arc<Self>) -> Result<(), String> {
        if let Some(session) = self.session.read().await.clone() {
            session.stop().await;
        }

        let identities = self.authenticate_all().await?;
        *self.identities.write().await = identities.clone();

        if let Some(friend_graph) = self.friend_graph.read().await.clone() {
            if !self.demo_mode {
                friend_graph.refresh().await;
            }
        }

        if let Some(session) = self.session.read().await.clone() {
            if !self.demo_mode {
                session.create().await.map_err(|e| e.to_string())?;
            }
        }

        *self.last_activity.write().await = Utc::now();
        Ok(())
    }

    /// Unhealthy if not initialized, if too long since last activity, or if
    /// any owned subsystem reports unhealthy (first reason wins).
    pub async fn health_check(&self) -> HealthSample {
        if !self.initialized.load(Ordering::SeqCst) {
            return HealthSample::unhealthy("supervisor not yet initialized");
        }

        let last_activity = *self.last_activity.read().await;
        let elapsed = Utc::now().signed_duration_since(last_activity).to_std().unwrap_or_default();
        if elapsed > self.max_inactivity {
            return HealthSample::unhealthy("no activity within the configured inactivity window");
        }

        if let Some(friend_graph) = self.friend_graph.read().await.clone() {
            let sample = friend_graph.check().await;
            if !sample.healthy {
                return sample;
            }
        }

        if let Some(session) = self.session.read().await.clone() {
            let sample = session.check().await;
            if !sample.healthy {
                return sample;
            }
        }

        HealthSample::healthy()
    }

    /// Tears down in reverse order: heartbeat loop, then session, leaving
    /// the friendship graph and cached tokens intact for a future restart.
    pub async fn stop(&self) {
        if let Some(tx) = self.heartbeat_cancel.write().await.take() {
            let _ = tx.send(true);
        }
        if let Some(session) = self.session.read().await.clone() {
            session.stop().await;
        }
        self.initialized.store(false, Ordering::SeqCst);
        let _ = self.events.send(SupervisorEvent::Stopped);
        info!("server supervisor '{}' stopped", self.server.id);
    }
}
