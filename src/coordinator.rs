use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use mpsdlink_auth::{AuthTuning, StdoutPresenter, TokenStore, UserCodePresenter};
use mpsdlink_health::{HealthEvent, HealthMonitor, HealthProbe, HealthSample, MonitoringConfig};
use mpsdlink_session::SessionTuning;
use mpsdlink_social::FriendGraphConfig;
use tokio::sync::watch;

use crate::config::Config;
use crate::supervisor::ServerSupervisor;

/// Loads the validated configuration, fans out one [`ServerSupervisor`] per
/// configured server, and wires a shared [`HealthMonitor`] across all of
/// them.
pub struct RootCoordinator {
    config: Config,
    supervisors: Vec<Arc<ServerSupervisor>>,
    monitor: Arc<HealthMonitor>,
}

impl RootCoordinator {
    pub async fn bootstrap(config: Config) -> Result<Self, String> {
        let token_store = TokenStore::new(&config.auth.token_path).map_err(|e| e.to_string())?;
        let presenter: Arc<dyn UserCodePresenter> = Arc::new(StdoutPresenter);

        let session_tuning = SessionTuning {
            auto_reconnect: config.session.auto_reconnect,
            max_reconnect_attempts: config.session.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_delay: Duration::from_secs(60),
            heartbeat_interval: config.heartbeat_interval(),
            auto_recover: config.session.auto_recover,
        };
        let friend_config = FriendGraphConfig {
            max_concurrent_requests: config.friend.max_concurrent_requests,
            request_delay: Duration::from_secs(config.friend.request_delay_secs),
        };
        let auth_tuning = AuthTuning {
            max_retries: config.auth.max_retries,
            retry_delay: Duration::from_secs(config.auth.retry_delay_secs),
        };
        let monitoring_config = MonitoringConfig {
            check_interval: config.check_interval(),
            health_threshold: config.monitoring.health_threshold,
            critical_threshold: config.monitoring.critical_threshold,
            max_failures: config.monitoring.max_failures,
        };

        let (monitor, _events_rx) = HealthMonitor::new(monitoring_config);

        let mut supervisors = Vec::with_capacity(config.servers.len());
        for server in config.servers.clone() {
            let (supervisor, _rx) = ServerSupervisor::new(
                server,
                config.global.demo_mode,
                token_store.clone(),
                presenter.clone(),
                session_tuning.clone(),
                friend_config.clone(),
                auth_tuning,
                config.max_inactivity(),
            );
            monitor
                .register(supervisor.server_id().to_string(), Box::new(SupervisorProbe(supervisor.clone())))
                .await;
            supervisors.push(supervisor);
        }

        Ok(Self {
            config,
            supervisors,
            monitor,
        })
    }

    /// Initializes every supervisor. If `continue_on_server_failure` is
    /// false, the first failure aborts the whole startup.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> i32 {
        for supervisor in &self.supervisors {
            if let Err(e) = supervisor.initialize().await {
                error!("server '{}' failed to initialize: {}", supervisor.server_id(), e);
                if !self.config.global.continue_on_server_failure {
                    return 1;
                }
            }
        }

        let mut health_events = self.monitor.subscribe();
        let monitor = self.monitor.clone();
        let (monitor_cancel_tx, monitor_cancel_rx) = watch::channel(false);
        let monitor_task = tokio::spawn(monitor.run(monitor_cancel_rx));

        let supervisors = self.supervisors.clone();
        let restart_on_critical = self.config.monitoring.restart_on_critical_failure;
        let mut stats_ticker = tokio::time::interval(self.config.stats_interval());

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown signal received, stopping all supervisors");
                        break;
                    }
                }
                event = health_events.recv() => {
                    match event {
                        Ok(HealthEvent::ServerDown(id)) => {
                            warn!("server '{}' reported down by health monitor", id);
                            if let Some(supervisor) = supervisors.iter().find(|s| s.server_id() == id) {
                                supervisor.recover().await;
                            }
                        }
                        Ok(HealthEvent::CriticalFailure(reason)) => {
                            error!("critical failure: {}", reason);
                            if restart_on_critical {
                                info!("restart-on-critical-failure enabled, cycling all supervisors");
                                for supervisor in &supervisors {
                                    supervisor.stop().await;
                                }
                                for supervisor in &supervisors {
                                    if let Err(e) = supervisor.initialize().await {
                                        error!("restart failed for '{}': {}", supervisor.server_id(), e);
                                    }
                                }
                            }
                        }
                        Ok(HealthEvent::SystemDegraded(reason)) => warn!("system degraded: {}", reason),
                        Ok(HealthEvent::HealthCheck(_)) => {}
                        Err(_) => {}
                    }
                }
                _ = stats_ticker.tick() => {
                    self.report_stats().await;
                }
            }
        }

        let _ = monitor_cancel_tx.send(true);
        let _ = monitor_task.await;

        for supervisor in &self.supervisors {
            supervisor.stop().await;
        }
        0
    }

    async fn report_stats(&self) {
        let mut healthy = 0;
        for supervisor in &self.supervisors {
            if supervisor.health_check().await.healthy {
                healthy += 1;
            }
        }
        info!("stats: {}/{} servers healthy", healthy, self.supervisors.len());
    }
}

struct SupervisorProbe(Arc<ServerSupervisor>);

#[async_trait::async_trait]
impl HealthProbe for SupervisorProbe {
    async fn check(&self) -> HealthSample {
        self.0.health_check().await
    }
}
