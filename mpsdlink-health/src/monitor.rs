use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::{broadcast, watch, RwLock};

use crate::sample::HealthSample;

const ROLLING_WINDOW: usize = 10;

/// A health check one subsystem exposes for periodic evaluation. Subjects
/// are typically one per `ServerSupervisor`, though any component can be
/// registered independently.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> HealthSample;
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub check_interval: Duration,
    pub health_threshold: f64,
    pub critical_threshold: f64,
    pub max_failures: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            health_threshold: 0.8,
            critical_threshold: 0.3,
            max_failures: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub enum HealthEvent {
    HealthCheck(Vec<(String, HealthSample)>),
    ServerDown(String),
    CriticalFailure(String),
    SystemDegraded(String),
}

struct Subject {
    probe: Box<dyn HealthProbe>,
    window: VecDeque<HealthSample>,
    consecutive_failures: u32,
    down_emitted: bool,
}

/// Periodically evaluates every registered subject's [`HealthProbe`] and
/// emits aggregate and per-subject events over a broadcast channel.
pub struct HealthMonitor {
    config: MonitoringConfig,
    subjects: RwLock<HashMap<String, Subject>>,
    events: broadcast::Sender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(config: MonitoringConfig) -> (Arc<Self>, broadcast::Receiver<HealthEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (
            Arc::new(Self {
                config,
                subjects: RwLock::new(HashMap::new()),
                events: tx,
            }),
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub async fn register(&self, id: impl Into<String>, probe: Box<dyn HealthProbe>) {
        self.subjects.write().await.insert(
            id.into(),
            Subject {
                probe,
                window: VecDeque::with_capacity(ROLLING_WINDOW),
                consecutive_failures: 0,
                down_emitted: false,
            },
        );
    }

    pub async fn unregister(&self, id: &str) {
        self.subjects.write().await.remove(id);
    }

    /// Forces an immediate probe of a single subject, participating in the
    /// same rolling-window and failure-count accounting as the scheduled tick.
    pub async fn check(&self, id: &str) -> Option<HealthSample> {
        let mut subjects = self.subjects.write().await;
        let subject = subjects.get_mut(id)?;
        let sample = subject.probe.check().await;
        record_sample(subject, &sample);
        if subject.consecutive_failures == self.config.max_failures && !subject.down_emitted {
            subject.down_emitted = true;
            let _ = self.events.send(HealthEvent::ServerDown(id.to_string()));
        }
        Some(sample)
    }

    /// Runs the scheduled evaluation loop until `cancel` is signalled.
    pub async fn run(self: Arc<Self>, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate_all().await;
                }
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        info!("health monitor stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn evaluate_all(&self) {
        let mut results = Vec::new();
        let mut newly_down = Vec::new();

        {
            let mut subjects = self.subjects.write().await;
            for (id, subject) in subjects.iter_mut() {
                let sample = subject.probe.check().await;
                record_sample(subject, &sample);
                if subject.consecutive_failures == self.config.max_failures && !subject.down_emitted {
                    subject.down_emitted = true;
                    newly_down.push(id.clone());
                }
                results.push((id.clone(), sample));
            }
        }

        for id in newly_down {
            warn!("subject {} marked down after {} consecutive failures", id, self.config.max_failures);
            let _ = self.events.send(HealthEvent::ServerDown(id));
        }

        let total = results.len();
        if total > 0 {
            let healthy_count = results.iter().filter(|(_, s)| s.healthy).count();
            let fraction = healthy_count as f64 / total as f64;
            if fraction <= self.config.critical_threshold {
                let msg = format!(
                    "healthy fraction {:.2} at or below critical threshold {:.2}",
                    fraction, self.config.critical_threshold
                );
                let _ = self.events.send(HealthEvent::CriticalFailure(msg));
            } else if fraction <= self.config.health_threshold {
                let msg = format!(
                    "healthy fraction {:.2} at or below health threshold {:.2}",
                    fraction, self.config.health_threshold
                );
                let _ = self.events.send(HealthEvent::SystemDegraded(msg));
            }
        }

        let _ = self.events.send(HealthEvent::HealthCheck(results));
    }
}

fn record_sample(subject: &mut Subject, sample: &HealthSample) {
    if subject.window.len() == ROLLING_WINDOW {
        subject.window.pop_front();
    }
    subject.window.push_back(sample.clone());

    if sample.healthy {
        subject.consecutive_failures = 0;
        subject.down_emitted = false;
    } else {
        subject.consecutive_failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct ScriptedProbe {
        healthy: AtomicBool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn check(&self) -> HealthSample {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                HealthSample::healthy()
            } else {
                HealthSample::unhealthy("scripted failure")
            }
        }
    }

    #[tokio::test]
    async fn server_down_fires_exactly_once_after_max_failures() {
        let (monitor, mut rx) = HealthMonitor::new(MonitoringConfig {
            max_failures: 3,
            ..Default::default()
        });
        let probe = Arc::new(ScriptedProbe {
            healthy: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        monitor.register("s1", Box::new(ProbeHandle(probe.clone()))).await;

        for _ in 0..2 {
            monitor.check("s1").await;
        }
        assert!(rx.try_recv().is_err() || matches!(rx.try_recv(), Err(_)));

        monitor.check("s1").await;
        let mut saw_down = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, HealthEvent::ServerDown(ref id) if id == "s1") {
                saw_down = true;
            }
        }
        assert!(saw_down);

        monitor.check("s1").await;
        let mut extra_down = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, HealthEvent::ServerDown(_)) {
                extra_down += 1;
            }
        }
        assert_eq!(extra_down, 0);
    }

    #[tokio::test]
    async fn recovery_resets_failure_counter() {
        let (monitor, _rx) = HealthMonitor::new(MonitoringConfig {
            max_failures: 2,
            ..Default::default()
        });
        let probe = Arc::new(ScriptedProbe {
            healthy: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        });
        monitor.register("s1", Box::new(ProbeHandle(probe.clone()))).await;
        monitor.check("s1").await;
        probe.healthy.store(true, Ordering::SeqCst);
        monitor.check("s1").await;
        probe.healthy.store(false, Ordering::SeqCst);
        monitor.check("s1").await;

        let subjects = monitor.subjects.read().await;
        assert_eq!(subjects.get("s1").unwrap().consecutive_failures, 1);
    }

    struct ProbeHandle(Arc<ScriptedProbe>);

    #[async_trait]
    impl HealthProbe for ProbeHandle {
        async fn check(&self) -> HealthSample {
            self.0.check().await
        }
    }
}
