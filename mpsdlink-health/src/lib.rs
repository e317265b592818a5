mod monitor;
mod sample;

pub use monitor::{HealthEvent, HealthMonitor, HealthProbe, MonitoringConfig};
pub use sample::HealthSample;
