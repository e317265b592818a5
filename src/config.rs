use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug)]
pub enum ConfigError {
    NotFound(PathBuf),
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(path) => write!(f, "config file not found: {}", path.display()),
            ConfigError::Io(e) => write!(f, "failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config file: {}", e),
            ConfigError::Invalid(violations) => {
                write!(f, "invalid configuration:")?;
                for v in violations {
                    write!(f, "\n  - {}", v)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub continue_on_server_failure: bool,
    #[serde(default)]
    pub demo_mode: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            continue_on_server_failure: true,
            demo_mode: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub address: String,
    pub port: u16,
    #[serde(default = "default_host_name")]
    pub host_name: String,
    #[serde(default = "default_world_name")]
    pub world_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_protocol")]
    pub protocol: u32,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    pub identities: Vec<String>,
}

fn default_host_name() -> String {
    "Server".to_string()
}
fn default_world_name() -> String {
    "world".to_string()
}
fn default_version() -> String {
    "1.20.40".to_string()
}
fn default_protocol() -> u32 {
    589
}
fn default_max_players() -> u32 {
    40
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionTuningConfig {
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_recover: bool,
}

impl Default for SessionTuningConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            auto_recover: true,
        }
    }
}

fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_heartbeat_interval_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthTuningConfig {
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    #[serde(default = "default_auth_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_auth_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for AuthTuningConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path(),
            max_retries: default_auth_max_retries(),
            retry_delay_secs: default_auth_retry_delay_secs(),
        }
    }
}

fn default_token_path() -> PathBuf {
    PathBuf::from("./auth")
}
fn default_auth_max_retries() -> u32 {
    5
}
fn default_auth_retry_delay_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct FriendTuningConfig {
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_request_delay_secs")]
    pub request_delay_secs: u64,
}

impl Default for FriendTuningConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            request_delay_secs: default_request_delay_secs(),
        }
    }
}

fn default_max_concurrent_requests() -> usize {
    5
}
fn default_request_delay_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringTuningConfig {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    #[serde(default = "default_health_threshold")]
    pub health_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default)]
    pub restart_on_critical_failure: bool,
    #[serde(default = "default_max_inactivity_secs")]
    pub max_inactivity_secs: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for MonitoringTuningConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            health_threshold: default_health_threshold(),
            critical_threshold: default_critical_threshold(),
            max_failures: default_max_failures(),
            restart_on_critical_failure: false,
            max_inactivity_secs: default_max_inactivity_secs(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

fn default_check_interval_secs() -> u64 {
    60
}
fn default_health_threshold() -> f64 {
    0.8
}
fn default_critical_threshold() -> f64 {
    0.3
}
fn default_max_failures() -> u32 {
    3
}
fn default_max_inactivity_secs() -> u64 {
    5 * 60
}
fn default_stats_interval_secs() -> u64 {
    5 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub session: SessionTuningConfig,
    #[serde(default)]
    pub auth: AuthTuningConfig,
    #[serde(default)]
    pub friend: FriendTuningConfig,
    #[serde(default)]
    pub monitoring: MonitoringTuningConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads `path`, parses it as TOML, applies `MPSDLINK_*` environment
    /// overrides, and validates the result, collecting every violation
    /// found rather than stopping at the first.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("MPSDLINK_TOKEN_PATH") {
            self.auth.token_path = PathBuf::from(path);
        }
        if let Ok(flag) = std::env::var("MPSDLINK_DEMO_MODE") {
            self.global.demo_mode = flag == "1";
        }
        if let Ok(flag) = std::env::var("MPSDLINK_CONTINUE_ON_FAILURE") {
            self.global.continue_on_server_failure = flag == "1";
        }
    }

    /// Surfaces every violation together, matching the teacher's pattern of
    /// reporting all profile/asset validation problems in one pass rather
    /// than failing on the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();

        if self.servers.is_empty() {
            violations.push("no servers configured".to_string());
        }

        let mut seen_ids = HashSet::new();
        for server in &self.servers {
            if server.identities.is_empty() {
                violations.push(format!("server '{}' has no identity emails configured", server.id));
            }
            if server.port == 0 {
                violations.push(format!("server '{}' has an invalid port (0)", server.id));
            }
            if !seen_ids.insert(server.id.clone()) {
                violations.push(format!("duplicate server id '{}'", server.id));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(violations))
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.session.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.session.reconnect_delay_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.check_interval_secs)
    }

    pub fn max_inactivity(&self) -> Duration {
        Duration::from_secs(self.monitoring.max_inactivity_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.stats_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            servers: vec![ServerConfig {
                id: "main-server".into(),
                address: "play.example.com".into(),
                port: 19132,
                host_name: default_host_name(),
                world_name: default_world_name(),
                version: default_version(),
                protocol: default_protocol(),
                max_players: default_max_players(),
                identities: vec!["a@x.test".into()],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn empty_server_list_is_rejected() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid(violations) => assert!(violations.iter().any(|v| v.contains("no servers configured"))),
            _ => panic!("expected Invalid"),
        }
    }

    #[test]
    fn empty_identity_list_and_zero_port_are_both_reported() {
        let mut config = base_config();
        config.servers[0].identities.clear();
        config.servers[0].port = 0;
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid(violations) => {
                assert!(violations.iter().any(|v| v.contains("no identity emails")));
                assert!(violations.iter().any(|v| v.contains("invalid port")));
                assert_eq!(violations.len(), 2);
            }
            _ => panic!("expected Invalid"),
        }
    }

    #[test]
    fn duplicate_server_ids_are_rejected() {
        let mut config = base_config();
        let mut second = config.servers[0].clone();
        second.address = "other.example.com".into();
        config.servers.push(second);
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::Invalid(violations) => assert!(violations.iter().any(|v| v.contains("duplicate server id"))),
            _ => panic!("expected Invalid"),
        }
    }
}
