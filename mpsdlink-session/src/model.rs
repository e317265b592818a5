use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The minimal capability a [`crate::SessionController`] needs from an
/// authenticated identity: its XUID and the authorization header to act
/// as that identity when creating or joining the MPSD session.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub xuid: String,
    pub auth_header: String,
}

/// Static description of the game server one session advertises.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub host_name: String,
    pub world_name: String,
    pub address: String,
    pub port: u16,
    pub protocol: u32,
    pub version: String,
    pub max_players: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Offline,
    Registered,
    Active,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Error(String),
}

/// Snapshot of the session this controller currently owns, kept only for
/// observability — the authoritative state lives in the controller itself.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_name: String,
    pub host_xuid: String,
    pub member_xuids: Vec<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub running: bool,
}
