use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consts::{MIN_ID_LEN, MIN_XSTS_TOKEN_LEN};

/// The Xbox title an identity's XSTS token is scoped to; determines which
/// MPSD session templates the resulting authorization header can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Title {
    MinecraftJava,
    MinecraftAndroid,
    MinecraftNintendoSwitch,
}

impl Default for Title {
    /// Experimentally the most broadly accepted title for session creation.
    fn default() -> Self {
        Title::MinecraftNintendoSwitch
    }
}

impl std::fmt::Display for Title {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Title::MinecraftJava => "MinecraftJava",
            Title::MinecraftAndroid => "MinecraftAndroid",
            Title::MinecraftNintendoSwitch => "MinecraftNintendoSwitch",
        };
        f.write_str(s)
    }
}

/// A capability-bearing handle for one bot-controlled Microsoft account,
/// produced by [`crate::AuthPipeline::authenticate`]. Every other subsystem
/// consumes identities only through this type's XUID and `auth_header`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub xuid: String,
    pub user_hash: String,
    pub xsts_token: String,
    pub auth_method: String,
    pub issued_at: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub title: Title,
    /// Set when the identity's `DisplayClaims`/user hash were recovered by
    /// the regex fallback in the hardened XSTS parser rather than parsed
    /// cleanly; downstream code treats it the same but operators are warned.
    pub derived: bool,
}

impl Identity {
    pub fn new(
        email: String,
        xuid: String,
        user_hash: String,
        xsts_token: String,
        auth_method: impl Into<String>,
        not_after: DateTime<Utc>,
        title: Title,
        derived: bool,
    ) -> Self {
        Self {
            email,
            xuid,
            user_hash,
            xsts_token,
            auth_method: auth_method.into(),
            issued_at: Utc::now(),
            not_after,
            title,
            derived,
        }
    }

    /// `XBL3.0 x=<userHash>;<XSTSToken>` — the sole authorization header
    /// every downstream Xbox Live request needs.
    pub fn auth_header(&self) -> String {
        format!("XBL3.0 x={};{}", self.user_hash, self.xsts_token)
    }

    /// True when every output guarantee in the spec holds: non-empty XUID
    /// and user hash of plausible length, a long-enough XSTS token, and a
    /// `not_after` strictly in the future.
    pub fn is_valid(&self) -> bool {
        self.xuid.len() >= MIN_ID_LEN
            && self.user_hash.len() >= MIN_ID_LEN
            && self.xsts_token.len() >= MIN_XSTS_TOKEN_LEN
            && self.not_after > Utc::now()
    }

    pub fn is_expired(&self) -> bool {
        self.not_after <= Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn valid_identity() -> Identity {
        Identity::new(
            "bot@example.test".into(),
            "1".repeat(12),
            "h".repeat(12),
            "t".repeat(120),
            "live",
            Utc::now() + Duration::hours(4),
            Title::default(),
            false,
        )
    }

    #[test]
    fn auth_header_matches_expected_shape() {
        let identity = valid_identity();
        let header = identity.auth_header();
        assert!(header.starts_with("XBL3.0 x="));
        assert!(header.contains(';'));
        let re = regex::Regex::new(r"^XBL3\.0 x=[^;]+;.+$").unwrap();
        assert!(re.is_match(&header));
    }

    #[test]
    fn is_valid_rejects_short_ids_and_expired_tokens() {
        let mut identity = valid_identity();
        assert!(identity.is_valid());

        identity.xuid = "short".into();
        assert!(!identity.is_valid());

        let mut identity = valid_identity();
        identity.not_after = Utc::now() - Duration::seconds(1);
        assert!(!identity.is_valid());
        assert!(identity.is_expired());
    }
}
