use chrono::Utc;
use mpsdlink_auth::{Identity, Title};

/// Fabricates a plausible [`Identity`] without any network calls, for
/// smoke-testing the coordinator's control flow end to end.
pub fn fake_identity(email: &str, title: Title) -> Identity {
    let suffix = email.len().max(10);
    Identity::new(
        email.to_string(),
        format!("demo-xuid-{:0>10}", suffix),
        "demo-user-hash".repeat(2),
        "demo-xsts-token-".repeat(8),
        "demo",
        Utc::now() + chrono::Duration::hours(4),
        title,
        false,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_identity_is_valid() {
        let identity = fake_identity("a@x.test", Title::default());
        assert!(identity.is_valid());
    }
}
