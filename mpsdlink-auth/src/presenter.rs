use async_trait::async_trait;

/// Describes a Microsoft device-code challenge the operator must complete
/// out of band (visiting a URL and entering a short code). Replaces the
/// teacher's Tauri login window with a trait any front end can implement.
#[derive(Debug, Clone)]
pub struct DeviceCodePrompt {
    pub verification_uri: String,
    pub user_code: String,
    pub message: String,
    pub expires_in_seconds: u64,
}

/// Surfaces a device-code challenge to whatever is supervising this process.
/// Implementors must not block the calling task for longer than it takes to
/// hand the prompt off; the pipeline keeps polling the token endpoint on its
/// own schedule regardless of when the presenter returns.
#[async_trait]
pub trait UserCodePresenter: Send + Sync {
    async fn present(&self, prompt: &DeviceCodePrompt);
}

/// Default presenter: writes the challenge to stdout. Good enough for a
/// daemon started interactively or under a process supervisor that captures
/// stdout into its own logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutPresenter;

#[async_trait]
impl UserCodePresenter for StdoutPresenter {
    async fn present(&self, prompt: &DeviceCodePrompt) {
        println!(
            "Sign in required: open {} and enter code {} ({})",
            prompt.verification_uri, prompt.user_code, prompt.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct RecordingPresenter {
        called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl UserCodePresenter for RecordingPresenter {
        async fn present(&self, _prompt: &DeviceCodePrompt) {
            self.called.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn custom_presenter_is_invoked() {
        let called = Arc::new(AtomicBool::new(false));
        let presenter = RecordingPresenter { called: called.clone() };
        presenter
            .present(&DeviceCodePrompt {
                verification_uri: "https://microsoft.com/link".into(),
                user_code: "ABCDEF12".into(),
                message: "enter code".into(),
                expires_in_seconds: 900,
            })
            .await;
        assert!(called.load(Ordering::SeqCst));
    }
}
