use reqwest::StatusCode;

/// The outer result `AuthPipeline::authenticate` reports, matching the
/// error taxonomy the rest of the system reacts to: permanent failures are
/// never retried, transient ones exhaust the caller's own retry budget.
#[derive(Debug)]
pub enum AuthError {
    Permanent(String),
    Transient(String),
    DeadlineExceeded,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Permanent(msg) => write!(f, "PermanentAuthFailure: {}", msg),
            AuthError::Transient(msg) => write!(f, "TransientAuthFailure: {}", msg),
            AuthError::DeadlineExceeded => write!(f, "DeadlineExceeded"),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, AuthError::Permanent(_))
    }
}

/// Internal per-request error, raised by the individual HTTP steps before
/// being classified into an [`AuthError`] by the pipeline.
#[derive(Debug)]
pub(crate) enum StepError {
    Request(reqwest::Error),
    HttpStatus(StatusCode, String),
    Json(String),
    Microsoft { error: String, description: String },
    Xbox { xerr: String, message: String },
    MissingUserHash,
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepError::Request(e) => write!(f, "request error: {}", e),
            StepError::HttpStatus(status, body) => write!(f, "http {}: {}", status, body),
            StepError::Json(msg) => write!(f, "json parse error: {}", msg),
            StepError::Microsoft { error, description } => write!(f, "{}: {}", error, description),
            StepError::Xbox { xerr, message } => write!(f, "XErr {}: {}", xerr, message),
            StepError::MissingUserHash => write!(f, "XSTS response missing user hash"),
        }
    }
}

impl From<reqwest::Error> for StepError {
    fn from(e: reqwest::Error) -> Self {
        StepError::Request(e)
    }
}

#[derive(serde::Deserialize)]
pub(crate) struct MicrosoftErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// Classifies a raw step failure into the outer [`AuthError`] taxonomy.
pub(crate) fn classify(e: StepError) -> AuthError {
    match e {
        StepError::Microsoft { error, description } => {
            if error == "invalid_grant" || error == "unauthorized_client" {
                AuthError::Permanent(format!("{}: {}", error, description))
            } else {
                AuthError::Transient(format!("{}: {}", error, description))
            }
        }
        StepError::Xbox { xerr, message } => {
            if crate::consts::is_permanent_xerr(&xerr) {
                let hint = crate::consts::XERR_HINTS.get(xerr.as_str()).copied().unwrap_or("");
                AuthError::Permanent(format!("XErr {}: {} ({})", xerr, message, hint))
            } else {
                AuthError::Transient(format!("XErr {}: {}", xerr, message))
            }
        }
        StepError::Json(msg) => AuthError::Transient(format!("malformed response: {}", msg)),
        StepError::MissingUserHash => AuthError::Transient(e.to_string()),
        StepError::Request(_) => AuthError::Transient(e.to_string()),
        StepError::HttpStatus(status, _) if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            AuthError::Transient(e.to_string())
        }
        StepError::HttpStatus(_, _) => AuthError::Transient(e.to_string()),
    }
}
