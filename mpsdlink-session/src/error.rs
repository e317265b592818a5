use reqwest::StatusCode;

#[derive(Debug)]
pub enum SessionError {
    Request(reqwest::Error),
    HttpStatus(StatusCode, String),
    NotActive,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Request(e) => write!(f, "request error: {}", e),
            SessionError::HttpStatus(status, body) => write!(f, "mpsd returned {}: {}", status, body),
            SessionError::NotActive => write!(f, "session is not active"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        SessionError::Request(e)
    }
}
