use shared::error::ApiError;
use thiserror::Error;

/// Failures surfaced by a [`crate::TrackingSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
    #[error("{0}")]
    NotFound(String),
    #[error("tracking backend error: {0}")]
    Backend(String),
    #[error("change subscription failed: {0}")]
    Subscription(String),
}

impl From<reqwest::Error> for TrackingError {
    fn from(value: reqwest::Error) -> Self {
        TrackingError::Backend(value.to_string())
    }
}

/// Failures from admin calls. The server's rejection is kept intact so callers
/// can show its message and leave local state untouched.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("server rejected request ({status}): {}", .error.message)]
    Rejected { status: u16, error: ApiError },
    #[error("admin request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl AdminError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            AdminError::Rejected { error, .. } => Some(error),
            AdminError::Transport(_) => None,
        }
    }
}
