use thiserror::Error;

pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("AUTH_REQUIRED: {0}")]
    Unauthenticated(String),
    #[error("NETWORK_FAILURE: {0}")]
    Network(String),
    #[error("SERVER_ERROR ({status}): {}", .message.as_deref().unwrap_or("no message"))]
    Server { status: u16, message: Option<String> },
    #[error("PRECONDITION_FAILED: {0}")]
    Precondition(String),
    #[error("MUTATION_CONFLICT: {0}")]
    Conflict(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Text shown to the operator. Server payload messages are passed through
    /// verbatim; transport and internal failures collapse to a generic line.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated(_) => "Authentication required. Please sign in again.".to_string(),
            Self::Server {
                message: Some(message), ..
            } if !message.trim().is_empty() => message.clone(),
            Self::Precondition(reason) | Self::Conflict(reason) => reason.clone(),
            Self::NotFound(what) => what.clone(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        // Strip the URL so query strings never end up in surfaced messages.
        Self::Network(value.without_url().to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(format!("{value:#}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::{AppError, GENERIC_FAILURE_MESSAGE};

    #[test]
    fn server_message_is_used_verbatim() {
        let error = AppError::Server {
            status: 409,
            message: Some("Document setting is already active".to_string()),
        };
        assert_eq!(error.user_message(), "Document setting is already active");
        assert!(!error.is_retryable());
    }

    #[test]
    fn missing_server_message_falls_back_to_generic_text() {
        let error = AppError::Server {
            status: 502,
            message: None,
        };
        assert_eq!(error.user_message(), GENERIC_FAILURE_MESSAGE);
        assert!(error.is_retryable());
        assert!(error.to_string().starts_with("SERVER_ERROR (502)"));
    }

    #[test]
    fn network_failures_are_retryable() {
        let error = AppError::Network("connection reset".to_string());
        assert!(error.is_retryable());
        assert_eq!(error.user_message(), GENERIC_FAILURE_MESSAGE);
    }
}
