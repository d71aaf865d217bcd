use std::fmt;

use thiserror::Error;

pub type StudioResult<T> = Result<T, StudioError>;

/// Failure taxonomy shared by adapters, the chat decoder, the tool loop,
/// the job queue and the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{provider} request failed{}: {message}", status_suffix(.status))]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("{0} returned no usable media")]
    EmptyResult(String),

    #[error("Timed out waiting for generation after {attempts} polling attempts")]
    Timeout { attempts: u32 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unrecognized {provider} response shape: {detail}")]
    UnrecognizedShape { provider: String, detail: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Auth,
    Provider,
    EmptyResult,
    Timeout,
    Parse,
    UnrecognizedShape,
    Storage,
    Transport,
    Cancelled,
}

impl StudioError {
    pub fn provider(provider: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    pub fn unrecognized(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnrecognizedShape {
            provider: provider.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::EmptyResult(_) => ErrorKind::EmptyResult,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Parse(_) => ErrorKind::Parse,
            Self::UnrecognizedShape { .. } => ErrorKind::UnrecognizedShape,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Parse failures inside the stream decoder and the tool loop are turned
    /// into log lines or in-conversation messages instead of aborting.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Provider => "provider",
            Self::EmptyResult => "empty_result",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::UnrecognizedShape => "unrecognized_shape",
            Self::Storage => "storage",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, StudioError};

    #[test]
    fn provider_error_includes_status_when_known() {
        let err = StudioError::provider("navy", Some(429), "rate limited");
        assert_eq!(err.to_string(), "navy request failed (429): rate limited");
        let err = StudioError::provider("navy", None, "boom");
        assert_eq!(err.to_string(), "navy request failed: boom");
        assert_eq!(err.kind(), ErrorKind::Provider);
    }

    #[test]
    fn only_parse_errors_are_locally_recoverable() {
        assert!(StudioError::Parse("bad json".to_string()).is_locally_recoverable());
        assert!(!StudioError::Timeout { attempts: 3 }.is_locally_recoverable());
        assert!(!StudioError::Auth("missing".to_string()).is_locally_recoverable());
    }
}
