// Chat Session Error Types
// Feature: Browser Chat (001-chat-session)

use thiserror::Error;

use crate::services::engine::EngineError;

/// Chat session error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Setter received a value outside its accepted range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine failure surfaced to the caller
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Session error codes for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorCode {
    InvalidParameter,
    Storage,
    Config,
    Engine,
}

impl SessionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionErrorCode::InvalidParameter => "SESSION_INVALID_PARAMETER",
            SessionErrorCode::Storage => "SESSION_STORAGE",
            SessionErrorCode::Config => "SESSION_CONFIG",
            SessionErrorCode::Engine => "SESSION_ENGINE",
        }
    }
}

impl SessionError {
    pub fn code(&self) -> SessionErrorCode {
        match self {
            SessionError::InvalidParameter(_) => SessionErrorCode::InvalidParameter,
            SessionError::Storage(_) => SessionErrorCode::Storage,
            SessionError::Config(_) => SessionErrorCode::Config,
            SessionError::Engine(_) => SessionErrorCode::Engine,
        }
    }
}

impl From<SessionError> for String {
    fn from(err: SessionError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_is_transparent() {
        let err: SessionError = EngineError::NotLoaded.into();
        assert_eq!(err.to_string(), "No engine is loaded");
        assert_eq!(err.code().as_str(), "SESSION_ENGINE");
    }
}
