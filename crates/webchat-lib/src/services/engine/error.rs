// Engine Error Types
// Feature: Browser Chat (001-chat-session)

use std::time::Duration;

use thiserror::Error;

/// Inference engine error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Generate was called before any engine finished loading
    #[error("No engine is loaded")]
    NotLoaded,

    /// Engine/model failed to initialize
    #[error("Failed to load engine: {0}")]
    LoadFailed(String),

    /// Model not offered by the engine
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Host cannot run the engine (missing GPU feature etc.)
    #[error("Engine not supported on this host: {0}")]
    Unsupported(String),

    /// Connection failed
    #[error("Cannot connect to engine: {0}")]
    ConnectionFailed(String),

    /// Error reported by the engine
    #[error("Engine error: {0}")]
    ApiError(String),

    /// Malformed engine output
    #[error("Response parse error: {0}")]
    ParseError(String),

    /// Generation was cancelled by the caller
    #[error("Generation cancelled")]
    Cancelled,

    /// Worker went away while a request was outstanding
    #[error("Engine worker terminated")]
    WorkerGone,

    /// No progress within the configured deadline
    #[error("Engine did not respond within {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            EngineError::ConnectionFailed(err.to_string())
        } else {
            EngineError::ApiError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ParseError(err.to_string())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error codes for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorCode {
    NotLoaded,
    LoadFailed,
    ModelNotFound,
    Unsupported,
    ConnectionFailed,
    ApiError,
    ParseError,
    Cancelled,
    WorkerGone,
    Timeout,
}

impl EngineErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorCode::NotLoaded => "ENGINE_NOT_LOADED",
            EngineErrorCode::LoadFailed => "ENGINE_LOAD_FAILED",
            EngineErrorCode::ModelNotFound => "ENGINE_MODEL_NOT_FOUND",
            EngineErrorCode::Unsupported => "ENGINE_UNSUPPORTED",
            EngineErrorCode::ConnectionFailed => "ENGINE_CONNECTION_FAILED",
            EngineErrorCode::ApiError => "ENGINE_API_ERROR",
            EngineErrorCode::ParseError => "ENGINE_PARSE_ERROR",
            EngineErrorCode::Cancelled => "ENGINE_CANCELLED",
            EngineErrorCode::WorkerGone => "ENGINE_WORKER_GONE",
            EngineErrorCode::Timeout => "ENGINE_TIMEOUT",
        }
    }
}

impl EngineError {
    pub fn code(&self) -> EngineErrorCode {
        match self {
            EngineError::NotLoaded => EngineErrorCode::NotLoaded,
            EngineError::LoadFailed(_) => EngineErrorCode::LoadFailed,
            EngineError::ModelNotFound(_) => EngineErrorCode::ModelNotFound,
            EngineError::Unsupported(_) => EngineErrorCode::Unsupported,
            EngineError::ConnectionFailed(_) => EngineErrorCode::ConnectionFailed,
            EngineError::ApiError(_) => EngineErrorCode::ApiError,
            EngineError::ParseError(_) => EngineErrorCode::ParseError,
            EngineError::Cancelled => EngineErrorCode::Cancelled,
            EngineError::WorkerGone => EngineErrorCode::WorkerGone,
            EngineError::Timeout(_) => EngineErrorCode::Timeout,
        }
    }

    /// Cancellation is expected and never surfaced as a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

impl From<EngineError> for String {
    fn from(err: EngineError) -> Self {
        err.to_string()
    }
}
