//! Unified error types for the courier core engine.
//!
//! Every error here derives `Clone` so task results can be cached inside a
//! [`TaskHandle`](crate::scheduler::TaskHandle) and observed by any number
//! of waiters.

use thiserror::Error;

// ============================================================================
// Filter Errors
// ============================================================================

/// Error raised inside a filter predicate.
///
/// Filter errors never abort dispatch: the evaluator treats a failing
/// predicate as a non-match. The type exists so fallible predicates can use
/// `?` on payload lookups instead of nesting `if let` chains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// A required key path was absent from the payload.
    #[error("missing key '{0}'")]
    MissingKey(String),

    /// The payload did not have the shape the predicate expected.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ============================================================================
// Handler Errors
// ============================================================================

/// Error returned by user handler code.
///
/// A handler error terminates the current handler chain for that update; it
/// is logged by the registry and never crashes the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ApiError> for HandlerError {
    fn from(err: ApiError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<TaskError> for HandlerError {
    fn from(err: TaskError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors raised by handler registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry was locked by the polling loop; permanent handlers must
    /// be registered before polling starts.
    #[error("handler registry is locked; register handlers before polling starts")]
    Locked,
    /// Registration targeted [`EventType::Unknown`], which the dispatcher
    /// drops before any handler can see it.
    ///
    /// [`EventType::Unknown`]: crate::update::EventType::Unknown
    #[error("cannot register for the unknown event type; such updates are never dispatched")]
    UnknownEventType,
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Network-level failures below the API protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection broke mid-request.
    #[error("I/O error: {0}")]
    Io(String),

    /// The HTTP exchange itself failed (malformed response, protocol error).
    #[error("HTTP error: {0}")]
    Http(String),
}

// ============================================================================
// API Errors
// ============================================================================

/// Error type for outbound API calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The API rejected the request.
    #[error("'{method}' -> HTTP {code}: {description}")]
    Telegram {
        /// The API method that failed.
        method: String,
        /// HTTP status code returned by the API.
        code: u16,
        /// The `description` field of the error response.
        description: String,
        /// Server-suggested pause before retrying, in seconds.
        retry_after: Option<u64>,
    },

    /// Network failure below the API protocol.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Request or response (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The retry budget for a single call was exhausted.
    #[error("'{method}' failed after {attempts} attempts")]
    MaxRetriesExceeded {
        /// The API method that failed.
        method: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The bot token does not have the required shape.
    #[error("invalid bot API token")]
    InvalidToken,
}

impl ApiError {
    /// Whether the transport should retry this error after a pause.
    ///
    /// Covers rate limiting (429), transient server-side failures
    /// (500/502/504), timeouts and network errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Telegram { code, .. } => matches!(code, 429 | 500 | 502 | 504),
            Self::Transport(_) | Self::Timeout => true,
            _ => false,
        }
    }

    /// Whether this error must terminate the polling loop.
    ///
    /// `401 Unauthorized` means the token was revoked; `409 Conflict` means
    /// another consumer (a webhook or a second process) owns the update
    /// stream. Neither can be resolved by retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Telegram {
                code: 401 | 409,
                ..
            } | Self::InvalidToken
        )
    }

    /// The server-suggested retry pause, if one was supplied.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Self::Telegram {
                retry_after: Some(secs),
                ..
            } => Some(std::time::Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ============================================================================
// Task Errors
// ============================================================================

/// Terminal error of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task's API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The task was cancelled before or during execution.
    #[error("task was cancelled")]
    Cancelled,

    /// The pool was torn down without reporting a result for this task.
    #[error("task result was lost")]
    Lost,
}

// ============================================================================
// Result Type Aliases
// ============================================================================

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;
