//! Error types for the bridge.
//!
//! Three families live here: errors raised by the native library
//! ([`NativeError`]), errors surfaced to scripts ([`ScriptError`]), and
//! failures of the bridge machinery itself ([`BridgeError`]).

use crate::context::World;
use serde::{Deserialize, Serialize};

/// Error codes for categorizing bridge failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Work was scheduled on a context that has been torn down
    ContextClosed,
    /// A blocking call was made on the thread it would block
    WouldDeadlock,
    /// Scheduled work was dropped before it ran
    Abandoned,
    /// The native loop thread could not be started
    SpawnFailed,
    /// A required script global is missing
    MissingGlobal,
    /// Invalid configuration
    InvalidConfig,
    /// Error raised on the script side
    ScriptError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ContextClosed => write!(f, "CONTEXT_CLOSED"),
            ErrorCode::WouldDeadlock => write!(f, "WOULD_DEADLOCK"),
            ErrorCode::Abandoned => write!(f, "ABANDONED"),
            ErrorCode::SpawnFailed => write!(f, "SPAWN_FAILED"),
            ErrorCode::MissingGlobal => write!(f, "MISSING_GLOBAL"),
            ErrorCode::InvalidConfig => write!(f, "INVALID_CONFIG"),
            ErrorCode::ScriptError => write!(f, "SCRIPT_ERROR"),
        }
    }
}

/// Well-known native error domains
pub mod error_domains {
    /// I/O errors raised by the native library
    pub const IO_ERROR: &str = "g-io-error-quark";
    /// Errors raised by the bridge while talking to the native library
    pub const BRIDGE_ERROR: &str = "worldbridge-error-quark";
}

/// Error reported by a native `finish` entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeError {
    /// Error domain (quark name)
    pub domain: String,
    /// Domain-specific code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl NativeError {
    /// Create a new native error
    pub fn new(domain: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// Create an I/O domain error
    pub fn io(code: i32, message: impl Into<String>) -> Self {
        Self::new(error_domains::IO_ERROR, code, message)
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for NativeError {}

/// Script-visible error constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// `Error`
    Error,
    /// `TypeError`
    TypeError,
    /// `SyntaxError`
    SyntaxError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Error => write!(f, "Error"),
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::SyntaxError => write!(f, "SyntaxError"),
        }
    }
}

/// An error value thrown into, or raised by, the script runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptError {
    /// Error constructor
    pub kind: ErrorKind,

    /// Human-readable message
    pub message: String,

    /// Native error domain, when the error originated in the native library
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Native error code, when the error originated in the native library
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl ScriptError {
    /// Create a new script error
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            domain: None,
            code: None,
        }
    }

    /// Create a plain `Error`
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    /// Create a `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// Create a `SyntaxError`
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, message)
    }

    /// Attach the native domain and code
    pub fn with_native(mut self, domain: impl Into<String>, code: i32) -> Self {
        self.domain = Some(domain.into());
        self.code = Some(code);
        self
    }
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ScriptError {}

impl From<&NativeError> for ScriptError {
    fn from(e: &NativeError) -> Self {
        ScriptError::error(e.message.clone()).with_native(e.domain.clone(), e.code)
    }
}

impl From<NativeError> for ScriptError {
    fn from(e: NativeError) -> Self {
        ScriptError::from(&e)
    }
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Work was scheduled after the context was torn down
    #[error("{0} context has been closed")]
    ContextClosed(World),

    /// `perform` was called on the thread that would have to run the work
    #[error("perform() called on the {0} thread would deadlock")]
    WouldDeadlock(World),

    /// Work scheduled through `perform` was dropped before completing
    #[error("work scheduled on the {0} context was dropped before it completed")]
    Abandoned(World),

    /// The native loop thread failed to start
    #[error("failed to start native loop: {0}")]
    Spawn(#[from] std::io::Error),

    /// A script global the runtime depends on is missing
    #[error("script global `{0}` is missing or has the wrong type")]
    MissingGlobal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Error raised on the script side
    #[error("{0}")]
    Script(#[from] ScriptError),
}

impl BridgeError {
    /// Categorize the error
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::ContextClosed(_) => ErrorCode::ContextClosed,
            BridgeError::WouldDeadlock(_) => ErrorCode::WouldDeadlock,
            BridgeError::Abandoned(_) => ErrorCode::Abandoned,
            BridgeError::Spawn(_) => ErrorCode::SpawnFailed,
            BridgeError::MissingGlobal(_) => ErrorCode::MissingGlobal,
            BridgeError::Config(_) => ErrorCode::InvalidConfig,
            BridgeError::Script(_) => ErrorCode::ScriptError,
        }
    }
}

impl From<BridgeError> for ScriptError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Script(inner) => inner,
            other => ScriptError::error(other.to_string()),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
