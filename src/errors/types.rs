//! Error type definitions for tsmonitor
//!
//! Errors are split by the layer that raises them. Only configuration and
//! metrics-registration failures are fatal; everything at or below the
//! analyzer process level is logged and retried by the supervisor.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Metric family could not be created or registered
    #[error("Metrics registration error: {0}")]
    Registration(#[from] prometheus::Error),

    /// Supervisor lifecycle errors
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Analyzer output could not be interpreted
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a stream supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// `start` was called while a supervision loop is still active
    #[error("Supervisor already running for {stream}")]
    AlreadyRunning { stream: String },

    /// The analyzer process could not be spawned
    #[error("Failed to spawn {program} for {stream}: {source}")]
    Spawn {
        program: String,
        stream: String,
        #[source]
        source: std::io::Error,
    },

    /// The spawned process did not expose a piped stdout/stderr
    #[error("Analyzer {pipe} pipe unavailable for {stream}")]
    PipeUnavailable { pipe: &'static str, stream: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Numeric failures while parsing analyzer output
///
/// Every other extraction degrades to an empty value instead of failing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid {field} bitrate '{value}': {reason}")]
    Bitrate {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl SupervisorError {
    /// Create an already-running error for the given stream
    pub fn already_running<S: Into<String>>(stream: S) -> Self {
        Self::AlreadyRunning {
            stream: stream.into(),
        }
    }
}
