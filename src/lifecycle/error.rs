//! Lifecycle-specific error types

use thiserror::Error;

/// Errors that can occur while starting up or tearing down a server
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A registered resource failed to close
    #[error("Failed to close {name}: {message}")]
    CloseFailed {
        /// Name the resource was registered under
        name: String,
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Timeout during {phase}: {message}")]
    Timeout {
        /// The lifecycle phase where timeout occurred
        phase: String,
        /// Additional error message
        message: String,
    },

    /// The user drain hook returned an error
    #[error("Drain failed: {0}")]
    DrainFailed(String),

    /// A resource was added after the stack was closed
    #[error("Server resources already closed; cannot add {0}")]
    AlreadyClosed(String),
}

impl LifecycleError {
    /// Create a close failure error
    pub fn close_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CloseFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Create a drain failure error
    pub fn drain_failed(msg: impl Into<String>) -> Self {
        Self::DrainFailed(msg.into())
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
