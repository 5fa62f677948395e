//! Error types and handling for Sunmine
//!
//! This module defines the error types used throughout the application,
//! providing consistent error handling and reporting. The variants map onto
//! the failure classes the control loop cares about: stale telemetry,
//! transient transport failures, commands rejected by the device, and
//! configuration errors that are fatal at startup.

use thiserror::Error;

/// Result type alias for Sunmine operations
pub type Result<T> = std::result::Result<T, SunmineError>;

/// Main error type for Sunmine
#[derive(Debug, Error)]
pub enum SunmineError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Transport failures talking to the miner or battery portal
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The device answered but refused the command
    #[error("Command rejected: {message}")]
    Rejected { message: String },

    /// Telemetry missing or older than the staleness window
    #[error("Stale data: {message}")]
    StaleData { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Malformed replies from a device or portal
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// HTTP/Web server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl SunmineError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new rejected-command error
    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create a new stale data error
    pub fn stale<S: Into<String>>(message: S) -> Self {
        Self::StaleData {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        Self::Web {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// True for failures worth retrying on the next eligible tick without
    /// operator intervention.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Io { .. } | Self::Protocol { .. }
        )
    }

    /// True for configuration problems that must stop startup.
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Validation { .. })
    }
}

impl From<std::io::Error> for SunmineError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for SunmineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SunmineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SunmineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for SunmineError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::timeout(err.to_string())
    }
}

impl From<chrono::ParseError> for SunmineError {
    fn from(err: chrono::ParseError) -> Self {
        Self::validation("datetime", &err.to_string())
    }
}
