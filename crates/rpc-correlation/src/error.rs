//! Engine error types.
//!
//! Only lifecycle, configuration and client-facade failures are errors.
//! Late replies, unrecognised notifications, malformed frames and timeouts
//! are logged or reported as an [`Outcome`](crate::Outcome) instead.

use crate::config::ConfigError;

/// Errors surfaced by the correlation engine.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// The engine has been shut down
    #[error("shutdown in progress")]
    ShuttingDown,

    /// `start()` was called on a running engine
    #[error("engine already started")]
    AlreadyStarted,

    /// A wait was requested with a zero timeout
    #[error("invalid timeout: must be greater than zero")]
    InvalidTimeout,

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The transport refused an outbound frame
    #[error("transport error: {0}")]
    Transport(String),

    /// A completed reply could not be decoded
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

/// Result type for engine operations
pub type CorrelationResult<T> = Result<T, CorrelationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: CorrelationError = ConfigError::InvalidInterval("zero".into()).into();
        assert!(matches!(err, CorrelationError::Config(_)));
        assert!(err.to_string().contains("zero"));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CorrelationError::ShuttingDown.to_string(),
            "shutdown in progress"
        );
        assert!(CorrelationError::Transport("closed".into())
            .to_string()
            .contains("closed"));
    }
}
