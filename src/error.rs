//! Error types for the cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache engine.
///
/// Request-path operations never hand these to callers; they are logged and
/// folded into a miss or a `false` return. Only [`Error::Config`] is fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (rejected at construction)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Shared Store Errors
    // =========================================================================
    /// Shared store operation failed
    #[error("Shared store error during {operation}: {reason}")]
    SharedStore { operation: String, reason: String },

    /// Shared store call exceeded its timeout
    #[error("Shared store {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Redis client error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error
    #[error("Redis pool error: {0}")]
    RedisPool(String),

    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Monitoring & Alerting Errors
    // =========================================================================
    /// Resource reading failed
    #[error("Resource read failed: {0}")]
    ResourceRead(String),

    /// Metric missing from a snapshot
    #[error("Metric unavailable: {0}")]
    MetricUnavailable(String),

    /// Alert not found
    #[error("Alert not found: {0}")]
    AlertNotFound(uuid::Uuid),

    /// Alert is not in a state that permits the transition
    #[error("Alert {id} cannot be {action}: already resolved")]
    InvalidAlertTransition { id: uuid::Uuid, action: String },

    /// Notification delivery failed
    #[error("Notification via {sink} failed: {reason}")]
    Notification { sink: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-friendly label used as a sample's `error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::SharedStore { .. } => "shared_store",
            Error::Timeout { .. } => "timeout",
            Error::Redis(_) | Error::RedisPool(_) => "redis",
            Error::CompressionFailed { .. } | Error::DecompressionFailed { .. } => "compression",
            Error::ResourceRead(_) => "resource_read",
            Error::MetricUnavailable(_) => "metric_unavailable",
            Error::AlertNotFound(_) => "alert_not_found",
            Error::InvalidAlertTransition { .. } => "invalid_transition",
            Error::Notification { .. } => "notification",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            operation: "get".into(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "Shared store get timed out after 250ms");
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_serialization_from() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: Error = parse.unwrap_err().into();
        assert_eq!(err.kind(), "serialization");
    }
}
