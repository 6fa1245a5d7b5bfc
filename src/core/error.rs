//! Unified error handling for routerflow
//!
//! Every fallible operation of the coordinator returns a
//! [`CoordinatorError`]. Handlers never surface these to the caller as
//! events; they are logged and the current invocation returns.

use thiserror::Error;

use crate::model::status::RouterStatus;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Aggregate store unreachable or rejected the operation
    #[error("Store error: {0}")]
    Store(String),

    /// Publish/subscribe transport failures
    #[error("Bus error: {0}")]
    Bus(String),

    /// Payload or stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Router identity fields missing
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid router status transition: {from} -> {to}")]
    InvalidTransition { from: RouterStatus, to: RouterStatus },

    /// Writing an aggregate without a service identifier
    #[error("Aggregate has an empty service identifier")]
    EmptyServiceId,

    /// Compare-and-put kept losing against concurrent writers
    #[error("Concurrent update conflict on key {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<etcd_client::Error> for CoordinatorError {
    fn from(err: etcd_client::Error) -> Self {
        CoordinatorError::Store(err.to_string())
    }
}

/// Result type alias for coordinator operations
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn store_context(self, context: &str) -> CoordinatorResult<T>;
    fn bus_context(self, context: &str) -> CoordinatorResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn store_context(self, context: &str) -> CoordinatorResult<T> {
        self.map_err(|e| CoordinatorError::Store(format!("{context}: {e}")))
    }

    fn bus_context(self, context: &str) -> CoordinatorResult<T> {
        self.map_err(|e| CoordinatorError::Bus(format!("{context}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoordinatorError::InvalidTransition {
            from: RouterStatus::Completed,
            to: RouterStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "Invalid router status transition: completed -> processing"
        );

        let err: CoordinatorResult<()> = Err("connection refused").store_context("get GPBRouters_a");
        assert!(matches!(err, Err(CoordinatorError::Store(msg)) if msg.contains("connection refused")));
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: CoordinatorError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CoordinatorError::Serialization(_)));
    }
}
