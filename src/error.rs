//! Error types for simchart.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions and render a message naming the attempted action.

use thiserror::Error;

/// Validation errors raised before any remote call is made.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Simulation title cannot be empty")]
    EmptyTitle,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Unknown section '{label}'")]
    UnknownSection {
        label: String,
    },

    #[error("Invalid audience '{value}' (expected admin, student or all)")]
    InvalidAudience {
        value: String,
    },

    #[error("Invalid role '{value}' (expected admin or student)")]
    InvalidRole {
        value: String,
    },

    #[error("Invalid email address '{email}'")]
    InvalidEmail {
        email: String,
    },

    #[error("Password must be at least {min_length} characters")]
    WeakPassword {
        min_length: usize,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors raised while carrying out an operation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Record not found: {collection}/{id}")]
    RecordNotFound {
        collection: String,
        id: String,
    },

    #[error("Permission denied: {role} may not {action}")]
    PermissionDenied {
        action: String,
        role: String,
    },

    #[error("No user is signed in")]
    NotSignedIn,

    #[error("Authentication failed: {reason}")]
    AuthenticationFailed {
        reason: String,
    },

    #[error("Refusing to rewrite malformed field '{field}': {reason}")]
    MalformedAggregate {
        field: String,
        reason: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Failures reported by the remote document collection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Remote denied access: {message}")]
    PermissionDenied {
        message: String,
    },

    #[error("Quota exceeded: {message}")]
    QuotaExceeded {
        message: String,
    },

    #[error("Failed to serialize document: {message}")]
    SerializationFailed {
        message: String,
    },
}

/// Top-level error type for simchart.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SimError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-found error for a document in a collection.
    #[must_use]
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::RecordNotFound {
            collection: collection.into(),
            id: id.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if a mutation targeted a record that does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::RecordNotFound { .. }))
    }

    /// Returns true if the action was refused for the caller's role.
    #[must_use]
    pub const fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::PermissionDenied { .. }))
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if retrying the same call could succeed.
    ///
    /// The store never retries on its own; this is advisory for callers.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(e, ExecutionError::Timeout { .. }),
            Self::Transport(e) => matches!(e, TransportError::ConnectionFailed { .. }),
        }
    }
}

/// Result type alias for simchart operations.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_empty_title() {
        let msg = ValidationError::EmptyTitle.to_string();
        assert!(msg.contains("title"));
    }

    #[test]
    fn test_validation_error_too_long() {
        let err = ValidationError::FieldTooLong {
            field: "title".to_string(),
            max_length: 200,
        };
        let msg = format!("{err}");
        assert!(msg.contains("title"));
        assert!(msg.contains("200"));
    }

    #[test]
    fn test_execution_error_not_found() {
        let err = SimError::not_found("simulations", "abc");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("simulations/abc"));
    }

    #[test]
    fn test_permission_denied_names_action() {
        let err: SimError = ExecutionError::PermissionDenied {
            action: "toggle lock".to_string(),
            role: "student".to_string(),
        }
        .into();
        assert!(err.is_permission_denied());
        assert!(err.to_string().contains("student may not toggle lock"));
    }

    #[test]
    fn test_transport_error() {
        let err = TransportError::ConnectionFailed {
            message: "refused".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Connection failed"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_sim_error_internal() {
        let err = SimError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }

    #[test]
    fn test_sim_error_retryable() {
        let err1: SimError = ValidationError::EmptyTitle.into();
        assert!(err1.is_validation());
        assert!(!err1.is_retryable());

        let err2: SimError = ExecutionError::Timeout { duration_ms: 100 }.into();
        assert!(err2.is_retryable());

        let err3: SimError = TransportError::ConnectionFailed {
            message: "offline".to_string(),
        }
        .into();
        assert!(err3.is_transport());
        assert!(err3.is_retryable());

        let err4: SimError = TransportError::PermissionDenied {
            message: "rules".to_string(),
        }
        .into();
        assert!(!err4.is_retryable());
    }
}
