//! Connector error types
//!
//! Errors raised by connector calls, classified into connectivity faults
//! (the target could not be reached in time) and rejected operations (the
//! target answered but refused the change).

use thiserror::Error;

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connectivity errors (transient)
    /// Failed to establish connection to target system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection timed out.
    #[error("connection timeout after {timeout_ms} ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Target system is temporarily unavailable.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    /// Network error during communication.
    #[error("network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    // Rejected operations (permanent)
    /// Invalid credentials provided.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Insufficient permissions for the operation.
    #[error("authorization failed: insufficient permissions for {operation}")]
    AuthorizationFailed { operation: String },

    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// No connector is registered for the resource.
    #[error("no connector registered for resource '{resource_key}'")]
    ConnectorNotFound { resource_key: String },

    /// Object class not supported by the target.
    #[error("object class '{object_class}' not supported")]
    ObjectClassNotFound { object_class: String },

    /// Object already exists in target system (create conflict).
    #[error("object already exists: {identifier}")]
    ObjectAlreadyExists { identifier: String },

    /// Object not found in target system (update/delete target missing).
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// Constraint violation in target system.
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// Schema violation in target system.
    #[error("schema violation: {message}")]
    SchemaViolation { message: String },

    /// Invalid data format.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Operation failed.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation not supported by this connector.
    #[error("operation '{operation}' not supported by connector")]
    Unsupported { operation: String },
}

impl ConnectorError {
    /// Check if this error means the target could not be reached.
    ///
    /// Connectivity errors cover timeouts, refused or dropped connections and
    /// temporary unavailability of the target system.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::ConnectionTimeout { .. }
                | ConnectorError::TargetUnavailable { .. }
                | ConnectorError::NetworkError { .. }
        )
    }

    /// Check if this error is transient and a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        self.is_connectivity()
    }

    /// Check if this error is permanent: the target rejected the operation.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            ConnectorError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            ConnectorError::NetworkError { .. } => "NETWORK_ERROR",
            ConnectorError::AuthenticationFailed => "AUTH_FAILED",
            ConnectorError::AuthorizationFailed { .. } => "AUTHORIZATION_FAILED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            ConnectorError::ConnectorNotFound { .. } => "CONNECTOR_NOT_FOUND",
            ConnectorError::ObjectClassNotFound { .. } => "OBJECT_CLASS_NOT_FOUND",
            ConnectorError::ObjectAlreadyExists { .. } => "OBJECT_EXISTS",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            ConnectorError::SchemaViolation { .. } => "SCHEMA_VIOLATION",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::Unsupported { .. } => "UNSUPPORTED",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        ConnectorError::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a constraint violation error.
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        ConnectorError::ConstraintViolation {
            message: message.into(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
