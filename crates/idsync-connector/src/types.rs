//! Connector type definitions
//!
//! Enums shared between the connector gateway and the provisioning engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of connector for external system integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    /// LDAP/Active Directory connector
    Ldap,
    /// Database connector (`PostgreSQL`, `MySQL`, etc.)
    Database,
    /// REST API connector
    Rest,
}

impl ConnectorType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Ldap => "ldap",
            ConnectorType::Database => "database",
            ConnectorType::Rest => "rest",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of operation to perform against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Create a new object in the target system
    Create,
    /// Update an existing object in the target system
    Update,
    /// Delete an object from the target system
    Delete,
}

impl OperationType {
    /// Get the string representation used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ParseOperationTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            _ => Err(ParseOperationTypeError(s.to_string())),
        }
    }
}

/// Error parsing operation type from string.
#[derive(Debug, Clone)]
pub struct ParseOperationTypeError(String);

impl fmt::Display for ParseOperationTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid operation type '{}', expected one of: create, update, delete",
            self.0
        )
    }
}

impl std::error::Error for ParseOperationTypeError {}
