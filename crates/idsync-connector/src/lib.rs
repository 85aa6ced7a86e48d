//! # Connector Gateway
//!
//! Uniform access to the external resources that idsync provisions and
//! reconciles.
//!
//! ## Architecture
//!
//! The gateway uses a capability-based trait system inspired by `ConnId`:
//!
//! - [`Connector`] - Base trait all connectors implement
//! - [`CreateOp`], [`UpdateOp`], [`DeleteOp`] - CRUD operations
//! - [`SearchOp`] - Search and retrieve objects
//! - [`SyncCapable`] - Report changes made directly on the resource
//!
//! [`FullConnector`] bundles every capability; the provisioning engine only
//! talks to connectors through it.
//!
//! ## Example
//!
//! ```ignore
//! use idsync_connector::prelude::*;
//!
//! let mapping = MappingConfiguration::new(
//!     "user",
//!     vec![MappingRule::attribute("uid", "username").as_connector_object_key()],
//! );
//! let mapped = mapping.map_outbound(&identity_attrs, OperationType::Create)?;
//! let uid = connector.create("user", mapped.attributes).await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`types`] - Enums shared with the engine
//! - [`error`] - Errors classified into connectivity and rejection
//! - [`traits`] - Connector capability traits
//! - [`operation`] - Operation types (Uid, `AttributeSet`, Filter)
//! - [`mapping`] - Resource mapping and connector object key resolution
//!
//! [`Connector`]: traits::Connector
//! [`CreateOp`]: traits::CreateOp
//! [`UpdateOp`]: traits::UpdateOp
//! [`DeleteOp`]: traits::DeleteOp
//! [`SearchOp`]: traits::SearchOp
//! [`SyncCapable`]: traits::SyncCapable
//! [`FullConnector`]: traits::FullConnector

pub mod error;
pub mod mapping;
pub mod operation;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use idsync_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::mapping::{
        AttributeSource, CorrelationRule, MappedObject, MappingConfiguration, MappingError,
        MappingResult, MappingRule, Transform, ENABLE_ATTRIBUTE,
    };
    pub use crate::operation::{
        AttributeDelta, AttributeSet, AttributeValue, Filter, PageRequest, SearchResult, Uid,
    };
    pub use crate::traits::{
        Connector, CreateOp, DeleteOp, FullConnector, SearchOp, SyncCapable, SyncDelta,
        SyncResult, UpdateOp,
    };
    pub use crate::types::{ConnectorType, OperationType};
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;
