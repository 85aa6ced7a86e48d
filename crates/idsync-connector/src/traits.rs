//! Connector capability traits
//!
//! Capability-based trait definitions for connectors, inspired by `ConnId`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorResult;
use crate::operation::{AttributeDelta, AttributeSet, Filter, PageRequest, SearchResult, Uid};
use crate::types::{ConnectorType, OperationType};

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the type of this connector.
    fn connector_type(&self) -> ConnectorType;

    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Test the connection to the target system.
    async fn test_connection(&self) -> ConnectorResult<()>;
}

/// Capability for creating objects in the target system.
#[async_trait]
pub trait CreateOp: Connector {
    /// Create a new object and return its identifier in the target system.
    async fn create(&self, object_class: &str, attributes: AttributeSet) -> ConnectorResult<Uid>;
}

/// Capability for updating objects in the target system.
#[async_trait]
pub trait UpdateOp: Connector {
    /// Update an existing object.
    ///
    /// Returns the UID of the updated object (may change for some systems).
    async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        changes: AttributeDelta,
    ) -> ConnectorResult<Uid>;
}

/// Capability for deleting objects from the target system.
#[async_trait]
pub trait DeleteOp: Connector {
    /// Delete an object from the target system.
    async fn delete(&self, object_class: &str, uid: &Uid) -> ConnectorResult<()>;
}

/// Capability for searching objects in the target system.
#[async_trait]
pub trait SearchOp: Connector {
    /// Search for objects in the target system.
    async fn search(
        &self,
        object_class: &str,
        filter: Option<Filter>,
        page_request: Option<PageRequest>,
    ) -> ConnectorResult<SearchResult>;

    /// Get a single object by its UID.
    async fn get(&self, object_class: &str, uid: &Uid) -> ConnectorResult<Option<AttributeSet>> {
        let filter = Filter::eq(uid.attribute_name(), uid.value());
        let result = self.search(object_class, Some(filter), None).await?;
        Ok(result.objects.into_iter().next())
    }
}

/// Capability for reporting changes made directly in the target system.
#[async_trait]
pub trait SyncCapable: Connector {
    /// Fetch changes from the target system since the last sync.
    ///
    /// When `sync_token` is `None` the connector performs an initial sync,
    /// returning all current objects as create deltas.
    async fn fetch_changes(
        &self,
        object_class: &str,
        sync_token: Option<&str>,
        batch_size: u32,
    ) -> ConnectorResult<SyncResult>;
}

/// A connector bundle with every capability the engine relies on.
pub trait FullConnector:
    Connector + CreateOp + UpdateOp + DeleteOp + SearchOp + SyncCapable + Send + Sync
{
}

impl<T> FullConnector for T where
    T: Connector + CreateOp + UpdateOp + DeleteOp + SearchOp + SyncCapable + Send + Sync
{
}

/// One change reported by a target system.
#[derive(Debug, Clone)]
pub struct SyncDelta {
    /// The unique identifier of the changed object.
    pub uid: Uid,
    /// The type of change.
    pub change_type: OperationType,
    /// The object class (e.g., "user", "group").
    pub object_class: String,
    /// Attribute snapshot of the object (empty for deletes).
    pub attributes: AttributeSet,
    /// Timestamp of the change (if provided by the source system).
    pub timestamp: Option<DateTime<Utc>>,
}

impl SyncDelta {
    /// Create a delta for a created object.
    pub fn created(uid: Uid, object_class: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            uid,
            change_type: OperationType::Create,
            object_class: object_class.into(),
            attributes,
            timestamp: None,
        }
    }

    /// Create a delta for an updated object.
    pub fn updated(uid: Uid, object_class: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            uid,
            change_type: OperationType::Update,
            object_class: object_class.into(),
            attributes,
            timestamp: None,
        }
    }

    /// Create a delta for a deleted object.
    pub fn deleted(uid: Uid, object_class: impl Into<String>) -> Self {
        Self {
            uid,
            change_type: OperationType::Delete,
            object_class: object_class.into(),
            attributes: AttributeSet::new(),
            timestamp: None,
        }
    }

    /// Set the timestamp of the change.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Result of fetching changes during synchronization.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// The changes detected.
    pub changes: Vec<SyncDelta>,
    /// The token to pass on the next fetch.
    pub new_token: Option<String>,
    /// Whether there are more changes to fetch.
    pub has_more: bool,
}

impl SyncResult {
    /// Create a new sync result with no changes.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a new sync result with changes.
    #[must_use]
    pub fn with_changes(changes: Vec<SyncDelta>) -> Self {
        Self {
            changes,
            new_token: None,
            has_more: false,
        }
    }

    /// Set the new sync token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.new_token = Some(token.into());
        self
    }

    /// Indicate that there are more changes to fetch.
    #[must_use]
    pub fn with_more(mut self) -> Self {
        self.has_more = true;
        self
    }
}
