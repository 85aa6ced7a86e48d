//! Resource-keyed access to connectors.
//!
//! [`ConnectorGateway`] resolves the connector of a resource and bounds every
//! call with the configured timeout, so a hung target surfaces as
//! `ConnectorError::ConnectionTimeout` instead of stalling propagation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use idsync_connector::error::{ConnectorError, ConnectorResult};
use idsync_connector::operation::{AttributeSet, Filter, PageRequest, SearchResult, Uid};
use idsync_connector::traits::{FullConnector, SyncResult};

/// Provider of connectors by resource key.
#[async_trait]
pub trait ConnectorProvider: Send + Sync {
    /// Get the connector of a resource.
    async fn get_connector(&self, resource_key: &str) -> Option<Arc<dyn FullConnector>>;
}

/// Connector provider backed by a map.
#[derive(Clone, Default)]
pub struct StaticConnectorProvider {
    connectors: Arc<RwLock<HashMap<String, Arc<dyn FullConnector>>>>,
}

impl StaticConnectorProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the connector of a resource.
    pub async fn register(&self, resource_key: impl Into<String>, connector: Arc<dyn FullConnector>) {
        self.connectors
            .write()
            .await
            .insert(resource_key.into(), connector);
    }
}

#[async_trait]
impl ConnectorProvider for StaticConnectorProvider {
    async fn get_connector(&self, resource_key: &str) -> Option<Arc<dyn FullConnector>> {
        self.connectors.read().await.get(resource_key).cloned()
    }
}

/// Connector calls addressed by resource key, with a timeout.
#[derive(Clone)]
pub struct ConnectorGateway {
    provider: Arc<dyn ConnectorProvider>,
    timeout: Duration,
}

impl ConnectorGateway {
    /// Create a gateway.
    pub fn new(provider: Arc<dyn ConnectorProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn connector(&self, resource_key: &str) -> ConnectorResult<Arc<dyn FullConnector>> {
        self.provider
            .get_connector(resource_key)
            .await
            .ok_or_else(|| ConnectorError::ConnectorNotFound {
                resource_key: resource_key.to_string(),
            })
    }

    async fn bounded<T, F>(&self, call: F) -> ConnectorResult<T>
    where
        F: Future<Output = ConnectorResult<T>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_: tokio::time::error::Elapsed| ConnectorError::ConnectionTimeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    /// Create a remote object.
    pub async fn create(
        &self,
        resource_key: &str,
        object_class: &str,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid> {
        let connector = self.connector(resource_key).await?;
        self.bounded(connector.create(object_class, attributes))
            .await
    }

    /// Replace the given attributes of a remote object.
    pub async fn update(
        &self,
        resource_key: &str,
        object_class: &str,
        uid: &Uid,
        attributes: &AttributeSet,
    ) -> ConnectorResult<Uid> {
        let connector = self.connector(resource_key).await?;
        self.bounded(connector.update(object_class, uid, attributes.to_replace_delta()))
            .await
    }

    /// Delete a remote object.
    pub async fn delete(&self, resource_key: &str, object_class: &str, uid: &Uid) -> ConnectorResult<()> {
        let connector = self.connector(resource_key).await?;
        self.bounded(connector.delete(object_class, uid)).await
    }

    /// Read a remote object.
    pub async fn get(
        &self,
        resource_key: &str,
        object_class: &str,
        uid: &Uid,
    ) -> ConnectorResult<Option<AttributeSet>> {
        let connector = self.connector(resource_key).await?;
        self.bounded(connector.get(object_class, uid)).await
    }

    /// Search remote objects.
    pub async fn search(
        &self,
        resource_key: &str,
        object_class: &str,
        filter: Option<Filter>,
        page: Option<PageRequest>,
    ) -> ConnectorResult<SearchResult> {
        let connector = self.connector(resource_key).await?;
        self.bounded(connector.search(object_class, filter, page))
            .await
    }

    /// Fetch one batch of changes reported by the resource.
    pub async fn fetch_changes(
        &self,
        resource_key: &str,
        object_class: &str,
        sync_token: Option<&str>,
        batch_size: u32,
    ) -> ConnectorResult<SyncResult> {
        let connector = self.connector(resource_key).await?;
        self.bounded(connector.fetch_changes(object_class, sync_token, batch_size))
            .await
    }
}
