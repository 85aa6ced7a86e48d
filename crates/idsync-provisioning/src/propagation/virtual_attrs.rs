//! Virtual attribute values.
//!
//! Virtual attributes are never stored: their value lives on a resource and
//! is read back whenever a task payload needs it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use idsync_connector::operation::AttributeSet;

use super::gateway::ConnectorGateway;
use crate::model::Identity;
use crate::store::ResourceCatalog;

/// Source of live virtual attribute values.
#[async_trait]
pub trait VirAttrHandler: Send + Sync {
    /// Current values of the named virtual attributes of an identity.
    ///
    /// Attributes that cannot be read are left out.
    async fn values(&self, identity: &Identity, names: &[String]) -> AttributeSet;
}

/// Handler for deployments without virtual attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVirtualAttributes;

#[async_trait]
impl VirAttrHandler for NoVirtualAttributes {
    async fn values(&self, _identity: &Identity, _names: &[String]) -> AttributeSet {
        AttributeSet::new()
    }
}

/// Where a virtual attribute is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirSchema {
    /// Resource holding the value.
    pub resource_key: String,
    /// Remote attribute name.
    pub remote_attribute: String,
}

/// Reads virtual attributes from the remote object on their source resource.
pub struct ResourceVirAttrHandler {
    gateway: ConnectorGateway,
    resources: Arc<dyn ResourceCatalog>,
    schemas: HashMap<String, VirSchema>,
}

impl ResourceVirAttrHandler {
    /// Create a handler without schemas.
    pub fn new(gateway: ConnectorGateway, resources: Arc<dyn ResourceCatalog>) -> Self {
        Self {
            gateway,
            resources,
            schemas: HashMap::new(),
        }
    }

    /// Declare a virtual attribute.
    #[must_use]
    pub fn with_schema(
        mut self,
        name: impl Into<String>,
        resource_key: impl Into<String>,
        remote_attribute: impl Into<String>,
    ) -> Self {
        self.schemas.insert(
            name.into(),
            VirSchema {
                resource_key: resource_key.into(),
                remote_attribute: remote_attribute.into(),
            },
        );
        self
    }

    async fn read_remote(&self, identity: &Identity, resource_key: &str) -> Option<AttributeSet> {
        let resource = match self.resources.find(resource_key).await {
            Ok(Some(resource)) => resource,
            Ok(None) => return None,
            Err(e) => {
                warn!(resource_key, error = %e, "Resource lookup failed");
                return None;
            }
        };
        let mapping = resource.mapping_for(identity.kind)?;
        let uid = mapping.conn_object_key(&identity.mapping_source()).ok()?;

        match self
            .gateway
            .get(resource_key, &mapping.object_class, &uid)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                warn!(
                    resource_key,
                    identity_key = %identity.key,
                    error = %e,
                    "Virtual attribute read failed"
                );
                None
            }
        }
    }
}

#[async_trait]
impl VirAttrHandler for ResourceVirAttrHandler {
    async fn values(&self, identity: &Identity, names: &[String]) -> AttributeSet {
        let mut by_resource: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
        for name in names {
            if let Some(schema) = self.schemas.get(name) {
                by_resource
                    .entry(schema.resource_key.as_str())
                    .or_default()
                    .push((name.as_str(), schema.remote_attribute.as_str()));
            }
        }

        let mut values = AttributeSet::new();
        for (resource_key, wanted) in by_resource {
            let Some(remote) = self.read_remote(identity, resource_key).await else {
                continue;
            };
            for (name, remote_attribute) in wanted {
                if let Some(value) = remote.get(remote_attribute) {
                    values.set(name, value.clone());
                }
            }
        }
        values
    }
}
