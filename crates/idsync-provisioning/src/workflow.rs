//! Identity lifecycle workflow.
//!
//! The workflow validates and commits identity changes, then tells the
//! engine where the change has to be propagated through a
//! [`PropagationByResource`]. Committing and propagating are separate steps:
//! a committed change stays committed whatever happens on the resources.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use idsync_connector::operation::{AttributeSet, AttributeValue};
use idsync_connector::types::OperationType;

use crate::intent::PropagationByResource;
use crate::model::{AnyTypeKind, Identity};
use crate::store::{IdentityStore, ResourceCatalog, StoreError};

/// Errors raised by a workflow adapter.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The request is invalid; nothing was committed.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The identity does not exist.
    #[error("Identity not found: {key}")]
    NotFound { key: String },

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Outcome of a committed workflow transition.
#[derive(Debug, Clone)]
pub struct WorkflowResult<T> {
    /// Committed result.
    pub result: T,
    /// Where the change must be propagated.
    pub prop_by_res: PropagationByResource,
    /// Workflow steps performed.
    pub performed_tasks: Vec<String>,
}

impl<T> WorkflowResult<T> {
    /// Build a result.
    pub fn new(result: T, prop_by_res: PropagationByResource, performed_tasks: Vec<String>) -> Self {
        Self {
            result,
            prop_by_res,
            performed_tasks,
        }
    }
}

/// Request to create an identity.
#[derive(Debug, Clone)]
pub struct IdentityCreate {
    /// Key to assign; generated when absent.
    pub key: Option<String>,
    /// Identity kind.
    pub kind: AnyTypeKind,
    /// Unique name.
    pub name: String,
    /// Plain attributes.
    pub attributes: AttributeSet,
    /// Resources to assign, in order.
    pub resources: Vec<String>,
    /// Initial enabled status.
    pub enabled: Option<bool>,
}

impl IdentityCreate {
    /// Request for an identity without attributes or resources.
    pub fn new(kind: AnyTypeKind, name: impl Into<String>) -> Self {
        Self {
            key: None,
            kind,
            name: name.into(),
            attributes: AttributeSet::new(),
            resources: Vec::new(),
            enabled: None,
        }
    }

    /// Use a fixed key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the plain attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }

    /// Assign a resource.
    #[must_use]
    pub fn with_resource(mut self, resource_key: impl Into<String>) -> Self {
        let resource_key = resource_key.into();
        if !self.resources.contains(&resource_key) {
            self.resources.push(resource_key);
        }
        self
    }

    /// Set the enabled status.
    #[must_use]
    pub fn with_enabled(mut self, enabled: Option<bool>) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Request to update an identity.
#[derive(Debug, Clone, Default)]
pub struct IdentityUpdate {
    /// Identity to update.
    pub key: String,
    /// New name.
    pub name: Option<String>,
    /// Attributes to set or replace.
    pub attributes: AttributeSet,
    /// Attributes to remove.
    pub remove_attributes: Vec<String>,
    /// Resources to assign.
    pub resources_to_add: Vec<String>,
    /// Resources to unassign.
    pub resources_to_remove: Vec<String>,
    /// New enabled status.
    pub enabled: Option<bool>,
}

impl IdentityUpdate {
    /// Empty update of an identity.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Set one attribute.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.set(name, value);
        self
    }

    /// Set several attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes.merge(&attributes);
        self
    }

    /// Assign resources.
    #[must_use]
    pub fn add_resources<I, S>(mut self, resource_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources_to_add
            .extend(resource_keys.into_iter().map(Into::into));
        self
    }

    /// Unassign resources.
    #[must_use]
    pub fn remove_resources<I, S>(mut self, resource_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources_to_remove
            .extend(resource_keys.into_iter().map(Into::into));
        self
    }

    /// Set the enabled status.
    #[must_use]
    pub fn with_enabled(mut self, enabled: Option<bool>) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check if the request only touches resource assignments.
    pub fn is_resources_only(&self) -> bool {
        self.name.is_none()
            && self.attributes.is_empty()
            && self.remove_attributes.is_empty()
            && self.enabled.is_none()
    }
}

/// Validates and commits identity lifecycle transitions.
#[async_trait]
pub trait WorkflowAdapter: Send + Sync {
    /// Create an identity; the result is the new identity key.
    async fn create(&self, request: IdentityCreate) -> Result<WorkflowResult<String>, WorkflowError>;

    /// Update an identity; the result is the committed identity.
    async fn update(
        &self,
        request: IdentityUpdate,
    ) -> Result<WorkflowResult<Identity>, WorkflowError>;

    /// Delete an identity.
    async fn delete(&self, key: &str) -> Result<(), WorkflowError>;
}

/// In-process workflow committing straight to an [`IdentityStore`].
#[derive(Clone)]
pub struct DefaultWorkflowAdapter {
    identities: Arc<dyn IdentityStore>,
    resources: Arc<dyn ResourceCatalog>,
}

impl DefaultWorkflowAdapter {
    /// Create a new adapter.
    pub fn new(identities: Arc<dyn IdentityStore>, resources: Arc<dyn ResourceCatalog>) -> Self {
        Self {
            identities,
            resources,
        }
    }

    async fn check_resources(&self, resource_keys: &[String]) -> Result<(), WorkflowError> {
        for key in resource_keys {
            if self.resources.find(key).await?.is_none() {
                return Err(WorkflowError::validation(format!("unknown resource '{key}'")));
            }
        }
        Ok(())
    }

    async fn check_name(
        &self,
        kind: AnyTypeKind,
        name: &str,
        own_key: Option<&str>,
    ) -> Result<(), WorkflowError> {
        if name.trim().is_empty() {
            return Err(WorkflowError::validation("name must not be empty"));
        }
        match self.identities.find_by_name(kind, name).await? {
            Some(existing) if Some(existing.key.as_str()) != own_key => Err(
                WorkflowError::validation(format!("{kind} '{name}' already exists")),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl WorkflowAdapter for DefaultWorkflowAdapter {
    #[instrument(skip(self, request), fields(kind = %request.kind, name = %request.name))]
    async fn create(&self, request: IdentityCreate) -> Result<WorkflowResult<String>, WorkflowError> {
        self.check_name(request.kind, &request.name, None).await?;
        self.check_resources(&request.resources).await?;

        let key = request.key.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.identities.find(&key).await?.is_some() {
            return Err(WorkflowError::validation(format!("key '{key}' already in use")));
        }

        let mut identity = Identity::new(key.clone(), request.kind, request.name);
        identity.attributes = request.attributes;
        identity.enabled = request.enabled;
        for resource_key in &request.resources {
            identity.assign(resource_key.clone());
        }
        self.identities.save(&identity).await?;

        let prop_by_res =
            PropagationByResource::new().with_all(OperationType::Create, identity.resources.clone());

        let mut performed_tasks = vec!["create".to_string()];
        if identity.enabled == Some(false) {
            performed_tasks.push("suspend".to_string());
        }

        info!(identity_key = %key, resources = identity.resources.len(), "Identity created");
        Ok(WorkflowResult::new(key, prop_by_res, performed_tasks))
    }

    #[instrument(skip(self, request), fields(identity_key = %request.key))]
    async fn update(
        &self,
        request: IdentityUpdate,
    ) -> Result<WorkflowResult<Identity>, WorkflowError> {
        let mut identity = self
            .identities
            .find(&request.key)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                key: request.key.clone(),
            })?;

        if let Some(name) = &request.name {
            self.check_name(identity.kind, name, Some(&identity.key))
                .await?;
        }
        self.check_resources(&request.resources_to_add).await?;

        let resources_only = request.is_resources_only();
        let mut performed_tasks = vec!["update".to_string()];

        if let Some(name) = request.name {
            identity.name = name;
        }
        identity.attributes.merge(&request.attributes);
        for name in &request.remove_attributes {
            identity.attributes.remove(name);
        }
        if let Some(enabled) = request.enabled {
            if identity.enabled != Some(enabled) {
                performed_tasks.push(if enabled { "reactivate" } else { "suspend" }.to_string());
            }
            identity.enabled = Some(enabled);
        }

        let mut prop_by_res = PropagationByResource::new();
        for resource_key in &request.resources_to_remove {
            if identity.unassign(resource_key) {
                prop_by_res = prop_by_res.with(OperationType::Delete, resource_key.clone());
            }
        }
        let retained = identity.resources.clone();
        let mut added = Vec::new();
        for resource_key in &request.resources_to_add {
            if identity.assign(resource_key.clone()) {
                added.push(resource_key.clone());
            }
        }
        if !resources_only {
            prop_by_res = prop_by_res.with_all(OperationType::Update, retained);
        }
        prop_by_res = prop_by_res.with_all(OperationType::Create, added);

        self.identities.save(&identity).await?;

        debug!(intents = prop_by_res.len(), "Identity updated");
        Ok(WorkflowResult::new(identity, prop_by_res, performed_tasks))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), WorkflowError> {
        if !self.identities.delete(key).await? {
            return Err(WorkflowError::NotFound {
                key: key.to_string(),
            });
        }
        info!(identity_key = %key, "Identity deleted");
        Ok(())
    }
}
