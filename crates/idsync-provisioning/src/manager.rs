//! Provisioning manager: commit through the workflow, then propagate.
//!
//! Every operation that propagates returns the identity-level result together
//! with the per-resource statuses. A committed identity change is never
//! rolled back because a resource failed.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use idsync_connector::operation::AttributeSet;
use idsync_connector::types::OperationType;

use crate::intent::PropagationByResource;
use crate::model::Identity;
use crate::propagation::{
    PropagationError, PropagationStatus, PropagationTaskExecutor, PropagationTaskFactory,
    TaskExec, TaskPlan,
};
use crate::store::{IdentityStore, StoreError, TaskExecStore};
use crate::workflow::{IdentityCreate, IdentityUpdate, WorkflowAdapter, WorkflowError};

/// Errors returned by the provisioning manager.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The workflow refused or could not commit the change.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Propagation was aborted.
    #[error(transparent)]
    Propagation(#[from] PropagationError),

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProvisioningError {
    /// Check if the request was rejected before anything was committed.
    pub fn is_validation(&self) -> bool {
        matches!(self, ProvisioningError::Workflow(WorkflowError::Validation { .. }))
    }
}

/// Result type for provisioning operations.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Entry point for identity lifecycle operations with propagation.
///
/// `null_priority_async` runs every task after the first non-priority one
/// asynchronously; the first task always runs before the call returns, so
/// callers get at least one synchronous status even when no resource is
/// flagged as priority.
#[derive(Clone)]
pub struct ProvisioningManager {
    workflow: Arc<dyn WorkflowAdapter>,
    identities: Arc<dyn IdentityStore>,
    exec_store: Arc<dyn TaskExecStore>,
    factory: PropagationTaskFactory,
    executor: PropagationTaskExecutor,
}

impl ProvisioningManager {
    /// Create a manager.
    pub fn new(
        workflow: Arc<dyn WorkflowAdapter>,
        identities: Arc<dyn IdentityStore>,
        exec_store: Arc<dyn TaskExecStore>,
        factory: PropagationTaskFactory,
        executor: PropagationTaskExecutor,
    ) -> Self {
        Self {
            workflow,
            identities,
            exec_store,
            factory,
            executor,
        }
    }

    /// Task executor used for propagation.
    pub fn executor(&self) -> &PropagationTaskExecutor {
        &self.executor
    }

    /// Task factory used for propagation.
    pub fn factory(&self) -> &PropagationTaskFactory {
        &self.factory
    }

    async fn load(&self, key: &str) -> ProvisioningResult<Identity> {
        self.identities
            .find(key)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { key: key.to_string() }.into())
    }

    async fn propagate(
        &self,
        operation: OperationType,
        identity: &Identity,
        intents: PropagationByResource,
        vir_attrs: &AttributeSet,
        excluded: &HashSet<String>,
        null_priority_async: bool,
    ) -> ProvisioningResult<Vec<PropagationStatus>> {
        let plan = self
            .factory
            .build_tasks(operation, identity, intents, vir_attrs, excluded)
            .await?;
        self.run_plan(plan, null_priority_async).await
    }

    async fn run_plan(
        &self,
        plan: TaskPlan,
        null_priority_async: bool,
    ) -> ProvisioningResult<Vec<PropagationStatus>> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let reporter = self.executor.execute(plan, null_priority_async).await?;
        Ok(reporter.statuses())
    }

    /// Create an identity and propagate it to its resources.
    #[instrument(skip(self, request, excluded), fields(name = %request.name))]
    pub async fn create(
        &self,
        request: IdentityCreate,
        excluded: &HashSet<String>,
        null_priority_async: bool,
    ) -> ProvisioningResult<(String, Vec<PropagationStatus>)> {
        let created = self.workflow.create(request).await?;
        let identity = self.load(&created.result).await?;

        let statuses = self
            .propagate(
                OperationType::Create,
                &identity,
                created.prop_by_res,
                &AttributeSet::new(),
                excluded,
                null_priority_async,
            )
            .await?;

        info!(identity_key = %identity.key, statuses = statuses.len(), "Identity provisioned");
        Ok((created.result, statuses))
    }

    /// Update an identity and propagate the change.
    ///
    /// `vir_attrs` lists the virtual attributes touched by the change.
    #[instrument(skip(self, request, vir_attrs, excluded), fields(identity_key = %request.key))]
    pub async fn update(
        &self,
        request: IdentityUpdate,
        vir_attrs: &AttributeSet,
        excluded: &HashSet<String>,
        null_priority_async: bool,
    ) -> ProvisioningResult<(Identity, Vec<PropagationStatus>)> {
        let previous = self.load(&request.key).await?;
        let updated = self.workflow.update(request).await?;

        let plan = self
            .factory
            .build_update_tasks(
                &previous,
                &updated.result,
                updated.prop_by_res,
                vir_attrs,
                excluded,
            )
            .await?;
        let statuses = self.run_plan(plan, null_priority_async).await?;

        Ok((updated.result, statuses))
    }

    /// Delete an identity.
    ///
    /// Propagation runs first, while the identity can still be mapped; the
    /// identity is deleted afterwards whatever the resource outcomes.
    #[instrument(skip(self, excluded))]
    pub async fn delete(
        &self,
        key: &str,
        excluded: &HashSet<String>,
        null_priority_async: bool,
    ) -> ProvisioningResult<Vec<PropagationStatus>> {
        let identity = self.load(key).await?;
        let intents =
            PropagationByResource::new().with_all(OperationType::Delete, identity.resources.clone());

        let statuses = self
            .propagate(
                OperationType::Delete,
                &identity,
                intents,
                &AttributeSet::new(),
                excluded,
                null_priority_async,
            )
            .await?;

        self.workflow.delete(key).await?;
        info!(identity_key = %key, statuses = statuses.len(), "Identity deprovisioned and deleted");
        Ok(statuses)
    }

    /// Push the identity to the given resources without changing assignments.
    #[instrument(skip(self, resources, excluded))]
    pub async fn provision(
        &self,
        key: &str,
        resources: &[String],
        excluded: &HashSet<String>,
        null_priority_async: bool,
    ) -> ProvisioningResult<Vec<PropagationStatus>> {
        let identity = self.load(key).await?;
        let intents =
            PropagationByResource::new().with_all(OperationType::Update, resources.iter().cloned());

        self.propagate(
            OperationType::Update,
            &identity,
            intents,
            &AttributeSet::new(),
            excluded,
            null_priority_async,
        )
        .await
    }

    /// Remove the identity from the given resources without changing
    /// assignments. The identity's other resources are left untouched.
    #[instrument(skip(self, resources, excluded))]
    pub async fn deprovision(
        &self,
        key: &str,
        resources: &[String],
        excluded: &HashSet<String>,
        null_priority_async: bool,
    ) -> ProvisioningResult<Vec<PropagationStatus>> {
        let identity = self.load(key).await?;
        let intents =
            PropagationByResource::new().with_all(OperationType::Delete, resources.iter().cloned());
        let excluded: HashSet<String> = identity
            .resources
            .iter()
            .filter(|r| !resources.contains(r))
            .chain(excluded)
            .cloned()
            .collect();

        self.propagate(
            OperationType::Delete,
            &identity,
            intents,
            &AttributeSet::new(),
            &excluded,
            null_priority_async,
        )
        .await
    }

    /// Assign resources without propagating.
    #[instrument(skip(self, resources))]
    pub async fn link(&self, key: &str, resources: &[String]) -> ProvisioningResult<Identity> {
        let updated = self
            .workflow
            .update(IdentityUpdate::new(key).add_resources(resources.iter().cloned()))
            .await?;
        Ok(updated.result)
    }

    /// Unassign resources without propagating.
    #[instrument(skip(self, resources))]
    pub async fn unlink(&self, key: &str, resources: &[String]) -> ProvisioningResult<Identity> {
        let updated = self
            .workflow
            .update(IdentityUpdate::new(key).remove_resources(resources.iter().cloned()))
            .await?;
        Ok(updated.result)
    }

    /// Recorded task executions of an identity, oldest first.
    pub async fn executions(&self, key: &str) -> ProvisioningResult<Vec<TaskExec>> {
        Ok(self.exec_store.find_by_identity(key).await?)
    }
}
