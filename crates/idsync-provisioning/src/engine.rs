//! Wiring of the engine components from one configuration.

use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::manager::ProvisioningManager;
use crate::propagation::{
    ConnectorGateway, ConnectorProvider, NoVirtualAttributes, PropagationTaskExecutor,
    PropagationTaskFactory, VirAttrHandler,
};
use crate::pushpull::{PullExecutor, PullResultHandler, PushExecutor};
use crate::store::{IdentityStore, ResourceCatalog, TaskExecStore};
use crate::workflow::{DefaultWorkflowAdapter, WorkflowAdapter};

/// Collaborators the engine is built from.
#[derive(Clone)]
pub struct EngineParts {
    pub identities: Arc<dyn IdentityStore>,
    pub resources: Arc<dyn ResourceCatalog>,
    pub exec_store: Arc<dyn TaskExecStore>,
    pub connectors: Arc<dyn ConnectorProvider>,
}

/// Fully wired provisioning engine.
#[derive(Clone)]
pub struct ProvisioningEngine {
    pub manager: ProvisioningManager,
    pub pull: PullExecutor,
    pub pull_handler: PullResultHandler,
    pub push: PushExecutor,
    pub gateway: ConnectorGateway,
}

/// Builder for [`ProvisioningEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    parts: EngineParts,
    workflow: Option<Arc<dyn WorkflowAdapter>>,
    vir_attrs: Option<Arc<dyn VirAttrHandler>>,
}

impl EngineBuilder {
    /// Start from a configuration and the storage/connector collaborators.
    pub fn new(config: EngineConfig, parts: EngineParts) -> Self {
        Self {
            config,
            parts,
            workflow: None,
            vir_attrs: None,
        }
    }

    /// Use a custom workflow adapter instead of [`DefaultWorkflowAdapter`].
    #[must_use]
    pub fn with_workflow(mut self, workflow: Arc<dyn WorkflowAdapter>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// Fetch virtual attributes through the given handler.
    #[must_use]
    pub fn with_vir_attrs(mut self, vir_attrs: Arc<dyn VirAttrHandler>) -> Self {
        self.vir_attrs = Some(vir_attrs);
        self
    }

    /// Build the engine.
    pub fn build(self) -> ProvisioningEngine {
        let EngineParts {
            identities,
            resources,
            exec_store,
            connectors,
        } = self.parts;

        let gateway = ConnectorGateway::new(connectors, self.config.connector_timeout());
        let workflow: Arc<dyn WorkflowAdapter> = match self.workflow {
            Some(workflow) => workflow,
            None => Arc::new(DefaultWorkflowAdapter::new(
                Arc::clone(&identities),
                Arc::clone(&resources),
            )),
        };
        let vir_attrs: Arc<dyn VirAttrHandler> = match self.vir_attrs {
            Some(vir_attrs) => vir_attrs,
            None => Arc::new(NoVirtualAttributes),
        };

        let factory = PropagationTaskFactory::new(Arc::clone(&resources), vir_attrs);
        let executor =
            PropagationTaskExecutor::new(gateway.clone(), Arc::clone(&exec_store), &self.config);
        let manager = ProvisioningManager::new(
            workflow,
            Arc::clone(&identities),
            exec_store,
            factory.clone(),
            executor.clone(),
        );

        let recon = &self.config.reconciliation;
        let pull_handler = PullResultHandler::new(
            manager.clone(),
            Arc::clone(&identities),
            Arc::clone(&resources),
            recon,
        );
        let pull = PullExecutor::new(
            gateway.clone(),
            Arc::clone(&resources),
            pull_handler.clone(),
            recon,
        );
        let push = PushExecutor::new(identities, resources, gateway.clone(), factory, executor, recon);

        info!(
            async_concurrency = self.config.async_concurrency,
            failure_policy = %self.config.failure_policy,
            "Provisioning engine ready"
        );

        ProvisioningEngine {
            manager,
            pull,
            pull_handler,
            push,
            gateway,
        }
    }
}
