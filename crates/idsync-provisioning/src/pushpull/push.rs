//! Push reconciliation: identity state out to one resource.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use idsync_connector::mapping::MappingConfiguration;
use idsync_connector::operation::AttributeSet;
use idsync_connector::types::OperationType;

use super::report::{Direction, ProvisioningReport, ReconciliationReport};
use super::{load_mapping, PushTask, ReconciliationError};
use crate::config::ReconciliationConfig;
use crate::intent::PropagationByResource;
use crate::model::Identity;
use crate::propagation::{
    ConnectorGateway, ExecStatus, PropagationStatus, PropagationTaskExecutor,
    PropagationTaskFactory,
};
use crate::store::{IdentityStore, ResourceCatalog};

/// Walks the identities assigned to a resource and propagates each one to
/// that resource only.
///
/// Identities are read one page at a time. The remote object decides the
/// action: an existing one is updated, a missing one created.
#[derive(Clone)]
pub struct PushExecutor {
    identities: Arc<dyn IdentityStore>,
    resources: Arc<dyn ResourceCatalog>,
    gateway: ConnectorGateway,
    factory: PropagationTaskFactory,
    executor: PropagationTaskExecutor,
    page_size: usize,
    concurrency: usize,
}

impl PushExecutor {
    /// Create a push executor.
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        resources: Arc<dyn ResourceCatalog>,
        gateway: ConnectorGateway,
        factory: PropagationTaskFactory,
        executor: PropagationTaskExecutor,
        config: &ReconciliationConfig,
    ) -> Self {
        Self {
            identities,
            resources,
            gateway,
            factory,
            executor,
            page_size: config.page_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Run one push cycle.
    #[instrument(skip(self, task, cancel), fields(resource_key = %task.resource_key, kind = %task.kind))]
    pub async fn run(
        &self,
        task: &PushTask,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let (resource, mapping) =
            load_mapping(self.resources.as_ref(), &task.resource_key, task.kind).await?;

        let mut report = ReconciliationReport::new(&task.resource_key, task.kind, Direction::Push);
        report.dry_run = task.dry_run;
        let mut offset = 0;

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let page = self
                .identities
                .find_by_resource(task.kind, &task.resource_key, offset, self.page_size)
                .await?;
            let fetched = page.len();
            debug!(offset, fetched, "Fetched identity page");

            let cancelled = AtomicBool::new(false);
            let entries: Vec<ProvisioningReport> = stream::iter(page)
                .take_while(|_| {
                    let stop = cancel.is_cancelled();
                    if stop {
                        cancelled.store(true, Ordering::Relaxed);
                    }
                    future::ready(!stop)
                })
                .map(|identity| self.push_one(task, &mapping, identity))
                .buffered(self.concurrency)
                .collect()
                .await;
            report.entries.extend(entries);

            if cancelled.load(Ordering::Relaxed) {
                report.cancelled = true;
                break;
            }
            offset += fetched;
            if fetched < self.page_size {
                break;
            }
        }

        report.finish();
        info!(
            entries = report.entries.len(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Push cycle finished"
        );
        debug!(report = %report.render(resource.trace_level), "Push report");
        Ok(report)
    }

    async fn push_one(
        &self,
        task: &PushTask,
        mapping: &MappingConfiguration,
        identity: Identity,
    ) -> ProvisioningReport {
        let uid = match mapping.conn_object_key(&identity.mapping_source()) {
            Ok(uid) => uid,
            Err(e) => {
                return ProvisioningReport::failure(identity.key.clone(), None, e.to_string())
                    .with_identity(identity.key, identity.name);
            }
        };
        let label = uid.value().to_string();

        let remote = match self
            .gateway
            .get(&task.resource_key, &mapping.object_class, &uid)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                warn!(uid = %uid, error = %e, "Could not read remote object");
                return ProvisioningReport::failure(label, None, e.to_string())
                    .with_identity(identity.key, identity.name);
            }
        };

        let operation = match (remote.is_some(), task.perform_update, task.perform_create) {
            (true, true, _) => OperationType::Update,
            (false, _, true) => OperationType::Create,
            (true, false, _) => {
                return ProvisioningReport::ignore(label, "update disabled")
                    .with_identity(identity.key, identity.name);
            }
            (false, _, false) => {
                return ProvisioningReport::ignore(label, "no remote object, creation disabled")
                    .with_identity(identity.key, identity.name);
            }
        };
        if task.dry_run {
            return ProvisioningReport::success(label, operation)
                .with_identity(identity.key, identity.name)
                .with_message("dry run");
        }

        let intents = PropagationByResource::new().with(operation, task.resource_key.clone());
        let outcome = match self
            .factory
            .build_tasks(operation, &identity, intents, &AttributeSet::new(), &HashSet::new())
            .await
        {
            Ok(plan) => self
                .executor
                .execute(plan, false)
                .await
                .map(|reporter| reporter.get(&task.resource_key)),
            Err(e) => Err(e),
        };

        let report = match outcome {
            Ok(Some(status)) => from_status(label, status),
            Ok(None) => ProvisioningReport::failure(label, Some(operation), "no task generated"),
            Err(e) => ProvisioningReport::failure(label, Some(operation), e.to_string()),
        };
        report.with_identity(identity.key, identity.name)
    }
}

fn from_status(uid: String, status: PropagationStatus) -> ProvisioningReport {
    match status.status {
        ExecStatus::Success => ProvisioningReport::success(uid, status.operation),
        ExecStatus::Failure | ExecStatus::NotAttempted => ProvisioningReport::failure(
            uid,
            Some(status.operation),
            status
                .failure_reason
                .unwrap_or_else(|| status.status.to_string()),
        ),
    }
}
