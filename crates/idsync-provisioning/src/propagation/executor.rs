//! Execution of task plans against connectors.

use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use idsync_connector::error::ConnectorResult;
use idsync_connector::operation::{AttributeSet, Uid};
use idsync_connector::types::OperationType;

use super::factory::{PlanEntry, TaskPlan};
use super::gateway::ConnectorGateway;
use super::reporter::PropagationReporter;
use super::task::{PropagationStatus, PropagationTask, TaskExec};
use super::PropagationError;
use crate::config::{EngineConfig, FailurePolicy};
use crate::store::TaskExecStore;

struct ExecutorInner {
    gateway: ConnectorGateway,
    exec_store: Arc<dyn TaskExecStore>,
    failure_policy: FailurePolicy,
    persist_executions: bool,
}

/// Runs [`TaskPlan`]s.
///
/// The first task and every priority task run on the caller, in plan order.
/// The remaining tasks run either on the caller too or, when requested, on
/// a bounded pool shared by every request going through this executor.
#[derive(Clone)]
pub struct PropagationTaskExecutor {
    inner: Arc<ExecutorInner>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    dispatched: Arc<Mutex<Vec<TaskTracker>>>,
}

impl PropagationTaskExecutor {
    /// Create an executor.
    pub fn new(
        gateway: ConnectorGateway,
        exec_store: Arc<dyn TaskExecStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                gateway,
                exec_store,
                failure_policy: config.failure_policy,
                persist_executions: config.persist_executions,
            }),
            semaphore: Arc::new(Semaphore::new(config.async_concurrency.max(1))),
            tracker: TaskTracker::new(),
            dispatched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Execute a plan.
    ///
    /// Each task is attempted at most once. Connector faults become
    /// `FAILURE` statuses. Under [`FailurePolicy::FailFast`] a failure of the
    /// first task or of a priority task aborts the request; any other
    /// failure never stops the remaining tasks.
    ///
    /// With `run_remaining_async`, the returned reporter may still be filling
    /// up; use [`PropagationReporter::wait_async`] to wait for the rest.
    #[instrument(skip(self, plan), fields(identity_key = %plan.identity_key, operation = %plan.operation))]
    pub async fn execute(
        &self,
        plan: TaskPlan,
        run_remaining_async: bool,
    ) -> Result<PropagationReporter, PropagationError> {
        let reporter = PropagationReporter::new();
        let mut deferred = Vec::new();
        let mut first_ready = true;

        let mut entries = plan.entries.into_iter();
        while let Some(entry) = entries.next() {
            let task = match entry {
                PlanEntry::Ready(task) => task,
                skipped @ PlanEntry::Skipped { .. } => {
                    let status = skipped.not_attempted("mapping unavailable");
                    debug!(resource_key = %status.resource_key, "Task not attempted");
                    reporter.record(status);
                    continue;
                }
            };

            let leading = first_ready || task.must_run_sync;
            first_ready = false;
            let run_now = leading || !run_remaining_async;
            if !run_now {
                deferred.push(task);
                continue;
            }

            let status = self.inner.run(&task, true).await;
            let failed = !status.status.is_success();
            reporter.record(status.clone());

            if failed && leading && self.inner.failure_policy == FailurePolicy::FailFast {
                let reason = format!("aborted after failure on '{}'", task.resource_key);
                for rest in entries.by_ref() {
                    reporter.record(rest.not_attempted(&reason));
                }
                for rest in deferred.drain(..) {
                    reporter.record(PropagationStatus::not_attempted(
                        &rest.resource_key,
                        rest.operation,
                        reason.clone(),
                    ));
                }
                reporter.tracker().close();
                warn!(resource_key = %task.resource_key, "Fail-fast propagation aborted");
                return Err(PropagationError::FailFast {
                    resource_key: task.resource_key,
                    message: status.failure_reason.unwrap_or_default(),
                    statuses: reporter.statuses(),
                });
            }
        }

        if !deferred.is_empty() {
            debug!(count = deferred.len(), "Dispatching remaining tasks asynchronously");
        }
        for task in deferred {
            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&self.semaphore);
            let reporter_clone = reporter.clone();
            let fut = async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    reporter_clone.record(PropagationStatus::not_attempted(
                        &task.resource_key,
                        task.operation,
                        "executor shut down",
                    ));
                    return;
                };
                let status = inner.run(&task, false).await;
                reporter_clone.record(status);
            };
            self.tracker.spawn(reporter.tracker().track_future(fut));
        }
        reporter.tracker().close();
        if !reporter.tracker().is_empty() {
            self.dispatched
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(reporter.tracker().clone());
        }

        Ok(reporter)
    }

    /// Wait until every asynchronous task dispatched so far has finished.
    pub async fn wait_idle(&self) {
        let pending: Vec<TaskTracker> = {
            let mut dispatched = self.dispatched.lock().unwrap_or_else(PoisonError::into_inner);
            dispatched.retain(|tracker| !tracker.is_empty());
            dispatched.clone()
        };
        for tracker in pending {
            tracker.wait().await;
        }
    }

    /// Stop asynchronous work: queued tasks are reported as not attempted,
    /// running ones are awaited.
    pub async fn shutdown(&self) {
        self.semaphore.close();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Propagation executor drained");
    }
}

impl ExecutorInner {
    /// Attempt one task and record its execution.
    async fn run(&self, task: &PropagationTask, synchronous: bool) -> PropagationStatus {
        let started_at = Utc::now();
        let status = match self.perform(task).await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    resource_key = %task.resource_key,
                    identity_key = %task.identity_key,
                    operation = %task.operation,
                    error_code = e.error_code(),
                    error = %e,
                    "Propagation task failed"
                );
                PropagationStatus::failure(&task.resource_key, task.operation, e.to_string())
            }
        };

        if self.persist_executions {
            let exec = TaskExec::record(task, &status, synchronous, started_at);
            if let Err(e) = self.exec_store.save(&exec).await {
                warn!(task_id = %task.id, error = %e, "Failed to record task execution");
            }
        }
        status
    }

    /// Upsert or delete the remote object.
    ///
    /// The remote object is read first: CREATE on an existing object turns
    /// into UPDATE, UPDATE on a missing object into CREATE, and DELETE on a
    /// missing object succeeds without calling the connector.
    async fn perform(&self, task: &PropagationTask) -> ConnectorResult<PropagationStatus> {
        let gateway = &self.gateway;
        let resource_key = task.resource_key.as_str();
        let object_class = task.object_class.as_str();

        let (target, before) = self.read_before(task).await?;

        let (operation, uid) = match (task.operation, before.is_some()) {
            (OperationType::Delete, false) => {
                debug!(resource_key, uid = %task.conn_object_key, "Remote object already absent");
                return Ok(PropagationStatus::success(resource_key, OperationType::Delete));
            }
            (OperationType::Delete, true) => {
                gateway.delete(resource_key, object_class, target).await?;
                return Ok(PropagationStatus::success(resource_key, OperationType::Delete)
                    .with_objects(before, None));
            }
            (_, true) => {
                let uid = gateway
                    .update(resource_key, object_class, target, &task.attributes)
                    .await?;
                (OperationType::Update, uid)
            }
            (_, false) => {
                let uid = gateway
                    .create(resource_key, object_class, task.attributes.clone())
                    .await?;
                (OperationType::Create, uid)
            }
        };

        let after = self.read_after(task, &uid).await;
        debug!(resource_key, uid = %uid, operation = %operation, "Propagation task succeeded");
        Ok(PropagationStatus::success(resource_key, operation).with_objects(before, after))
    }

    /// Current remote object and the key it was found under.
    ///
    /// A renaming task looks under the previous key first.
    async fn read_before<'a>(
        &self,
        task: &'a PropagationTask,
    ) -> ConnectorResult<(&'a Uid, Option<AttributeSet>)> {
        if let Some(old) = &task.old_conn_object_key {
            let found = self
                .gateway
                .get(&task.resource_key, &task.object_class, old)
                .await?;
            if found.is_some() {
                return Ok((old, found));
            }
        }
        let found = self
            .gateway
            .get(&task.resource_key, &task.object_class, &task.conn_object_key)
            .await?;
        Ok((&task.conn_object_key, found))
    }

    async fn read_after(&self, task: &PropagationTask, uid: &Uid) -> Option<AttributeSet> {
        match self.gateway.get(&task.resource_key, &task.object_class, uid).await {
            Ok(after) => after,
            Err(e) => {
                debug!(resource_key = %task.resource_key, error = %e, "Could not read object after propagation");
                None
            }
        }
    }
}
