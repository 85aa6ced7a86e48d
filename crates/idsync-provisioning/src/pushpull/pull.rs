//! Pull reconciliation: resource deltas into identity changes.

use futures::stream::{self, Stream, StreamExt};
use std::collections::HashSet;
use std::future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use idsync_connector::mapping::MappingConfiguration;
use idsync_connector::operation::AttributeSet;
use idsync_connector::traits::SyncDelta;
use idsync_connector::types::OperationType;

use super::matcher::IdentityMatcher;
use super::report::{Direction, ProvisioningReport, ReconciliationReport};
use super::{load_mapping, ConflictResolutionAction, PullTask, ReconciliationConflict, ReconciliationError};
use crate::config::ReconciliationConfig;
use crate::manager::ProvisioningManager;
use crate::model::Identity;
use crate::propagation::{ConnectorGateway, PropagationStatus};
use crate::store::{IdentityStore, ResourceCatalog};
use crate::workflow::{IdentityCreate, IdentityUpdate};

/// Turns resource deltas into identity create, update and delete requests.
///
/// Each delta yields exactly one report entry. Changes are committed through
/// the [`ProvisioningManager`] and never propagated back to the resource
/// that reported them.
#[derive(Clone)]
pub struct PullResultHandler {
    manager: ProvisioningManager,
    resources: Arc<dyn ResourceCatalog>,
    matcher: IdentityMatcher,
    concurrency: usize,
}

impl PullResultHandler {
    /// Create a handler.
    pub fn new(
        manager: ProvisioningManager,
        identities: Arc<dyn IdentityStore>,
        resources: Arc<dyn ResourceCatalog>,
        config: &ReconciliationConfig,
    ) -> Self {
        Self {
            manager,
            resources,
            matcher: IdentityMatcher::new(identities),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Reconcile a stream of deltas.
    ///
    /// Cancellation is checked between deltas; the report collected so far
    /// is returned with `cancelled` set.
    #[instrument(skip(self, task, deltas, cancel), fields(resource_key = %task.resource_key, kind = %task.kind))]
    pub async fn handle<S>(
        &self,
        task: &PullTask,
        deltas: S,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, ReconciliationError>
    where
        S: Stream<Item = SyncDelta>,
    {
        let (resource, mapping) =
            load_mapping(self.resources.as_ref(), &task.resource_key, task.kind).await?;

        let mut report = ReconciliationReport::new(&task.resource_key, task.kind, Direction::Pull);
        report.dry_run = task.dry_run;
        report.cancelled = self
            .process(task, &mapping, deltas, cancel, &mut report)
            .await;
        report.finish();

        debug!(report = %report.render(resource.trace_level), "Pull finished");
        Ok(report)
    }

    /// Process deltas into `report`; returns whether cancellation stopped it.
    pub(crate) async fn process<S>(
        &self,
        task: &PullTask,
        mapping: &MappingConfiguration,
        deltas: S,
        cancel: &CancellationToken,
        report: &mut ReconciliationReport,
    ) -> bool
    where
        S: Stream<Item = SyncDelta>,
    {
        let cancelled = AtomicBool::new(false);
        let entries: Vec<ProvisioningReport> = deltas
            .take_while(|_| {
                let stop = cancel.is_cancelled();
                if stop {
                    cancelled.store(true, Ordering::Relaxed);
                }
                future::ready(!stop)
            })
            .map(|delta| self.handle_delta(task, mapping, delta))
            .buffered(self.concurrency)
            .collect()
            .await;
        report.entries.extend(entries);
        cancelled.load(Ordering::Relaxed)
    }

    async fn handle_delta(
        &self,
        task: &PullTask,
        mapping: &MappingConfiguration,
        delta: SyncDelta,
    ) -> ProvisioningReport {
        let uid = delta.uid.value().to_string();

        let matches = match self
            .matcher
            .find_matches(task.kind, mapping, &delta.uid, &delta.attributes)
            .await
        {
            Ok(matches) => matches,
            Err(e) => {
                warn!(uid = %uid, error = %e, "Identity lookup failed");
                return ProvisioningReport::failure(uid, None, e.to_string());
            }
        };

        let identity = match resolve_matches(task.conflict_resolution, &uid, matches) {
            Ok(identity) => identity,
            Err(conflict) => {
                warn!(uid = %uid, candidates = ?conflict.candidates, "Ambiguous match");
                return ProvisioningReport::conflict(uid, conflict.to_string());
            }
        };

        match (identity, delta.change_type) {
            (None, OperationType::Create) => self.create(task, mapping, &delta).await,
            (None, _) => ProvisioningReport::ignore(uid, "no matching identity"),
            (Some(identity), OperationType::Delete) => self.delete(task, identity, uid).await,
            (Some(identity), _) => self.update(task, mapping, identity, &delta).await,
        }
    }

    async fn create(
        &self,
        task: &PullTask,
        mapping: &MappingConfiguration,
        delta: &SyncDelta,
    ) -> ProvisioningReport {
        let uid = delta.uid.value();
        if !task.perform_create {
            return ProvisioningReport::ignore(uid, "creation disabled");
        }

        let (name, attributes) = inbound(mapping, &delta.attributes);
        let name = name.unwrap_or_else(|| uid.to_string());
        if task.dry_run {
            return ProvisioningReport::success(uid, OperationType::Create).with_message("dry run");
        }

        let request = IdentityCreate::new(task.kind, name.clone())
            .with_attributes(attributes)
            .with_resource(task.resource_key.clone())
            .with_enabled(mapping.read_enabled(&delta.attributes));

        match self
            .manager
            .create(request, &excluded(task, None), false)
            .await
        {
            Ok((key, statuses)) => {
                info!(uid, identity_key = %key, "Identity created from resource");
                with_propagation(
                    ProvisioningReport::success(uid, OperationType::Create).with_identity(key, name),
                    &statuses,
                )
            }
            Err(e) => ProvisioningReport::failure(uid, Some(OperationType::Create), e.to_string()),
        }
    }

    async fn update(
        &self,
        task: &PullTask,
        mapping: &MappingConfiguration,
        identity: Identity,
        delta: &SyncDelta,
    ) -> ProvisioningReport {
        let uid = delta.uid.value();
        if !task.perform_update {
            return ProvisioningReport::ignore(uid, "update disabled")
                .with_identity(identity.key, identity.name);
        }
        if task.dry_run {
            return ProvisioningReport::success(uid, OperationType::Update)
                .with_identity(identity.key, identity.name)
                .with_message("dry run");
        }

        let (name, attributes) = inbound(mapping, &delta.attributes);
        let mut request = IdentityUpdate::new(identity.key.clone())
            .with_attributes(attributes)
            .with_enabled(mapping.read_enabled(&delta.attributes));
        request.name = name.filter(|n| *n != identity.name);

        match self
            .manager
            .update(request, &AttributeSet::new(), &excluded(task, Some(&identity)), false)
            .await
        {
            Ok((updated, statuses)) => with_propagation(
                ProvisioningReport::success(uid, OperationType::Update)
                    .with_identity(updated.key, updated.name),
                &statuses,
            ),
            Err(e) => ProvisioningReport::failure(uid, Some(OperationType::Update), e.to_string())
                .with_identity(identity.key, identity.name),
        }
    }

    async fn delete(&self, task: &PullTask, identity: Identity, uid: String) -> ProvisioningReport {
        if !task.perform_delete {
            return ProvisioningReport::ignore(uid, "deletion disabled")
                .with_identity(identity.key, identity.name);
        }
        if task.dry_run {
            return ProvisioningReport::success(uid, OperationType::Delete)
                .with_identity(identity.key, identity.name)
                .with_message("dry run");
        }

        let excluded = excluded(task, Some(&identity));
        let report = match self.manager.delete(&identity.key, &excluded, false).await {
            Ok(statuses) => {
                with_propagation(ProvisioningReport::success(uid, OperationType::Delete), &statuses)
            }
            Err(e) => ProvisioningReport::failure(uid, Some(OperationType::Delete), e.to_string()),
        };
        report.with_identity(identity.key, identity.name)
    }
}

/// Pick the identity to act on, or report a conflict.
fn resolve_matches(
    action: ConflictResolutionAction,
    uid: &str,
    mut matches: Vec<Identity>,
) -> Result<Option<Identity>, ReconciliationConflict> {
    if matches.len() <= 1 {
        return Ok(matches.pop());
    }
    matches.sort_by(|a, b| a.key.cmp(&b.key));
    match action {
        ConflictResolutionAction::Fail => Err(ReconciliationConflict {
            uid: uid.to_string(),
            candidates: matches.into_iter().map(|i| i.key).collect(),
        }),
        ConflictResolutionAction::FirstMatch => Ok(matches.into_iter().next()),
        ConflictResolutionAction::LastMatch => Ok(matches.pop()),
    }
}

/// Inbound identity attributes, with `name` split off and `key` dropped.
fn inbound(mapping: &MappingConfiguration, remote: &AttributeSet) -> (Option<String>, AttributeSet) {
    let mut attributes = mapping.map_inbound(remote);
    attributes.remove("key");
    let name = attributes
        .remove("name")
        .and_then(|v| v.to_text())
        .filter(|n| !n.is_empty());
    (name, attributes)
}

/// Resources that must not receive the change.
fn excluded(task: &PullTask, identity: Option<&Identity>) -> HashSet<String> {
    let mut excluded = HashSet::from([task.resource_key.clone()]);
    if !task.propagate_to_other_resources {
        if let Some(identity) = identity {
            excluded.extend(identity.resources.iter().cloned());
        }
    }
    excluded
}

fn with_propagation(report: ProvisioningReport, statuses: &[PropagationStatus]) -> ProvisioningReport {
    let failed: Vec<&str> = statuses
        .iter()
        .filter(|s| !s.status.is_success())
        .map(|s| s.resource_key.as_str())
        .collect();
    if failed.is_empty() {
        report
    } else {
        report.with_message(format!("propagation failed on {}", failed.join(", ")))
    }
}

/// Fetches deltas from a resource page by page and hands them to a
/// [`PullResultHandler`].
#[derive(Clone)]
pub struct PullExecutor {
    gateway: ConnectorGateway,
    resources: Arc<dyn ResourceCatalog>,
    handler: PullResultHandler,
    batch_size: u32,
}

impl PullExecutor {
    /// Create an executor.
    pub fn new(
        gateway: ConnectorGateway,
        resources: Arc<dyn ResourceCatalog>,
        handler: PullResultHandler,
        config: &ReconciliationConfig,
    ) -> Self {
        Self {
            gateway,
            resources,
            handler,
            batch_size: u32::try_from(config.page_size.max(1)).unwrap_or(u32::MAX),
        }
    }

    /// Run one pull cycle starting from `sync_token`.
    ///
    /// The report carries the token to resume from. A page that cannot be
    /// fetched aborts the cycle. A cancelled cycle keeps the token of the
    /// last fully processed page.
    #[instrument(skip(self, task, cancel), fields(resource_key = %task.resource_key, kind = %task.kind))]
    pub async fn run(
        &self,
        task: &PullTask,
        sync_token: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let (resource, mapping) =
            load_mapping(self.resources.as_ref(), &task.resource_key, task.kind).await?;

        let mut report = ReconciliationReport::new(&task.resource_key, task.kind, Direction::Pull);
        report.dry_run = task.dry_run;
        let mut token = sync_token;

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let page = self
                .gateway
                .fetch_changes(&task.resource_key, &mapping.object_class, token.as_deref(), self.batch_size)
                .await
                .map_err(|source| ReconciliationError::Connector {
                    resource_key: task.resource_key.clone(),
                    source,
                })?;
            let has_more = page.has_more && !page.changes.is_empty();
            debug!(changes = page.changes.len(), has_more, "Fetched delta page");

            if self
                .handler
                .process(task, &mapping, stream::iter(page.changes), cancel, &mut report)
                .await
            {
                report.cancelled = true;
                break;
            }
            if page.new_token.is_some() {
                token = page.new_token;
            }
            if !has_more {
                break;
            }
        }

        report.sync_token = token;
        report.finish();
        info!(
            entries = report.entries.len(),
            failed = report.failed(),
            cancelled = report.cancelled,
            "Pull cycle finished"
        );
        debug!(report = %report.render(resource.trace_level), "Pull report");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_connector::mapping::MappingRule;
    use crate::model::AnyTypeKind;

    fn candidates() -> Vec<Identity> {
        vec![
            Identity::new("k5", AnyTypeKind::User, "twin.b"),
            Identity::new("k4", AnyTypeKind::User, "twin.a"),
        ]
    }

    #[test]
    fn test_resolve_matches() {
        let conflict =
            resolve_matches(ConflictResolutionAction::Fail, "twin", candidates()).unwrap_err();
        assert_eq!(conflict.candidates, vec!["k4", "k5"]);

        let first = resolve_matches(ConflictResolutionAction::FirstMatch, "twin", candidates())
            .unwrap()
            .unwrap();
        assert_eq!(first.key, "k4");

        let last = resolve_matches(ConflictResolutionAction::LastMatch, "twin", candidates())
            .unwrap()
            .unwrap();
        assert_eq!(last.key, "k5");

        assert!(resolve_matches(ConflictResolutionAction::Fail, "none", Vec::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_inbound_splits_name() {
        let mapping = MappingConfiguration::new(
            "user",
            vec![
                MappingRule::attribute("uid", "name").as_connector_object_key(),
                MappingRule::attribute("mail", "email"),
            ],
        );
        let remote = AttributeSet::new()
            .with("uid", "bob")
            .with("mail", "bob@x")
            .with("telephoneNumber", "555");

        let (name, attributes) = inbound(&mapping, &remote);
        assert_eq!(name.as_deref(), Some("bob"));
        assert_eq!(attributes.get_string("email"), Some("bob@x"));
        assert_eq!(attributes.len(), 1);
    }

    #[test]
    fn test_excluded_resources() {
        let mut identity = Identity::new("k1", AnyTypeKind::User, "alice");
        identity.assign("R1");
        identity.assign("R3");

        let task = PullTask::new("R3", AnyTypeKind::User);
        assert_eq!(excluded(&task, Some(&identity)), HashSet::from(["R3".to_string()]));

        let task = task.without_propagation();
        assert_eq!(excluded(&task, Some(&identity)).len(), 2);
    }
}
