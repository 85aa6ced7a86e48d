//! Expansion of propagation intents into ordered tasks.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use idsync_connector::operation::AttributeSet;
use idsync_connector::types::OperationType;

use super::task::{PropagationStatus, PropagationTask};
use super::virtual_attrs::VirAttrHandler;
use super::PropagationError;
use crate::intent::PropagationByResource;
use crate::model::{AnyTypeKind, Identity};
use crate::store::ResourceCatalog;

/// One position in a task plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanEntry {
    /// A task ready to be executed.
    Ready(PropagationTask),
    /// A resource whose task could not be built.
    Skipped {
        /// Target resource.
        resource_key: String,
        /// Operation that was requested.
        operation: OperationType,
        /// Propagation priority of the resource, if known.
        priority: Option<i32>,
        /// Why no task was built.
        reason: String,
    },
}

impl PlanEntry {
    /// Target resource.
    pub fn resource_key(&self) -> &str {
        match self {
            PlanEntry::Ready(task) => &task.resource_key,
            PlanEntry::Skipped { resource_key, .. } => resource_key,
        }
    }

    fn priority(&self) -> Option<i32> {
        match self {
            PlanEntry::Ready(task) => task.priority,
            PlanEntry::Skipped { priority, .. } => *priority,
        }
    }

    /// Status reported for an entry that never reaches a connector.
    pub fn not_attempted(&self, reason: &str) -> PropagationStatus {
        match self {
            PlanEntry::Ready(task) => {
                PropagationStatus::not_attempted(&task.resource_key, task.operation, reason)
            }
            PlanEntry::Skipped {
                resource_key,
                operation,
                reason,
                ..
            } => PropagationStatus::not_attempted(resource_key, *operation, reason.clone()),
        }
    }
}

/// Ordered tasks for one identity change.
///
/// Priority resources come first, lowest priority value first; the other
/// resources follow in intent order.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPlan {
    /// Identity-level operation that produced the plan.
    pub operation: OperationType,
    /// Identity kind.
    pub kind: AnyTypeKind,
    /// Identity being propagated.
    pub identity_key: String,
    /// Ordered entries.
    pub entries: Vec<PlanEntry>,
}

impl TaskPlan {
    /// Ready tasks in plan order.
    pub fn tasks(&self) -> impl Iterator<Item = &PropagationTask> {
        self.entries.iter().filter_map(|entry| match entry {
            PlanEntry::Ready(task) => Some(task),
            PlanEntry::Skipped { .. } => None,
        })
    }

    /// Resources in plan order.
    pub fn resource_keys(&self) -> Vec<&str> {
        self.entries.iter().map(PlanEntry::resource_key).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there is nothing to propagate.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds [`TaskPlan`]s from committed identities and propagation intents.
#[derive(Clone)]
pub struct PropagationTaskFactory {
    resources: Arc<dyn ResourceCatalog>,
    vir_attrs: Arc<dyn VirAttrHandler>,
}

impl PropagationTaskFactory {
    /// Create a factory.
    pub fn new(resources: Arc<dyn ResourceCatalog>, vir_attrs: Arc<dyn VirAttrHandler>) -> Self {
        Self {
            resources,
            vir_attrs,
        }
    }

    /// Build the ordered task plan for an identity change.
    ///
    /// `vir_attrs_touched` names the virtual attributes affected by the
    /// change. Their live values are fetched before mapping; non-null values
    /// given in `vir_attrs_touched` win over the fetched ones.
    ///
    /// A resource whose mapping cannot be evaluated becomes a
    /// [`PlanEntry::Skipped`] without affecting the other resources.
    #[instrument(skip(self, identity, intents, vir_attrs_touched, excluded), fields(identity_key = %identity.key))]
    pub async fn build_tasks(
        &self,
        operation: OperationType,
        identity: &Identity,
        intents: PropagationByResource,
        vir_attrs_touched: &AttributeSet,
        excluded: &HashSet<String>,
    ) -> Result<TaskPlan, PropagationError> {
        self.build(operation, None, identity, intents, vir_attrs_touched, excluded)
            .await
    }

    /// Build the task plan for an update of `previous` into `identity`.
    ///
    /// Tasks whose connector object key changed carry the previous key, so
    /// the remote object is renamed instead of created again.
    #[instrument(skip(self, previous, identity, intents, vir_attrs_touched, excluded), fields(identity_key = %identity.key))]
    pub async fn build_update_tasks(
        &self,
        previous: &Identity,
        identity: &Identity,
        intents: PropagationByResource,
        vir_attrs_touched: &AttributeSet,
        excluded: &HashSet<String>,
    ) -> Result<TaskPlan, PropagationError> {
        self.build(
            OperationType::Update,
            Some(previous),
            identity,
            intents,
            vir_attrs_touched,
            excluded,
        )
        .await
    }

    async fn build(
        &self,
        operation: OperationType,
        previous: Option<&Identity>,
        identity: &Identity,
        intents: PropagationByResource,
        vir_attrs_touched: &AttributeSet,
        excluded: &HashSet<String>,
    ) -> Result<TaskPlan, PropagationError> {
        let intents = intents.without(excluded);
        let previous_source = previous.map(Identity::mapping_source);

        let mut source = identity.mapping_source();
        if !vir_attrs_touched.is_empty() {
            let names: Vec<String> = vir_attrs_touched.names().map(str::to_string).collect();
            source.merge(&self.vir_attrs.values(identity, &names).await);
            for (name, value) in vir_attrs_touched.iter().filter(|(_, v)| !v.is_null()) {
                source.set(name.clone(), value.clone());
            }
        }

        let mut priority = Vec::new();
        let mut others = Vec::new();
        for (resource_key, resource_op) in intents.iter() {
            let entry = self
                .build_entry(identity, &source, previous_source.as_ref(), resource_key, resource_op)
                .await?;
            if entry.priority().is_some() {
                priority.push(entry);
            } else {
                others.push(entry);
            }
        }
        priority.sort_by_key(PlanEntry::priority);
        priority.extend(others);

        debug!(entries = priority.len(), "Propagation tasks built");
        Ok(TaskPlan {
            operation,
            kind: identity.kind,
            identity_key: identity.key.clone(),
            entries: priority,
        })
    }

    async fn build_entry(
        &self,
        identity: &Identity,
        source: &AttributeSet,
        previous_source: Option<&AttributeSet>,
        resource_key: &str,
        operation: OperationType,
    ) -> Result<PlanEntry, PropagationError> {
        let skipped = |priority: Option<i32>, reason: String| PlanEntry::Skipped {
            resource_key: resource_key.to_string(),
            operation,
            priority,
            reason,
        };

        let Some(resource) = self.resources.find(resource_key).await? else {
            warn!(resource_key, "Propagation intent for unknown resource");
            return Ok(skipped(None, format!("unknown resource '{resource_key}'")));
        };
        let priority = resource.propagation_priority;

        let Some(mapping) = resource.mapping_for(identity.kind) else {
            return Ok(skipped(
                priority,
                format!("no provision for {} on '{resource_key}'", identity.kind),
            ));
        };

        let mapped = match mapping.map_outbound(source, operation) {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(resource_key, error = %e, "Mapping failed, resource not attempted");
                return Ok(skipped(priority, e.to_string()));
            }
        };

        let mut attributes = mapped.attributes;
        if operation != OperationType::Delete {
            if let Some(enabled) = identity.enabled {
                attributes.set(mapping.enable_attribute.clone(), enabled);
            }
        }

        let old_conn_object_key = previous_source
            .and_then(|previous| mapping.conn_object_key(previous).ok())
            .filter(|old| *old != mapped.uid);
        if let Some(old) = &old_conn_object_key {
            debug!(resource_key, from = %old, to = %mapped.uid, "Connector object key changes");
        }

        Ok(PlanEntry::Ready(PropagationTask {
            id: Uuid::new_v4(),
            resource_key: resource_key.to_string(),
            object_class: mapping.object_class.clone(),
            operation,
            kind: identity.kind,
            identity_key: identity.key.clone(),
            conn_object_key: mapped.uid,
            old_conn_object_key,
            attributes,
            priority,
            must_run_sync: priority.is_some(),
        }))
    }
}
