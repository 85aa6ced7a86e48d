//! Pull and push reconciliation.
//!
//! Pull consumes the deltas a resource reports and turns each into an
//! identity create, update, delete or ignore. Push walks the identities
//! assigned to a resource and propagates their current state to it. Both
//! produce a [`ReconciliationReport`] with one entry per processed item.

pub mod matcher;
pub mod pull;
pub mod push;
pub mod report;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use idsync_connector::error::ConnectorError;
use idsync_connector::mapping::MappingConfiguration;

use crate::model::{AnyTypeKind, Resource};
use crate::store::{ResourceCatalog, StoreError};

pub use matcher::IdentityMatcher;
pub use pull::{PullExecutor, PullResultHandler};
pub use push::PushExecutor;
pub use report::{Direction, ProvisioningReport, ReconciliationReport, ReportStatus};

/// Errors that abort a whole reconciliation cycle.
///
/// Faults on individual items never end up here; they become report entries.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// The reconciled resource is unknown.
    #[error("Resource not found: {resource_key}")]
    ResourceNotFound { resource_key: String },

    /// The resource has no mapping for the identity kind.
    #[error("Resource '{resource_key}' has no provision for {kind}")]
    NoProvision {
        resource_key: String,
        kind: AnyTypeKind,
    },

    /// Reading from the resource failed.
    #[error("Reading from '{resource_key}' failed: {source}")]
    Connector {
        resource_key: String,
        #[source]
        source: ConnectorError,
    },

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A remote object matching more than one identity.
#[derive(Debug, Clone, Error)]
#[error("'{uid}' matches {} identities: {}", .candidates.len(), .candidates.join(", "))]
pub struct ReconciliationConflict {
    /// Remote object identifier.
    pub uid: String,
    /// Keys of the matching identities.
    pub candidates: Vec<String>,
}

/// What to do when a delta matches several identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionAction {
    /// Report a conflict and skip the delta.
    #[default]
    Fail,
    /// Use the first match, by identity key.
    FirstMatch,
    /// Use the last match, by identity key.
    LastMatch,
}

impl ConflictResolutionAction {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolutionAction::Fail => "fail",
            ConflictResolutionAction::FirstMatch => "first_match",
            ConflictResolutionAction::LastMatch => "last_match",
        }
    }
}

impl fmt::Display for ConflictResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConflictResolutionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "fail" => Ok(ConflictResolutionAction::Fail),
            "first_match" => Ok(ConflictResolutionAction::FirstMatch),
            "last_match" => Ok(ConflictResolutionAction::LastMatch),
            _ => Err(format!("Unknown conflict resolution action: {s}")),
        }
    }
}

/// Resolve the reconciled resource and its mapping for the identity kind.
async fn load_mapping(
    resources: &dyn ResourceCatalog,
    resource_key: &str,
    kind: AnyTypeKind,
) -> Result<(Resource, MappingConfiguration), ReconciliationError> {
    let resource = resources.find(resource_key).await?.ok_or_else(|| {
        ReconciliationError::ResourceNotFound {
            resource_key: resource_key.to_string(),
        }
    })?;
    let mapping = resource
        .mapping_for(kind)
        .cloned()
        .ok_or_else(|| ReconciliationError::NoProvision {
            resource_key: resource_key.to_string(),
            kind,
        })?;
    Ok((resource, mapping))
}

fn default_true() -> bool {
    true
}

/// Pull reconciliation settings for one resource and identity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullTask {
    /// Resource to pull from.
    pub resource_key: String,
    /// Identity kind to reconcile.
    pub kind: AnyTypeKind,
    /// Create identities for unmatched CREATE deltas.
    #[serde(default = "default_true")]
    pub perform_create: bool,
    /// Update matched identities.
    #[serde(default = "default_true")]
    pub perform_update: bool,
    /// Delete matched identities on DELETE deltas.
    #[serde(default = "default_true")]
    pub perform_delete: bool,
    /// Report without committing anything.
    #[serde(default)]
    pub dry_run: bool,
    /// Propagate the resulting changes to the identity's other resources.
    #[serde(default = "default_true")]
    pub propagate_to_other_resources: bool,
    /// Handling of ambiguous matches.
    #[serde(default)]
    pub conflict_resolution: ConflictResolutionAction,
}

impl PullTask {
    /// Pull task with every action enabled.
    pub fn new(resource_key: impl Into<String>, kind: AnyTypeKind) -> Self {
        Self {
            resource_key: resource_key.into(),
            kind,
            perform_create: true,
            perform_update: true,
            perform_delete: true,
            dry_run: false,
            propagate_to_other_resources: true,
            conflict_resolution: ConflictResolutionAction::default(),
        }
    }

    /// Enable or disable the three actions.
    #[must_use]
    pub fn with_actions(mut self, create: bool, update: bool, delete: bool) -> Self {
        self.perform_create = create;
        self.perform_update = update;
        self.perform_delete = delete;
        self
    }

    /// Report without committing.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Keep changes away from the identity's other resources.
    #[must_use]
    pub fn without_propagation(mut self) -> Self {
        self.propagate_to_other_resources = false;
        self
    }

    /// Set the conflict resolution action.
    #[must_use]
    pub fn with_conflict_resolution(mut self, action: ConflictResolutionAction) -> Self {
        self.conflict_resolution = action;
        self
    }
}

/// Push reconciliation settings for one resource and identity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTask {
    /// Resource to push to.
    pub resource_key: String,
    /// Identity kind to reconcile.
    pub kind: AnyTypeKind,
    /// Create missing remote objects.
    #[serde(default = "default_true")]
    pub perform_create: bool,
    /// Update existing remote objects.
    #[serde(default = "default_true")]
    pub perform_update: bool,
    /// Report without calling the connector for writes.
    #[serde(default)]
    pub dry_run: bool,
}

impl PushTask {
    /// Push task with every action enabled.
    pub fn new(resource_key: impl Into<String>, kind: AnyTypeKind) -> Self {
        Self {
            resource_key: resource_key.into(),
            kind,
            perform_create: true,
            perform_update: true,
            dry_run: false,
        }
    }

    /// Enable or disable creation and update.
    #[must_use]
    pub fn with_actions(mut self, create: bool, update: bool) -> Self {
        self.perform_create = create;
        self.perform_update = update;
        self
    }

    /// Report without writing.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}
