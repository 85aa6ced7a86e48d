//! Per-item and per-cycle reconciliation reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

use idsync_connector::types::OperationType;

use crate::model::{AnyTypeKind, TraceLevel};

/// Outcome of one reconciled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    /// The action was performed (or would be, in dry-run).
    Success,
    /// The action failed.
    Failure,
    /// Nothing was done for this item.
    Ignore,
}

impl ReportStatus {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Success => "SUCCESS",
            ReportStatus::Failure => "FAILURE",
            ReportStatus::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of a reconciliation report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    /// Remote object identifier.
    pub uid: String,
    /// Matched or created identity key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Matched or created identity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Action performed on the identity (pull) or the remote object (push).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationType>,
    /// Outcome.
    pub status: ReportStatus,
    /// Whether the item failed because it matched several identities.
    #[serde(default)]
    pub conflict: bool,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProvisioningReport {
    fn new(uid: impl Into<String>, status: ReportStatus) -> Self {
        Self {
            uid: uid.into(),
            key: None,
            name: None,
            operation: None,
            status,
            conflict: false,
            message: None,
        }
    }

    /// Successful action.
    pub fn success(uid: impl Into<String>, operation: OperationType) -> Self {
        Self {
            operation: Some(operation),
            ..Self::new(uid, ReportStatus::Success)
        }
    }

    /// Failed action.
    pub fn failure(
        uid: impl Into<String>,
        operation: Option<OperationType>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            message: Some(message.into()),
            ..Self::new(uid, ReportStatus::Failure)
        }
    }

    /// Item left alone.
    pub fn ignore(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(uid, ReportStatus::Ignore)
        }
    }

    /// Item matching several identities.
    pub fn conflict(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conflict: true,
            message: Some(message.into()),
            ..Self::new(uid, ReportStatus::Failure)
        }
    }

    /// Attach the identity.
    #[must_use]
    pub fn with_identity(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.name = Some(name.into());
        self
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for ProvisioningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status, self.uid)?;
        if let Some(operation) = self.operation {
            write!(f, " [{operation}]")?;
        }
        if let Some(key) = &self.key {
            write!(f, " -> {key}")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

/// Direction of a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Resource to identity store.
    Pull,
    /// Identity store to resource.
    Push,
}

/// Report of one reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Reconciled resource.
    pub resource_key: String,
    /// Identity kind.
    pub kind: AnyTypeKind,
    /// Direction.
    pub direction: Direction,
    /// Whether nothing was committed.
    pub dry_run: bool,
    /// One entry per processed item, in input order.
    pub entries: Vec<ProvisioningReport>,
    /// Whether the cycle was cancelled before the input was exhausted.
    pub cancelled: bool,
    /// Sync token to resume the next pull from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub ended_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// Empty report starting now.
    pub fn new(resource_key: impl Into<String>, kind: AnyTypeKind, direction: Direction) -> Self {
        let now = Utc::now();
        Self {
            resource_key: resource_key.into(),
            kind,
            direction,
            dry_run: false,
            entries: Vec::new(),
            cancelled: false,
            sync_token: None,
            started_at: now,
            ended_at: now,
        }
    }

    /// Close the report.
    pub fn finish(&mut self) {
        self.ended_at = Utc::now();
    }

    fn count(&self, status: ReportStatus, operation: Option<OperationType>) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == status)
            .filter(|e| operation.is_none() || e.operation == operation)
            .count()
    }

    /// Successful creations.
    pub fn created(&self) -> usize {
        self.count(ReportStatus::Success, Some(OperationType::Create))
    }

    /// Successful updates.
    pub fn updated(&self) -> usize {
        self.count(ReportStatus::Success, Some(OperationType::Update))
    }

    /// Successful deletions.
    pub fn deleted(&self) -> usize {
        self.count(ReportStatus::Success, Some(OperationType::Delete))
    }

    /// Ignored items.
    pub fn ignored(&self) -> usize {
        self.count(ReportStatus::Ignore, None)
    }

    /// Failed items, conflicts included.
    pub fn failed(&self) -> usize {
        self.count(ReportStatus::Failure, None)
    }

    /// Items that matched several identities.
    pub fn conflicts(&self) -> usize {
        self.entries.iter().filter(|e| e.conflict).count()
    }

    /// Render the report at the given trace level.
    pub fn render(&self, level: TraceLevel) -> String {
        let mut out = String::new();
        if level == TraceLevel::None {
            return out;
        }

        let _ = writeln!(
            out,
            "{:?} {} ({}){}{}: created={} updated={} deleted={} ignored={} failed={}",
            self.direction,
            self.resource_key,
            self.kind,
            if self.dry_run { " [dry run]" } else { "" },
            if self.cancelled { " [cancelled]" } else { "" },
            self.created(),
            self.updated(),
            self.deleted(),
            self.ignored(),
            self.failed(),
        );

        let detailed = self.entries.iter().filter(|e| match level {
            TraceLevel::All => true,
            TraceLevel::Failures => e.status == ReportStatus::Failure,
            TraceLevel::Summary | TraceLevel::None => false,
        });
        for entry in detailed {
            let _ = writeln!(out, "  {entry}");
        }
        out
    }
}
