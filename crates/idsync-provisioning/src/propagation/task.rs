//! Propagation tasks, their outcomes and execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use idsync_connector::operation::{AttributeSet, Uid};
use idsync_connector::types::OperationType;

use crate::model::AnyTypeKind;

/// One operation to perform on one resource for one identity.
///
/// Tasks are built by the task factory and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationTask {
    /// Task ID, shared by every execution record of this task.
    pub id: Uuid,
    /// Target resource.
    pub resource_key: String,
    /// Remote object class.
    pub object_class: String,
    /// Operation to perform.
    pub operation: OperationType,
    /// Kind of the identity being propagated.
    pub kind: AnyTypeKind,
    /// Identity being propagated.
    pub identity_key: String,
    /// Connector object key of the remote object.
    pub conn_object_key: Uid,
    /// Key the remote object had before the change, when the change renames it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_conn_object_key: Option<Uid>,
    /// Mapped attribute payload.
    pub attributes: AttributeSet,
    /// Propagation priority of the resource, if any.
    pub priority: Option<i32>,
    /// Whether the task must run on the caller before it gets a response.
    pub must_run_sync: bool,
}

impl PropagationTask {
    /// Serialized attribute payload, as stored in execution records.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.attributes)
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    /// The connector accepted the operation.
    Success,
    /// The connector failed or rejected the operation.
    Failure,
    /// The task was never sent to the connector.
    NotAttempted,
}

impl ExecStatus {
    /// Get the string representation used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecStatus::Success => "SUCCESS",
            ExecStatus::Failure => "FAILURE",
            ExecStatus::NotAttempted => "NOT_ATTEMPTED",
        }
    }

    /// Check if the task reached the resource successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecStatus::Success)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Ok(ExecStatus::Success),
            "FAILURE" => Ok(ExecStatus::Failure),
            "NOT_ATTEMPTED" => Ok(ExecStatus::NotAttempted),
            _ => Err(format!("Unknown execution status: {s}")),
        }
    }
}

/// Result of attempting one task, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationStatus {
    /// Target resource.
    pub resource_key: String,
    /// Operation that was (or would have been) performed.
    pub operation: OperationType,
    /// Outcome.
    pub status: ExecStatus,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Remote object before the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_obj: Option<AttributeSet>,
    /// Remote object after the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_obj: Option<AttributeSet>,
}

impl PropagationStatus {
    /// Successful outcome.
    pub fn success(resource_key: impl Into<String>, operation: OperationType) -> Self {
        Self {
            resource_key: resource_key.into(),
            operation,
            status: ExecStatus::Success,
            failure_reason: None,
            before_obj: None,
            after_obj: None,
        }
    }

    /// Failed outcome.
    pub fn failure(
        resource_key: impl Into<String>,
        operation: OperationType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource_key: resource_key.into(),
            operation,
            status: ExecStatus::Failure,
            failure_reason: Some(reason.into()),
            before_obj: None,
            after_obj: None,
        }
    }

    /// Outcome of a task that never reached the connector.
    pub fn not_attempted(
        resource_key: impl Into<String>,
        operation: OperationType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            resource_key: resource_key.into(),
            operation,
            status: ExecStatus::NotAttempted,
            failure_reason: Some(reason.into()),
            before_obj: None,
            after_obj: None,
        }
    }

    /// Attach the remote object states.
    #[must_use]
    pub fn with_objects(
        mut self,
        before_obj: Option<AttributeSet>,
        after_obj: Option<AttributeSet>,
    ) -> Self {
        self.before_obj = before_obj;
        self.after_obj = after_obj;
        self
    }
}

/// Durable record of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExec {
    /// Execution ID.
    pub id: Uuid,
    /// Task that was executed.
    pub task_id: Uuid,
    /// Identity kind.
    pub kind: AnyTypeKind,
    /// Identity that was propagated.
    pub identity_key: String,
    /// Target resource.
    pub resource_key: String,
    /// Operation performed.
    pub operation: OperationType,
    /// Outcome.
    pub status: ExecStatus,
    /// Failure detail.
    pub message: Option<String>,
    /// Whether the task ran on the caller or on the async pool.
    pub synchronous: bool,
    /// Serialized attribute payload.
    pub payload: serde_json::Value,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution ended.
    pub ended_at: DateTime<Utc>,
}

impl TaskExec {
    /// Build the record for a finished task.
    pub fn record(
        task: &PropagationTask,
        status: &PropagationStatus,
        synchronous: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id: task.id,
            kind: task.kind,
            identity_key: task.identity_key.clone(),
            resource_key: task.resource_key.clone(),
            operation: status.operation,
            status: status.status,
            message: status.failure_reason.clone(),
            synchronous,
            payload: task.payload().unwrap_or(serde_json::Value::Null),
            started_at,
            ended_at: Utc::now(),
        }
    }
}
