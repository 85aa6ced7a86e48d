//! PostgreSQL task execution history.
//!
//! Schema: `migrations/0001_propagation_task_exec.sql`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, StoreResult, TaskExecStore};
use crate::propagation::task::TaskExec;

const SELECT_COLUMNS: &str = r#"
    SELECT id, task_id, kind, identity_key, resource_key, operation, status,
           message, synchronous, payload, started_at, ended_at
    FROM propagation_task_exec
"#;

/// Task execution history stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgTaskExecStore {
    pool: PgPool,
}

impl PgTaskExecStore {
    /// Create a new store on the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskExecStore for PgTaskExecStore {
    async fn save(&self, exec: &TaskExec) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO propagation_task_exec (
                id, task_id, kind, identity_key, resource_key, operation, status,
                message, synchronous, payload, started_at, ended_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(exec.id)
        .bind(exec.task_id)
        .bind(exec.kind.as_str())
        .bind(&exec.identity_key)
        .bind(&exec.resource_key)
        .bind(exec.operation.as_str())
        .bind(exec.status.as_str())
        .bind(&exec.message)
        .bind(exec.synchronous)
        .bind(&exec.payload)
        .bind(exec.started_at)
        .bind(exec.ended_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_identity(&self, identity_key: &str) -> StoreResult<Vec<TaskExec>> {
        let rows: Vec<TaskExecRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE identity_key = $1 ORDER BY started_at ASC"
        ))
        .bind(identity_key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskExecRow::into_exec).collect()
    }

    async fn find_by_task(&self, task_id: Uuid) -> StoreResult<Vec<TaskExec>> {
        let rows: Vec<TaskExecRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE task_id = $1 ORDER BY started_at ASC"
        ))
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskExecRow::into_exec).collect()
    }

    async fn find_recent(&self, max: usize) -> StoreResult<Vec<TaskExec>> {
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let rows: Vec<TaskExecRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} ORDER BY ended_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskExecRow::into_exec).collect()
    }

    async fn find_latest(
        &self,
        identity_key: &str,
        resource_key: &str,
    ) -> StoreResult<Option<TaskExec>> {
        let row: Option<TaskExecRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE identity_key = $1 AND resource_key = $2 \
             ORDER BY ended_at DESC LIMIT 1"
        ))
        .bind(identity_key)
        .bind(resource_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskExecRow::into_exec).transpose()
    }
}

/// Database row for a task execution.
#[derive(Debug, sqlx::FromRow)]
struct TaskExecRow {
    id: Uuid,
    task_id: Uuid,
    kind: String,
    identity_key: String,
    resource_key: String,
    operation: String,
    status: String,
    message: Option<String>,
    synchronous: bool,
    payload: serde_json::Value,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
}

impl TaskExecRow {
    fn into_exec(self) -> StoreResult<TaskExec> {
        Ok(TaskExec {
            id: self.id,
            task_id: self.task_id,
            kind: self.kind.parse().map_err(StoreError::InvalidData)?,
            identity_key: self.identity_key,
            resource_key: self.resource_key,
            operation: self
                .operation
                .parse()
                .map_err(|e| StoreError::InvalidData(format!("{e}")))?,
            status: self.status.parse().map_err(StoreError::InvalidData)?,
            message: self.message,
            synchronous: self.synchronous,
            payload: self.payload,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnyTypeKind;
    use crate::propagation::task::ExecStatus;
    use idsync_connector::types::OperationType;

    fn row(status: &str) -> TaskExecRow {
        TaskExecRow {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            kind: "user".to_string(),
            identity_key: "alice".to_string(),
            resource_key: "R1".to_string(),
            operation: "update".to_string(),
            status: status.to_string(),
            message: None,
            synchronous: false,
            payload: serde_json::json!({"uid": "alice"}),
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_decoding() {
        let exec = row("NOT_ATTEMPTED").into_exec().unwrap();
        assert_eq!(exec.kind, AnyTypeKind::User);
        assert_eq!(exec.operation, OperationType::Update);
        assert_eq!(exec.status, ExecStatus::NotAttempted);
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        assert!(matches!(
            row("EXPLODED").into_exec(),
            Err(StoreError::InvalidData(_))
        ));
    }
}
