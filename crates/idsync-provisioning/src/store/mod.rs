//! Storage contracts used by the engine.
//!
//! The engine only needs a handful of lookups: identities by key, name or
//! attribute value, resources by key, and a durable log of task executions.
//! In-memory implementations live in [`memory`]; [`postgres`] persists task
//! execution history with `sqlx`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{AnyTypeKind, Identity, Resource};
use crate::propagation::task::TaskExec;

pub use memory::{InMemoryIdentityStore, InMemoryResourceCatalog, InMemoryTaskExecStore};
pub use postgres::PgTaskExecStore;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Entity not found.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A stored row could not be decoded.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Identity not found.
    pub fn identity_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Identity",
            key: key.into(),
        }
    }

    /// Resource not found.
    pub fn resource_not_found(key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "Resource",
            key: key.into(),
        }
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Lookup and persistence of internal identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find an identity by key.
    async fn find(&self, key: &str) -> StoreResult<Option<Identity>>;

    /// Find an identity by its unique name.
    async fn find_by_name(&self, kind: AnyTypeKind, name: &str) -> StoreResult<Option<Identity>>;

    /// Find every identity whose attribute `attribute` equals `value`.
    ///
    /// `key` and `name` are accepted as attribute names.
    async fn find_by_attribute(
        &self,
        kind: AnyTypeKind,
        attribute: &str,
        value: &str,
    ) -> StoreResult<Vec<Identity>>;

    /// Resources currently assigned to an identity.
    async fn assigned_resources(&self, key: &str) -> StoreResult<Vec<String>> {
        self.find(key)
            .await?
            .map(|identity| identity.resources)
            .ok_or_else(|| StoreError::identity_not_found(key))
    }

    /// One page of identities assigned to a resource, ordered by key.
    async fn find_by_resource(
        &self,
        kind: AnyTypeKind,
        resource_key: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Identity>>;

    /// Insert or replace an identity.
    async fn save(&self, identity: &Identity) -> StoreResult<()>;

    /// Remove an identity. Returns `false` when it did not exist.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

/// Lookup of configured resources.
#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// Find a resource by key.
    async fn find(&self, key: &str) -> StoreResult<Option<Resource>>;

    /// Find a resource by key, failing when it does not exist.
    async fn get(&self, key: &str) -> StoreResult<Resource> {
        self.find(key)
            .await?
            .ok_or_else(|| StoreError::resource_not_found(key))
    }
}

/// Durable history of propagation task executions.
#[async_trait]
pub trait TaskExecStore: Send + Sync {
    /// Record one execution.
    async fn save(&self, exec: &TaskExec) -> StoreResult<()>;

    /// Executions for an identity, oldest first.
    async fn find_by_identity(&self, identity_key: &str) -> StoreResult<Vec<TaskExec>>;

    /// Executions of one task, oldest first.
    async fn find_by_task(&self, task_id: Uuid) -> StoreResult<Vec<TaskExec>>;

    /// Most recent executions across all identities, newest first.
    async fn find_recent(&self, max: usize) -> StoreResult<Vec<TaskExec>>;

    /// Latest execution for an identity on a resource.
    async fn find_latest(
        &self,
        identity_key: &str,
        resource_key: &str,
    ) -> StoreResult<Option<TaskExec>>;
}
