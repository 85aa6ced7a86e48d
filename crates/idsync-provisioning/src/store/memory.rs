//! In-memory storage backends.
//!
//! Used by the default wiring in tests and by embedders that keep identities
//! elsewhere and only need the engine's view of them.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use idsync_connector::operation::AttributeValue;

use super::{IdentityStore, ResourceCatalog, StoreResult, TaskExecStore};
use crate::model::{AnyTypeKind, Identity, Resource};
use crate::propagation::task::TaskExec;

fn value_matches(value: &AttributeValue, expected: &str) -> bool {
    match value {
        AttributeValue::Array(values) => values.iter().any(|v| value_matches(v, expected)),
        other => other.to_text().as_deref() == Some(expected),
    }
}

/// Identity store backed by a sorted map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityStore {
    identities: Arc<RwLock<BTreeMap<String, Identity>>>,
}

impl InMemoryIdentityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given identities.
    pub fn with_identities(identities: impl IntoIterator<Item = Identity>) -> Self {
        let map = identities
            .into_iter()
            .map(|identity| (identity.key.clone(), identity))
            .collect();
        Self {
            identities: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of stored identities.
    pub async fn len(&self) -> usize {
        self.identities.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.identities.read().await.is_empty()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find(&self, key: &str) -> StoreResult<Option<Identity>> {
        Ok(self.identities.read().await.get(key).cloned())
    }

    async fn find_by_name(&self, kind: AnyTypeKind, name: &str) -> StoreResult<Option<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|identity| identity.kind == kind && identity.name == name)
            .cloned())
    }

    async fn find_by_attribute(
        &self,
        kind: AnyTypeKind,
        attribute: &str,
        value: &str,
    ) -> StoreResult<Vec<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .filter(|identity| identity.kind == kind)
            .filter(|identity| {
                identity
                    .mapping_source()
                    .get(attribute)
                    .is_some_and(|v| value_matches(v, value))
            })
            .cloned()
            .collect())
    }

    async fn find_by_resource(
        &self,
        kind: AnyTypeKind,
        resource_key: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Identity>> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .filter(|identity| identity.kind == kind && identity.has_resource(resource_key))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save(&self, identity: &Identity) -> StoreResult<()> {
        self.identities
            .write()
            .await
            .insert(identity.key.clone(), identity.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.identities.write().await.remove(key).is_some())
    }
}

/// Resource catalog backed by a hash map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceCatalog {
    resources: Arc<RwLock<HashMap<String, Resource>>>,
}

impl InMemoryResourceCatalog {
    /// Create a catalog holding the given resources.
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        let map = resources
            .into_iter()
            .map(|resource| (resource.key.clone(), resource))
            .collect();
        Self {
            resources: Arc::new(RwLock::new(map)),
        }
    }

    /// Add or replace a resource.
    pub async fn register(&self, resource: Resource) {
        self.resources
            .write()
            .await
            .insert(resource.key.clone(), resource);
    }
}

#[async_trait]
impl ResourceCatalog for InMemoryResourceCatalog {
    async fn find(&self, key: &str) -> StoreResult<Option<Resource>> {
        Ok(self.resources.read().await.get(key).cloned())
    }
}

/// Task execution log kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskExecStore {
    execs: Arc<RwLock<Vec<TaskExec>>>,
}

impl InMemoryTaskExecStore {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded execution, in insertion order.
    pub async fn all(&self) -> Vec<TaskExec> {
        self.execs.read().await.clone()
    }
}

#[async_trait]
impl TaskExecStore for InMemoryTaskExecStore {
    async fn save(&self, exec: &TaskExec) -> StoreResult<()> {
        self.execs.write().await.push(exec.clone());
        Ok(())
    }

    async fn find_by_identity(&self, identity_key: &str) -> StoreResult<Vec<TaskExec>> {
        let mut found: Vec<TaskExec> = self
            .execs
            .read()
            .await
            .iter()
            .filter(|exec| exec.identity_key == identity_key)
            .cloned()
            .collect();
        found.sort_by_key(|exec| exec.started_at);
        Ok(found)
    }

    async fn find_by_task(&self, task_id: Uuid) -> StoreResult<Vec<TaskExec>> {
        let mut found: Vec<TaskExec> = self
            .execs
            .read()
            .await
            .iter()
            .filter(|exec| exec.task_id == task_id)
            .cloned()
            .collect();
        found.sort_by_key(|exec| exec.started_at);
        Ok(found)
    }

    async fn find_recent(&self, max: usize) -> StoreResult<Vec<TaskExec>> {
        let mut found = self.execs.read().await.clone();
        found.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        found.truncate(max);
        Ok(found)
    }

    async fn find_latest(
        &self,
        identity_key: &str,
        resource_key: &str,
    ) -> StoreResult<Option<TaskExec>> {
        Ok(self
            .execs
            .read()
            .await
            .iter()
            .filter(|exec| exec.identity_key == identity_key && exec.resource_key == resource_key)
            .max_by_key(|exec| exec.ended_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use idsync_connector::types::OperationType;

    use crate::propagation::task::ExecStatus;

    fn identity(key: &str, name: &str, resources: &[&str]) -> Identity {
        let mut identity = Identity::new(key, AnyTypeKind::User, name);
        for r in resources {
            identity.assign(*r);
        }
        identity
    }

    fn exec(identity_key: &str, resource_key: &str, offset_secs: i64) -> TaskExec {
        let at = Utc::now() + Duration::seconds(offset_secs);
        TaskExec {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            kind: AnyTypeKind::User,
            identity_key: identity_key.to_string(),
            resource_key: resource_key.to_string(),
            operation: OperationType::Update,
            status: ExecStatus::Success,
            message: None,
            synchronous: true,
            payload: serde_json::Value::Null,
            started_at: at,
            ended_at: at,
        }
    }

    #[tokio::test]
    async fn test_find_by_attribute_includes_name() {
        let mut bob = identity("k2", "bob", &[]);
        bob.attributes.set("email", "bob@x");
        let store = InMemoryIdentityStore::with_identities([identity("k1", "alice", &[]), bob]);

        let by_name = store
            .find_by_attribute(AnyTypeKind::User, "name", "alice")
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].key, "k1");

        let by_email = store
            .find_by_attribute(AnyTypeKind::User, "email", "bob@x")
            .await
            .unwrap();
        assert_eq!(by_email[0].key, "k2");

        let other_kind = store
            .find_by_attribute(AnyTypeKind::Group, "name", "alice")
            .await
            .unwrap();
        assert!(other_kind.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_resource_pages() {
        let store = InMemoryIdentityStore::with_identities([
            identity("k1", "a", &["R1"]),
            identity("k2", "b", &["R1", "R2"]),
            identity("k3", "c", &["R2"]),
            identity("k4", "d", &["R1"]),
        ]);

        let first = store
            .find_by_resource(AnyTypeKind::User, "R1", 0, 2)
            .await
            .unwrap();
        let second = store
            .find_by_resource(AnyTypeKind::User, "R1", 2, 2)
            .await
            .unwrap();

        let keys: Vec<&str> = first.iter().chain(&second).map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2", "k4"]);
    }

    #[tokio::test]
    async fn test_assigned_resources_of_missing_identity() {
        let store = InMemoryIdentityStore::new();
        assert!(store.assigned_resources("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_task_exec_queries() {
        let store = InMemoryTaskExecStore::new();
        let old = exec("alice", "R1", -10);
        let new = exec("alice", "R1", 0);
        let other = exec("bob", "R2", 5);
        for e in [&new, &old, &other] {
            store.save(e).await.unwrap();
        }

        let history = store.find_by_identity("alice").await.unwrap();
        assert_eq!(history, vec![old.clone(), new.clone()]);

        let latest = store.find_latest("alice", "R1").await.unwrap();
        assert_eq!(latest, Some(new.clone()));

        let recent = store.find_recent(2).await.unwrap();
        assert_eq!(recent, vec![other.clone(), new.clone()]);

        let by_task = store.find_by_task(old.task_id).await.unwrap();
        assert_eq!(by_task, vec![old]);
    }
}
