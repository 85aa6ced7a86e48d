//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};

use idsync_connector::error::{ConnectorError, ConnectorResult};
use idsync_connector::mapping::{CorrelationRule, MappingConfiguration, MappingRule};
use idsync_connector::operation::{
    AttributeDelta, AttributeSet, Filter, PageRequest, SearchResult, Uid,
};
use idsync_connector::traits::{
    Connector, CreateOp, DeleteOp, SearchOp, SyncCapable, SyncResult, UpdateOp,
};
use idsync_connector::types::ConnectorType;
use idsync_provisioning::{
    AnyTypeKind, ConnectorGateway, EngineBuilder, EngineConfig, EngineParts, Identity,
    IdentityStore, InMemoryIdentityStore, InMemoryResourceCatalog, InMemoryTaskExecStore,
    ProvisioningEngine, Resource, ResourceVirAttrHandler, StaticConnectorProvider,
};

// =============================================================================
// In-memory connector
// =============================================================================

/// Connector keeping remote objects in a map keyed by `uid`.
///
/// Create fails on an existing object and update/delete fail on a missing
/// one, so duplicate creations show up as errors. An update that changes
/// `uid` moves the object to its new key.
///
/// Writes can be held behind a gate (see [`InMemoryConnector::hold`]) to
/// observe work still in flight.
pub struct InMemoryConnector {
    name: String,
    objects: RwLock<BTreeMap<String, AttributeSet>>,
    pages: Mutex<VecDeque<SyncResult>>,
    unavailable: AtomicBool,
    fetch_unavailable: AtomicBool,
    held: AtomicBool,
    gate: Semaphore,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemoryConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: RwLock::new(BTreeMap::new()),
            pages: Mutex::new(VecDeque::new()),
            unavailable: AtomicBool::new(false),
            fetch_unavailable: AtomicBool::new(false),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Make every write and read fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `fetch_changes` fail with a connection error.
    pub fn set_fetch_unavailable(&self, unavailable: bool) {
        self.fetch_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Block every write until [`InMemoryConnector::release`].
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let held and future writes through.
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.gate.close();
    }

    async fn pass_gate(&self) {
        if self.held.load(Ordering::SeqCst) {
            // Closing the gate is the release signal.
            let _ = self.gate.acquire().await;
        }
    }

    /// Queue one page of changes for `fetch_changes`.
    pub async fn push_page(&self, page: SyncResult) {
        self.pages.lock().await.push_back(page);
    }

    /// Put an object in place without counting it as a create.
    pub async fn seed(&self, uid: &str, attributes: AttributeSet) {
        self.objects
            .write()
            .await
            .insert(uid.to_string(), attributes.with("uid", uid));
    }

    /// Drop an object without going through the engine.
    pub async fn forget(&self, uid: &str) {
        self.objects.write().await.remove(uid);
    }

    pub async fn object(&self, uid: &str) -> Option<AttributeSet> {
        self.objects.read().await.get(uid).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> ConnectorResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection_failed(format!(
                "{} is unreachable",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Rest
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> ConnectorResult<()> {
        self.check_available()
    }
}

#[async_trait]
impl CreateOp for InMemoryConnector {
    async fn create(&self, _object_class: &str, attributes: AttributeSet) -> ConnectorResult<Uid> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.check_available()?;

        let uid = attributes
            .get_string("uid")
            .map(str::to_string)
            .ok_or_else(|| ConnectorError::InvalidData {
                message: "missing uid".to_string(),
            })?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(&uid) {
            return Err(ConnectorError::ObjectAlreadyExists { identifier: uid });
        }
        objects.insert(uid.clone(), attributes);
        Ok(Uid::new("uid", uid))
    }
}

#[async_trait]
impl UpdateOp for InMemoryConnector {
    async fn update(
        &self,
        _object_class: &str,
        uid: &Uid,
        changes: AttributeDelta,
    ) -> ConnectorResult<Uid> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.check_available()?;

        let mut objects = self.objects.write().await;
        let mut object =
            objects
                .remove(uid.value())
                .ok_or_else(|| ConnectorError::ObjectNotFound {
                    identifier: uid.value().to_string(),
                })?;
        changes.apply_to(&mut object);
        let new_uid = object
            .get_string("uid")
            .unwrap_or(uid.value())
            .to_string();
        objects.insert(new_uid.clone(), object);
        Ok(Uid::new("uid", new_uid))
    }
}

#[async_trait]
impl DeleteOp for InMemoryConnector {
    async fn delete(&self, _object_class: &str, uid: &Uid) -> ConnectorResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.pass_gate().await;
        self.check_available()?;

        self.objects
            .write()
            .await
            .remove(uid.value())
            .map(|_| ())
            .ok_or_else(|| ConnectorError::ObjectNotFound {
                identifier: uid.value().to_string(),
            })
    }
}

#[async_trait]
impl SearchOp for InMemoryConnector {
    async fn search(
        &self,
        _object_class: &str,
        filter: Option<Filter>,
        _page_request: Option<PageRequest>,
    ) -> ConnectorResult<SearchResult> {
        self.check_available()?;
        let objects = self.objects.read().await;
        let found = objects
            .values()
            .filter(|o| filter.as_ref().map_or(true, |f| f.matches(o)))
            .cloned()
            .collect();
        Ok(SearchResult::new(found))
    }

    async fn get(&self, _object_class: &str, uid: &Uid) -> ConnectorResult<Option<AttributeSet>> {
        self.check_available()?;
        Ok(self.objects.read().await.get(uid.value()).cloned())
    }
}

#[async_trait]
impl SyncCapable for InMemoryConnector {
    async fn fetch_changes(
        &self,
        _object_class: &str,
        _sync_token: Option<&str>,
        _batch_size: u32,
    ) -> ConnectorResult<SyncResult> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fetch_unavailable.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection_failed("change log unreachable"));
        }
        Ok(self.pages.lock().await.pop_front().unwrap_or_default())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// `uid` from the identity name (connector object key), `mail` from `email`,
/// with a correlation rule on `email`.
pub fn user_mapping() -> MappingConfiguration {
    MappingConfiguration::new(
        "user",
        vec![
            MappingRule::attribute("uid", "name").as_connector_object_key(),
            MappingRule::attribute("mail", "email"),
        ],
    )
    .with_correlation_rule(CorrelationRule {
        priority: 1,
        source_attribute: "email".to_string(),
        target_attribute: "mail".to_string(),
    })
}

/// Catalog of three resources; R1 is a priority resource.
pub fn catalog() -> InMemoryResourceCatalog {
    InMemoryResourceCatalog::new([
        Resource::new("R1")
            .with_priority(1)
            .with_provision(AnyTypeKind::User, user_mapping()),
        Resource::new("R2").with_provision(AnyTypeKind::User, user_mapping()),
        Resource::new("R3").with_provision(AnyTypeKind::User, user_mapping()),
    ])
}

pub struct Harness {
    pub engine: ProvisioningEngine,
    pub identities: InMemoryIdentityStore,
    pub execs: InMemoryTaskExecStore,
    pub r1: Arc<InMemoryConnector>,
    pub r2: Arc<InMemoryConnector>,
    pub r3: Arc<InMemoryConnector>,
}

impl Harness {
    pub async fn new(config: EngineConfig) -> Self {
        Self::with_vir_schemas(config, &[]).await
    }

    /// Engine reading the given virtual attributes, each declared as
    /// `(name, resource_key, remote_attribute)`, from the resources.
    pub async fn with_vir_schemas(config: EngineConfig, schemas: &[(&str, &str, &str)]) -> Self {
        let identities = InMemoryIdentityStore::new();
        let execs = InMemoryTaskExecStore::new();
        let r1 = Arc::new(InMemoryConnector::new("R1"));
        let r2 = Arc::new(InMemoryConnector::new("R2"));
        let r3 = Arc::new(InMemoryConnector::new("R3"));

        let provider = StaticConnectorProvider::new();
        provider.register("R1", r1.clone()).await;
        provider.register("R2", r2.clone()).await;
        provider.register("R3", r3.clone()).await;
        let provider = Arc::new(provider);
        let resources = Arc::new(catalog());

        let vir_attrs = schemas.iter().fold(
            ResourceVirAttrHandler::new(
                ConnectorGateway::new(provider.clone(), config.connector_timeout()),
                resources.clone(),
            ),
            |handler, (name, resource_key, remote_attribute)| {
                handler.with_schema(*name, *resource_key, *remote_attribute)
            },
        );

        let engine = EngineBuilder::new(
            config,
            EngineParts {
                identities: Arc::new(identities.clone()),
                resources,
                exec_store: Arc::new(execs.clone()),
                connectors: provider,
            },
        )
        .with_vir_attrs(Arc::new(vir_attrs))
        .build();

        Self {
            engine,
            identities,
            execs,
            r1,
            r2,
            r3,
        }
    }

    /// Store an identity directly, without workflow or propagation.
    pub async fn seed_identity(&self, key: &str, name: &str, email: &str, resources: &[&str]) {
        let mut identity = Identity::new(key, AnyTypeKind::User, name);
        identity.attributes.set("email", email);
        for resource in resources {
            identity.assign(*resource);
        }
        self.identities.save(&identity).await.unwrap();
    }
}
