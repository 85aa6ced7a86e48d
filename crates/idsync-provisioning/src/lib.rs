//! # Provisioning Engine
//!
//! Propagation of identity changes to external resources, and pull/push
//! reconciliation between the identity store and those resources.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   intents   ┌──────────────┐   plan   ┌──────────────┐
//! │   Workflow   │────────────►│ Task Factory │─────────►│   Executor   │
//! │   Adapter    │             └──────────────┘          └──────┬───────┘
//! └──────▲───────┘                                              │
//!        │                                                      ▼
//! ┌──────┴───────┐   deltas    ┌──────────────┐          ┌──────────────┐
//! │ Pull Handler │◄────────────│  Connector   │◄─────────│   Reporter   │
//! └──────────────┘             │   Gateway    │          └──────────────┘
//!                              └──────────────┘
//! ```
//!
//! - The [`ProvisioningManager`] commits an identity change through the
//!   [`WorkflowAdapter`] and propagates the resulting intents.
//! - The [`PropagationTaskFactory`] turns intents into ordered per-resource
//!   tasks, priority resources first.
//! - The [`PropagationTaskExecutor`] runs the first and priority tasks on the
//!   caller, the rest optionally on a bounded pool, and collects the outcomes
//!   in a [`PropagationReporter`].
//! - [`PullExecutor`] and [`PushExecutor`] reconcile one resource in either
//!   direction and return a [`ReconciliationReport`].
//!
//! ## Example
//!
//! ```ignore
//! use idsync_provisioning::{EngineBuilder, EngineConfig, EngineParts, IdentityCreate};
//!
//! let engine = EngineBuilder::new(EngineConfig::from_env()?, parts).build();
//! let (key, statuses) = engine
//!     .manager
//!     .create(
//!         IdentityCreate::new(AnyTypeKind::User, "alice").with_resource("ldap"),
//!         &HashSet::new(),
//!         true,
//!     )
//!     .await?;
//! ```

pub mod config;
pub mod engine;
pub mod intent;
pub mod logging;
pub mod manager;
pub mod model;
pub mod propagation;
pub mod pushpull;
pub mod store;
pub mod workflow;

pub use config::{ConfigError, EngineConfig, FailurePolicy, ReconciliationConfig};
pub use engine::{EngineBuilder, EngineParts, ProvisioningEngine};
pub use intent::PropagationByResource;
pub use manager::{ProvisioningError, ProvisioningManager, ProvisioningResult};
pub use model::{AnyTypeKind, Identity, Provision, Resource, TraceLevel};
pub use propagation::{
    ConnectorGateway, ConnectorProvider, ExecStatus, NoVirtualAttributes, PlanEntry,
    PropagationError, PropagationReporter, PropagationStatus, PropagationTask,
    PropagationTaskExecutor, PropagationTaskFactory, ResourceVirAttrHandler,
    StaticConnectorProvider, TaskExec, TaskPlan, VirAttrHandler,
};
pub use pushpull::{
    ConflictResolutionAction, ProvisioningReport, PullExecutor, PullResultHandler, PullTask,
    PushExecutor, PushTask, ReconciliationConflict, ReconciliationError, ReconciliationReport,
    ReportStatus,
};
pub use store::{
    IdentityStore, InMemoryIdentityStore, InMemoryResourceCatalog, InMemoryTaskExecStore,
    PgTaskExecStore, ResourceCatalog, StoreError, StoreResult, TaskExecStore,
};
pub use workflow::{
    DefaultWorkflowAdapter, IdentityCreate, IdentityUpdate, WorkflowAdapter, WorkflowError,
    WorkflowResult,
};
