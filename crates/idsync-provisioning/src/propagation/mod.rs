//! Propagation of identity changes to resources.
//!
//! - [`factory`] turns propagation intents into an ordered [`TaskPlan`]
//! - [`executor`] runs the plan, synchronously for the first and priority
//!   tasks, optionally asynchronously for the rest
//! - [`reporter`] collects the per-resource outcomes
//! - [`gateway`] resolves connectors and bounds calls with a timeout
//! - [`virtual_attrs`] fetches live virtual attribute values

pub mod executor;
pub mod factory;
pub mod gateway;
pub mod reporter;
pub mod task;
pub mod virtual_attrs;

use thiserror::Error;

use crate::store::StoreError;

pub use executor::PropagationTaskExecutor;
pub use factory::{PlanEntry, PropagationTaskFactory, TaskPlan};
pub use gateway::{ConnectorGateway, ConnectorProvider, StaticConnectorProvider};
pub use reporter::PropagationReporter;
pub use task::{ExecStatus, PropagationStatus, PropagationTask, TaskExec};
pub use virtual_attrs::{NoVirtualAttributes, ResourceVirAttrHandler, VirAttrHandler};

/// Errors that stop a propagation request.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// A synchronous task failed under the fail-fast policy.
    #[error("Propagation to '{resource_key}' failed: {message}")]
    FailFast {
        resource_key: String,
        message: String,
        /// Every status recorded, remaining tasks as `NOT_ATTEMPTED`.
        statuses: Vec<PropagationStatus>,
    },

    /// Storage error while building tasks.
    #[error(transparent)]
    Store(#[from] StoreError),
}
