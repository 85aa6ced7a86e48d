//! Collector of per-resource outcomes for one propagation request.

use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::task::TaskTracker;

use super::task::{ExecStatus, PropagationStatus};

/// Append-only, shareable list of [`PropagationStatus`].
///
/// Synchronous tasks are recorded by the caller in task order; asynchronous
/// tasks record into a clone of the same reporter as they complete.
#[derive(Debug, Clone, Default)]
pub struct PropagationReporter {
    statuses: Arc<Mutex<Vec<PropagationStatus>>>,
    pending: TaskTracker,
}

impl PropagationReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome.
    pub fn record(&self, status: PropagationStatus) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(status);
    }

    /// Snapshot of the outcomes recorded so far, in insertion order.
    pub fn statuses(&self) -> Vec<PropagationStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Outcome recorded for a resource.
    pub fn get(&self, resource_key: &str) -> Option<PropagationStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.resource_key == resource_key)
            .cloned()
    }

    /// Check if any recorded outcome is not a success.
    pub fn has_failures(&self) -> bool {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|s| s.status != ExecStatus::Success)
    }

    /// Tracker for asynchronous tasks that will record into this reporter.
    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.pending
    }

    /// Number of asynchronous tasks still running.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait until every asynchronous task has recorded its outcome.
    pub async fn wait_async(&self) -> Vec<PropagationStatus> {
        self.pending.wait().await;
        self.statuses()
    }
}
