//! Per-resource propagation intents.
//!
//! [`PropagationByResource`] is an immutable value: every "mutation" consumes
//! the value and returns a new one, so intents handed from the workflow to
//! the task factory can never be changed behind a task's back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use idsync_connector::types::OperationType;

/// Ordered map from resource key to the operation to propagate there.
///
/// A resource carries at most one operation; registering a second operation
/// for the same resource replaces the first and moves the resource to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationByResource {
    entries: Vec<(String, OperationType)>,
}

impl PropagationByResource {
    /// Create an empty intent set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one operation for a resource.
    #[must_use]
    pub fn with(mut self, operation: OperationType, resource_key: impl Into<String>) -> Self {
        let resource_key = resource_key.into();
        self.entries.retain(|(key, _)| *key != resource_key);
        self.entries.push((resource_key, operation));
        self
    }

    /// Register the same operation for several resources.
    #[must_use]
    pub fn with_all<I, S>(self, operation: OperationType, resource_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        resource_keys
            .into_iter()
            .fold(self, |acc, key| acc.with(operation, key))
    }

    /// Combine with another intent set; entries of `other` win.
    #[must_use]
    pub fn merged(self, other: &PropagationByResource) -> Self {
        other
            .iter()
            .fold(self, |acc, (key, op)| acc.with(op, key.to_string()))
    }

    /// Drop every resource contained in `excluded`.
    #[must_use]
    pub fn without(mut self, excluded: &HashSet<String>) -> Self {
        self.entries.retain(|(key, _)| !excluded.contains(key));
        self
    }

    /// Operation registered for a resource.
    pub fn get(&self, resource_key: &str) -> Option<OperationType> {
        self.entries
            .iter()
            .find(|(key, _)| key == resource_key)
            .map(|(_, op)| *op)
    }

    /// Resources registered for an operation, in registration order.
    pub fn resources(&self, operation: OperationType) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, op)| *op == operation)
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Iterate over `(resource_key, operation)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, OperationType)> {
        self.entries.iter().map(|(key, op)| (key.as_str(), *op))
    }

    /// Number of resources with an intent.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there is nothing to propagate.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
