//! Identities and resources as seen by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use idsync_connector::mapping::MappingConfiguration;
use idsync_connector::operation::AttributeSet;

/// Kind of internal identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyTypeKind {
    /// A person or service account.
    User,
    /// A group or role-like collection.
    Group,
    /// Any other typed object (printer, device, ...).
    AnyObject,
}

impl AnyTypeKind {
    /// Get the string representation used in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AnyTypeKind::User => "user",
            AnyTypeKind::Group => "group",
            AnyTypeKind::AnyObject => "any_object",
        }
    }
}

impl fmt::Display for AnyTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnyTypeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(AnyTypeKind::User),
            "group" => Ok(AnyTypeKind::Group),
            "any_object" => Ok(AnyTypeKind::AnyObject),
            _ => Err(format!("Unknown identity kind: {s}")),
        }
    }
}

/// An internal identity.
///
/// Only plain attributes are stored. Virtual attributes are computed from
/// resources on demand and never land here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique key, immutable once assigned.
    pub key: String,
    /// Identity kind.
    pub kind: AnyTypeKind,
    /// Human-readable unique name (username, group name, ...).
    pub name: String,
    /// Enabled status, when the identity kind supports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Keys of the resources this identity is assigned to, in assignment order.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Plain attribute values.
    #[serde(default)]
    pub attributes: AttributeSet,
}

impl Identity {
    /// Create an identity without resources or attributes.
    pub fn new(key: impl Into<String>, kind: AnyTypeKind, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind,
            name: name.into(),
            enabled: None,
            resources: Vec::new(),
            attributes: AttributeSet::new(),
        }
    }

    /// Check if the identity is assigned to a resource.
    pub fn has_resource(&self, resource_key: &str) -> bool {
        self.resources.iter().any(|r| r == resource_key)
    }

    /// Assign a resource, keeping assignment order and ignoring duplicates.
    pub fn assign(&mut self, resource_key: impl Into<String>) -> bool {
        let resource_key = resource_key.into();
        if self.has_resource(&resource_key) {
            false
        } else {
            self.resources.push(resource_key);
            true
        }
    }

    /// Remove a resource assignment.
    pub fn unassign(&mut self, resource_key: &str) -> bool {
        let before = self.resources.len();
        self.resources.retain(|r| r != resource_key);
        before != self.resources.len()
    }

    /// Attributes visible to resource mappings.
    ///
    /// Plain attributes plus `key` and `name`, unless a plain attribute
    /// already uses those names.
    pub fn mapping_source(&self) -> AttributeSet {
        let mut source = self.attributes.clone();
        if !source.has("key") {
            source.set("key", self.key.clone());
        }
        if !source.has("name") {
            source.set("name", self.name.clone());
        }
        source
    }
}

/// How much detail reconciliation reports keep for a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// Nothing is reported.
    None,
    /// Only the counters.
    Summary,
    /// Counters plus failed and conflicting items.
    Failures,
    /// Every item.
    #[default]
    All,
}

/// How one identity kind is provisioned on a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provision {
    /// Identity kind.
    pub kind: AnyTypeKind,
    /// Mapping between identity and remote object.
    pub mapping: MappingConfiguration,
}

/// An external system endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Globally unique key.
    pub key: String,
    /// Propagation priority. Resources with a priority are propagated
    /// synchronously, lowest value first, before every other resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_priority: Option<i32>,
    /// Per identity kind provisioning rules.
    #[serde(default)]
    pub provisions: Vec<Provision>,
    /// Password policy reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<String>,
    /// Reconciliation report detail.
    #[serde(default)]
    pub trace_level: TraceLevel,
}

impl Resource {
    /// Create a resource without priority or provisions.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            propagation_priority: None,
            provisions: Vec::new(),
            password_policy: None,
            trace_level: TraceLevel::default(),
        }
    }

    /// Set the propagation priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.propagation_priority = Some(priority);
        self
    }

    /// Add a provision for an identity kind.
    #[must_use]
    pub fn with_provision(mut self, kind: AnyTypeKind, mapping: MappingConfiguration) -> Self {
        self.provisions.retain(|p| p.kind != kind);
        self.provisions.push(Provision { kind, mapping });
        self
    }

    /// Set the trace level.
    #[must_use]
    pub fn with_trace_level(mut self, trace_level: TraceLevel) -> Self {
        self.trace_level = trace_level;
        self
    }

    /// Check if the resource must be propagated synchronously and first.
    pub fn is_priority(&self) -> bool {
        self.propagation_priority.is_some()
    }

    /// Mapping for an identity kind.
    pub fn mapping_for(&self, kind: AnyTypeKind) -> Option<&MappingConfiguration> {
        self.provisions
            .iter()
            .find(|p| p.kind == kind)
            .map(|p| &p.mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_connector::mapping::MappingRule;

    #[test]
    fn test_assign_keeps_order_without_duplicates() {
        let mut identity = Identity::new("k1", AnyTypeKind::User, "alice");
        assert!(identity.assign("R2"));
        assert!(identity.assign("R1"));
        assert!(!identity.assign("R2"));
        assert_eq!(identity.resources, vec!["R2", "R1"]);

        assert!(identity.unassign("R2"));
        assert!(!identity.unassign("R9"));
        assert_eq!(identity.resources, vec!["R1"]);
    }

    #[test]
    fn test_mapping_source_exposes_key_and_name() {
        let mut identity = Identity::new("k1", AnyTypeKind::User, "alice");
        identity.attributes.set("email", "alice@x");

        let source = identity.mapping_source();
        assert_eq!(source.get_string("key"), Some("k1"));
        assert_eq!(source.get_string("name"), Some("alice"));
        assert_eq!(source.get_string("email"), Some("alice@x"));
    }

    #[test]
    fn test_resource_mapping_lookup() {
        let mapping = MappingConfiguration::new(
            "user",
            vec![MappingRule::attribute("uid", "name").as_connector_object_key()],
        );
        let resource = Resource::new("ldap")
            .with_priority(1)
            .with_provision(AnyTypeKind::User, mapping);

        assert!(resource.is_priority());
        assert!(resource.mapping_for(AnyTypeKind::User).is_some());
        assert!(resource.mapping_for(AnyTypeKind::Group).is_none());
    }
}
