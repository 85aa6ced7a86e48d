//! Attribute mapping between internal identities and resource objects.
//!
//! A [`MappingConfiguration`] belongs to one resource and one object class.
//! Exactly one of its rules is flagged as the connector object key: the
//! attribute whose value identifies the remote object.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::{AttributeSet, AttributeValue, Uid};
use crate::types::OperationType;

/// Default name of the attribute carrying the remote enabled flag.
pub const ENABLE_ATTRIBUTE: &str = "__ENABLE__";

/// Errors raised while evaluating a mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    /// The mapping declares no connector object key rule.
    #[error("no connector object key mapping for object class '{object_class}'")]
    MissingConnObjectKey { object_class: String },

    /// The connector object key rule produced no value.
    #[error("connector object key '{target_attribute}' could not be resolved")]
    UnresolvedConnObjectKey { target_attribute: String },

    /// A required rule produced no value.
    #[error("required attribute '{target_attribute}' has no value")]
    RequiredAttributeMissing { target_attribute: String },
}

/// Result type for mapping evaluation.
pub type MappingResult<T> = Result<T, MappingError>;

/// A mapping configuration for one resource and object class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfiguration {
    /// The object class this mapping applies to (e.g., "user", "group").
    pub object_class: String,

    /// Individual attribute mappings.
    pub attribute_mappings: Vec<MappingRule>,

    /// Correlation rules used when no identity carries the object key.
    #[serde(default)]
    pub correlation_rules: Vec<CorrelationRule>,

    /// Remote attribute holding the enabled flag.
    #[serde(default = "default_enable_attribute")]
    pub enable_attribute: String,
}

fn default_enable_attribute() -> String {
    ENABLE_ATTRIBUTE.to_string()
}

/// A single attribute mapping rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRule {
    /// Target attribute name in the target system.
    pub target_attribute: String,

    /// Source of the value for this attribute.
    pub source: AttributeSource,

    /// Optional transformation to apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,

    /// Whether this mapping is required (fail if source is empty).
    #[serde(default)]
    pub required: bool,

    /// Whether this rule identifies the remote object.
    #[serde(default)]
    pub connector_object_key: bool,

    /// Whether to include this mapping in create operations.
    #[serde(default = "default_true")]
    pub on_create: bool,

    /// Whether to include this mapping in update operations.
    #[serde(default = "default_true")]
    pub on_update: bool,
}

fn default_true() -> bool {
    true
}

impl MappingRule {
    /// Rule copying internal attribute `source` to remote attribute `target`.
    pub fn attribute(target: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            target_attribute: target.into(),
            source: AttributeSource::Attribute {
                name: source.into(),
            },
            transform: None,
            required: false,
            connector_object_key: false,
            on_create: true,
            on_update: true,
        }
    }

    /// Mark this rule as the connector object key.
    #[must_use]
    pub fn as_connector_object_key(mut self) -> Self {
        self.connector_object_key = true;
        self.required = true;
        self
    }

    /// Mark this rule as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Attach a transformation.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Evaluate the rule against internal attributes.
    pub fn evaluate(&self, source: &AttributeSet) -> Option<AttributeValue> {
        let value = self.source.resolve(source)?;
        match &self.transform {
            None => Some(value),
            Some(transform) => match value {
                AttributeValue::String(s) => Some(AttributeValue::String(transform.apply(&s))),
                AttributeValue::Array(values) => Some(AttributeValue::Array(
                    values
                        .into_iter()
                        .map(|v| match v {
                            AttributeValue::String(s) => AttributeValue::String(transform.apply(&s)),
                            other => other,
                        })
                        .collect(),
                )),
                other => Some(other),
            },
        }
    }

    fn applies_to(&self, operation: OperationType) -> bool {
        match operation {
            OperationType::Create => self.on_create,
            OperationType::Update => self.on_update,
            OperationType::Delete => self.connector_object_key,
        }
    }
}

/// Source of an attribute value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttributeSource {
    /// Value from an identity attribute.
    Attribute {
        /// Name of the attribute on the identity.
        name: String,
    },
    /// A constant value.
    Constant {
        /// The constant value.
        value: String,
    },
    /// Multiple sources concatenated.
    Concat {
        /// List of attribute sources to concatenate.
        sources: Vec<AttributeSource>,
        /// Separator between values (default: empty).
        #[serde(default)]
        separator: String,
    },
}

impl AttributeSource {
    fn resolve(&self, source: &AttributeSet) -> Option<AttributeValue> {
        match self {
            AttributeSource::Attribute { name } => {
                source.get(name).filter(|v| !v.is_null()).cloned()
            }
            AttributeSource::Constant { value } => Some(AttributeValue::String(value.clone())),
            AttributeSource::Concat { sources, separator } => {
                let parts: Vec<String> = sources
                    .iter()
                    .filter_map(|s| s.resolve(source))
                    .filter_map(|v| v.to_text())
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(AttributeValue::String(parts.join(separator)))
                }
            }
        }
    }
}

/// Transformation to apply to an attribute value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    /// Convert to lowercase.
    Lowercase,
    /// Convert to uppercase.
    Uppercase,
    /// Trim whitespace.
    Trim,
    /// Replace occurrences.
    Replace {
        /// Pattern to find.
        from: String,
        /// Replacement value.
        to: String,
    },
    /// Format as DN (Distinguished Name), substituting `{value}`.
    DnFormat {
        /// Template for DN (e.g., "uid={value},ou=users,dc=example,dc=com").
        template: String,
    },
    /// Chain multiple transforms.
    Chain {
        /// Ordered list of transforms to apply.
        transforms: Vec<Transform>,
    },
}

impl Transform {
    /// Apply the transformation to a string value.
    pub fn apply(&self, value: &str) -> String {
        match self {
            Transform::Lowercase => value.to_lowercase(),
            Transform::Uppercase => value.to_uppercase(),
            Transform::Trim => value.trim().to_string(),
            Transform::Replace { from, to } => value.replace(from.as_str(), to),
            Transform::DnFormat { template } => template.replace("{value}", value),
            Transform::Chain { transforms } => transforms
                .iter()
                .fold(value.to_string(), |acc, t| t.apply(&acc)),
        }
    }
}

/// Correlation rule for finding an identity from remote attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRule {
    /// Priority of this rule (lower = evaluated first).
    #[serde(default)]
    pub priority: i32,

    /// Attribute on the identity.
    pub source_attribute: String,

    /// Attribute on the remote object.
    pub target_attribute: String,
}

/// Remote representation of an identity produced by outbound mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedObject {
    /// Connector object key of the remote object.
    pub uid: Uid,
    /// Attributes to send.
    pub attributes: AttributeSet,
}

impl MappingConfiguration {
    /// Create a mapping with the given rules.
    pub fn new(object_class: impl Into<String>, attribute_mappings: Vec<MappingRule>) -> Self {
        Self {
            object_class: object_class.into(),
            attribute_mappings,
            correlation_rules: Vec::new(),
            enable_attribute: default_enable_attribute(),
        }
    }

    /// Add a correlation rule.
    #[must_use]
    pub fn with_correlation_rule(mut self, rule: CorrelationRule) -> Self {
        self.correlation_rules.push(rule);
        self.correlation_rules.sort_by_key(|r| r.priority);
        self
    }

    /// The rule flagged as connector object key, if any.
    pub fn conn_object_key_rule(&self) -> Option<&MappingRule> {
        self.attribute_mappings
            .iter()
            .find(|r| r.connector_object_key)
    }

    /// Internal attribute that the connector object key is read from.
    ///
    /// Only plain attribute sources can be reversed; constants and
    /// concatenations cannot be matched back to an identity.
    pub fn conn_object_key_source(&self) -> Option<&str> {
        match &self.conn_object_key_rule()?.source {
            AttributeSource::Attribute { name } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Resolve the connector object key for the given identity attributes.
    pub fn conn_object_key(&self, source: &AttributeSet) -> MappingResult<Uid> {
        let rule = self
            .conn_object_key_rule()
            .ok_or_else(|| MappingError::MissingConnObjectKey {
                object_class: self.object_class.clone(),
            })?;
        rule.evaluate(source)
            .and_then(|v| v.to_text())
            .filter(|v| !v.is_empty())
            .map(|v| Uid::new(rule.target_attribute.clone(), v))
            .ok_or_else(|| MappingError::UnresolvedConnObjectKey {
                target_attribute: rule.target_attribute.clone(),
            })
    }

    /// Map identity attributes to the remote object for the given operation.
    pub fn map_outbound(
        &self,
        source: &AttributeSet,
        operation: OperationType,
    ) -> MappingResult<MappedObject> {
        let uid = self.conn_object_key(source)?;

        let mut attributes = AttributeSet::new();
        if operation != OperationType::Delete {
            for rule in self
                .attribute_mappings
                .iter()
                .filter(|r| r.applies_to(operation))
            {
                match rule.evaluate(source) {
                    Some(value) => attributes.set(rule.target_attribute.clone(), value),
                    None if rule.required && operation == OperationType::Create => {
                        return Err(MappingError::RequiredAttributeMissing {
                            target_attribute: rule.target_attribute.clone(),
                        });
                    }
                    None => {}
                }
            }
        }

        Ok(MappedObject { uid, attributes })
    }

    /// Map remote attributes back to identity attributes.
    ///
    /// Remote attributes that no rule maps are dropped.
    pub fn map_inbound(&self, remote: &AttributeSet) -> AttributeSet {
        self.attribute_mappings
            .iter()
            .filter_map(|rule| match &rule.source {
                AttributeSource::Attribute { name } => remote
                    .get(&rule.target_attribute)
                    .map(|v| (name.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }

    /// Read the enabled flag from remote attributes.
    pub fn read_enabled(&self, remote: &AttributeSet) -> Option<bool> {
        remote.get_bool(&self.enable_attribute)
    }
}
