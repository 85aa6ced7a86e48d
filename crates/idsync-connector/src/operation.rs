//! Connector operation types
//!
//! Types for CRUD operations: UIDs, attribute sets, deltas, filters, and pagination.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for an object in a target system.
///
/// Different systems use different identifier schemes:
/// - LDAP: Distinguished Name (DN) or entryUUID
/// - Database: Primary key column value
/// - REST: Resource ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid {
    /// The attribute name used as the identifier (e.g., "dn", "id", "uid").
    attribute_name: String,
    /// The actual value of the identifier.
    value: String,
}

impl Uid {
    /// Create a new UID with the given attribute name and value.
    pub fn new(attribute_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            value: value.into(),
        }
    }

    /// Create a UID using the default "uid" attribute name.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self::new("uid", value)
    }

    /// Create a UID for LDAP Distinguished Name.
    pub fn from_dn(dn: impl Into<String>) -> Self {
        Self::new("dn", dn)
    }

    /// Get the attribute name.
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Get the value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.attribute_name, self.value)
    }
}

/// A set of attributes for create operations or search results.
///
/// Attributes are kept sorted by name so serialized payloads are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    /// Create a new empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    /// Get a single-valued boolean attribute.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_boolean())
    }

    /// Check if an attribute exists.
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Remove an attribute.
    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// Copy every attribute of `other` into this set, overwriting on collision.
    pub fn merge(&mut self, other: &AttributeSet) {
        for (name, value) in other.iter() {
            self.attributes.insert(name.clone(), value.clone());
        }
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(|s| s.as_str())
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Build a delta that replaces every attribute of this set.
    pub fn to_replace_delta(&self) -> AttributeDelta {
        let mut delta = AttributeDelta::new();
        for (name, value) in self.iter() {
            if value.is_null() {
                delta.clear_attribute(name.clone());
            } else {
                delta.replace(name.clone(), value.clone());
            }
        }
        delta
    }
}

impl FromIterator<(String, AttributeValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// A value for an attribute, which may be single or multi-valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// A single floating-point value.
    Float(f64),
    /// Multiple values.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as strings (works for both single and multi-valued).
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Array(arr) => arr.iter().filter_map(|v| v.as_string()).collect(),
            _ => vec![],
        }
    }

    /// Get as a boolean if this is a boolean value.
    ///
    /// The strings `"true"` and `"false"` are accepted as well, since many
    /// targets only speak strings.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            AttributeValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Render the value as a single string, if it has a scalar form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            AttributeValue::Null => None,
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Integer(i) => Some(i.to_string()),
            AttributeValue::Boolean(b) => Some(b.to_string()),
            AttributeValue::Float(f) => Some(f.to_string()),
            AttributeValue::Array(arr) => arr.first().and_then(AttributeValue::to_text),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(vec: Vec<T>) -> Self {
        AttributeValue::Array(vec.into_iter().map(Into::into).collect())
    }
}

/// Changes to apply to an object during update operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeDelta {
    /// Attributes to replace entirely.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replace: BTreeMap<String, AttributeValue>,

    /// Attributes to clear (remove all values).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clear: Vec<String>,
}

impl AttributeDelta {
    /// Create a new empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace an attribute value entirely.
    pub fn replace(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> &mut Self {
        self.replace.insert(name.into(), value.into());
        self
    }

    /// Clear all values from an attribute.
    pub fn clear_attribute(&mut self, name: impl Into<String>) -> &mut Self {
        self.clear.push(name.into());
        self
    }

    /// Check if this delta has any changes.
    pub fn is_empty(&self) -> bool {
        self.replace.is_empty() && self.clear.is_empty()
    }

    /// Apply this delta to an attribute set.
    pub fn apply_to(&self, attributes: &mut AttributeSet) {
        for (name, value) in &self.replace {
            attributes.set(name.clone(), value.clone());
        }
        for name in &self.clear {
            attributes.remove(name);
        }
    }
}

/// Filter for search operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match objects where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match objects where attribute starts with value.
    StartsWith { attribute: String, value: String },

    /// Match objects where attribute exists (has any value).
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Combine this filter with another using AND.
    pub fn and_with(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            _ => Filter::And {
                filters: vec![self, other],
            },
        }
    }

    /// Evaluate this filter against an attribute set.
    ///
    /// Connectors backed by in-process data use this instead of translating
    /// the filter into a native query.
    pub fn matches(&self, attributes: &AttributeSet) -> bool {
        match self {
            Filter::Equals { attribute, value } => attributes
                .get(attribute)
                .map(|v| v.as_strings().contains(&value.as_str()) || v.to_text().as_deref() == Some(value))
                .unwrap_or(false),
            Filter::StartsWith { attribute, value } => attributes
                .get(attribute)
                .and_then(AttributeValue::to_text)
                .map(|v| v.starts_with(value.as_str()))
                .unwrap_or(false),
            Filter::Present { attribute } => attributes
                .get(attribute)
                .map(|v| !v.is_null())
                .unwrap_or(false),
            Filter::And { filters } => filters.iter().all(|f| f.matches(attributes)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(attributes)),
        }
    }
}

/// Pagination request for search operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    /// Number of results to skip.
    #[serde(default)]
    pub offset: u32,

    /// Maximum number of results to return.
    pub page_size: u32,

    /// Opaque cursor for cursor-based pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl PageRequest {
    /// Create a new page request with the given page size.
    pub fn new(page_size: u32) -> Self {
        Self {
            offset: 0,
            page_size,
            cursor: None,
        }
    }

    /// Set the offset.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Set the cursor for cursor-based pagination.
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Result of a search operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matching objects.
    pub objects: Vec<AttributeSet>,

    /// Cursor for the next page (if more results available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Whether there are more results available.
    pub has_more: bool,
}

impl SearchResult {
    /// Create a new search result.
    pub fn new(objects: Vec<AttributeSet>) -> Self {
        Self {
            objects,
            next_cursor: None,
            has_more: false,
        }
    }

    /// Create an empty search result.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Set the next cursor.
    pub fn with_next_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(cursor.into());
        self.has_more = true;
        self
    }
}
