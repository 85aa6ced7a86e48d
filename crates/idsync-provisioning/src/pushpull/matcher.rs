//! Matching of remote objects to identities.

use std::sync::Arc;
use tracing::debug;

use idsync_connector::mapping::MappingConfiguration;
use idsync_connector::operation::{AttributeSet, Uid};

use crate::model::{AnyTypeKind, Identity};
use crate::store::{IdentityStore, StoreResult};

/// Finds the identities a remote object belongs to.
///
/// The connector object key is tried first: identities whose key source
/// attribute equals the remote identifier. When none match, the mapping's
/// correlation rules are tried in priority order; the first rule with a
/// match wins.
#[derive(Clone)]
pub struct IdentityMatcher {
    identities: Arc<dyn IdentityStore>,
}

impl IdentityMatcher {
    /// Create a matcher.
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    /// Every identity matching the remote object.
    pub async fn find_matches(
        &self,
        kind: AnyTypeKind,
        mapping: &MappingConfiguration,
        uid: &Uid,
        remote: &AttributeSet,
    ) -> StoreResult<Vec<Identity>> {
        if let Some(source) = mapping.conn_object_key_source() {
            let found = self
                .identities
                .find_by_attribute(kind, source, uid.value())
                .await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }

        for rule in &mapping.correlation_rules {
            let Some(value) = remote.get(&rule.target_attribute).and_then(|v| v.to_text()) else {
                continue;
            };
            let found = self
                .identities
                .find_by_attribute(kind, &rule.source_attribute, &value)
                .await?;
            if !found.is_empty() {
                debug!(
                    uid = %uid,
                    source_attribute = %rule.source_attribute,
                    "Matched through correlation rule"
                );
                return Ok(found);
            }
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_connector::mapping::{CorrelationRule, MappingRule};

    use crate::store::InMemoryIdentityStore;

    fn mapping() -> MappingConfiguration {
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

    fn store() -> InMemoryIdentityStore {
        let mut carol = Identity::new("k3", AnyTypeKind::User, "carol");
        carol.attributes.set("email", "carol@x");
        let mut twin_a = Identity::new("k4", AnyTypeKind::User, "twin.a");
        twin_a.attributes.set("email", "twins@x");
        let mut twin_b = Identity::new("k5", AnyTypeKind::User, "twin.b");
        twin_b.attributes.set("email", "twins@x");
        InMemoryIdentityStore::with_identities([
            Identity::new("k1", AnyTypeKind::User, "alice"),
            carol,
            twin_a,
            twin_b,
        ])
    }

    #[tokio::test]
    async fn test_match_by_connector_object_key() {
        let matcher = IdentityMatcher::new(Arc::new(store()));
        let found = matcher
            .find_matches(AnyTypeKind::User, &mapping(), &Uid::new("uid", "alice"), &AttributeSet::new())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "k1");
    }

    #[tokio::test]
    async fn test_correlation_fallback() {
        let matcher = IdentityMatcher::new(Arc::new(store()));
        let remote = AttributeSet::new().with("uid", "c.smith").with("mail", "carol@x");
        let found = matcher
            .find_matches(AnyTypeKind::User, &mapping(), &Uid::new("uid", "c.smith"), &remote)
            .await
            .unwrap();
        assert_eq!(found[0].key, "k3");
    }

    #[tokio::test]
    async fn test_ambiguous_and_missing() {
        let matcher = IdentityMatcher::new(Arc::new(store()));

        let remote = AttributeSet::new().with("mail", "twins@x");
        let found = matcher
            .find_matches(AnyTypeKind::User, &mapping(), &Uid::new("uid", "twin"), &remote)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let found = matcher
            .find_matches(AnyTypeKind::User, &mapping(), &Uid::new("uid", "nobody"), &AttributeSet::new())
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
