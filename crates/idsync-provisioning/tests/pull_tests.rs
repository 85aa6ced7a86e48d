//! Pull Reconciliation Tests
//!
//! Deltas reported by a resource turned into identity changes:
//! - Unmatched CREATE creates and links an identity
//! - Unmatched UPDATE/DELETE is ignored
//! - Matched UPDATE/DELETE propagate to the other resources only
//! - Ambiguous matches are reported without stopping the cycle
//! - Paging, cancellation and dry-run

mod common;

use futures::stream;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use idsync_connector::mapping::ENABLE_ATTRIBUTE;
use idsync_connector::operation::{AttributeSet, Uid};
use idsync_connector::traits::{SyncDelta, SyncResult};
use idsync_connector::types::OperationType;
use idsync_provisioning::{
    AnyTypeKind, ConflictResolutionAction, EngineConfig, IdentityCreate, IdentityStore, PullTask,
    ReconciliationError, ReportStatus,
};

use common::Harness;

fn uid(value: &str) -> Uid {
    Uid::new("uid", value)
}

fn remote(value: &str, mail: &str) -> AttributeSet {
    AttributeSet::new().with("uid", value).with("mail", mail)
}

fn task() -> PullTask {
    PullTask::new("R3", AnyTypeKind::User)
}

async fn create_alice(h: &Harness) -> String {
    let mut request = IdentityCreate::new(AnyTypeKind::User, "alice")
        .with_resource("R1")
        .with_resource("R3");
    request.attributes.set("email", "alice@x");
    let (key, _) = h
        .engine
        .manager
        .create(request, &HashSet::new(), false)
        .await
        .unwrap();
    key
}

#[tokio::test]
async fn test_unmatched_create_links_new_identity() {
    let h = Harness::new(EngineConfig::default()).await;
    h.r3.push_page(
        SyncResult::with_changes(vec![SyncDelta::created(
            uid("bob"),
            "user",
            remote("bob", "bob@x").with("telephoneNumber", "555"),
        )])
        .with_token("t1"),
    )
    .await;

    let report = h
        .engine
        .pull
        .run(&task(), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 1);
    let entry = &report.entries[0];
    assert_eq!(entry.status, ReportStatus::Success);
    assert_eq!(entry.operation, Some(OperationType::Create));
    assert_eq!(report.sync_token.as_deref(), Some("t1"));

    let bob = h
        .identities
        .find_by_name(AnyTypeKind::User, "bob")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.key.as_deref(), Some(bob.key.as_str()));
    assert_eq!(bob.resources, vec!["R3"]);
    assert_eq!(bob.attributes.get_string("email"), Some("bob@x"));
    assert!(!bob.attributes.has("telephoneNumber"));

    // Never propagated back to the reporting resource.
    assert_eq!(h.r3.create_calls(), 0);
}

#[tokio::test]
async fn test_unmatched_update_and_delete_are_ignored() {
    let h = Harness::new(EngineConfig::default()).await;
    let deltas = vec![
        SyncDelta::updated(uid("ghost"), "user", remote("ghost", "ghost@x")),
        SyncDelta::deleted(uid("ghost2"), "user"),
    ];

    let report = h
        .engine
        .pull_handler
        .handle(&task(), stream::iter(deltas), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.ignored(), 2);
    assert!(h.identities.is_empty().await);
}

#[tokio::test]
async fn test_matched_update_propagates_to_other_resources() {
    let h = Harness::new(EngineConfig::default()).await;
    let key = create_alice(&h).await;
    let r3_updates = h.r3.update_calls();

    let delta = SyncDelta::updated(uid("alice"), "user", remote("alice", "alice@new"));
    let report = h
        .engine
        .pull_handler
        .handle(&task(), stream::iter(vec![delta]), &CancellationToken::new())
        .await
        .unwrap();

    let entry = &report.entries[0];
    assert_eq!(entry.status, ReportStatus::Success);
    assert_eq!(entry.operation, Some(OperationType::Update));
    assert_eq!(entry.key.as_deref(), Some(key.as_str()));

    let alice = h.identities.find(&key).await.unwrap().unwrap();
    assert_eq!(alice.attributes.get_string("email"), Some("alice@new"));
    assert_eq!(
        h.r1.object("alice").await.unwrap().get_string("mail"),
        Some("alice@new")
    );
    assert_eq!(h.r3.update_calls(), r3_updates);
}

#[tokio::test]
async fn test_update_without_propagation() {
    let h = Harness::new(EngineConfig::default()).await;
    create_alice(&h).await;
    let r1_updates = h.r1.update_calls();

    let delta = SyncDelta::updated(uid("alice"), "user", remote("alice", "alice@new"));
    let report = h
        .engine
        .pull_handler
        .handle(
            &task().without_propagation(),
            stream::iter(vec![delta]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.updated(), 1);
    assert_eq!(h.r1.update_calls(), r1_updates);
    assert_eq!(
        h.r1.object("alice").await.unwrap().get_string("mail"),
        Some("alice@x")
    );
}

#[tokio::test]
async fn test_propagation_failure_is_reported_on_success() {
    let h = Harness::new(EngineConfig::default()).await;
    create_alice(&h).await;
    h.r1.set_unavailable(true);

    let delta = SyncDelta::updated(uid("alice"), "user", remote("alice", "alice@new"));
    let report = h
        .engine
        .pull_handler
        .handle(&task(), stream::iter(vec![delta]), &CancellationToken::new())
        .await
        .unwrap();

    let entry = &report.entries[0];
    assert_eq!(entry.status, ReportStatus::Success);
    assert!(entry.message.as_deref().unwrap().contains("R1"));
}

#[tokio::test]
async fn test_matched_delete_removes_identity() {
    let h = Harness::new(EngineConfig::default()).await;
    let key = create_alice(&h).await;

    let report = h
        .engine
        .pull_handler
        .handle(
            &task(),
            stream::iter(vec![SyncDelta::deleted(uid("alice"), "user")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.deleted(), 1);
    assert!(h.identities.find(&key).await.unwrap().is_none());
    assert!(h.r1.object("alice").await.is_none());
    assert_eq!(h.r3.delete_calls(), 0);
}

#[tokio::test]
async fn test_ambiguous_match_does_not_stop_cycle() {
    let h = Harness::new(EngineConfig::default()).await;
    h.seed_identity("ka", "twin.a", "twins@x", &[]).await;
    h.seed_identity("kb", "twin.b", "twins@x", &[]).await;

    let deltas = vec![
        SyncDelta::created(uid("twin"), "user", remote("twin", "twins@x")),
        SyncDelta::created(uid("carl"), "user", remote("carl", "carl@x")),
    ];
    let report = h
        .engine
        .pull_handler
        .handle(&task(), stream::iter(deltas), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.conflicts(), 1);
    assert!(report.entries[0].conflict);
    assert_eq!(report.entries[0].status, ReportStatus::Failure);
    assert!(report.entries[0].message.as_deref().unwrap().contains("ka, kb"));
    assert_eq!(report.entries[1].status, ReportStatus::Success);
    assert_eq!(report.created(), 1);
}

#[tokio::test]
async fn test_first_match_resolution() {
    let h = Harness::new(EngineConfig::default()).await;
    h.seed_identity("ka", "twin.a", "twins@x", &[]).await;
    h.seed_identity("kb", "twin.b", "twins@x", &[]).await;

    let report = h
        .engine
        .pull_handler
        .handle(
            &task().with_conflict_resolution(ConflictResolutionAction::FirstMatch),
            stream::iter(vec![SyncDelta::updated(
                uid("twin"),
                "user",
                remote("twin", "twins@x"),
            )]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.conflicts(), 0);
    assert_eq!(report.entries[0].key.as_deref(), Some("ka"));
    assert_eq!(report.updated(), 1);
}

#[tokio::test]
async fn test_enabled_flag_is_forwarded() {
    let h = Harness::new(EngineConfig::default()).await;
    let delta = SyncDelta::created(
        uid("dora"),
        "user",
        remote("dora", "dora@x").with(ENABLE_ATTRIBUTE, false),
    );

    h.engine
        .pull_handler
        .handle(&task(), stream::iter(vec![delta]), &CancellationToken::new())
        .await
        .unwrap();

    let dora = h
        .identities
        .find_by_name(AnyTypeKind::User, "dora")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dora.enabled, Some(false));
}

#[tokio::test]
async fn test_dry_run_and_disabled_actions() {
    let h = Harness::new(EngineConfig::default()).await;
    let delta = || SyncDelta::created(uid("bob"), "user", remote("bob", "bob@x"));

    let report = h
        .engine
        .pull_handler
        .handle(&task().dry_run(), stream::iter(vec![delta()]), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.created(), 1);

    let report = h
        .engine
        .pull_handler
        .handle(
            &task().with_actions(false, true, true),
            stream::iter(vec![delta()]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.ignored(), 1);

    assert!(h.identities.is_empty().await);
}

#[tokio::test]
async fn test_empty_stream() {
    let h = Harness::new(EngineConfig::default()).await;

    let report = h
        .engine
        .pull_handler
        .handle(&task(), stream::empty::<SyncDelta>(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.entries.is_empty());
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_cancelled_cycle_returns_collected_report() {
    let h = Harness::new(EngineConfig::default()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let deltas = vec![
        SyncDelta::created(uid("bob"), "user", remote("bob", "bob@x")),
        SyncDelta::created(uid("carl"), "user", remote("carl", "carl@x")),
    ];
    let report = h
        .engine
        .pull_handler
        .handle(&task(), stream::iter(deltas), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.entries.is_empty());
    assert!(h.identities.is_empty().await);
}

#[tokio::test]
async fn test_pull_pages_until_exhausted() {
    let h = Harness::new(EngineConfig::default()).await;
    h.r3.push_page(
        SyncResult::with_changes(vec![SyncDelta::created(uid("bob"), "user", remote("bob", "bob@x"))])
            .with_token("t1")
            .with_more(),
    )
    .await;
    h.r3.push_page(
        SyncResult::with_changes(vec![SyncDelta::created(
            uid("carl"),
            "user",
            remote("carl", "carl@x"),
        )])
        .with_token("t2"),
    )
    .await;

    let report = h
        .engine
        .pull
        .run(&task(), Some("t0".to_string()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.created(), 2);
    assert_eq!(report.sync_token.as_deref(), Some("t2"));
    assert_eq!(h.r3.fetch_calls(), 2);
}

#[tokio::test]
async fn test_pull_aborts_on_fetch_error() {
    let h = Harness::new(EngineConfig::default()).await;
    h.r3.set_fetch_unavailable(true);

    let err = h
        .engine
        .pull
        .run(&task(), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::Connector { .. }));

    let err = h
        .engine
        .pull
        .run(
            &PullTask::new("R9", AnyTypeKind::User),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ReconciliationError::ResourceNotFound { .. }));
}
