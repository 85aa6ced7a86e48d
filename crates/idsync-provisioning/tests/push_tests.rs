//! Push Reconciliation Tests
//!
//! Identities assigned to a resource pushed to it page by page:
//! - Existing remote objects are updated, missing ones created
//! - Disabled actions and dry-run leave the resource untouched
//! - Connector failures become report entries

mod common;

use tokio_util::sync::CancellationToken;

use idsync_connector::operation::AttributeSet;
use idsync_connector::types::OperationType;
use idsync_provisioning::{AnyTypeKind, EngineConfig, PushTask, ReportStatus};

use common::Harness;

fn task() -> PushTask {
    PushTask::new("R2", AnyTypeKind::User)
}

async fn seed_two(h: &Harness) {
    h.seed_identity("k1", "alice", "alice@x", &["R2"]).await;
    h.seed_identity("k2", "bob", "bob@x", &["R2"]).await;
    h.seed_identity("k3", "carol", "carol@x", &["R1"]).await;
    h.r2.seed("alice", AttributeSet::new().with("mail", "stale@x"))
        .await;
}

#[tokio::test]
async fn test_push_updates_matching_and_creates_missing() {
    let h = Harness::new(EngineConfig::default()).await;
    seed_two(&h).await;

    let report = h
        .engine
        .push
        .run(&task(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 2);
    let alice = &report.entries[0];
    assert_eq!(alice.uid, "alice");
    assert_eq!(alice.key.as_deref(), Some("k1"));
    assert_eq!(alice.operation, Some(OperationType::Update));
    let bob = &report.entries[1];
    assert_eq!(bob.operation, Some(OperationType::Create));
    assert_eq!(bob.status, ReportStatus::Success);

    assert_eq!(
        h.r2.object("alice").await.unwrap().get_string("mail"),
        Some("alice@x")
    );
    assert!(h.r2.object("bob").await.is_some());
    assert!(h.r2.object("carol").await.is_none());
    assert_eq!(h.r2.create_calls(), 1);

    assert_eq!(h.execs.all().await.len(), 2);
}

#[tokio::test]
async fn test_push_without_create_ignores_missing() {
    let h = Harness::new(EngineConfig::default()).await;
    seed_two(&h).await;

    let report = h
        .engine
        .push
        .run(&task().with_actions(false, true), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.updated(), 1);
    assert_eq!(report.ignored(), 1);
    assert_eq!(report.entries[1].key.as_deref(), Some("k2"));
    assert_eq!(h.r2.create_calls(), 0);
}

#[tokio::test]
async fn test_push_dry_run_writes_nothing() {
    let h = Harness::new(EngineConfig::default()).await;
    seed_two(&h).await;

    let report = h
        .engine
        .push
        .run(&task().dry_run(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.updated(), 1);
    assert_eq!(report.created(), 1);
    assert_eq!(h.r2.create_calls() + h.r2.update_calls(), 0);
    assert!(h.execs.all().await.is_empty());
}

#[tokio::test]
async fn test_push_walks_every_page() {
    let h = Harness::new(EngineConfig::default().with_page_size(2)).await;
    for i in 0..5 {
        h.seed_identity(&format!("k{i}"), &format!("user{i}"), "u@x", &["R2"])
            .await;
    }

    let report = h
        .engine
        .push
        .run(&task(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.entries.len(), 5);
    assert_eq!(report.created(), 5);
    assert_eq!(h.r2.object_count().await, 5);
}

#[tokio::test]
async fn test_push_reports_connector_failures() {
    let h = Harness::new(EngineConfig::default()).await;
    seed_two(&h).await;
    h.r2.set_unavailable(true);

    let report = h
        .engine
        .push
        .run(&task(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed(), 2);
    assert!(report
        .entries
        .iter()
        .all(|e| e.message.as_deref().unwrap().contains("unreachable")));
}

#[tokio::test]
async fn test_push_cancelled_before_start() {
    let h = Harness::new(EngineConfig::default()).await;
    seed_two(&h).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.engine.push.run(&task(), &cancel).await.unwrap();

    assert!(report.cancelled);
    assert!(report.entries.is_empty());
    assert_eq!(h.r2.create_calls(), 0);
}
