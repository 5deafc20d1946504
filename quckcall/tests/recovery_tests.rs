mod common;

use std::sync::Arc;

use common::{Observed, TestClient, create_hub, init_tracing, pending_record, settle};
use quckcall::call::EndReason;
use quckcall::models::{CallPhase, PendingCallRecord, PendingStatus};
use quckcall::native::{ChannelTelephony, NativeAction, NativeRequest};
use quckcall::pending::{BackgroundCallHandler, PendingCallStore};
use quckcall::storage::MemoryStore;
use quckcall_signaling::{CallId, IncomingCall, MediaKind};

async fn store_with(record: &PendingCallRecord) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    PendingCallStore::new(store.clone())
        .write_pending(record)
        .await
        .unwrap();
    store
}

async fn read_record(store: &Arc<MemoryStore>) -> Option<PendingCallRecord> {
    PendingCallStore::new(store.clone())
        .read_pending()
        .await
        .unwrap()
}

async fn dial_bob(alice: &mut TestClient) -> CallId {
    alice
        .engine
        .start_call("conv-1".into(), vec!["bob".into()], MediaKind::Audio)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_stale_record_never_rings() {
    init_tracing();
    let hub = create_hub();
    let record = pending_record(&"call-stale".into(), "alice", 61_000, PendingStatus::Pending);
    let store = store_with(&record).await;
    let mut bob = TestClient::with_store(&hub, "bob", store.clone());

    assert_eq!(bob.engine.recover_pending().await, None);
    assert_eq!(bob.phase(), CallPhase::Idle);
    assert!(bob.native_requests().is_empty());
    assert!(bob.listener.events().is_empty());
    assert_eq!(read_record(&store).await, None);
}

#[tokio::test]
async fn test_record_at_ttl_still_rings() {
    init_tracing();
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let store = Arc::new(MemoryStore::new());
    let mut bob = TestClient::with_store(&hub, "bob", store.clone());
    let call_id = dial_bob(&mut alice).await;

    let record = pending_record(&call_id, "alice", 0, PendingStatus::Pending);
    PendingCallStore::new(store)
        .write_pending(&record)
        .await
        .unwrap();
    let now = record.created_at_epoch_ms + 60_000;
    assert_eq!(bob.engine.recover_pending_at(now).await, Some(call_id));
    assert_eq!(bob.phase(), CallPhase::RingingIncoming);
}

#[tokio::test]
async fn test_answered_record_connects_without_ringing() {
    init_tracing();
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let store = Arc::new(MemoryStore::new());
    let mut bob = TestClient::with_store(&hub, "bob", store.clone());
    let call_id = dial_bob(&mut alice).await;

    // Answered on the call screen ten seconds before the app came up.
    let record = pending_record(&call_id, "alice", 10_000, PendingStatus::Answered);
    PendingCallStore::new(store.clone())
        .write_pending(&record)
        .await
        .unwrap();

    assert_eq!(bob.engine.recover_pending().await, Some(call_id.clone()));
    assert_eq!(bob.phase(), CallPhase::Connecting);
    assert_eq!(bob.engine.native().call_uuid(&call_id), Some(record.call_uuid));
    assert_eq!(read_record(&store).await, None);
    assert!(bob.listener.events().contains(&Observed::Incoming(call_id.clone())));

    settle(&mut alice, &mut bob).await;
    assert_eq!(bob.phase(), CallPhase::Connected);
    assert_eq!(alice.phase(), CallPhase::Connected);
    // Already on screen, so only the activation is reported.
    assert_eq!(
        bob.native_requests(),
        vec![NativeRequest::SetActive {
            call_uuid: record.call_uuid
        }]
    );
}

#[tokio::test]
async fn test_pending_record_rings_until_answered_natively() {
    init_tracing();
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let store = Arc::new(MemoryStore::new());
    let mut bob = TestClient::with_store(&hub, "bob", store.clone());
    let call_id = dial_bob(&mut alice).await;

    let record = pending_record(&call_id, "alice", 5_000, PendingStatus::Pending);
    PendingCallStore::new(store.clone())
        .write_pending(&record)
        .await
        .unwrap();
    assert_eq!(bob.engine.recover_pending().await, Some(call_id.clone()));
    assert_eq!(bob.phase(), CallPhase::RingingIncoming);
    assert_eq!(read_record(&store).await, Some(record.clone()));

    // The redelivered invitation joins the recovered call.
    settle(&mut alice, &mut bob).await;
    assert_eq!(bob.phase(), CallPhase::RingingIncoming);
    assert_eq!(bob.engine.offers().len(), 1);
    assert!(bob.native_requests().is_empty());

    bob.engine
        .handle_native(NativeAction::Answer(record.call_uuid))
        .await;
    assert_eq!(bob.phase(), CallPhase::Connecting);
    assert_eq!(read_record(&store).await, None);

    settle(&mut alice, &mut bob).await;
    assert_eq!(bob.phase(), CallPhase::Connected);
    assert_eq!(alice.phase(), CallPhase::Connected);
}

#[tokio::test]
async fn test_declined_record_rejects_the_call() {
    init_tracing();
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let store = Arc::new(MemoryStore::new());
    let mut bob = TestClient::with_store(&hub, "bob", store.clone());
    let call_id = dial_bob(&mut alice).await;

    let record = pending_record(&call_id, "alice", 3_000, PendingStatus::Rejected);
    PendingCallStore::new(store.clone())
        .write_pending(&record)
        .await
        .unwrap();
    assert_eq!(bob.engine.recover_pending().await, None);
    assert_eq!(bob.phase(), CallPhase::Idle);
    assert_eq!(read_record(&store).await, None);

    settle(&mut alice, &mut bob).await;
    assert_eq!(alice.listener.ended(), vec![(call_id, EndReason::RemoteRejected)]);
    // The invitation still queued for bob is not rung again.
    assert_eq!(bob.phase(), CallPhase::Idle);
    assert!(bob.listener.events().is_empty());
    assert!(bob.native_requests().is_empty());
}

#[tokio::test]
async fn test_recovery_skipped_during_live_call() {
    init_tracing();
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let mut bob = TestClient::connect(&hub, "bob");
    let call_id = common::ring(&mut alice, &mut bob, MediaKind::Audio).await;

    let record = pending_record(&"call-other".into(), "carol", 0, PendingStatus::Answered);
    PendingCallStore::new(bob.store.clone())
        .write_pending(&record)
        .await
        .unwrap();
    assert_eq!(bob.engine.recover_pending().await, None);
    assert_eq!(bob.engine.snapshot().map(|s| s.call_id), Some(call_id));
    assert_eq!(read_record(&bob.store).await, Some(record));
}

#[tokio::test]
async fn test_background_push_then_app_start() {
    init_tracing();
    let hub = create_hub();
    let mut alice = TestClient::connect(&hub, "alice");
    let store = Arc::new(MemoryStore::new());
    // Bob's socket queues the invitation; his engine has not looked at it yet.
    let mut bob = TestClient::with_store(&hub, "bob", store.clone());
    let call_id = dial_bob(&mut alice).await;

    // The push wakes the background context.
    let (screen, mut screen_requests) = ChannelTelephony::new();
    let background = BackgroundCallHandler::new(
        PendingCallStore::new(store.clone()),
        Arc::new(screen),
    );
    let record = background
        .on_push(&IncomingCall {
            call_id: call_id.clone(),
            from_participant: "alice".into(),
            media_kind: MediaKind::Audio,
            conversation_id: "conv-1".into(),
            caller_name: Some("Alice".into()),
        })
        .await
        .unwrap();
    assert_eq!(record.caller_display_name, "Alice");
    let Ok(NativeRequest::DisplayIncoming { call_uuid, .. }) = screen_requests.try_recv() else {
        panic!("call screen was not shown");
    };
    assert_eq!(call_uuid, record.call_uuid);
    assert_eq!(
        background
            .on_native_action(NativeAction::Answer(call_uuid))
            .await
            .unwrap(),
        Some(PendingStatus::Answered)
    );

    // The app starts after the user answered.
    assert_eq!(bob.engine.recover_pending().await, Some(call_id.clone()));
    assert_eq!(bob.phase(), CallPhase::Connecting);

    settle(&mut alice, &mut bob).await;
    assert_eq!(alice.phase(), CallPhase::Connected);
    assert_eq!(bob.phase(), CallPhase::Connected);
    assert_eq!(read_record(&store).await, None);
}
