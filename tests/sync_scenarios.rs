//! End-to-end sync behavior against the in-memory gateway.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use blackline_sync::config::SyncSettings;
use blackline_sync::live::apply_change;
use blackline_sync::model::{
    Booking, BookingStatus, Message, NewBooking, NewNotification, Notification, NotificationTarget,
    SiteSettings,
};
use blackline_sync::store::Position;
use blackline_sync::{
    ChangeEvent, ChangeKind, Collection, MemoryGateway, PollingReconciler, RecordId,
    RemoteGateway, StateStore, SubscriptionState, SyncEngine, SyncError,
};

fn engine(gateway: &Arc<MemoryGateway>) -> SyncEngine {
    let settings = SyncSettings {
        live_collections: vec![
            Collection::Conversations,
            Collection::Messages,
            Collection::Notifications,
        ],
        ..SyncSettings::default()
    };
    SyncEngine::new(gateway.clone(), gateway.clone(), settings)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn booking_request(owner: &str) -> NewBooking {
    NewBooking {
        customer_id: Some(owner.into()),
        full_name: "Dana Reyes".into(),
        service: Some("Ceramic Coating".into()),
        date: Some("2026-04-12".into()),
        price: 250.0,
        ..NewBooking::default()
    }
}

#[tokio::test]
async fn partial_settings_row_keeps_defaults() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed(
        "site_settings",
        vec![json!({
            "id": 1,
            "site_name": "Metro Blackline",
            "primary_color": "#101010",
            "instagram": "@metroblackline",
            "payment_gateways": [{"id": "card", "enabled": true}],
        })],
    );
    let engine = engine(&gateway);

    let report = engine.load_all().await;
    assert!(report.is_complete());

    let settings = engine.store().settings();
    let defaults = SiteSettings::default();
    assert_eq!(settings.site_name, "Metro Blackline");
    assert_eq!(settings.colors.primary, "#101010");
    assert_eq!(settings.colors.secondary, defaults.colors.secondary);
    assert_eq!(settings.contact.socials.instagram, "@metroblackline");
    assert_eq!(settings.contact.phone, defaults.contact.phone);

    let card = settings
        .payment_gateways
        .iter()
        .find(|g| g.id == "card")
        .unwrap();
    assert!(card.enabled);
    assert_eq!(card.name, "Standard Card Processing");
    assert_eq!(settings.payment_gateways.len(), 3);
}

#[tokio::test]
async fn one_collection_failing_does_not_block_the_rest() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed("service_offerings", vec![json!({"id": 1, "name": "Signature Wash", "price": "45"})]);
    gateway.reject("profiles", 401);
    let engine = engine(&gateway);

    let report = engine.load_all().await;
    assert!(!engine.store().is_loading());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].collection, Collection::Profiles);
    assert_eq!(engine.store().services()[0].price, 45.0);
    assert!(engine.store().profiles().is_empty());
}

#[tokio::test]
async fn rejection_notifies_the_owner_once() {
    let gateway = Arc::new(MemoryGateway::new());
    let engine = engine(&gateway);
    engine.load_all().await;

    let booking = engine.writes().add_booking(booking_request("u-42")).await.unwrap();
    engine
        .writes()
        .update_booking_status(&booking.id, BookingStatus::Rejected, Some("Out of service area".into()))
        .await
        .unwrap();
    engine
        .writes()
        .update_booking_status(&booking.id, BookingStatus::Rejected, Some("Out of service area".into()))
        .await
        .unwrap();

    let owner = engine.store().user_notifications("u-42");
    assert_eq!(owner.len(), 1);
    assert!(owner[0]
        .message
        .as_deref()
        .unwrap()
        .contains("Out of service area"));

    let stored = &gateway.rows("bookings")[0];
    assert_eq!(stored["status"], "Rejected");
    assert_eq!(stored["rejection_reason"], "Out of service area");
}

#[tokio::test]
async fn reordered_poll_result_publishes_nothing() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed(
        "conversations",
        vec![
            json!({"id": "conv-1", "customer_name": "Ana"}),
            json!({"id": "conv-2", "customer_name": "Ben"}),
        ],
    );
    let store = Arc::new(StateStore::new());
    let poller = PollingReconciler::new(
        gateway.clone(),
        store.clone(),
        vec![Collection::Conversations],
        Duration::from_secs(15),
    );
    let cancel = CancellationToken::new();
    poller.run_cycle(&cancel).await;

    gateway.reverse("conversations");
    let mut changes = store.subscribe();
    let report = poller.run_cycle(&cancel).await;
    assert!(report.changed.is_empty());
    assert!(changes.try_recv().is_err());
    assert_eq!(store.conversations()[0].id, RecordId::from("conv-1"));
}

#[tokio::test]
async fn push_event_and_optimistic_insert_never_duplicate() {
    // Push event lands after the write reconciled.
    let gateway = Arc::new(MemoryGateway::new());
    let engine = engine(&gateway);
    engine.load_all().await;
    engine.start();
    settle().await;
    assert_eq!(
        engine.subscription_state(Collection::Notifications),
        SubscriptionState::Subscribed
    );

    let note = NewNotification {
        kind: "info".into(),
        title: "Welcome".into(),
        message: "Thanks for signing up".into(),
    };
    let stored = engine
        .writes()
        .add_notification(NotificationTarget::User("u-1".into()), note)
        .await
        .unwrap();
    settle().await;
    let held = engine.store().notifications();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].id, stored.id);
    engine.shutdown().await;

    // Push event lands before the write reconciled.
    let store = StateStore::new();
    let local: Notification = serde_json::from_value(json!({"id": RecordId::local(), "title": "Hi"})).unwrap();
    let local_id = local.id.clone();
    store.insert(local, Position::Front);
    let server_row = json!({"id": 77, "title": "Hi", "read": false});
    apply_change(
        &store,
        &ChangeEvent {
            table: "notifications".into(),
            kind: ChangeKind::Insert,
            record: Some(server_row.clone()),
            old_record: None,
        },
    );
    let authoritative: Notification = blackline_sync::mapper::decode(&server_row).unwrap();
    store.reconcile(&local_id, authoritative);

    let held = store.notifications();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].id, RecordId::Int(77));
}

#[tokio::test]
async fn failed_booking_appears_then_disappears() {
    let gateway = Arc::new(MemoryGateway::new());
    let engine = engine(&gateway);
    engine.load_all().await;
    gateway.fail_transport("bookings");

    let mut changes = engine.store().subscribe();
    let err = engine
        .writes()
        .add_booking(booking_request("u-9"))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Transport { .. }));
    assert!(err.is_retryable());
    assert!(engine.store().bookings().is_empty());

    let mut booking_changes = 0;
    while let Ok(change) = changes.try_recv() {
        if change.collection == Collection::Bookings {
            booking_changes += 1;
        }
    }
    assert_eq!(booking_changes, 2, "optimistic insert then rollback");
    assert!(engine.store().admin_notifications().is_empty());
}

#[tokio::test]
async fn rollback_restores_exact_prior_state() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed(
        "bookings",
        vec![
            json!({"id": "BK-1", "full_name": "Ana", "status": "Pending"}),
            json!({"id": "BK-2", "full_name": "Ben", "status": "Approved"}),
        ],
    );
    let engine = engine(&gateway);
    engine.load_all().await;
    let before: Vec<Booking> = engine.store().bookings();

    gateway.reject("bookings", 403);
    let err = engine
        .writes()
        .delete_booking(&RecordId::from("BK-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejection { status: 403, .. }));
    assert_eq!(engine.store().bookings(), before);
}

#[tokio::test]
async fn repeated_push_events_are_idempotent() {
    let store = StateStore::new();
    let event = ChangeEvent {
        table: "messages".into(),
        kind: ChangeKind::Insert,
        record: Some(json!({"id": "msg-1", "conversation_id": "conv-1", "text": "hello"})),
        old_record: None,
    };
    apply_change(&store, &event);
    let once = store.messages();
    let version = store.version();
    apply_change(&store, &event);
    assert_eq!(store.messages(), once);
    assert_eq!(store.version(), version);
}

#[tokio::test(start_paused = true)]
async fn missed_push_converges_within_one_poll() {
    let gateway = Arc::new(MemoryGateway::new());
    let engine = engine(&gateway);
    engine.load_all().await;
    engine.start();
    settle().await;

    // Another client writes while the push path is dead.
    gateway.mute_events(true);
    gateway
        .insert("messages", json!({"id": "msg-9", "conversation_id": "conv-1", "text": "late"}))
        .await
        .unwrap();
    settle().await;
    assert!(engine.store().messages().is_empty());

    tokio::time::sleep(Duration::from_secs(16)).await;
    settle().await;
    assert_eq!(engine.store().messages().len(), 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn nothing_is_applied_after_shutdown() {
    let gateway = Arc::new(MemoryGateway::new());
    let engine = engine(&gateway);
    engine.load_all().await;
    engine.start();
    settle().await;
    engine.shutdown().await;
    let version = engine.store().version();

    gateway
        .insert("messages", json!({"id": "msg-1", "conversation_id": "conv-1"}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    settle().await;
    assert_eq!(engine.store().version(), version);
    assert!(engine.store().messages().is_empty());
}

#[tokio::test]
async fn out_of_order_events_converge_after_one_poll() {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed(
        "messages",
        vec![
            json!({"id": "msg-1", "conversation_id": "conv-1", "text": "v2"}),
            json!({"id": "msg-2", "conversation_id": "conv-1", "text": "fresh"}),
        ],
    );
    let store = Arc::new(StateStore::new());
    let event = |kind: ChangeKind, row: serde_json::Value| ChangeEvent {
        table: "messages".into(),
        kind,
        record: (kind != ChangeKind::Delete).then(|| row.clone()),
        old_record: (kind == ChangeKind::Delete).then_some(row),
    };

    // Update before its insert, delete of a record never seen.
    apply_change(
        &store,
        &event(ChangeKind::Update, json!({"id": "msg-2", "conversation_id": "conv-1", "text": "fresh"})),
    );
    apply_change(&store, &event(ChangeKind::Delete, json!({"id": "msg-404"})));

    // Newer update overtaken by a stale one.
    apply_change(
        &store,
        &event(ChangeKind::Insert, json!({"id": "msg-1", "conversation_id": "conv-1", "text": "v0"})),
    );
    apply_change(
        &store,
        &event(ChangeKind::Update, json!({"id": "msg-1", "conversation_id": "conv-1", "text": "v2"})),
    );
    apply_change(
        &store,
        &event(ChangeKind::Update, json!({"id": "msg-1", "conversation_id": "conv-1", "text": "v1"})),
    );
    assert_eq!(store.messages()[0].text, "v1");

    let poller = PollingReconciler::new(
        gateway.clone(),
        store.clone(),
        vec![Collection::Messages],
        Duration::from_secs(15),
    );
    poller.run_cycle(&CancellationToken::new()).await;

    let mut held = store.messages();
    held.sort_by(|a, b| a.id.cmp(&b.id));
    let (mut remote, skipped) =
        blackline_sync::mapper::decode_rows::<Message>(&gateway.rows("messages"));
    remote.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(skipped, 0);
    assert_eq!(held, remote);
}
