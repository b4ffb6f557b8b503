//! Sync cycle behavior against a scripted transport.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidesync_core::{Fields, RecordId, RecordStore, Schema, SyncStatus, Timestamp};
use tidesync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult, WriteBatch};
use tidesync_sync_engine::{
    is_due_at, MockTransport, RetryConfig, StoreApplier, SyncConfig, SyncCoordinator, SyncError,
    SyncState, DEFAULT_SYNC_INTERVAL, LAST_PULLED_AT_KEY,
};
use tidesync_sync_protocol::{ChangeSet, PullResponse};

const ENDPOINT: &str = "https://sync.example.com";
const TOKEN: &str = "secret-token";

fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

fn response(changes: Value, timestamp: i64) -> PullResponse {
    PullResponse {
        changes: serde_json::from_value(changes).unwrap(),
        timestamp,
    }
}

fn store() -> Arc<RecordStore> {
    Arc::new(RecordStore::in_memory(Schema::app_default()))
}

fn coordinator(store: Arc<RecordStore>, transport: MockTransport) -> SyncCoordinator<MockTransport> {
    SyncCoordinator::new(store, transport, SyncConfig::default())
}

#[tokio::test]
async fn first_sync_downloads_and_sets_watermark() {
    let transport = MockTransport::new();
    transport.queue_pull(response(
        json!({"posts": {"created": [{"id": "p1", "title": "Hi"}]}}),
        1000,
    ));
    let store = store();
    let coordinator = coordinator(Arc::clone(&store), transport);

    let result = coordinator.sync(ENDPOINT, TOKEN).await.unwrap();

    let pull = &coordinator.transport().pull_requests()[0];
    assert_eq!(pull.last_pulled_at, None);
    assert_eq!(result.watermark, Timestamp::from_millis(1000));
    assert_eq!(store.get_local(LAST_PULLED_AT_KEY), Some(1000));

    let post = store.get("posts", &RecordId::from("p1")).unwrap().unwrap();
    assert_eq!(post.fields["title"], "Hi");
    assert_eq!(post.status, SyncStatus::Synced);
}

#[tokio::test]
async fn push_failure_keeps_changes_for_next_cycle() {
    let transport = MockTransport::new();
    transport.queue_pull(response(json!({}), 2000));
    transport.queue_push_error(SyncError::transport_retryable("connection reset"));
    transport.queue_pull(response(json!({}), 2500));

    let store = store();
    store
        .create_with_id("posts", RecordId::from("local"), fields(json!({"title": "draft"})))
        .unwrap();
    let coordinator = coordinator(Arc::clone(&store), transport);

    let err = coordinator.sync(ENDPOINT, TOKEN).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, SyncError::PushFailed { .. }));
    assert_eq!(coordinator.watermark(), Some(Timestamp::from_millis(2000)));
    assert_eq!(coordinator.last_synced_at(), None);
    assert_eq!(store.pending_count(), 1);

    coordinator.sync(ENDPOINT, TOKEN).await.unwrap();

    let pulls = coordinator.transport().pull_requests();
    assert_eq!(pulls[1].last_pulled_at, Some(2000));
    let pushes = coordinator.transport().push_requests();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[0].changes, pushes[1].changes);
    assert_eq!(pushes[1].last_pulled_at, 2500);
    assert_eq!(store.pending_count(), 0);
}

#[tokio::test]
async fn pull_failure_changes_nothing() {
    let transport = MockTransport::new();
    transport.queue_pull_error(SyncError::Server {
        status: 500,
        message: "boom".into(),
    });
    let store = store();
    store.create("posts", Fields::new()).unwrap();
    let coordinator = coordinator(Arc::clone(&store), transport);

    assert!(coordinator.sync(ENDPOINT, TOKEN).await.is_err());
    assert_eq!(coordinator.watermark(), None);
    assert_eq!(store.pending_count(), 1);
    assert!(coordinator.transport().push_requests().is_empty());
}

#[tokio::test]
async fn watermark_never_moves_back() {
    let transport = MockTransport::new();
    transport.queue_pull(response(json!({}), 5000));
    transport.queue_pull(response(
        json!({"users": {"created": [{"id": "u1", "name": "late"}]}}),
        3000,
    ));
    let store = store();
    let coordinator = coordinator(Arc::clone(&store), transport);

    coordinator.sync(ENDPOINT, TOKEN).await.unwrap();
    let result = coordinator.sync(ENDPOINT, TOKEN).await.unwrap();

    assert_eq!(result.watermark, Timestamp::from_millis(5000));
    assert_eq!(coordinator.watermark(), Some(Timestamp::from_millis(5000)));
    assert!(store.get("users", &RecordId::from("u1")).unwrap().is_some());

    coordinator.reset().unwrap();
    assert_eq!(coordinator.watermark(), None);
}

#[tokio::test]
async fn failed_apply_rolls_back_everything() {
    let transport = MockTransport::new();
    transport.queue_pull(response(
        json!({"posts": {
            "created": [{"id": "p1"}, {"id": "p2"}],
            "updated": [{"title": "no id"}],
            "deleted": ["p0"]
        }}),
        1000,
    ));
    let store = store();
    store
        .create_with_id("posts", RecordId::from("p0"), Fields::new())
        .unwrap();
    let before = store.list_all("posts").unwrap();
    let coordinator = coordinator(Arc::clone(&store), transport);

    let err = coordinator.sync(ENDPOINT, TOKEN).await.unwrap_err();
    assert!(matches!(err, SyncError::LocalApply(_)));
    assert_eq!(store.list_all("posts").unwrap(), before);
    assert_eq!(coordinator.watermark(), None);
    assert!(coordinator.transport().push_requests().is_empty());
}

/// Backend whose commits fail while the flag is set.
#[derive(Default)]
struct FlakyBackend {
    inner: InMemoryBackend,
    failing: AtomicBool,
}

impl StorageBackend for FlakyBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.write_batch(batch)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }
}

#[tokio::test]
async fn storage_failure_during_apply_leaves_state_untouched() {
    let backend = Arc::new(FlakyBackend::default());
    let store = Arc::new(
        RecordStore::open(Arc::clone(&backend) as Arc<dyn StorageBackend>, Schema::app_default())
            .unwrap(),
    );
    let transport = MockTransport::new();
    transport.queue_pull(response(
        json!({"posts": {"created": [{"id": "p1"}], "deleted": ["p9"]}}),
        1000,
    ));
    let coordinator = coordinator(Arc::clone(&store), transport);

    backend.failing.store(true, Ordering::SeqCst);
    assert!(matches!(
        coordinator.sync(ENDPOINT, TOKEN).await,
        Err(SyncError::LocalApply(_))
    ));
    assert!(store.list_all("posts").unwrap().is_empty());
    assert_eq!(coordinator.watermark(), None);

    let reopened = RecordStore::open(backend as Arc<dyn StorageBackend>, Schema::app_default())
        .unwrap();
    assert!(reopened.list_all("posts").unwrap().is_empty());
    assert_eq!(reopened.get_local(LAST_PULLED_AT_KEY), None);
}

#[tokio::test]
async fn create_then_delete_in_one_pull_ends_deleted() {
    let transport = MockTransport::new();
    transport.queue_pull(response(
        json!({"comments": {"created": [{"id": "c1", "body": "x"}], "deleted": ["c1"]}}),
        10,
    ));
    let store = store();
    let coordinator = coordinator(Arc::clone(&store), transport);

    coordinator.sync(ENDPOINT, TOKEN).await.unwrap();

    let comment = store.get("comments", &RecordId::from("c1")).unwrap().unwrap();
    assert!(comment.deleted);
    assert!(store.list("comments").unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_sync_is_rejected() {
    let transport = MockTransport::new().with_delay(Duration::from_millis(200));
    transport.queue_pull(response(json!({}), 10));
    let coordinator = Arc::new(coordinator(store(), transport));

    let running = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.sync(ENDPOINT, TOKEN).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.state().is_active());

    assert!(matches!(
        coordinator.sync(ENDPOINT, TOKEN).await,
        Err(SyncError::AlreadySyncing)
    ));
    assert!(matches!(coordinator.reset(), Err(SyncError::AlreadySyncing)));

    running.await.unwrap().unwrap();
    assert_eq!(coordinator.transport().pull_requests().len(), 1);
}

#[tokio::test]
async fn slow_pull_times_out() {
    let transport = MockTransport::new().with_delay(Duration::from_millis(500));
    transport.queue_pull(response(json!({}), 10));
    let config = SyncConfig::default().with_timeout(Duration::from_millis(20));
    let coordinator = SyncCoordinator::new(store(), transport, config);

    let err = coordinator.sync(ENDPOINT, TOKEN).await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout));
    assert!(err.is_retryable());
    assert_eq!(coordinator.state(), SyncState::Error);
    assert_eq!(coordinator.watermark(), None);
}

#[tokio::test]
async fn cancel_stops_before_apply() {
    let transport = MockTransport::new().with_delay(Duration::from_millis(100));
    transport.queue_pull(response(
        json!({"posts": {"created": [{"id": "p1"}]}}),
        10,
    ));
    let store = store();
    let coordinator = Arc::new(coordinator(Arc::clone(&store), transport));

    let running = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.sync(ENDPOINT, TOKEN).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.cancel();

    assert!(matches!(running.await.unwrap(), Err(SyncError::Cancelled)));
    assert!(store.list_all("posts").unwrap().is_empty());
    assert_eq!(coordinator.watermark(), None);
}

#[tokio::test]
async fn cancel_during_backoff_stops_retrying() {
    let transport = MockTransport::new();
    transport.queue_pull_error(SyncError::transport_retryable("offline"));
    transport.queue_pull(response(json!({}), 9));
    let config = SyncConfig::default().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(200))
            .with_jitter(false),
    );
    let coordinator = Arc::new(SyncCoordinator::new(store(), transport, config));

    let running = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.sync_with_retry(ENDPOINT, TOKEN).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.state(), SyncState::RetryWait);
    assert!(matches!(coordinator.sync(ENDPOINT, TOKEN).await, Err(SyncError::AlreadySyncing)));
    coordinator.cancel();

    assert!(matches!(running.await.unwrap(), Err(SyncError::Cancelled)));
    assert_eq!(coordinator.transport().pull_requests().len(), 1);
    assert_eq!(coordinator.watermark(), None);
    assert_eq!(coordinator.stats().retries, 0);

    // The next call starts clean.
    coordinator.sync(ENDPOINT, TOKEN).await.unwrap();
    assert_eq!(coordinator.watermark(), Some(Timestamp::from_millis(9)));
}

#[tokio::test]
async fn cancel_during_push_skips_success_bookkeeping() {
    let transport = MockTransport::new().with_delay(Duration::from_millis(100));
    transport.queue_pull(response(json!({}), 10));
    let store = store();
    store.create("posts", fields(json!({"title": "draft"}))).unwrap();
    let coordinator = Arc::new(coordinator(Arc::clone(&store), transport));

    let running = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.sync(ENDPOINT, TOKEN).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(coordinator.state(), SyncState::Pushing);
    coordinator.cancel();

    assert!(matches!(running.await.unwrap(), Err(SyncError::Cancelled)));
    assert_eq!(coordinator.transport().push_requests().len(), 1);
    assert_eq!(store.pending_count(), 0);
    assert_eq!(coordinator.watermark(), Some(Timestamp::from_millis(10)));
    assert_eq!(coordinator.last_synced_at(), None);
    assert_eq!(coordinator.state(), SyncState::Error);
}

#[tokio::test]
async fn rejected_credential_leaves_local_state_alone() {
    let transport = MockTransport::new();
    transport.queue_pull(response(
        json!({"posts": {"created": [{"id": "p1", "title": "remote"}]}}),
        1000,
    ));
    transport.queue_pull_error(SyncError::from_status(401, br#"{"error":"revoked"}"#));
    let store = store();
    let coordinator = coordinator(Arc::clone(&store), transport);
    coordinator.sync(ENDPOINT, TOKEN).await.unwrap();

    store
        .create_with_id("posts", RecordId::from("p2"), fields(json!({"title": "draft"})))
        .unwrap();
    let before = store.list_all("posts").unwrap();
    let synced_at = coordinator.last_synced_at();

    let err = coordinator.sync(ENDPOINT, TOKEN).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    assert_eq!(coordinator.watermark(), Some(Timestamp::from_millis(1000)));
    assert_eq!(coordinator.last_synced_at(), synced_at);
    assert_eq!(store.list_all("posts").unwrap(), before);
    assert_eq!(store.pending_count(), 1);
    assert!(coordinator.transport().push_requests().is_empty());

    assert!(matches!(
        coordinator.sync(ENDPOINT, "  ").await,
        Err(SyncError::AuthenticationFailed(_))
    ));
    assert_eq!(coordinator.transport().pull_requests().len(), 2);
    assert_eq!(store.list_all("posts").unwrap(), before);
}

#[tokio::test]
async fn rejected_credential_is_not_retried() {
    let transport = MockTransport::new();
    transport.queue_pull_error(SyncError::from_status(401, br#"{"error":"expired"}"#));
    let config = SyncConfig::default().with_retry(
        RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
    );
    let coordinator = SyncCoordinator::new(store(), transport, config);

    let err = coordinator.sync_with_retry(ENDPOINT, TOKEN).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    assert_eq!(coordinator.transport().pull_requests().len(), 1);
    assert_eq!(coordinator.stats().retries, 0);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let transport = MockTransport::new();
    transport.queue_pull_error(SyncError::transport_retryable("offline"));
    transport.queue_pull_error(SyncError::Server {
        status: 503,
        message: "busy".into(),
    });
    transport.queue_pull(response(json!({}), 77));
    let config = SyncConfig::default().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
    );
    let coordinator = SyncCoordinator::new(store(), transport, config);

    let result = coordinator.sync_with_retry(ENDPOINT, TOKEN).await.unwrap();
    assert_eq!(result.watermark, Timestamp::from_millis(77));
    let stats = coordinator.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.cycles_failed, 2);
    assert_eq!(stats.cycles_completed, 1);
}

#[tokio::test]
async fn retries_give_up_after_max_attempts() {
    let transport = MockTransport::new();
    for _ in 0..3 {
        transport.queue_pull_error(SyncError::Timeout);
    }
    let config = SyncConfig::default().with_retry(
        RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
    );
    let coordinator = SyncCoordinator::new(store(), transport, config);

    assert!(matches!(
        coordinator.sync_with_retry(ENDPOINT, TOKEN).await,
        Err(SyncError::Timeout)
    ));
    assert_eq!(coordinator.transport().pull_requests().len(), 2);
}

#[tokio::test]
async fn local_edits_merge_with_pulled_record() {
    let transport = MockTransport::new();
    transport.queue_pull(response(
        json!({"posts": {"created": [{"id": "p1", "title": "v1", "body": "b1"}]}}),
        100,
    ));
    transport.queue_pull(response(
        json!({"posts": {"updated": [{"id": "p1", "title": "server", "body": "b2"}]}}),
        200,
    ));
    transport.queue_push_error(SyncError::transport_retryable("down"));
    let store = store();
    let coordinator = coordinator(Arc::clone(&store), transport);

    coordinator.sync(ENDPOINT, TOKEN).await.unwrap();
    store
        .update("posts", &RecordId::from("p1"), fields(json!({"title": "mine"})))
        .unwrap();

    assert!(coordinator.sync(ENDPOINT, TOKEN).await.is_err());
    let post = store.get("posts", &RecordId::from("p1")).unwrap().unwrap();
    assert_eq!(post.fields["title"], "mine");
    assert_eq!(post.fields["body"], "b2");
    assert_eq!(post.status, SyncStatus::Updated);
}

#[test]
fn timing_policy_values() {
    let now = Timestamp::now();
    let ago = |ms: i64| Some(Timestamp::from_millis(now.as_millis() - ms));

    assert!(is_due_at(None, DEFAULT_SYNC_INTERVAL, now));
    assert!(!is_due_at(ago(100_000), DEFAULT_SYNC_INTERVAL, now));
    assert!(is_due_at(ago(400_000), DEFAULT_SYNC_INTERVAL, now));
}

#[derive(Debug, Clone)]
enum RemoteOp {
    Create(u8),
    Update(u8),
    CreateThenDelete,
    Delete,
}

fn remote_ops() -> impl Strategy<Value = Vec<(u8, RemoteOp)>> {
    prop::collection::btree_map(
        0u8..12,
        prop_oneof![
            any::<u8>().prop_map(RemoteOp::Create),
            any::<u8>().prop_map(RemoteOp::Update),
            Just(RemoteOp::CreateThenDelete),
            Just(RemoteOp::Delete),
        ],
        0..12,
    )
    .prop_map(|ops| ops.into_iter().collect())
}

fn change_set(ops: &[(u8, RemoteOp)]) -> ChangeSet {
    let mut changes = ChangeSet::new();
    let posts = changes.collection_mut("posts");
    for (id, op) in ops {
        let id = format!("p{id}");
        match op {
            RemoteOp::Create(v) => posts
                .created
                .push(fields(json!({"id": id, "title": format!("t{v}"), "created_at": 1}))),
            RemoteOp::Update(v) => posts
                .updated
                .push(fields(json!({"id": id, "body": format!("b{v}"), "updated_at": 2}))),
            RemoteOp::CreateThenDelete => {
                posts.created.push(fields(json!({"id": id})));
                posts.deleted.push(id);
            }
            RemoteOp::Delete => posts.deleted.push(id),
        }
    }
    changes
}

proptest! {
    #[test]
    fn applying_a_pull_twice_equals_applying_once(
        local in prop::collection::btree_set(0u8..12, 0..6),
        ops in remote_ops(),
    ) {
        let applier = StoreApplier::new(store());
        for id in &local {
            applier
                .store()
                .create_with_id("posts", RecordId::new(format!("p{id}")), fields(json!({"title": "local"})))
                .unwrap();
        }
        let pull = PullResponse { changes: change_set(&ops), timestamp: 10 };

        applier.apply_pull(&pull).unwrap();
        let once = applier.store().list_all("posts").unwrap();
        applier.apply_pull(&pull).unwrap();
        let twice = applier.store().list_all("posts").unwrap();

        prop_assert_eq!(once, twice);
    }
}
