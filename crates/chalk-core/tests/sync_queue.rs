use std::sync::Arc;
use std::time::Duration;

use chalk_core::auth::StaticIdentity;
use chalk_core::models::{
    Assessment, Attempt, Hint, PracticeSession, Step, StrokePoint, StrokeRecord,
    TeacherStudentLink,
};
use chalk_core::queue::RetryPolicy;
use chalk_core::remote::MemoryRemote;
use chalk_core::storage::{MemoryKeyValueStore, SqliteKeyValueStore};
use chalk_core::telemetry::MemoryTelemetry;
use chalk_core::{DurableQueue, QueueStatus, RecordKind, SyncClient, SyncPayload};
use chrono::Utc;
use pretty_assertions::assert_eq;

fn queue(telemetry: &MemoryTelemetry) -> Arc<DurableQueue> {
    Arc::new(DurableQueue::new(
        Arc::new(MemoryKeyValueStore::new()),
        RetryPolicy::default(),
        Arc::new(telemetry.clone()),
    ))
}

fn client(
    remote: &Arc<MemoryRemote>,
    identity: &Arc<StaticIdentity>,
    telemetry: &MemoryTelemetry,
) -> SyncClient {
    SyncClient::new(
        remote.clone(),
        queue(telemetry),
        identity.clone(),
        Arc::new(telemetry.clone()),
    )
}

#[tokio::test]
async fn repeated_upserts_leave_one_row_with_last_values() {
    let remote = Arc::new(MemoryRemote::new());
    let identity = Arc::new(StaticIdentity::signed_in("user-1"));
    let sync = client(&remote, &identity, &MemoryTelemetry::new());

    let mut attempt = Attempt::new("session-1", "problem-1");
    for hints_used in 0..5 {
        attempt.hints_used = hints_used;
        sync.upsert_attempt(&attempt).await;
    }
    attempt.is_correct = Some(true);
    sync.upsert_attempt(&attempt).await;

    let rows = remote.rows("attempts");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], attempt.id.as_str());
    assert_eq!(rows[0]["hints_used"], 4);
    assert_eq!(rows[0]["is_correct"], true);
}

#[tokio::test]
async fn backoff_doubles_and_ninth_failure_is_terminal() {
    let delays: Vec<u128> = RetryPolicy::default()
        .schedule()
        .into_iter()
        .map(|delay| delay.as_millis())
        .collect();
    assert_eq!(
        delays,
        vec![1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000]
    );

    let telemetry = MemoryTelemetry::new();
    let queue = queue(&telemetry);
    let id = queue
        .enqueue(SyncPayload::Hint(Hint::new("attempt-1", 1, "isolate x")))
        .await
        .unwrap();

    for attempt in 1..=9_u32 {
        queue.mark_in_progress(&id).await;
        queue.mark_failed(&id, "503 Service Unavailable").await;
        let item = queue.get_item(&id).await.unwrap();
        assert_eq!(item.attempts, attempt);

        if attempt <= 8 {
            assert_eq!(item.status, QueueStatus::Pending);
            let wait = item.next_retry_at.unwrap() - item.updated_at;
            assert_eq!(
                wait.num_milliseconds(),
                1_000 * 2_i64.pow(attempt - 1),
                "delay after attempt {attempt}"
            );
        } else {
            assert_eq!(item.status, QueueStatus::Failed);
        }
    }

    assert!(queue.dequeue_at(Utc::now() + chrono::Duration::days(1)).await.is_none());
    assert_eq!(queue.failed_items().await.len(), 1);
    let exceptions = telemetry.exceptions();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].1["attempts"], "9");
}

#[tokio::test]
async fn dequeue_follows_priority_then_age() {
    let telemetry = MemoryTelemetry::new();
    let queue = queue(&telemetry);

    let stroke = StrokeRecord::new("step-1", "attempt-1", vec![StrokePoint::new(0.0, 0.0, 0, 1.0)]);
    let payloads = vec![
        SyncPayload::Hint(Hint::new("attempt-1", 1, "hint")),
        SyncPayload::Stroke(stroke),
        SyncPayload::Step(Step::new("attempt-1", 1, "x + 1 = 2")),
        SyncPayload::Attempt(Attempt::new("session-1", "problem-1")),
        SyncPayload::Session(PracticeSession::new(None)),
    ];
    for payload in payloads {
        queue.enqueue(payload).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let mut drained = Vec::new();
    while let Some(item) = queue.dequeue().await {
        drained.push(item.priority());
        queue.mark_in_progress(&item.id).await;
        queue.mark_completed(&item.id).await;
    }
    assert_eq!(drained, vec![0, 1, 2, 3, 4]);

    // equal priority: oldest first
    let older = queue
        .enqueue(SyncPayload::Assessment(Assessment::new("placement")))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    queue
        .enqueue(SyncPayload::Attempt(Attempt::new("session-1", "problem-2")))
        .await
        .unwrap();
    assert_eq!(queue.dequeue().await.unwrap().id, older);
}

#[tokio::test]
async fn completed_items_leave_the_index_immediately() {
    let telemetry = MemoryTelemetry::new();
    let queue = queue(&telemetry);
    let link = queue
        .enqueue(SyncPayload::TeacherStudentLink(TeacherStudentLink::pending(
            "teacher-1",
            "ABC234",
        )))
        .await
        .unwrap();
    let hint = queue
        .enqueue(SyncPayload::Hint(Hint::new("attempt-1", 1, "hint")))
        .await
        .unwrap();

    assert_eq!(queue.dequeue().await.unwrap().id, link);
    queue.mark_in_progress(&link).await;
    queue.mark_completed(&link).await;

    // still stored during the grace window, but never handed out again
    assert_eq!(
        queue.get_item(&link).await.unwrap().status,
        QueueStatus::Completed
    );
    assert_eq!(queue.dequeue().await.unwrap().id, hint);
    assert!(queue.pending_items().await.iter().all(|item| item.id != link));
    assert_eq!(queue.get_queue_stats().await.pending_count, 1);

    let purged = queue
        .purge_expired_at(Utc::now() + chrono::Duration::hours(2))
        .await;
    assert_eq!(purged, 1);
    assert!(queue.get_item(&link).await.is_none());
}

#[tokio::test]
async fn offline_attempt_syncs_after_sign_in() {
    let remote = Arc::new(MemoryRemote::new());
    let identity = Arc::new(StaticIdentity::anonymous());
    let sync = client(&remote, &identity, &MemoryTelemetry::new());

    let attempt = Attempt::new("session-1", "problem-1");
    sync.upsert_attempt(&attempt).await;

    let pending = sync.queue().pending_items().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind(), RecordKind::Attempt);
    assert_eq!(pending[0].status, QueueStatus::Pending);
    assert_eq!(pending[0].attempts, 0);
    let item_id = pending[0].id.clone();

    identity.sign_in("user-1");
    let report = sync.process_sync_queue().await;
    assert_eq!((report.attempted, report.succeeded), (1, 1));

    let item = sync.queue().get_item(&item_id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Completed);
    assert!(sync.queue().dequeue().await.is_none());

    let row = remote.row("attempts", &attempt.id).unwrap();
    assert_eq!(row["user_id"], "user-1");
}

#[tokio::test]
async fn queue_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chalk.db");
    let telemetry = MemoryTelemetry::new();

    let attempt = Attempt::new("session-1", "problem-1");
    let id = {
        let store = Arc::new(SqliteKeyValueStore::open(&path).unwrap());
        let queue = DurableQueue::new(store, RetryPolicy::default(), Arc::new(telemetry.clone()));
        let id = queue
            .enqueue(SyncPayload::Attempt(attempt.clone()))
            .await
            .unwrap();
        // simulate a crash mid-upload
        queue.mark_in_progress(&id).await;
        id
    };

    let store = Arc::new(SqliteKeyValueStore::open(&path).unwrap());
    let queue = DurableQueue::open(store, RetryPolicy::default(), Arc::new(telemetry)).await;
    let item = queue.dequeue().await.unwrap();
    assert_eq!(item.id, id);
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.payload, SyncPayload::Attempt(attempt));
}
