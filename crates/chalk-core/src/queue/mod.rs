//! Persistent durable sync queue.
//!
//! Items are stored one per key (`sync_queue:item:{id}`) with a separate
//! active index (`sync_queue:index`) listing ids still eligible for
//! dequeue. Completed items leave the index immediately and are physically
//! deleted after a grace window; terminally failed items leave the index and
//! are kept for inspection.
//!
//! Queue operations never return storage errors. Failures are logged and the
//! call degrades to a no-op or an empty result. An item whose stored JSON can
//! no longer be read is moved to the failed list instead of blocking the
//! rest of the index.

mod backoff;
mod payload;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub use backoff::{RetryPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MULTIPLIER};
pub use payload::{RecordKind, SyncPayload};

use crate::error::{Error, Result};
use crate::ids;
use crate::storage::KeyValueStore;
use crate::telemetry::{context, Telemetry};

const INDEX_KEY: &str = "sync_queue:index";
const COMPLETED_KEY: &str = "sync_queue:completed";
const FAILED_KEY: &str = "sync_queue:failed";
const STATS_KEY: &str = "sync_queue:stats";
const ITEM_PREFIX: &str = "sync_queue:item:";

/// How long completed items are kept before physical deletion
pub const COMPLETED_GRACE: Duration = Duration::hours(1);

/// Lifecycle state of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A pending sync operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    #[serde(flatten)]
    pub payload: SyncPayload,
    pub status: QueueStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub purge_after: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub const fn kind(&self) -> RecordKind {
        self.payload.kind()
    }

    pub const fn priority(&self) -> u8 {
        self.payload.kind().priority()
    }

    /// Pending and past its retry time
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// Lifetime queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    /// Items still in the active index (pending or in progress)
    #[serde(skip_deserializing)]
    pub pending_count: usize,
}

/// Durable, priority-ordered queue of sync operations
pub struct DurableQueue {
    store: Arc<dyn KeyValueStore>,
    policy: RetryPolicy,
    telemetry: Arc<dyn Telemetry>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DurableQueue {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        policy: RetryPolicy,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            store,
            policy,
            telemetry,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a queue and return crash-interrupted items to pending.
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        policy: RetryPolicy,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let queue = Self::new(store, policy, telemetry);
        let recovered = queue.recover_in_progress().await;
        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted sync queue item(s)");
        }
        queue
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Store `payload` as a new pending item. Returns the queue item id, or
    /// `None` when storage failed.
    pub async fn enqueue(&self, payload: SyncPayload) -> Option<String> {
        let _guard = self.write_lock.lock().await;
        let kind = payload.kind();
        let record_id = payload.record_id().to_string();
        match self.try_enqueue(payload).await {
            Ok(id) => {
                tracing::debug!("Enqueued {kind} {record_id} as {id}");
                Some(id)
            }
            Err(error) => {
                tracing::warn!("Failed to enqueue {kind} {record_id}: {error}");
                None
            }
        }
    }

    async fn try_enqueue(&self, payload: SyncPayload) -> Result<String> {
        let now = Utc::now();
        let item = QueueItem {
            id: ids::generate(Some("sq")),
            payload,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: self.policy.max_attempts,
            created_at: now,
            updated_at: now,
            last_error: None,
            next_retry_at: None,
            purge_after: None,
        };

        self.save_item(&item).await?;
        let mut index = self.load_list(INDEX_KEY).await?;
        index.push(item.id.clone());
        self.save_list(INDEX_KEY, &index).await?;
        self.update_stats(|stats| stats.total_enqueued += 1).await?;
        Ok(item.id)
    }

    /// Peek at the next due item in (priority, `created_at`) order.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        self.dequeue_at(Utc::now()).await
    }

    /// [`Self::dequeue`] against an explicit clock.
    pub async fn dequeue_at(&self, now: DateTime<Utc>) -> Option<QueueItem> {
        match self.active_items().await {
            Ok(items) => items
                .into_iter()
                .filter(|item| item.is_due(now))
                // first minimum wins, so index order breaks timestamp ties
                .min_by_key(|item| (item.priority(), item.created_at)),
            Err(error) => {
                tracing::warn!("Failed to read sync queue: {error}");
                None
            }
        }
    }

    /// Every item in the active index, in drain order.
    pub async fn pending_items(&self) -> Vec<QueueItem> {
        match self.active_items().await {
            Ok(mut items) => {
                items.sort_by_key(|item| (item.priority(), item.created_at));
                items
            }
            Err(error) => {
                tracing::warn!("Failed to read sync queue: {error}");
                Vec::new()
            }
        }
    }

    /// Items that exhausted their retries.
    pub async fn failed_items(&self) -> Vec<QueueItem> {
        let result = async {
            let ids = self.load_list(FAILED_KEY).await?;
            let mut items = Vec::with_capacity(ids.len());
            for id in ids {
                match self.load_item(&id).await {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => {}
                    Err(Error::Serialization(error)) => {
                        tracing::debug!("Skipping unreadable failed item {id}: {error}");
                    }
                    Err(error) => return Err(error),
                }
            }
            Ok::<_, crate::Error>(items)
        }
        .await;
        result.unwrap_or_else(|error| {
            tracing::warn!("Failed to read failed sync items: {error}");
            Vec::new()
        })
    }

    /// Start an attempt: bump `attempts` and move to in-progress.
    pub async fn mark_in_progress(&self, id: &str) {
        let _guard = self.write_lock.lock().await;
        let result = self
            .modify_item(id, |item| {
                if item.status != QueueStatus::Pending {
                    tracing::warn!(
                        "Ignoring mark_in_progress for {id}: status is {}",
                        item.status.as_str()
                    );
                    return false;
                }
                item.attempts += 1;
                item.status = QueueStatus::InProgress;
                item.updated_at = Utc::now();
                true
            })
            .await;
        if let Err(error) = result {
            tracing::warn!("Failed to mark {id} in progress: {error}");
        }
    }

    /// Finish an attempt successfully.
    pub async fn mark_completed(&self, id: &str) {
        let _guard = self.write_lock.lock().await;
        if let Err(error) = self.try_mark_completed(id).await {
            tracing::warn!("Failed to mark {id} completed: {error}");
        }
    }

    async fn try_mark_completed(&self, id: &str) -> Result<()> {
        let completed = self
            .modify_item(id, |item| {
                if item.status != QueueStatus::InProgress {
                    tracing::warn!(
                        "Ignoring mark_completed for {id}: status is {}",
                        item.status.as_str()
                    );
                    return false;
                }
                let now = Utc::now();
                item.status = QueueStatus::Completed;
                item.updated_at = now;
                item.next_retry_at = None;
                item.purge_after = Some(now + COMPLETED_GRACE);
                true
            })
            .await?;
        if !completed {
            return Ok(());
        }

        self.remove_from_list(INDEX_KEY, id).await?;
        let mut grace = self.load_list(COMPLETED_KEY).await?;
        grace.push(id.to_string());
        self.save_list(COMPLETED_KEY, &grace).await?;
        self.update_stats(|stats| stats.total_completed += 1).await
    }

    /// Finish an attempt with `error`: reschedule with backoff, or mark the
    /// item failed once the attempt budget is spent.
    pub async fn mark_failed(&self, id: &str, error: &str) {
        let _guard = self.write_lock.lock().await;
        if let Err(storage_error) = self.try_mark_failed(id, error, Utc::now(), true).await {
            tracing::warn!("Failed to mark {id} failed: {storage_error}");
        }
    }

    /// Finish an attempt with an error no replay can fix. The item fails now
    /// whatever attempts it has left.
    pub async fn mark_failed_permanently(&self, id: &str, error: &str) {
        let _guard = self.write_lock.lock().await;
        if let Err(storage_error) = self.try_mark_failed(id, error, Utc::now(), false).await {
            tracing::warn!("Failed to mark {id} failed: {storage_error}");
        }
    }

    async fn try_mark_failed(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
        retryable: bool,
    ) -> Result<()> {
        let Some(mut item) = self.load_item(id).await? else {
            tracing::warn!("Ignoring mark_failed for unknown queue item {id}");
            return Ok(());
        };
        if item.status != QueueStatus::InProgress {
            tracing::warn!(
                "Ignoring mark_failed for {id}: status is {}",
                item.status.as_str()
            );
            return Ok(());
        }

        item.updated_at = now;
        item.last_error = Some(error.to_string());

        let retry_policy = RetryPolicy {
            max_attempts: item.max_attempts,
            ..self.policy
        };
        if retryable && retry_policy.should_retry(item.attempts) {
            let delay = retry_policy.delay_for(item.attempts);
            let delay = Duration::from_std(delay).unwrap_or(Duration::MAX);
            item.status = QueueStatus::Pending;
            item.next_retry_at = Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC));
            self.save_item(&item).await?;
            self.update_stats(|stats| stats.total_retries += 1).await?;
            tracing::debug!(
                "Retrying {} {} after attempt {} in {}ms",
                item.kind(),
                item.payload.record_id(),
                item.attempts,
                delay.num_milliseconds()
            );
            return Ok(());
        }

        item.status = QueueStatus::Failed;
        item.next_retry_at = None;
        self.save_item(&item).await?;
        self.remove_from_list(INDEX_KEY, id).await?;
        let mut failed = self.load_list(FAILED_KEY).await?;
        failed.push(id.to_string());
        self.save_list(FAILED_KEY, &failed).await?;
        self.update_stats(|stats| stats.total_failed += 1).await?;

        tracing::error!(
            "Giving up on {} {} after {} attempts: {error}",
            item.kind(),
            item.payload.record_id(),
            item.attempts
        );
        self.telemetry.capture_exception(
            error,
            context([
                ("queue_item_id", item.id.clone()),
                ("record_id", item.payload.record_id().to_string()),
                ("record_type", item.kind().to_string()),
                ("attempts", item.attempts.to_string()),
            ]),
        );
        Ok(())
    }

    /// Lifetime counters plus the current active index size.
    pub async fn get_queue_stats(&self) -> QueueStats {
        let result = async {
            let mut stats = self.load_stats().await?;
            stats.pending_count = self.load_list(INDEX_KEY).await?.len();
            Ok::<_, crate::Error>(stats)
        }
        .await;
        result.unwrap_or_else(|error| {
            tracing::warn!("Failed to read sync queue stats: {error}");
            QueueStats::default()
        })
    }

    /// Delete every item and reset the lists. Lifetime counters are kept.
    pub async fn clear_queue(&self) {
        let _guard = self.write_lock.lock().await;
        let result = async {
            let mut removed = 0usize;
            for list in [INDEX_KEY, COMPLETED_KEY, FAILED_KEY] {
                for id in self.load_list(list).await? {
                    self.store.delete(&item_key(&id)).await?;
                    removed += 1;
                }
                self.store.delete(list).await?;
            }
            Ok::<_, crate::Error>(removed)
        }
        .await;
        match result {
            Ok(removed) => tracing::info!("Cleared sync queue ({removed} item(s))"),
            Err(error) => tracing::warn!("Failed to clear sync queue: {error}"),
        }
    }

    /// Physically delete completed items whose grace window has passed.
    /// Returns how many were deleted.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    /// [`Self::purge_expired`] against an explicit clock.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let _guard = self.write_lock.lock().await;
        let result = async {
            let ids = self.load_list(COMPLETED_KEY).await?;
            let mut kept = Vec::with_capacity(ids.len());
            let mut purged = 0usize;
            for id in ids {
                let expired = self
                    .load_item(&id)
                    .await?
                    .map_or(true, |item| item.purge_after.map_or(true, |at| at <= now));
                if expired {
                    self.store.delete(&item_key(&id)).await?;
                    purged += 1;
                } else {
                    kept.push(id);
                }
            }
            if purged > 0 {
                self.save_list(COMPLETED_KEY, &kept).await?;
            }
            Ok::<_, crate::Error>(purged)
        }
        .await;
        result.unwrap_or_else(|error| {
            tracing::warn!("Failed to purge completed sync items: {error}");
            0
        })
    }

    /// Return items left in progress by an interrupted process to pending.
    /// The attempt they were on still counts.
    pub async fn recover_in_progress(&self) -> usize {
        let _guard = self.write_lock.lock().await;
        let result = async {
            let mut recovered = 0usize;
            for id in self.load_list(INDEX_KEY).await? {
                let changed = self
                    .modify_item(&id, |item| {
                        if item.status != QueueStatus::InProgress {
                            return false;
                        }
                        item.status = QueueStatus::Pending;
                        item.updated_at = Utc::now();
                        true
                    })
                    .await;
                match changed {
                    Ok(true) => recovered += 1,
                    Ok(false) => {}
                    // quarantined by the next dequeue
                    Err(Error::Serialization(_)) => {}
                    Err(error) => return Err(error),
                }
            }
            Ok::<_, crate::Error>(recovered)
        }
        .await;
        result.unwrap_or_else(|error| {
            tracing::warn!("Failed to recover in-progress sync items: {error}");
            0
        })
    }

    /// Load a single item by queue id.
    pub async fn get_item(&self, id: &str) -> Option<QueueItem> {
        self.load_item(id).await.unwrap_or_else(|error| {
            tracing::warn!("Failed to read queue item {id}: {error}");
            None
        })
    }

    async fn active_items(&self) -> Result<Vec<QueueItem>> {
        let ids = self.load_list(INDEX_KEY).await?;
        let mut items = Vec::with_capacity(ids.len());
        let mut unreadable = Vec::new();
        for id in ids {
            match self.load_item(&id).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => tracing::warn!("Sync queue index references missing item {id}"),
                Err(Error::Serialization(error)) => unreadable.push((id, error.to_string())),
                Err(error) => return Err(error),
            }
        }
        if !unreadable.is_empty() {
            self.quarantine(unreadable).await;
        }
        Ok(items)
    }

    /// Move unreadable items from the active index to the failed list. The
    /// stored text stays under its item key.
    async fn quarantine(&self, unreadable: Vec<(String, String)>) {
        let _guard = self.write_lock.lock().await;
        let result = async {
            let mut index = self.load_list(INDEX_KEY).await?;
            // another reader may have moved them already
            let moved: Vec<_> = unreadable
                .into_iter()
                .filter(|(id, _)| index.contains(id))
                .collect();
            if moved.is_empty() {
                return Ok(moved);
            }

            index.retain(|id| !moved.iter().any(|(gone, _)| gone == id));
            self.save_list(INDEX_KEY, &index).await?;
            let mut failed = self.load_list(FAILED_KEY).await?;
            failed.extend(moved.iter().map(|(id, _)| id.clone()));
            self.save_list(FAILED_KEY, &failed).await?;
            let count = u64::try_from(moved.len()).unwrap_or(u64::MAX);
            self.update_stats(|stats| stats.total_failed += count).await?;
            Ok::<_, crate::Error>(moved)
        }
        .await;

        match result {
            Ok(moved) => {
                for (id, error) in moved {
                    tracing::error!("Moved unreadable sync item {id} to failed: {error}");
                    self.telemetry.capture_exception(
                        &format!("Unreadable sync queue item: {error}"),
                        context([("queue_item_id", id)]),
                    );
                }
            }
            Err(error) => tracing::warn!("Failed to move unreadable sync items: {error}"),
        }
    }

    async fn modify_item(&self, id: &str, f: impl FnOnce(&mut QueueItem) -> bool) -> Result<bool> {
        let Some(mut item) = self.load_item(id).await? else {
            tracing::warn!("Ignoring update for unknown queue item {id}");
            return Ok(false);
        };
        if !f(&mut item) {
            return Ok(false);
        }
        self.save_item(&item).await?;
        Ok(true)
    }

    async fn load_item(&self, id: &str) -> Result<Option<QueueItem>> {
        self.load_json(&item_key(id)).await
    }

    async fn save_item(&self, item: &QueueItem) -> Result<()> {
        self.store
            .set(&item_key(&item.id), &serde_json::to_string(item)?)
            .await
    }

    async fn load_list(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.load_json(key).await?.unwrap_or_default())
    }

    async fn save_list(&self, key: &str, ids: &[String]) -> Result<()> {
        self.store.set(key, &serde_json::to_string(ids)?).await
    }

    async fn remove_from_list(&self, key: &str, id: &str) -> Result<()> {
        let mut ids = self.load_list(key).await?;
        let before = ids.len();
        ids.retain(|existing| existing != id);
        if ids.len() != before {
            self.save_list(key, &ids).await?;
        }
        Ok(())
    }

    async fn load_stats(&self) -> Result<QueueStats> {
        Ok(self.load_json(STATS_KEY).await?.unwrap_or_default())
    }

    async fn update_stats(&self, f: impl FnOnce(&mut QueueStats)) -> Result<()> {
        let mut stats = self.load_stats().await?;
        f(&mut stats);
        self.store
            .set(STATS_KEY, &serde_json::to_string(&stats)?)
            .await
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn item_key(id: &str) -> String {
    format!("{ITEM_PREFIX}{id}")
}
