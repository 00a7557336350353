use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;

use super::SyncClient;
use crate::models::TutorialProgress;
use crate::util::ScopedTask;

/// Quiet period before a playback position is saved
pub const PROGRESS_SAVE_DEBOUNCE: Duration = Duration::from_secs(2);

/// Debounces tutorial playback-position saves through the sync client.
///
/// Position updates arrive several times a second while a video plays; only
/// the last one in each quiet period is upserted. Dropping the tracker cancels
/// any pending save; call [`Self::flush`] first to keep it.
#[derive(Debug)]
pub struct TutorialProgressTracker {
    sync: Arc<SyncClient>,
    progress: Arc<Mutex<TutorialProgress>>,
    debounce: Duration,
    pending: Mutex<Option<ScopedTask>>,
}

impl TutorialProgressTracker {
    pub fn new(sync: Arc<SyncClient>, lesson_id: impl Into<String>) -> Self {
        Self::resume(sync, TutorialProgress::new(lesson_id))
    }

    /// Continue from previously saved progress
    pub fn resume(sync: Arc<SyncClient>, progress: TutorialProgress) -> Self {
        Self {
            sync,
            progress: Arc::new(Mutex::new(progress)),
            debounce: PROGRESS_SAVE_DEBOUNCE,
            pending: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn progress(&self) -> TutorialProgress {
        lock(&self.progress).clone()
    }

    /// Record the playback position and schedule a save.
    pub fn update_position(&self, seconds: f64) {
        {
            let mut progress = lock(&self.progress);
            progress.last_position_seconds = seconds.max(0.0);
            progress.updated_at = Utc::now();
        }

        let sync = Arc::clone(&self.sync);
        let progress = Arc::clone(&self.progress);
        let debounce = self.debounce;
        // replacing the handle aborts the previous timer
        *lock(&self.pending) = Some(ScopedTask::spawn(async move {
            tokio::time::sleep(debounce).await;
            let snapshot = lock(&progress).clone();
            sync.upsert_tutorial_progress(&snapshot).await;
        }));
    }

    /// Save now, cancelling any scheduled save.
    pub async fn flush(&self) {
        lock(&self.pending).take();
        let snapshot = self.progress();
        self.sync.upsert_tutorial_progress(&snapshot).await;
    }

    pub async fn mark_completed(&self) {
        {
            let mut progress = lock(&self.progress);
            let now = Utc::now();
            progress.completed = true;
            progress.completed_at = Some(now);
            progress.updated_at = now;
        }
        self.flush().await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
