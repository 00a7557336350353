//! Upsert sync client and queue drain worker.
//!
//! Every domain write goes straight to the remote store. When that is not
//! possible (offline, signed out, remote error) the record is parked in the
//! [`DurableQueue`] and replayed later by [`SyncClient::process_sync_queue`].
//! Remote writes are upserts keyed by the record id, so replays are safe.

mod progress;
mod rows;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;

use crate::auth::{Identity, IdentityProvider};
use crate::codec;
use crate::error::{Error, Result};
use crate::models::{
    Assessment, AssessmentStroke, Attempt, CollaborationSession, Hint, PracticeSession, Step,
    StrokeRecord, TeacherStudentLink, TutorialLesson, TutorialProgress,
};
use crate::queue::{DurableQueue, SyncPayload};
use crate::remote::RemoteStore;
use crate::telemetry::{context, Telemetry};
use crate::util::ScopedTask;

pub use progress::{TutorialProgressTracker, PROGRESS_SAVE_DEBOUNCE};
pub use rows::{stroke_points, to_row};

/// Items replayed per drain
pub const DRAIN_BATCH_SIZE: usize = 10;

const TUTORIAL_LESSONS_TABLE: &str = "tutorial_lessons";

/// Why a drain did not touch the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SyncDisabled,
    NotAuthenticated,
}

/// Outcome of one [`SyncClient::process_sync_queue`] pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Completed items physically removed after their grace window
    pub purged: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

pub struct SyncClient {
    remote: Arc<dyn RemoteStore>,
    queue: Arc<DurableQueue>,
    identity: Arc<dyn IdentityProvider>,
    telemetry: Arc<dyn Telemetry>,
    cloud_sync_enabled: AtomicBool,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("queue", &self.queue)
            .field("cloud_sync_enabled", &self.is_cloud_sync_enabled())
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        queue: Arc<DurableQueue>,
        identity: Arc<dyn IdentityProvider>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            remote,
            queue,
            identity,
            telemetry,
            cloud_sync_enabled: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn with_cloud_sync(self, enabled: bool) -> Self {
        self.set_cloud_sync_enabled(enabled);
        self
    }

    pub fn set_cloud_sync_enabled(&self, enabled: bool) {
        self.cloud_sync_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_cloud_sync_enabled(&self) -> bool {
        self.cloud_sync_enabled.load(Ordering::SeqCst)
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub async fn current_identity(&self) -> Option<Identity> {
        self.identity.current_identity().await
    }

    /// Background upsert. Never fails: anything that cannot reach the remote
    /// store now is queued for the drain worker.
    pub async fn upsert(&self, payload: SyncPayload) {
        if !self.is_cloud_sync_enabled() {
            return;
        }

        let kind = payload.kind();
        let Some(identity) = self.identity.current_identity().await else {
            tracing::debug!("No identity; queueing {kind} {}", payload.record_id());
            self.park(payload).await;
            return;
        };

        match self.push(&identity, &payload).await {
            Ok(()) => self.after_push(payload).await,
            Err(Error::Codec(error)) => {
                // a corrupt stroke can never succeed on replay
                tracing::error!("Dropping {kind} {}: {error}", payload.record_id());
                self.capture(&payload, &error.to_string());
            }
            Err(error) => {
                tracing::warn!(
                    "Failed to sync {kind} {}, queueing: {error}",
                    payload.record_id()
                );
                self.capture(&payload, &error.to_string());
                self.park(payload).await;
            }
        }
    }

    /// Foreground upsert for explicit user actions; failures surface to the
    /// caller and nothing is queued.
    pub async fn try_upsert(&self, payload: SyncPayload) -> Result<()> {
        if !self.is_cloud_sync_enabled() {
            return Err(Error::SyncDisabled);
        }
        let identity = self
            .identity
            .current_identity()
            .await
            .ok_or(Error::NotAuthenticated)?;
        self.push(&identity, &payload).await?;
        self.after_push(payload).await;
        Ok(())
    }

    pub async fn upsert_session(&self, session: &PracticeSession) {
        self.upsert(SyncPayload::Session(session.clone())).await;
    }

    pub async fn upsert_attempt(&self, attempt: &Attempt) {
        self.upsert(SyncPayload::Attempt(attempt.clone())).await;
    }

    /// Uploads the step row; its strokes follow through the queue.
    pub async fn upsert_step(&self, step: &Step) {
        self.upsert(SyncPayload::Step(step.clone())).await;
    }

    pub async fn upsert_stroke(&self, stroke: &StrokeRecord) {
        self.upsert(SyncPayload::Stroke(stroke.clone())).await;
    }

    pub async fn upsert_hint(&self, hint: &Hint) {
        self.upsert(SyncPayload::Hint(hint.clone())).await;
    }

    pub async fn upsert_link(&self, link: &TeacherStudentLink) {
        self.upsert(SyncPayload::TeacherStudentLink(link.clone()))
            .await;
    }

    pub async fn upsert_collaboration_session(&self, session: &CollaborationSession) {
        self.upsert(SyncPayload::CollaborationSession(session.clone()))
            .await;
    }

    pub async fn upsert_tutorial_progress(&self, progress: &TutorialProgress) {
        self.upsert(SyncPayload::TutorialProgress(progress.clone()))
            .await;
    }

    pub async fn upsert_assessment(&self, assessment: &Assessment) {
        self.upsert(SyncPayload::Assessment(assessment.clone()))
            .await;
    }

    pub async fn upsert_assessment_stroke(&self, stroke: &AssessmentStroke) {
        self.upsert(SyncPayload::AssessmentStroke(stroke.clone()))
            .await;
    }

    /// Replay up to [`DRAIN_BATCH_SIZE`] due items in priority order.
    ///
    /// Skips entirely, without consuming any attempts, while sync is disabled
    /// or nobody is signed in.
    pub async fn process_sync_queue(&self) -> SyncReport {
        let mut report = SyncReport {
            purged: self.queue.purge_expired().await,
            ..SyncReport::default()
        };

        if !self.is_cloud_sync_enabled() {
            report.skipped = Some(SkipReason::SyncDisabled);
            return report;
        }
        let Some(identity) = self.identity.current_identity().await else {
            report.skipped = Some(SkipReason::NotAuthenticated);
            return report;
        };

        for _ in 0..DRAIN_BATCH_SIZE {
            let Some(item) = self.queue.dequeue().await else {
                break;
            };
            self.queue.mark_in_progress(&item.id).await;
            report.attempted += 1;

            match self.push(&identity, &item.payload).await {
                Ok(()) => {
                    self.queue.mark_completed(&item.id).await;
                    report.succeeded += 1;
                    self.after_push(item.payload).await;
                }
                Err(Error::Codec(error)) => {
                    // replaying cannot fix the points; the queue captures it
                    self.queue
                        .mark_failed_permanently(&item.id, &error.to_string())
                        .await;
                    report.failed += 1;
                }
                Err(error) => {
                    tracing::debug!("Replay of {} failed: {error}", item.id);
                    self.queue.mark_failed(&item.id, &error.to_string()).await;
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                "Sync queue drained: {} ok, {} failed",
                report.succeeded,
                report.failed
            );
        }
        report
    }

    /// Drain the queue every `period` until the returned handle is dropped.
    pub fn spawn_periodic_sync(self: &Arc<Self>, period: Duration) -> ScopedTask {
        let client = Arc::clone(self);
        ScopedTask::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                client.process_sync_queue().await;
            }
        })
    }

    /// Lesson catalogue ordered for display
    pub async fn fetch_tutorial_lessons(&self) -> Result<Vec<TutorialLesson>> {
        let identity = self.identity.current_identity().await;
        let rows = self
            .remote
            .select(identity.as_ref(), TUTORIAL_LESSONS_TABLE, &[])
            .await?;
        let mut lessons = rows
            .into_iter()
            .map(serde_json::from_value::<TutorialLesson>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        lessons.sort_by_key(|lesson| lesson.sort_order);
        Ok(lessons)
    }

    async fn push(&self, identity: &Identity, payload: &SyncPayload) -> Result<()> {
        let row = to_row(payload, &identity.user_id)?;
        self.remote
            .upsert(identity, payload.kind().table(), vec![row])
            .await
    }

    async fn after_push(&self, payload: SyncPayload) {
        let kind = payload.kind();
        let record_id = payload.record_id().to_string();
        tracing::debug!("Synced {kind} {record_id}");
        self.telemetry
            .breadcrumb("sync", &format!("Synced {kind} {record_id}"));

        if let SyncPayload::Step(step) = payload {
            for stroke in step.strokes {
                self.park(SyncPayload::Stroke(stroke)).await;
            }
        }
    }

    /// Queue `payload` for the drain worker. Stored items must round-trip
    /// through JSON, so strokes with non-finite points are dropped and
    /// reported here; a step keeps its text and loses only those strokes.
    async fn park(&self, mut payload: SyncPayload) {
        if let SyncPayload::Step(step) = &mut payload {
            let strokes = std::mem::take(&mut step.strokes);
            step.strokes = strokes
                .into_iter()
                .filter(|stroke| self.storable(&SyncPayload::Stroke(stroke.clone())))
                .collect();
        }
        if self.storable(&payload) {
            self.queue.enqueue(payload).await;
        }
    }

    fn storable(&self, payload: &SyncPayload) -> bool {
        let points = match payload {
            SyncPayload::Stroke(record) => &record.points,
            SyncPayload::AssessmentStroke(record) => &record.points,
            _ => return true,
        };
        match codec::validate(points) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(
                    "Dropping {} {}: {error}",
                    payload.kind(),
                    payload.record_id()
                );
                self.capture(payload, &error.to_string());
                false
            }
        }
    }

    fn capture(&self, payload: &SyncPayload, error: &str) {
        self.telemetry.capture_exception(
            error,
            context([
                ("record_id", payload.record_id().to_string()),
                ("record_type", payload.kind().to_string()),
            ]),
        );
    }
}
