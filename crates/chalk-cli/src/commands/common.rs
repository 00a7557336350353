use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chalk_core::auth::{IdentityProvider, StaticIdentity};
use chalk_core::collab::{LocalRealtimeHub, SessionManager};
use chalk_core::config::SyncSettings;
use chalk_core::models::TeacherStudentLink;
use chalk_core::remote::{MemoryRemote, PostgrestRemote, RemoteStore};
use chalk_core::storage::SqliteKeyValueStore;
use chalk_core::sync::SkipReason;
use chalk_core::telemetry::{Telemetry, TracingTelemetry};
use chalk_core::{DurableQueue, QueueItem, SyncClient, SyncReport};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{auth_client, CliAuthClient};
use crate::error::CliError;

/// Everything a command needs, wired from the environment
pub struct AppContext {
    pub settings: SyncSettings,
    pub auth: Option<Arc<CliAuthClient>>,
    pub sync: Arc<SyncClient>,
    telemetry: Arc<dyn Telemetry>,
}

impl AppContext {
    pub async fn open(db_path: &Path) -> Result<Self, CliError> {
        let settings = SyncSettings::from_env()?;
        Self::open_with(db_path, settings).await
    }

    pub async fn open_with(db_path: &Path, settings: SyncSettings) -> Result<Self, CliError> {
        let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry);
        let store = Arc::new(SqliteKeyValueStore::open(db_path)?);
        let queue =
            Arc::new(DurableQueue::open(store, settings.retry, Arc::clone(&telemetry)).await);

        let auth = auth_client(&settings)?.map(Arc::new);
        let identity: Arc<dyn IdentityProvider> = match &auth {
            Some(client) => client.clone(),
            None => Arc::new(StaticIdentity::anonymous()),
        };

        let remote: Arc<dyn RemoteStore> = match &settings.supabase {
            Some(config) => Arc::new(PostgrestRemote::new(config)?),
            // local-only: sync stays disabled, nothing is uploaded
            None => Arc::new(MemoryRemote::new()),
        };

        let sync = Arc::new(
            SyncClient::new(remote, queue, identity, Arc::clone(&telemetry))
                .with_cloud_sync(settings.cloud_sync_enabled),
        );
        tracing::debug!("Opened local store at {}", db_path.display());

        Ok(Self {
            settings,
            auth,
            sync,
            telemetry,
        })
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        self.sync.queue()
    }

    pub fn require_auth(&self) -> Result<&CliAuthClient, CliError> {
        self.auth.as_deref().ok_or(CliError::AuthNotConfigured)
    }

    /// Session manager for pairing commands; the CLI never opens a live channel.
    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(
            Arc::clone(&self.sync),
            Arc::new(LocalRealtimeHub::new()),
            Arc::clone(&self.telemetry),
        )
    }

    /// Fail early with a CLI-friendly message instead of a core error.
    pub async fn ensure_remote_ready(&self) -> Result<(), CliError> {
        if !self.sync.is_cloud_sync_enabled() {
            return Err(if self.settings.supabase.is_none() {
                CliError::AuthNotConfigured
            } else {
                CliError::SyncDisabled
            });
        }
        if self.sync.current_identity().await.is_none() {
            return Err(CliError::NotSignedIn);
        }
        Ok(())
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("CHALK_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chalk")
        .join("chalk.db")
}

#[derive(Debug, Serialize)]
pub struct QueueListItem {
    pub id: String,
    pub kind: String,
    pub record_id: String,
    pub status: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: String,
    pub next_retry_at: Option<String>,
    pub last_error: Option<String>,
}

pub fn queue_item_to_list_item(item: &QueueItem) -> QueueListItem {
    QueueListItem {
        id: item.id.clone(),
        kind: item.kind().to_string(),
        record_id: item.payload.record_id().to_string(),
        status: item.status.as_str().to_string(),
        attempts: item.attempts,
        max_attempts: item.max_attempts,
        created_at: item.created_at.to_rfc3339(),
        next_retry_at: item.next_retry_at.map(|at| at.to_rfc3339()),
        last_error: item.last_error.clone(),
    }
}

pub fn format_queue_lines(items: &[QueueItem], now: DateTime<Utc>) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "{}  {:<20} {:<12} attempts={}/{}",
                short_id(&item.id),
                item.kind().as_str(),
                item.status.as_str(),
                item.attempts,
                item.max_attempts
            );
            if let Some(at) = item.next_retry_at.filter(|at| *at > now) {
                line.push_str(&format!("  retry {}", format_wait(at - now)));
            }
            if let Some(error) = &item.last_error {
                line.push_str(&format!("  last_error={error}"));
            }
            line
        })
        .collect()
}

pub fn format_sync_report(report: &SyncReport) -> String {
    match report.skipped {
        Some(SkipReason::SyncDisabled) => return "Sync skipped: cloud sync is disabled".to_string(),
        Some(SkipReason::NotAuthenticated) => return "Sync skipped: not signed in".to_string(),
        None => {}
    }
    format!(
        "Sync finished: {} attempted, {} succeeded, {} failed, {} purged",
        report.attempted, report.succeeded, report.failed, report.purged
    )
}

pub fn format_link_lines(links: &[TeacherStudentLink], now: DateTime<Utc>) -> Vec<String> {
    links
        .iter()
        .map(|link| {
            let student = link.student_id.as_deref().unwrap_or("-");
            let status = if link.is_expired(now) {
                "EXPIRED"
            } else {
                link.status.as_str()
            };
            format!(
                "{}  {:<8} code={} teacher={} student={}",
                link.id, status, link.invite_code, link.teacher_id, student
            )
        })
        .collect()
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

fn format_wait(wait: chrono::Duration) -> String {
    let seconds = wait.num_seconds().max(0);
    if seconds < 60 {
        format!("in {seconds}s")
    } else if seconds < 3_600 {
        format!("in {}m", seconds / 60)
    } else {
        format!("in {}h", seconds / 3_600)
    }
}
