use std::path::PathBuf;

use chalk_core::config::{SupabaseConfig, SyncSettings};
use chalk_core::models::{Attempt, Hint, LinkStatus, TeacherStudentLink};
use chalk_core::sync::SkipReason;
use chalk_core::{QueueStatus, SyncPayload, SyncReport};
use chrono::Utc;
use clap::Parser;
use pretty_assertions::assert_eq;

use crate::cli::{Cli, Commands, QueueCommands};
use crate::commands::common::{
    default_db_path, format_link_lines, format_queue_lines, format_sync_report,
    queue_item_to_list_item, resolve_db_path, AppContext,
};
use crate::commands::queue::run_queue_clear;
use crate::error::CliError;

async fn local_context(dir: &tempfile::TempDir) -> AppContext {
    AppContext::open_with(&dir.path().join("chalk.db"), SyncSettings::default())
        .await
        .unwrap()
}

#[test]
fn parses_queue_list_flags() {
    let cli = Cli::try_parse_from([
        "chalk", "queue", "list", "--failed", "--limit", "5", "--db-path", "/tmp/x.db",
    ])
    .unwrap();
    assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
    match cli.command {
        Commands::Queue {
            command:
                QueueCommands::List {
                    failed,
                    limit,
                    json,
                },
        } => {
            assert!(failed);
            assert_eq!(limit, 5);
            assert!(!json);
        }
        _ => panic!("expected queue list"),
    }
}

#[test]
fn invite_accept_requires_a_code() {
    assert!(Cli::try_parse_from(["chalk", "invite", "accept"]).is_err());
    assert!(Cli::try_parse_from(["chalk", "invite", "accept", "abc234"]).is_ok());
}

#[test]
fn explicit_db_path_wins() {
    let explicit = PathBuf::from("/tmp/explicit.db");
    assert_eq!(resolve_db_path(Some(explicit.clone())), explicit);
    assert!(default_db_path().ends_with("chalk/chalk.db"));
}

#[tokio::test]
async fn local_only_context_refuses_remote_commands() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = local_context(&dir).await;

    assert!(ctx.auth.is_none());
    assert!(matches!(ctx.require_auth(), Err(CliError::AuthNotConfigured)));
    assert!(matches!(
        ctx.ensure_remote_ready().await,
        Err(CliError::AuthNotConfigured)
    ));

    let report = ctx.sync.process_sync_queue().await;
    assert_eq!(report.skipped, Some(SkipReason::SyncDisabled));
}

#[tokio::test]
async fn configured_project_without_session_requires_login() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SyncSettings {
        supabase: Some(SupabaseConfig {
            url: "https://cli-tests.supabase.co".to_string(),
            anon_key: "anon".to_string(),
        }),
        ..SyncSettings::default()
    };
    let ctx = AppContext::open_with(&dir.path().join("chalk.db"), settings)
        .await
        .unwrap();

    assert!(ctx.require_auth().is_ok());
    assert!(matches!(
        ctx.ensure_remote_ready().await,
        Err(CliError::NotSignedIn)
    ));

    ctx.sync.set_cloud_sync_enabled(false);
    assert!(matches!(
        ctx.ensure_remote_ready().await,
        Err(CliError::SyncDisabled)
    ));
}

#[tokio::test]
async fn queue_survives_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let attempt = Attempt::new("session-1", "problem-1");
    {
        let ctx = local_context(&dir).await;
        ctx.queue()
            .enqueue(SyncPayload::Attempt(attempt.clone()))
            .await
            .unwrap();
    }

    let ctx = local_context(&dir).await;
    let pending = ctx.queue().pending_items().await;
    assert_eq!(pending.len(), 1);

    let item = queue_item_to_list_item(&pending[0]);
    assert_eq!(item.kind, "attempt");
    assert_eq!(item.record_id, attempt.id);
    assert_eq!(item.status, "pending");
}

#[tokio::test]
async fn clearing_a_non_empty_queue_needs_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = local_context(&dir).await;
    ctx.queue()
        .enqueue(SyncPayload::Hint(Hint::new("attempt-1", 1, "hint")))
        .await
        .unwrap();

    let err = run_queue_clear(false, &ctx).await.unwrap_err();
    assert!(matches!(err, CliError::ConfirmationRequired(1)));
    assert_eq!(ctx.queue().get_queue_stats().await.pending_count, 1);

    run_queue_clear(true, &ctx).await.unwrap();
    assert!(ctx.queue().pending_items().await.is_empty());
}

#[tokio::test]
async fn queue_lines_show_retry_and_last_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = local_context(&dir).await;
    let id = ctx
        .queue()
        .enqueue(SyncPayload::Hint(Hint::new("attempt-1", 1, "hint")))
        .await
        .unwrap();
    ctx.queue().mark_in_progress(&id).await;
    ctx.queue().mark_failed(&id, "503 Service Unavailable").await;

    let item = ctx.queue().get_item(&id).await.unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    let lines = format_queue_lines(&[item.clone()], item.updated_at);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("attempts=1/8"), "{}", lines[0]);
    assert!(lines[0].contains("retry in 1s"), "{}", lines[0]);
    assert!(lines[0].ends_with("last_error=503 Service Unavailable"));
}

#[test]
fn sync_report_lines() {
    let skipped = SyncReport {
        skipped: Some(SkipReason::NotAuthenticated),
        ..SyncReport::default()
    };
    assert_eq!(format_sync_report(&skipped), "Sync skipped: not signed in");

    let drained = SyncReport {
        attempted: 3,
        succeeded: 2,
        failed: 1,
        purged: 4,
        skipped: None,
    };
    assert_eq!(
        format_sync_report(&drained),
        "Sync finished: 3 attempted, 2 succeeded, 1 failed, 4 purged"
    );
}

#[test]
fn link_lines_flag_expired_invites() {
    let pending = TeacherStudentLink::pending("teacher-1", "ABC234");
    let mut active = TeacherStudentLink::pending("teacher-1", "XYZ789");
    active.status = LinkStatus::Active;
    active.student_id = Some("student-1".to_string());

    let later = pending.expires_at + chrono::Duration::minutes(1);
    let lines = format_link_lines(&[pending, active], later);
    assert!(lines[0].contains("EXPIRED"));
    assert!(lines[0].ends_with("student=-"));
    assert!(lines[1].contains("ACTIVE"));
    assert!(lines[1].ends_with("student=student-1"));

    let fresh = format_link_lines(&[TeacherStudentLink::pending("t", "ABC234")], Utc::now());
    assert!(fresh[0].contains("PENDING"));
}
