use crate::commands::common::{format_sync_report, AppContext};
use crate::error::CliError;

pub async fn run_sync(watch: bool, as_json: bool, ctx: &AppContext) -> Result<(), CliError> {
    if watch {
        return run_sync_watch(ctx).await;
    }

    ctx.ensure_remote_ready().await?;
    let report = ctx.sync.process_sync_queue().await;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_sync_report(&report));
    }
    Ok(())
}

/// Drain now and then on the configured interval until Ctrl-C.
async fn run_sync_watch(ctx: &AppContext) -> Result<(), CliError> {
    ctx.ensure_remote_ready().await?;
    let interval = ctx.settings.sync_interval;
    println!("Syncing every {}s; press Ctrl-C to stop", interval.as_secs());

    let _periodic = ctx.sync.spawn_periodic_sync(interval);
    tokio::signal::ctrl_c().await?;

    let remaining = ctx.queue().get_queue_stats().await.pending_count;
    println!("Stopped with {remaining} item(s) pending");
    Ok(())
}
