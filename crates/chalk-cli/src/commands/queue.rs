use chrono::Utc;

use crate::cli::QueueCommands;
use crate::commands::common::{
    format_queue_lines, queue_item_to_list_item, AppContext, QueueListItem,
};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, ctx: &AppContext) -> Result<(), CliError> {
    match command {
        QueueCommands::Stats { json } => run_queue_stats(json, ctx).await,
        QueueCommands::List {
            failed,
            limit,
            json,
        } => run_queue_list(failed, limit, json, ctx).await,
        QueueCommands::Clear { yes } => run_queue_clear(yes, ctx).await,
    }
}

pub async fn run_queue_stats(as_json: bool, ctx: &AppContext) -> Result<(), CliError> {
    let stats = ctx.queue().get_queue_stats().await;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("pending:    {}", stats.pending_count);
    println!("enqueued:   {}", stats.total_enqueued);
    println!("completed:  {}", stats.total_completed);
    println!("failed:     {}", stats.total_failed);
    println!("retries:    {}", stats.total_retries);
    Ok(())
}

pub async fn run_queue_list(
    failed: bool,
    limit: usize,
    as_json: bool,
    ctx: &AppContext,
) -> Result<(), CliError> {
    let mut items = if failed {
        ctx.queue().failed_items().await
    } else {
        ctx.queue().pending_items().await
    };
    items.truncate(limit);

    if as_json {
        let json_items = items
            .iter()
            .map(queue_item_to_list_item)
            .collect::<Vec<QueueListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!(
            "{}",
            if failed {
                "No failed items."
            } else {
                "Queue is empty."
            }
        );
        return Ok(());
    }

    for line in format_queue_lines(&items, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_clear(confirmed: bool, ctx: &AppContext) -> Result<(), CliError> {
    let pending = ctx.queue().get_queue_stats().await.pending_count;
    if pending > 0 && !confirmed {
        return Err(CliError::ConfirmationRequired(pending));
    }

    ctx.queue().clear_queue().await;
    println!("Queue cleared");
    Ok(())
}
