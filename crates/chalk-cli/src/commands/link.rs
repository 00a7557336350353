use chrono::Utc;

use crate::cli::LinkCommands;
use crate::commands::common::{format_link_lines, AppContext};
use crate::error::CliError;

pub async fn run_link(command: LinkCommands, ctx: &AppContext) -> Result<(), CliError> {
    ctx.ensure_remote_ready().await?;
    let manager = ctx.session_manager();

    match command {
        LinkCommands::List { json } => {
            let mut links = manager.load_links().await?;
            links.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            if json {
                println!("{}", serde_json::to_string_pretty(&links)?);
            } else if links.is_empty() {
                println!("No links.");
            } else {
                for line in format_link_lines(&links, Utc::now()) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        LinkCommands::Revoke { id } => {
            manager.revoke_link(id.trim()).await?;
            println!("Revoked link {}", id.trim());
            Ok(())
        }
    }
}
