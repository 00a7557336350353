use crate::cli::InviteCommands;
use crate::commands::common::AppContext;
use crate::error::CliError;

pub async fn run_invite(command: InviteCommands, ctx: &AppContext) -> Result<(), CliError> {
    ctx.ensure_remote_ready().await?;
    let manager = ctx.session_manager();

    match command {
        InviteCommands::Create => {
            let code = manager.generate_invite_code().await;
            if code.is_empty() {
                return Err(CliError::InviteFailed);
            }
            let expires = manager
                .links()
                .await
                .into_iter()
                .find(|link| link.invite_code == code)
                .map(|link| link.expires_at.format("%Y-%m-%d %H:%M UTC").to_string());

            println!("Invite code: {code}");
            if let Some(expires) = expires {
                println!("Valid until {expires}");
            }
            Ok(())
        }
        InviteCommands::Accept { code } => {
            let link = manager.accept_invite_code(&code).await?;
            println!("Linked with teacher {} (link {})", link.teacher_id, link.id);
            Ok(())
        }
    }
}
