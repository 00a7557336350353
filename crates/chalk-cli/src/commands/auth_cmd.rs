use crate::cli::AuthCommands;
use crate::commands::common::AppContext;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, ctx: &AppContext) -> Result<(), CliError> {
    let auth = ctx.require_auth()?;

    match command {
        AuthCommands::Login { email, password } => {
            let session = auth.sign_in(&email, &password).await?;
            let email_label = session.user.email.as_deref().unwrap_or("(no email)");
            println!("Signed in as {email_label}");
            Ok(())
        }
        AuthCommands::Status => {
            if let Some(session) = auth.restore_session().await? {
                let email_label = session.user.email.as_deref().unwrap_or("(no email)");
                println!(
                    "Signed in as {} (user_id={}, expires_at={})",
                    email_label, session.user.id, session.expires_at
                );
            } else {
                println!("Not signed in.");
            }
            Ok(())
        }
        AuthCommands::Logout => {
            auth.sign_out().await?;
            println!("Signed out");
            Ok(())
        }
    }
}
