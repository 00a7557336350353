use std::io;

use chalk_core::auth::AuthError;
use chalk_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] chalk_core::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(
        "Supabase is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY (a .env file works)."
    )]
    AuthNotConfigured,
    #[error("Cloud sync is disabled. Unset CHALK_CLOUD_SYNC_ENABLED or set it to true.")]
    SyncDisabled,
    #[error("Not signed in. Run `chalk auth login` first.")]
    NotSignedIn,
    #[error("Could not create an invite code; see the log for details")]
    InviteFailed,
    #[error("Clearing drops {0} unsynced item(s); pass --yes to confirm")]
    ConfirmationRequired(usize),
}
