use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chalk")]
#[command(about = "Inspect the offline sync queue and manage tutoring links")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or clear the durable sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Upload pending queue items to Supabase
    Sync {
        /// Keep draining on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create or accept teacher/student invite codes
    Invite {
        #[command(subcommand)]
        command: InviteCommands,
    },
    /// List or revoke teacher/student links
    Link {
        #[command(subcommand)]
        command: LinkCommands,
    },
    /// Authenticate with Supabase
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show lifetime queue counters
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued items in drain order
    List {
        /// Show terminally failed items instead of pending ones
        #[arg(long)]
        failed: bool,
        /// Number of items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop every queued item and reset counters
    Clear {
        /// Confirm that unsynced work may be lost
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum InviteCommands {
    /// Create a 24-hour invite code as the signed-in teacher
    Create,
    /// Claim an invite code as the signed-in student
    Accept {
        /// Six-character invite code
        code: String,
    },
}

#[derive(Subcommand)]
pub enum LinkCommands {
    /// List links for the signed-in user
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Revoke a link
    Revoke {
        /// Link ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Login with Supabase email/password and store session in keychain
    Login {
        /// Supabase account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Supabase account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show auth status
    Status,
    /// Logout and clear stored session
    Logout,
}
