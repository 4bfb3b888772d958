use clap::{Args, Parser, Subcommand};
use logins_core::LoginEntry;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "logins",
    about = "Encrypted, syncable credential storage",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store a new login.
    Add {
        #[command(flatten)]
        entry: EntryArgs,
        /// Update the matching login instead of failing on duplicates.
        #[arg(long)]
        upsert: bool,
    },
    /// Show one login.
    Get {
        guid: String,
        #[arg(long)]
        show_password: bool,
    },
    /// List logins, optionally only those sharing a domain.
    List {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        show_passwords: bool,
    },
    /// Replace the fields of an existing login.
    Update {
        guid: String,
        #[command(flatten)]
        entry: EntryArgs,
    },
    /// Record a use of a login.
    Touch { guid: String },
    /// Delete a login.
    Delete { guid: String },
    /// Delete every locally stored login.
    Wipe {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
    /// Round-trip a throwaway login through encrypted storage.
    Health,
    /// Register with the sync manager and run a sync.
    Sync {
        /// Access token; falls back to `LOGINS_SYNC_TOKEN`.
        #[arg(long)]
        token: Option<String>,
        /// Seconds until the token expires.
        #[arg(long, default_value_t = 3600)]
        expires_in: i64,
        /// Print the telemetry ping as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

/// Login fields shared by `add` and `update`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct EntryArgs {
    /// Origin the login belongs to, e.g. `https://example.com`.
    pub origin: String,
    #[arg(long, short, default_value = "")]
    pub username: String,
    #[arg(long, short)]
    pub password: String,
    /// Form submission target (mutually exclusive with `--http-realm`).
    #[arg(long)]
    pub form_action_origin: Option<String>,
    /// HTTP auth realm (mutually exclusive with `--form-action-origin`).
    #[arg(long)]
    pub http_realm: Option<String>,
    #[arg(long, default_value = "")]
    pub username_field: String,
    #[arg(long, default_value = "")]
    pub password_field: String,
}

impl From<EntryArgs> for LoginEntry {
    fn from(args: EntryArgs) -> Self {
        LoginEntry {
            origin: args.origin,
            form_action_origin: args.form_action_origin,
            http_realm: args.http_realm,
            username_field: args.username_field,
            password_field: args.password_field,
            username: args.username,
            password: args.password,
        }
    }
}
