use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Site Limits
///
/// Daily time limits for distracting websites. Once a limit is reached the
/// site stays blocked until a trusted partner supplies a one-time code.
#[derive(Parser, Debug)]
#[command(name = "site-limits")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to settings file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to state file (overrides the settings file)
    #[arg(short, long, global = true)]
    pub state: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Track usage for a browser connected over stdin/stdout
    Serve {
        /// Log block actions instead of sending them to the browser
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Manage accountability keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Manage tracked sites
    Site {
        #[command(subcommand)]
        command: SiteCommands,
    },
    /// Show today's usage
    Status {
        /// Only show this domain
        domain: Option<String>,
    },
    /// Show whether a domain is currently allowed
    Check {
        domain: String,
    },
    /// Unlock a blocked domain with a code from an accountability partner
    Unlock {
        domain: String,

        /// Key the code was generated from
        #[arg(short, long)]
        key: String,

        /// Six-digit code
        #[arg(long)]
        code: String,
    },
    /// Write a settings file with the default values
    InitConfig {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeyCommands {
    /// Create a key and print its setup details for the partner
    Add {
        /// Who holds the key (e.g. "Mom")
        label: String,

        /// Minutes of access a code from this key grants
        #[arg(short, long, default_value = "15")]
        duration: u32,
    },
    /// List keys
    List,
    /// Print a key's secret and authenticator URI
    Show {
        id: String,
    },
    /// Delete a key
    Remove {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SiteCommands {
    /// Start tracking a domain
    Add {
        domain: String,

        /// Heartbeats allowed per day
        #[arg(short, long)]
        limit: u32,

        /// Key allowed to unlock this site (repeatable)
        #[arg(short, long = "key", required = true)]
        keys: Vec<String>,
    },
    /// List tracked domains
    List,
    /// Stop tracking a domain
    Remove {
        domain: String,

        /// Code from one of the site's keys (required while a key exists)
        #[arg(long)]
        code: Option<String>,
    },
}
