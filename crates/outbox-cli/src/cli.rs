use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "outbox")]
#[command(about = "Queue changes offline and sync them when the network returns")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local outbox database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the CLI config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation for an entity
    Enqueue {
        /// Entity ID
        id: String,
        /// Mutation to queue
        #[arg(long, value_enum, default_value_t = OperationArg::Update)]
        op: OperationArg,
        /// Entity payload as JSON (required for create and update)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
        /// Version the change was based on (defaults to the cached version)
        #[arg(long, value_name = "VERSION")]
        base_version: Option<String>,
    },
    /// Show pending actions in drain order
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drain the queue against the remote now
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show network and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a recorded conflict
    Resolve {
        /// Entity ID
        id: String,
        /// Which side wins
        #[arg(value_enum)]
        strategy: ResolutionArg,
        /// Merged payload as JSON (required for merge)
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
    /// Inspect or clear the offline cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Discard every queued action, cached entry and status
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Sync in the background and print status changes until Ctrl-C
    Watch {
        /// Seconds between connectivity probes
        #[arg(long, default_value = "5")]
        interval: u64,
    },
    /// Run an offline then online walkthrough against an in-memory remote
    Demo,
    /// Manage the CLI config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OperationArg {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    UseLocal,
    UseRemote,
    Merge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached entries, newest first
    List {
        /// Only entries with unsynced local changes
        #[arg(long, conflicts_with = "synced")]
        pending: bool,
        /// Only entries confirmed by the remote
        #[arg(long)]
        synced: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one cached entry
    Get {
        /// Cache key
        key: String,
    },
    /// Drop every cached entry (queued actions are kept)
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Create or update the config file
    Init {
        /// Remote API base URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// host:port used to probe connectivity (defaults to the remote's host)
        #[arg(long, value_name = "ADDR")]
        probe_addr: Option<String>,
        /// Database path to store in the config
        #[arg(long = "store-db-path", value_name = "PATH")]
        store_db_path: Option<PathBuf>,
    },
    /// Print the effective configuration
    Show,
}
