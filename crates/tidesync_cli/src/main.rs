//! tidesync CLI
//!
//! Command-line client for a local tidesync store.
//!
//! # Commands
//!
//! - `sync` - Pull remote changes, then push local ones
//! - `pull` - Pull remote changes only
//! - `status` - Show watermark, last sync and pending changes
//! - `reset` - Forget sync metadata so the next sync downloads everything
//! - `put` / `delete` / `list` - Edit and inspect records

mod commands;

use clap::{Parser, Subcommand};
use commands::Remote;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tidesync command-line client.
#[derive(Parser)]
#[command(name = "tidesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long, env = "TIDESYNC_PATH")]
    path: Option<PathBuf>,

    /// Sync server base URL
    #[arg(global = true, short, long, env = "TIDESYNC_ENDPOINT")]
    endpoint: Option<String>,

    /// Bearer token for the sync server
    #[arg(global = true, short, long, env = "TIDESYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull remote changes, then push local ones
    Sync {
        /// Only sync if the sync interval has elapsed
        #[arg(long)]
        if_due: bool,

        /// Retry transient failures with backoff
        #[arg(long)]
        retry: bool,
    },

    /// Pull remote changes without pushing
    Pull,

    /// Show sync status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget the watermark so the next sync downloads everything
    Reset,

    /// Create or update a record
    Put {
        /// Collection name
        collection: String,

        /// Fields as a JSON object
        json: String,

        /// Record ID; creates a new record if absent
        #[arg(long)]
        id: Option<String>,
    },

    /// Soft-delete a record
    Delete {
        /// Collection name
        collection: String,

        /// Record ID
        id: String,
    },

    /// List live records of a collection
    List {
        /// Collection name
        collection: String,

        /// Include soft-deleted records
        #[arg(short, long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let path = cli.path.ok_or("Store path required (--path or TIDESYNC_PATH)")?;
    let store = commands::open_store(&path)?;
    let remote = || Remote::from_options(cli.endpoint.as_deref(), cli.token.as_deref());

    match cli.command {
        Commands::Sync { if_due, retry } => {
            commands::sync::run(store, &remote()?, if_due, retry).await?;
        }
        Commands::Pull => {
            commands::sync::pull(store, &remote()?).await?;
        }
        Commands::Status { format } => {
            commands::status::run(store, &format)?;
        }
        Commands::Reset => {
            commands::status::reset(store)?;
        }
        Commands::Put {
            collection,
            json,
            id,
        } => {
            commands::records::put(&store, &collection, &json, id.as_deref())?;
        }
        Commands::Delete { collection, id } => {
            commands::records::delete(&store, &collection, &id)?;
        }
        Commands::List { collection, all } => {
            commands::records::list(&store, &collection, all)?;
        }
    }

    Ok(())
}
