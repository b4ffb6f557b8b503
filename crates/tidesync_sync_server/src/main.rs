//! tidesync reference sync server.
//!
//! Serves `POST /sync/pull` and `POST /sync/push` from an in-memory store.
//! With `--secret`, callers need a signed bearer token; `--issue-token`
//! prints one and exits.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tidesync_sync_server::{serve, ServerConfig, SyncServer};
use tracing_subscriber::EnvFilter;

/// tidesync reference sync server.
#[derive(Parser)]
#[command(name = "tidesync-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, env = "TIDESYNC_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// HMAC secret; enables token authentication
    #[arg(short, long, env = "TIDESYNC_SECRET")]
    secret: Option<String>,

    /// Token lifetime in seconds
    #[arg(long, default_value = "86400")]
    token_expiry: u64,

    /// Maximum records accepted in one push
    #[arg(long, default_value = "10000")]
    max_push_records: usize,

    /// Print a token for this user ID and exit
    #[arg(long, value_name = "USER")]
    issue_token: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ServerConfig::new(cli.bind)
        .with_token_expiry(Duration::from_secs(cli.token_expiry))
        .with_max_push_records(cli.max_push_records);
    if let Some(secret) = cli.secret {
        config = config.with_auth(secret.into_bytes());
    }
    let server = SyncServer::new(config);

    if let Some(user) = cli.issue_token {
        let token = server
            .issue_token(&user)?
            .ok_or("--issue-token requires --secret")?;
        println!("{token}");
        return Ok(());
    }

    if !server.config().require_auth {
        tracing::warn!("authentication disabled; any non-empty bearer token is accepted");
    }
    serve(Arc::new(server)).await?;
    Ok(())
}
