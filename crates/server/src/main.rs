// crates/server/src/main.rs
//! novel-dl server binary.
//!
//! `serve` (the default) runs the control surface and push channel;
//! `token` mints a push-channel token for local testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use novel_dl_core::HttpSource;
use novel_dl_db::Database;
use novel_dl_server::auth::TokenVerifier;
use novel_dl_server::config::ServerConfig;
use novel_dl_server::{create_app, AppState};
use tracing_subscriber::EnvFilter;

/// Task orchestration server for novel downloads.
#[derive(Parser)]
#[command(name = "novel-dl", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Print a push-channel token signed with the configured secret.
    Token {
        #[arg(long)]
        owner: i64,
        /// Token lifetime in seconds.
        #[arg(long, default_value_t = 86_400)]
        ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "warn,novel_dl_server=info,novel_dl_core=info,novel_dl_db=info".into()
        }))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::from_env().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Token { owner, ttl_secs } => {
            let token = TokenVerifier::new(&config.jwt_secret)
                .issue(owner, Duration::from_secs(ttl_secs))?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let db = match &config.db_path {
        Some(path) => Database::new(path).await?,
        None => Database::open_default().await?,
    };

    // Handles live in this process only; anything still active was orphaned.
    let orphaned = db
        .fail_orphaned_tasks("Interrupted by server restart")
        .await?;
    if !orphaned.is_empty() {
        tracing::warn!(count = orphaned.len(), "Marked interrupted tasks as failed");
    }

    let source = HttpSource::from_config(&config.fetch).context("building upstream client")?;
    tracing::info!(base_url = %source.base_url(), "Upstream source configured");

    let state = AppState::new(db, &config, Arc::new(source));
    let dispatcher = Arc::clone(state.dispatcher());
    let app = create_app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("novel-dl server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    dispatcher.close();
    Ok(())
}
