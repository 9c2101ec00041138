//! dynad: serves the dynamic-schema engine over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use dyna_core::{Config, config::DatabaseLocation, server::DatabaseServer};
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "dynad", version, about = "Dynamic schema database daemon")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "dynadb.toml")]
    config: PathBuf,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the database location (file path or :memory:)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = args.database_url {
        config.storage.database_url = url;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.server.log_level))
        .context("invalid log filter")?;
    fmt().with_env_filter(filter).init();

    print_banner(&config);

    let server = Arc::new(DatabaseServer::new(config).context("opening database")?);

    let server_for_shutdown = Arc::clone(&server);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("received shutdown signal");
        server_for_shutdown.shutdown();
    });

    if let Err(e) = server.start().await {
        error!(error = %e, "server error");
        return Err(e.into());
    }

    println!("{}", "dynad stopped".bright_green());
    Ok(())
}

fn print_banner(config: &Config) {
    let location = match config.storage.location() {
        DatabaseLocation::Memory => ":memory:".to_string(),
        DatabaseLocation::File(path) => path.display().to_string(),
    };

    println!("{}", "dynad: dynamic schema database".bright_blue().bold());
    println!(
        "  Listen:          {}",
        format!("{}:{}", config.server.host, config.server.port).bright_cyan()
    );
    println!("  Database:        {}", location.bright_cyan());
    println!(
        "  Pool size:       {}",
        config.storage.max_connections.to_string().bright_cyan()
    );
    println!(
        "  Max connections: {}",
        config.server.max_connections.to_string().bright_cyan()
    );
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = sigterm.recv() => {},
                }
            }
            _ => {
                error!("failed to install signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
