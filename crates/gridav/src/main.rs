//! `gridav` - serve grid storage collections over WebDAV.

mod config;
mod exit_code;

use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use gridav_core::{GridavError, MemoryGrid};
use gridav_webdav::{DavHandler, ServerConfig, WebDavServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "gridav")]
#[command(author, version, about = "WebDAV bridge for grid storage", long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # Serve with the default configuration file
    gridav serve

    # Serve on all interfaces, port 8443
    gridav serve --bind 0.0.0.0 --port 8443

    # Validate a configuration file and print the effective settings
    gridav check-config --config ./gridav.toml")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebDAV server
    Serve {
        /// Configuration file (defaults to the per-user config location)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind, overriding [server].bind
        #[arg(long)]
        bind: Option<IpAddr>,

        /// Port to listen on, overriding [server].port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load and validate configuration, then print the effective settings
    CheckConfig {
        /// Configuration file (defaults to the per-user config location)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_code::USAGE_ERROR
            } else {
                exit_code::SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            let code = categorize_error(&e);
            eprintln!("Error: {e:#}");
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    setup_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { config, bind, port } => {
            let mut app = AppConfig::load(config.as_deref())?;
            if let Some(bind) = bind {
                app.server.bind = bind;
            }
            if let Some(port) = port {
                app.server.port = port;
            }
            serve(app)
        }
        Commands::CheckConfig { config } => {
            let app = AppConfig::load(config.as_deref())?;
            print!("{}", app.to_toml()?);
            Ok(())
        }
    }
}

/// Build the in-memory grid from the `[memory]` table.
fn seed_grid(app: &AppConfig) -> MemoryGrid {
    let grid = MemoryGrid::new(&app.bridge.grid.zone);
    for (name, password) in &app.memory.users {
        grid.add_user(name, password);
    }
    grid
}

fn serve(app: AppConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let grid = seed_grid(&app);
        let handler = DavHandler::new(Arc::new(grid), app.bridge.clone())
            .with_realm(app.server.realm.clone());
        let server_config = ServerConfig {
            port: app.server.port,
            bind_address: app.server.bind,
        };

        let server = WebDavServer::start(handler, server_config)
            .await
            .context("Failed to start WebDAV server")?;

        println!("Serving WebDAV at {}{}", server.url(), app.bridge.dav.mount_prefix);
        info!(
            users = app.memory.users.len(),
            zone = %app.bridge.grid.zone,
            "In-memory grid ready"
        );

        wait_for_shutdown().await?;
        info!("Shutting down");
        server.stop().await;
        Ok(())
    })
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")
}

/// Map an error chain to an exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if matches!(
            cause.downcast_ref::<GridavError>(),
            Some(GridavError::Configuration(_))
        ) || cause.downcast_ref::<toml::de::Error>().is_some()
        {
            return exit_code::CONFIG_ERROR;
        }
    }
    exit_code::GENERAL_ERROR
}
