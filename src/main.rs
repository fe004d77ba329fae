//! cell-locator - GSM cell-tower geolocation pipeline
//!
//! One binary, three roles. Start them in this order, each in its own
//! process:
//!
//! ```bash
//! cell-locator display
//! cell-locator router --db 250.csv
//! cell-locator reader --device /dev/ttyS0
//! ```
//!
//! # Environment Variables
//!
//! - `CELL_LOCATOR_CONFIG`: Path to a TOML config file (default: ./cell_locator.toml)
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cell_locator::config::{self, LocatorConfig};
use cell_locator::roles::display::{self, DisplaySettings};
use cell_locator::roles::reader::{self, ModemEndpoint, ReaderSettings};
use cell_locator::roles::router::{self, RouterSettings};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "cell-locator")]
#[command(about = "Cell-tower geolocation: modem reader, tower router and location display")]
#[command(version)]
struct CliArgs {
    /// TOML config file (overrides CELL_LOCATOR_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Poll the modem and announce tower batches to the router
    Reader(ReaderArgs),
    /// Resolve towers to coordinates and forward them to the display
    Router(RouterArgs),
    /// Trilaterate each batch and report the location history
    Display(DisplayArgs),
}

#[derive(Args, Debug)]
struct ReaderArgs {
    /// Router socket to announce batches to
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Serial device of the modem
    #[arg(long, value_name = "PATH", conflicts_with = "modem_socket")]
    device: Option<PathBuf>,

    /// Talk to a modem simulator on this Unix socket instead of a device
    #[arg(long, value_name = "PATH")]
    modem_socket: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RouterArgs {
    /// Socket to listen on for the reader
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Display socket to forward towers to
    #[arg(long, value_name = "PATH")]
    display_socket: Option<PathBuf>,

    /// Tower database CSV
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DisplayArgs {
    /// Socket to listen on for the router
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// JSON-lines result log
    #[arg(long, value_name = "PATH")]
    location_log: Option<PathBuf>,
}

// ============================================================================
// Role settings
// ============================================================================

fn reader_settings(cfg: &LocatorConfig, args: ReaderArgs) -> ReaderSettings {
    let modem = match (args.modem_socket, args.device) {
        (Some(socket), _) => ModemEndpoint::Socket(socket),
        (None, Some(device)) => ModemEndpoint::Device(device),
        (None, None) => ModemEndpoint::Device(cfg.modem.device.clone()),
    };
    ReaderSettings {
        modem,
        router_path: args.socket.unwrap_or_else(|| cfg.sockets.router_path.clone()),
        init_command: cfg.modem.init_command.clone(),
        poll_command: cfg.modem.poll_command.clone(),
        response_timeout: cfg.modem.response_timeout(),
        poll_interval: cfg.modem.poll_interval(),
        max_response_bytes: cfg.modem.max_response_bytes,
    }
}

fn router_settings(cfg: &LocatorConfig, args: RouterArgs) -> RouterSettings {
    RouterSettings {
        listen_path: args.socket.unwrap_or_else(|| cfg.sockets.router_path.clone()),
        display_path: args.display_socket.unwrap_or_else(|| cfg.sockets.display_path.clone()),
        database_path: args.db.unwrap_or_else(|| cfg.database.path.clone()),
        has_header: cfg.database.has_header,
        retry: cfg.link.retry_policy(),
    }
}

fn display_settings(cfg: &LocatorConfig, args: DisplayArgs) -> DisplaySettings {
    DisplaySettings {
        listen_path: args.socket.unwrap_or_else(|| cfg.sockets.display_path.clone()),
        location_log: args
            .location_log
            .or_else(|| cfg.display.location_log_path().map(PathBuf::from)),
        model: cfg.estimator.path_loss_model(),
    }
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let cfg = match &args.config {
        Some(path) => LocatorConfig::load_from_file(path)?,
        None => LocatorConfig::load(),
    };
    config::init(cfg);
    let cfg = config::get();

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping");
        shutdown_token.cancel();
    });

    let result = match args.role {
        Role::Reader(a) => reader::run(reader_settings(cfg, a), cancel_token).await,
        Role::Router(a) => router::run(router_settings(cfg, a), cancel_token).await,
        Role::Display(a) => display::run(display_settings(cfg, a), cancel_token).await,
    };

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Fatal error");
    }
    result
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
