//! `fir` command-line entry point.
//!
//! Each invocation builds one [`Client`], runs one command, and exits.
//!
//! ```text
//! main()
//!  └─ load config          -- platform config file or --config
//!  └─ init tracing         -- RUST_LOG overrides the configured level
//!  └─ resolve_local_addr() -- local IPv4 lookup, once, on a blocking thread
//!  └─ Client::with_local_addr()
//!  └─ run command
//!       ├─ scan [PORT]     -- probe the local /24, Ctrl-C interrupts
//!       ├─ ping ADDR [PORT]
//!       ├─ pair ADDR [PORT] -- holds the pairing until Ctrl-C
//!       ├─ status
//!       └─ init-config     -- write defaults, before any of the above
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fir_client::application::client::{resolve_local_addr, Client, ClientSettings};
use fir_client::infrastructure::network::connector::{HostnameResolver, TcpConnector};
use fir_client::infrastructure::storage::config::{self, AppConfig, ConfigError};
use fir_core::protocol::constants::UNRESOLVED_NAME;
use fir_core::{parse_port, PROTOCOL_VERSION};

#[derive(Debug, Parser)]
#[command(name = "fir", version, about = "Discover and pair with Fir devices on the local network")]
struct Cli {
    /// Path to a config file (defaults to the platform config directory).
    #[arg(long, env = "FIR_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe every address of the local /24 for listening devices.
    Scan {
        /// Port to probe (defaults to the configured port).
        port: Option<String>,
        /// Log every probe at debug level.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Check that a device answers and print its declared name.
    Ping {
        addr: Ipv4Addr,
        port: Option<String>,
    },
    /// Pair with a device and hold the connection until Ctrl-C.
    Pair {
        addr: Ipv4Addr,
        port: Option<String>,
    },
    /// Print the client status and local address.
    Status,
    /// Write a config file with every setting at its default.
    InitConfig {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Command::InitConfig { force } = cli.command {
        return init_config(cli.config.as_deref(), force);
    }
    let mut config = load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    if let Command::Scan { verbose: true, .. } = cli.command {
        config.network.log_probes = true;
    }

    let settings = ClientSettings {
        scan: config.network.scan_options(),
        timeouts: config.network.device_timeouts(),
    };
    let local_addr = tokio::task::spawn_blocking(|| resolve_local_addr(&HostnameResolver))
        .await
        .context("local address lookup panicked")?;
    let client = Client::with_local_addr(Arc::new(TcpConnector), local_addr, settings);

    match client.local_addr() {
        Some(ip) => info!("client IP: {ip}"),
        None => warn!("client IP: unknown"),
    }
    info!(
        "default port: {}, protocol version: {PROTOCOL_VERSION}",
        config.network.port
    );

    let default_port = config.network.port;
    match cli.command {
        Command::Scan { port, .. } => {
            let port = resolve_port(port.as_deref(), default_port)?;
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let summary = client.scan(port, &cancel).await?;
            for device in &summary.results {
                println!("{device}");
            }
            println!(
                "{} device(s) found, {} of {} addresses probed{}",
                summary.reachable(),
                summary.probed,
                summary.candidates,
                if summary.cancelled { " (interrupted)" } else { "" }
            );
        }
        Command::Ping { addr, port } => {
            let port = resolve_port(port.as_deref(), default_port)?;
            let reply = client.ping_device(addr, port).await?;
            println!(
                "{} {addr}:{port} answered in {:?}",
                reply.name.as_deref().unwrap_or(UNRESOLVED_NAME),
                reply.round_trip
            );
        }
        Command::Pair { addr, port } => {
            let port = resolve_port(port.as_deref(), default_port)?;
            let device = client.pair_device(addr, port).await?;
            println!("paired with {device}; press Ctrl-C to disconnect");

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            client.close_all().await;
            info!("disconnected");
        }
        // Handled before startup.
        Command::InitConfig { .. } => {}
        Command::Status => {
            let addr = client
                .local_addr()
                .map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
            println!("{} ({addr})", client.status());
        }
    }

    Ok(())
}

/// Loads the config named on the command line, or the platform config file.
///
/// A platform without a config directory runs on defaults.
fn load(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => match config::load_config() {
            Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
            other => other.context("failed to load config"),
        },
    }
}

/// Writes the default config to `path` or the platform config file.
fn init_config(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::config_file_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to replace it", path.display());
    }
    config::save_config_to(&path, &AppConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

fn resolve_port(arg: Option<&str>, default: u16) -> anyhow::Result<u16> {
    match arg {
        Some(text) => Ok(parse_port(text)?),
        None => Ok(default),
    }
}
