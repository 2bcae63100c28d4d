//! `broker` — launches a tool-broker daemon over a set of child tool-server
//! commands, given either as positional arguments or a `broker.toml` file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use toolbroker::config::{parse_child_arg, resolve_port, BrokerConfig, ChildSpec};
use toolbroker::{BrokerOptions, ExitCode};
use tracing_subscriber::EnvFilter;

/// Launch a tool-broker daemon over the given child tool-server commands.
#[derive(Parser)]
#[command(name = "broker", version, about = "Tool-broker daemon launcher")]
struct Cli {
    /// Child commands to spawn, e.g. `"gh=gh-mcp-server --flag"` or a bare
    /// command string. Ignored when a `--config` file is given.
    commands: Vec<String>,

    /// HTTP bind port [env: PORT]
    #[arg(long)]
    http_port: Option<u16>,

    /// Bind address for every transport.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable the TCP JSON-RPC dispatcher alongside HTTP.
    #[arg(long)]
    tcp: bool,

    /// TCP bind port, only used when `--tcp` is passed [env: TCP_PORT]
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Enable the SSE dispatcher, on its own listener.
    #[arg(long)]
    sse: bool,

    /// SSE bind port, only used when `--sse` is passed [env: SSE_PORT]
    #[arg(long)]
    sse_port: Option<u16>,

    /// Path to a `broker.toml` file, used only when no positional commands
    /// are given.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-child handshake timeout, in seconds.
    #[arg(long, default_value = "30")]
    handshake_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down toolbroker...");
        cancel_for_signal.cancel();
    });

    let (specs, handshake_timeout) = resolve_specs(&cli).await?;

    let http_port = resolve_port(cli.http_port, "PORT", toolbroker::config::DEFAULT_HTTP_PORT);
    let tcp_addr = if cli.tcp {
        let tcp_port = resolve_port(cli.tcp_port, "TCP_PORT", toolbroker::config::DEFAULT_TCP_PORT);
        Some(format!("{}:{}", cli.host, tcp_port))
    } else {
        None
    };
    let sse_addr = if cli.sse {
        let sse_port = resolve_port(cli.sse_port, "SSE_PORT", toolbroker::config::DEFAULT_SSE_PORT);
        Some(format!("{}:{}", cli.host, sse_port))
    } else {
        None
    };

    let options = BrokerOptions {
        specs,
        handshake_timeout,
        http_addr: format!("{}:{}", cli.host, http_port),
        tcp_addr,
        sse_addr,
    };

    match toolbroker::run(options, cancel).await {
        Ok(()) => std::process::exit(ExitCode::Clean as i32),
        Err(code) => std::process::exit(code as i32),
    }
}

/// Build the child spec list and the default handshake timeout to fall back
/// on for any spec without its own override: positional commands take
/// precedence over `--config`, which takes precedence over an empty list
/// (spec §6.5 "positional arguments are command strings"). Each spec's own
/// `handshake_timeout` (set per-child from `broker.toml`, spec §2.3) wins
/// over this default — see `toolbroker::config::assign_names`.
async fn resolve_specs(cli: &Cli) -> Result<(Vec<ChildSpec>, Duration)> {
    let default_timeout = Duration::from_secs(cli.handshake_timeout);

    if !cli.commands.is_empty() {
        let specs = cli.commands.iter().map(|s| parse_child_arg(s)).collect();
        return Ok((specs, default_timeout));
    }

    let Some(config_path) = resolve_config_path(cli.config.clone()) else {
        return Ok((Vec::new(), default_timeout));
    };

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read config file {config_path:?}: {e}"))?;
    let config: BrokerConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {config_path:?}: {e}"))?;

    Ok((config.into_specs(), default_timeout))
}

/// Resolve the config file path when no child commands were given on the
/// CLI: an explicit `--config` flag wins, then `./broker.toml` in the
/// current directory, then `~/.config/toolbroker/broker.toml`. Returns
/// `None` when none of these exist, in which case the broker starts with
/// zero children rather than erroring.
fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    resolve_config_path_within(explicit, Path::new("."), dirs::config_dir())
}

/// The actual three-tier resolution, parameterized over "current directory"
/// and "XDG config dir" so tests can point both at temp directories instead
/// of the real process environment.
fn resolve_config_path_within(
    explicit: Option<PathBuf>,
    cwd: &Path,
    config_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }

    let local = cwd.join("broker.toml");
    if local.exists() {
        return Some(local);
    }

    if let Some(config_dir) = config_dir {
        let xdg = config_dir.join("toolbroker").join("broker.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }

    None
}
