//! `scanlink`: terminal client for the scanner dashboard channel.
//!
//! Run:
//!   scanlink --port 8080 watch
//!   scanlink start fortinet
//!   scanlink logs --limit 20
//!
//! Settings come from the TOML file named by `--config` / `SCANLINK_CONFIG`,
//! then the `SCANLINK_*` variables and flags on top.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scanlink_client::{ClientConfig, Connection, DashboardState, Phase, WsConnector};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "scanlink")]
#[command(about = "Watch and drive a scanner backend over its dashboard channel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML file with client settings.
    #[arg(long, env = "SCANLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Full endpoint, e.g. ws://localhost:8080/ws.
    #[arg(long, env = "SCANLINK_URL")]
    url: Option<String>,

    #[arg(long, env = "SCANLINK_HOST")]
    host: Option<String>,

    #[arg(long, env = "SCANLINK_PORT")]
    port: Option<u16>,

    #[arg(long, env = "SCANLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// How long one-shot commands wait for the channel and the reply.
    #[arg(long, default_value = "10")]
    wait_secs: u64,

    /// Log level for the channel itself.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Print a status line on every refresh until Ctrl-C.
    Watch {
        #[arg(long, default_value = "2")]
        interval_secs: u64,
    },
    /// Ask the backend to start a scanner.
    Start { vpn_type: String },
    /// Ask the backend to stop a scanner.
    Stop { vpn_type: String },
    /// Fetch recent log lines.
    Logs {
        #[arg(long, default_value = "100")]
        limit: u32,
    },
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(url) = &self.url {
            config.url = Some(url.clone());
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env()
        .add_directive("scanlink=info".parse()?)
        .add_directive(format!("scanlink_client={}", cli.log_level).parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.client_config()?;
    let conn = Connection::open(config, WsConnector)?;
    tracing::info!("Connecting to {}", conn.url());

    let wait = Duration::from_secs(cli.wait_secs);
    let result = match &cli.command {
        Command::Watch { interval_secs } => watch(&conn, Duration::from_secs(*interval_secs)).await,
        Command::Start { vpn_type } => scanner(&conn, vpn_type, true, wait).await,
        Command::Stop { vpn_type } => scanner(&conn, vpn_type, false, wait).await,
        Command::Logs { limit } => logs(&conn, *limit, wait).await,
    };
    conn.close().await;
    result
}

async fn watch(conn: &Connection, interval: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!();
                return Ok(());
            }
        }

        let notes = conn.store().update(|s| s.take_notifications());
        for note in notes {
            println!("[{}] {}", note.level, note.message);
        }
        let state = conn.store().read().clone();
        println!("{}", summary(&state));

        if state.connection.phase == Phase::Failed {
            bail!(
                "{}",
                state
                    .connection
                    .last_error
                    .unwrap_or_else(|| "connection failed".to_string())
            );
        }
        if state.connection.phase == Phase::Closed {
            return Ok(());
        }
    }
}

async fn scanner(conn: &Connection, vpn_type: &str, start: bool, wait: Duration) -> Result<()> {
    wait_open(conn, wait).await?;
    let sent = if start {
        conn.start_scanner(vpn_type)
    } else {
        conn.stop_scanner(vpn_type)
    };
    if !sent {
        bail!("command was not delivered");
    }

    let needle = format!("Scanner {vpn_type} ");
    bounded(
        wait,
        conn.store().wait_until(|s| {
            s.notifications()
                .any(|n| n.message.starts_with(&needle))
        }),
    )
    .await
    .with_context(|| format!("no acknowledgement for {vpn_type}"))?;

    for note in conn.store().update(|s| s.take_notifications()) {
        println!("[{}] {}", note.level, note.message);
    }
    Ok(())
}

async fn logs(conn: &Connection, limit: u32, wait: Duration) -> Result<()> {
    wait_open(conn, wait).await?;
    conn.store().update(|s| s.logs.clear());
    if !conn.get_logs(limit) {
        bail!("command was not delivered");
    }
    bounded(wait, conn.store().wait_until(|s| !s.logs.is_empty()))
        .await
        .context("no log lines received")?;

    for line in &conn.store().read().logs {
        println!("{line}");
    }
    Ok(())
}

/// Wait for the channel to open, failing early if it reaches a terminal phase.
async fn wait_open(conn: &Connection, wait: Duration) -> Result<()> {
    bounded(
        wait,
        conn.store()
            .wait_until(|s| s.connection.phase.is_open() || s.connection.phase.is_terminal()),
    )
    .await
    .context("timed out waiting for the channel")?;

    let state = conn.store().read();
    if !state.connection.phase.is_open() {
        bail!(
            "channel {}: {}",
            state.connection.phase,
            state.connection.last_error.as_deref().unwrap_or("no detail")
        );
    }
    Ok(())
}

async fn bounded<F: Future>(wait: Duration, fut: F) -> Result<F::Output> {
    Ok(tokio::time::timeout(wait, fut).await?)
}

fn summary(state: &DashboardState) -> String {
    let indicator = if state.connection.connected { '●' } else { '○' };
    let mut line = format!("{indicator} {}", state.connection.phase);
    if state.connection.reconnect_attempts > 0 {
        line.push_str(&format!(" (attempt {})", state.connection.reconnect_attempts));
    }
    match &state.stats {
        Some(stats) => line.push_str(&format!(
            " | goods {} bads {} errors {} | {} rps ({:.2}% success)",
            stats.goods, stats.bads, stats.errors, stats.rps, stats.success_rate
        )),
        None => line.push_str(" | no stats yet"),
    }
    line.push_str(&format!(" | {} servers", state.servers.len()));
    line
}
