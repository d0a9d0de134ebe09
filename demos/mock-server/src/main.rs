//! Mock scanner backend.
//!
//! Fabricates scanner telemetry and serves the dashboard's REST and
//! WebSocket surfaces from memory, so the dashboard can run without a real
//! scanning engine.
//!
//! Run:
//!   cargo run -p scanlink-mock-server -- --port 8080 --tick-ms 2000
//!
//! Then:
//!   curl localhost:8080/api/stats
//!   curl -X POST localhost:8080/api/start -H 'content-type: application/json' -d '{"vpn_type":"fortinet"}'
//!
//! `ALLOWED_ORIGINS` (comma separated) restricts WebSocket origins and
//! `API_AUTH_TOKEN` requires a matching `?token=` or bearer header.

mod server;
mod tables;
mod telemetry;

use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mock_server=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port")
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(8080);
    let tick_ms = parse_arg(&args, "--tick-ms").unwrap_or(2000);

    let options = server::Options {
        port,
        tick: Duration::from_millis(tick_ms),
        allowed_origins: std::env::var("ALLOWED_ORIGINS")
            .map(|v| server::parse_origins(&v))
            .unwrap_or_default(),
        auth_token: std::env::var("API_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
    };

    tracing::info!("Starting mock scanner backend on port {}", port);
    server::run(options).await
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
