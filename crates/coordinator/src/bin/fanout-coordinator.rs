//! fanout-coordinator: schedules windows of work across registered workers.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: public API on :8080, health on :8081
//! fanout-coordinator
//!
//! # Profiled settings (PROD_PUBLIC_PORT, PROD_DEFAULT_WINDOW, ...)
//! FANOUT_PROFILE=prod fanout-coordinator
//!
//! # Override listeners
//! fanout-coordinator --host 127.0.0.1 --public-port 9000 --private-port 9001
//! ```

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fanout_coordinator::api::AppState;
use fanout_coordinator::health::spawn_monitors;
use fanout_coordinator::server::{self, Listeners};
use fanout_coordinator::status_poll::StatusPoller;
use fanout_coordinator::{Coordinator, HttpTransport};
use fanout_core::Config;

// ── CLI ─────────────────────────────────────────────────────────────

/// Distributed task fan-out coordinator.
#[derive(Parser, Debug)]
#[command(name = "fanout-coordinator", version, about)]
struct Cli {
    /// Settings profile; keys are looked up as {PROFILE}_{KEY} first.
    #[arg(long, env = "FANOUT_PROFILE", default_value = "")]
    profile: String,

    /// Address to bind both listeners to (overrides HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port of the node-facing API (overrides PUBLIC_PORT).
    #[arg(long)]
    public_port: Option<u16>,

    /// Port of the health endpoint (overrides PRIVATE_PORT).
    #[arg(long)]
    private_port: Option<u16>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` may carry RUST_LOG, so it is loaded before the subscriber.
    fanout_core::load_dotenv();
    tracing_subscriber::fmt().with_target(false).with_env_filter(env_filter()).init();

    let cli = Cli::parse();

    let mut config = Config::for_profile(&cli.profile);
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.public_port {
        config.server.public_port = port;
    }
    if let Some(port) = cli.private_port {
        config.server.private_port = port;
    }
    config.log_summary();

    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let coordinator = Coordinator::new(config.scheduler.clone(), config.transport.clone(), transport);
    let shutdown = coordinator.shutdown_token();

    let mut background = spawn_monitors(&coordinator, &config.health, shutdown.clone());
    if let Some(interval) = config.health.status_poll_interval() {
        let poller = StatusPoller::new(Arc::clone(&coordinator), interval);
        background.push(tokio::spawn(poller.run(interval, shutdown.clone())));
        info!(interval_secs = interval.as_secs(), "Worker status polling enabled");
    }

    let listeners = Listeners::bind(&config.server).await?;
    let state = AppState::new(Arc::clone(&coordinator), config.redacted_summary());

    let signal_coordinator = Arc::clone(&coordinator);
    tokio::spawn(async move {
        os_signal().await;
        info!("shutdown signal received");
        signal_coordinator.shutdown();
    });

    info!("fanout-coordinator starting");
    server::serve(listeners, state, shutdown, config.server.shutdown_grace()).await?;

    for handle in background {
        handle.abort();
    }
    info!("fanout-coordinator exited cleanly");
    Ok(())
}

/// `RUST_LOG` if set and valid, `info` otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Wait for SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to register signal handlers, using ctrl_c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl_c, running until killed");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_reads_rust_log_after_dotenv() {
        std::env::set_var("RUST_LOG", "fanout_coordinator=trace");
        fanout_core::load_dotenv();
        assert_eq!(env_filter().to_string(), "fanout_coordinator=trace");

        std::env::set_var("RUST_LOG", "fanout_coordinator=loud");
        assert_eq!(env_filter().to_string(), "info");
        std::env::remove_var("RUST_LOG");
    }
}
