//! proxy
//!
//! `proxy <listen_address> <listen_port> <target_address> <target_port>`
//!
//! Relays every accepted client to the target, closing idle connections and
//! injecting heartbeats toward clients while the target is silent.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use liveline_relay::config::ProxyArgs;
use liveline_relay::telemetry::{self, LogFormat};
use liveline_relay::{resolve, Listener, ListenerConfig, ProxyHandler, StartupError};
use liveline_task::CancelKind;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let args = match ProxyArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage errors exit 1; --help and --version exit 0.
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };

    telemetry::init(&args.log_level, LogFormat::Json);

    if let Err(e) = run(args).await {
        eprintln!("Exception: {e:#}");
    }
}

async fn run(args: ProxyArgs) -> Result<()> {
    let listen_addr = resolve(&args.listen_address, args.listen_port).await?;
    let target_addr = resolve(&args.target_address, args.target_port).await?;
    let policy = args.policy();

    info!(
        listen_addr = %listen_addr,
        target_addr = %target_addr,
        idle_timeout_ms = policy.idle_timeout.as_millis() as u64,
        heartbeat_interval_ms = policy.heartbeat_interval.map(|d| d.as_millis() as u64),
        max_connections = args.max_connections,
        "Starting proxy"
    );

    let mut config = ListenerConfig::new(listen_addr);
    config.max_connections = args.max_connections;

    let handler = Arc::new(ProxyHandler::new(target_addr, policy));
    let listener = Listener::bind(config, handler)
        .await
        .map_err(|source| StartupError::Bind {
            addr: listen_addr,
            source,
        })?;
    let listener = Arc::new(listener);

    let shutdown = listener.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.cancel(CancelKind::Full);
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    Arc::clone(&listener).run().await?;
    listener.wait_idle().await;

    let stats = listener.handler().stats();
    info!(
        connect_failures = stats.connect_failures.load(Ordering::Relaxed),
        idle_closes = stats.idle_closes.load(Ordering::Relaxed),
        "Proxy stopped"
    );
    Ok(())
}
