//! message_server
//!
//! `message_server <listen_address> <listen_port>`
//!
//! Logs every `|`-delimited message received from each client, and
//! "timed out" whenever a message takes longer than the read timeout.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use liveline_relay::config::MessageServerArgs;
use liveline_relay::telemetry::{self, LogFormat};
use liveline_relay::{resolve, Listener, ListenerConfig, MessageHandler, StartupError};
use liveline_task::CancelKind;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let args = match MessageServerArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };

    telemetry::init(&args.log_level, LogFormat::Text);

    if let Err(e) = run(args).await {
        eprintln!("Exception: {e:#}");
    }
}

async fn run(args: MessageServerArgs) -> Result<()> {
    let listen_addr = resolve(&args.listen_address, args.listen_port).await?;

    let handler = Arc::new(MessageHandler::new(args.read_timeout()));
    let listener = Listener::bind(ListenerConfig::new(listen_addr), handler)
        .await
        .map_err(|source| StartupError::Bind {
            addr: listen_addr,
            source,
        })?;
    let listener = Arc::new(listener);

    let shutdown = listener.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => shutdown.cancel(CancelKind::Full),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    info!(listen_addr = %listen_addr, read_timeout_ms = args.read_timeout_ms, "Starting message server");
    Arc::clone(&listener).run().await?;
    listener.wait_idle().await;
    Ok(())
}
