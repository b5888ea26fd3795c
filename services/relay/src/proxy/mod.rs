//! TCP relay with idle watchdog and upstream heartbeats.
//!
//! This module provides:
//! - TCP listener management
//! - Target connection with timeout
//! - Bidirectional relaying with a shared idle deadline
//! - Heartbeat injection toward the client while the target is silent
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> ProxyHandler -> connect -> relay_streams -> Target
//!                                                   |
//!                                    watchdog + heartbeat emitter
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use liveline_relay::proxy::{Listener, ListenerConfig, ProxyHandler, RelayPolicy};
//!
//! let handler = Arc::new(ProxyHandler::new(target, RelayPolicy::default()));
//! let listener = Listener::bind(ListenerConfig::new("[::]:8080".parse()?), handler).await?;
//! Arc::new(listener).run().await?;
//! ```

mod connection;
mod heartbeat;
mod listener;
mod policy;
mod relay;
mod session;
mod watchdog;

pub use connection::{
    relay_streams, CloseReason, Connection, ConnectionSummary, Deadline, Direction,
};
pub use heartbeat::{heartbeat_frame, relay_with_heartbeat};
pub use listener::{
    ConnectionHandler, Listener, ListenerConfig, ListenerStats, DEFAULT_MAX_CONNECTIONS,
    MAX_CONNECTIONS_LIMIT,
};
pub use policy::{
    RelayPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_IDLE_TIMEOUT,
};
pub use relay::relay;
pub use session::{ProxyHandler, ProxyStats, SessionError};
pub use watchdog::watchdog;
