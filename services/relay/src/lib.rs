//! liveline relay
//!
//! TCP relay that keeps long-lived client connections alive through a
//! silent target.
//!
//! This crate provides:
//! - The `proxy` relay: transparent bidirectional copy with a shared idle
//!   watchdog and `<heartbeat N>` injection while the target is silent
//! - The `message` server: `|`-delimited messages read with a per-read
//!   timeout that never loses a partial message
//! - The listener both run behind

pub mod config;
pub mod message;
pub mod proxy;
pub mod resolve;
pub mod telemetry;

pub use message::{MessageHandler, MessageStats};
pub use proxy::{
    ConnectionHandler, Listener, ListenerConfig, ProxyHandler, ProxyStats, RelayPolicy,
    SessionError,
};
pub use resolve::{resolve, StartupError};
