//! Command-line configuration.
//!
//! Every flag can also be set through its `RELAY_*` environment variable.

use std::time::Duration;

use clap::Parser;

use crate::proxy::{RelayPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONNECTIONS, MAX_CONNECTIONS_LIMIT};

/// Byte-transparent TCP relay with idle watchdog and upstream heartbeats.
#[derive(Debug, Parser)]
#[command(name = "proxy")]
#[command(version, about, long_about = None)]
pub struct ProxyArgs {
    /// Address to listen on.
    pub listen_address: String,

    /// Port to listen on.
    pub listen_port: u16,

    /// Target host to relay to.
    pub target_address: String,

    /// Target port to relay to.
    pub target_port: u16,

    /// Close a connection after this long without a read in either direction.
    #[arg(long, env = "RELAY_IDLE_TIMEOUT_MS", default_value_t = 5000)]
    pub idle_timeout_ms: u64,

    /// Send a heartbeat to the client after this much target silence.
    #[arg(long, env = "RELAY_HEARTBEAT_INTERVAL_MS", default_value_t = 1000)]
    pub heartbeat_interval_ms: u64,

    /// Disable heartbeat injection.
    #[arg(long, env = "RELAY_NO_HEARTBEAT")]
    pub no_heartbeat: bool,

    /// Timeout for connecting to the target (defaults to the idle timeout).
    #[arg(long, env = "RELAY_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Timeout for a single read; expiry closes the connection.
    #[arg(long, env = "RELAY_READ_TIMEOUT_MS")]
    pub read_timeout_ms: Option<u64>,

    /// Timeout for a single write; expiry closes the connection.
    #[arg(long, env = "RELAY_WRITE_TIMEOUT_MS")]
    pub write_timeout_ms: Option<u64>,

    /// Maximum concurrent connections.
    #[arg(
        long,
        env = "RELAY_MAX_CONNECTIONS",
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        value_parser = parse_max_connections
    )]
    pub max_connections: usize,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ProxyArgs {
    /// Relay policy described by the flags.
    pub fn policy(&self) -> RelayPolicy {
        let heartbeat_interval = if self.no_heartbeat || self.heartbeat_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.heartbeat_interval_ms))
        };

        RelayPolicy {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            heartbeat_interval,
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            read_timeout: self.read_timeout_ms.map(Duration::from_millis),
            write_timeout: self.write_timeout_ms.map(Duration::from_millis),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

fn parse_max_connections(value: &str) -> Result<usize, String> {
    let n: usize = value.parse().map_err(|e| format!("{e}"))?;
    if (1..=MAX_CONNECTIONS_LIMIT).contains(&n) {
        Ok(n)
    } else {
        Err(format!("must be between 1 and {MAX_CONNECTIONS_LIMIT}"))
    }
}

/// Logs `|`-delimited messages received from each client.
#[derive(Debug, Parser)]
#[command(name = "message_server")]
#[command(version, about, long_about = None)]
pub struct MessageServerArgs {
    /// Address to listen on.
    pub listen_address: String,

    /// Port to listen on.
    pub listen_port: u16,

    /// Log "timed out" when no message completes within this long.
    #[arg(long, env = "RELAY_READ_TIMEOUT_MS", default_value_t = 5000)]
    pub read_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl MessageServerArgs {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_positional_arguments() {
        let args =
            ProxyArgs::try_parse_from(["proxy", "0.0.0.0", "55555", "localhost", "8080"]).unwrap();
        assert_eq!(args.listen_address, "0.0.0.0");
        assert_eq!(args.listen_port, 55555);
        assert_eq!(args.target_address, "localhost");
        assert_eq!(args.target_port, 8080);
        assert_eq!(args.policy(), RelayPolicy::default());
    }

    #[test]
    fn test_wrong_argument_count_is_rejected() {
        assert!(ProxyArgs::try_parse_from(["proxy", "0.0.0.0", "55555", "localhost"]).is_err());
        assert!(MessageServerArgs::try_parse_from(["message_server", "0.0.0.0"]).is_err());
    }

    #[test]
    fn test_flags_shape_policy() {
        let args = ProxyArgs::try_parse_from([
            "proxy",
            "127.0.0.1",
            "1",
            "127.0.0.1",
            "2",
            "--idle-timeout-ms",
            "250",
            "--no-heartbeat",
            "--connect-timeout-ms",
            "100",
            "--write-timeout-ms",
            "1000",
        ])
        .unwrap();

        let policy = args.policy();
        assert_eq!(policy.idle_timeout, Duration::from_millis(250));
        assert_eq!(policy.heartbeat_interval, None);
        assert_eq!(policy.connect_timeout(), Duration::from_millis(100));
        assert_eq!(policy.read_timeout, None);
        assert_eq!(policy.write_timeout, Some(Duration::from_secs(1)));
    }

    #[rstest]
    #[case(&[], Some(1000))]
    #[case(&["--heartbeat-interval-ms", "250"], Some(250))]
    #[case(&["--heartbeat-interval-ms", "0"], None)]
    #[case(&["--no-heartbeat"], None)]
    fn test_heartbeat_flags(#[case] flags: &[&str], #[case] expected_ms: Option<u64>) {
        let mut argv = vec!["proxy", "::", "1", "::1", "2"];
        argv.extend_from_slice(flags);
        let args = ProxyArgs::try_parse_from(argv).unwrap();
        assert_eq!(
            args.policy().heartbeat_interval,
            expected_ms.map(Duration::from_millis)
        );
    }

    #[rstest]
    #[case("0")]
    #[case("4294967296")]
    #[case("18446744073709551615")]
    #[case("many")]
    fn test_max_connections_out_of_range_is_rejected(#[case] value: &str) {
        let argv = ["proxy", "::", "1", "::1", "2", "--max-connections", value];
        assert!(ProxyArgs::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_max_connections_accepts_limit() {
        let limit = MAX_CONNECTIONS_LIMIT.to_string();
        let argv = ["proxy", "::", "1", "::1", "2", "--max-connections", &limit];
        let args = ProxyArgs::try_parse_from(argv).unwrap();
        assert_eq!(args.max_connections, MAX_CONNECTIONS_LIMIT);
    }

    #[test]
    fn test_message_server_defaults() {
        let args = MessageServerArgs::try_parse_from(["message_server", "::", "5000"]).unwrap();
        assert_eq!(args.read_timeout(), Duration::from_secs(5));
        assert_eq!(args.log_level, "info");
    }
}
