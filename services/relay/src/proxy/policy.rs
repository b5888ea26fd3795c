//! Liveness policy for relayed connections.

use std::time::Duration;

/// Default idle timeout before the watchdog closes a connection.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between synthetic heartbeats on a silent upstream.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Bytes moved per read in each direction.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Timeouts and sizes applied to every relayed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPolicy {
    /// Close the connection when no read has been started for this long.
    pub idle_timeout: Duration,
    /// Inject heartbeats toward the client after this much upstream
    /// silence. `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Timeout for connecting to the target. `None` uses `idle_timeout`.
    pub connect_timeout: Option<Duration>,
    /// Timeout for a single read. Expiry ends the direction.
    ///
    /// Not applied to upstream reads while heartbeats are enabled; the
    /// heartbeat interval governs those.
    pub read_timeout: Option<Duration>,
    /// Timeout for writing one chunk. Expiry ends the direction.
    pub write_timeout: Option<Duration>,
    /// Read buffer size per direction.
    pub chunk_size: usize,
}

impl RelayPolicy {
    /// Create a policy with the default timeouts.
    pub fn new() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Policy without heartbeat injection.
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_interval = None;
        self
    }

    /// Effective connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(self.idle_timeout)
    }
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = RelayPolicy::default();
        assert_eq!(policy.idle_timeout, Duration::from_secs(5));
        assert_eq!(policy.heartbeat_interval, Some(Duration::from_secs(1)));
        assert_eq!(policy.chunk_size, 1024);
        assert!(policy.read_timeout.is_none());
        assert!(policy.write_timeout.is_none());
    }

    #[test]
    fn test_connect_timeout_follows_idle_timeout() {
        let mut policy = RelayPolicy::new();
        policy.idle_timeout = Duration::from_secs(9);
        assert_eq!(policy.connect_timeout(), Duration::from_secs(9));

        policy.connect_timeout = Some(Duration::from_millis(250));
        assert_eq!(policy.connect_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_without_heartbeat() {
        let policy = RelayPolicy::new().without_heartbeat();
        assert!(policy.heartbeat_interval.is_none());
    }
}
