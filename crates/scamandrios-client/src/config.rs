use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Protocol-level settings applied to every connection a pool or a discovery
/// run opens.
///
/// All fields have defaults, so an empty JSON object `{}` is a valid options
/// document.
///
/// # Example
///
/// ```
/// use scamandrios_client::ConnectionOptions;
/// use std::time::Duration;
///
/// let options = ConnectionOptions::new()
///     .with_keyspace("metrics")
///     .with_request_timeout(Duration::from_secs(2));
///
/// assert_eq!(options.keyspace.as_deref(), Some("metrics"));
/// assert_eq!(options.request_timeout(), Some(Duration::from_secs(2)));
/// ```
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Deadline for establishing a session, name lookup included
    ///
    /// Default: 5000ms
    pub connect_timeout_ms: u64,
    /// Deadline for a single call; 0 disables it
    ///
    /// Default: 30000ms
    pub request_timeout_ms: u64,
    /// Keyspace selected on every new session
    pub keyspace: Option<String>,
    /// User to log in as on every new session
    pub user: Option<String>,
    pub password: Option<String>,
    /// Query language version requested on every new session
    pub cql_version: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            request_timeout_ms: 30000,
            keyspace: None,
            user: None,
            password: None,
            cql_version: None,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_cql_version(mut self, version: impl Into<String>) -> Self {
        self.cql_version = Some(version.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when calls may wait indefinitely.
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("keyspace", &self.keyspace)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("cql_version", &self.cql_version)
            .finish()
    }
}

/// Connection pool behaviour: sizing, failover and reconnect backoff.
///
/// A host whose connection fails is retried after
/// `reconnect_base_delay_ms * backoff_multiplier^(failures - 1)`, capped at
/// `reconnect_max_delay_ms`. Once it has failed `max_consecutive_failures`
/// times in a row it is quarantined and only comes back through
/// [`reset_host`](crate::ConnectionPool::reset_host),
/// [`probe_host`](crate::ConnectionPool::probe_host) or
/// [`add_host`](crate::ConnectionPool::add_host).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Sessions kept open per host
    ///
    /// Default: 1
    pub connections_per_host: usize,
    /// Consecutive failures after which a host is quarantined
    ///
    /// Default: 5
    pub max_consecutive_failures: u32,
    /// First reconnect delay in milliseconds
    ///
    /// Default: 100ms
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay ceiling in milliseconds
    ///
    /// Default: 30000ms
    pub reconnect_max_delay_ms: u64,
    /// Growth factor between successive reconnect delays
    ///
    /// Default: 2.0
    pub backoff_multiplier: f64,
    /// Period of the background reconnect task; 0 disables the task and
    /// leaves reconnects to explicit [`tick`](crate::ConnectionPool::tick) calls
    ///
    /// Default: 1000ms
    pub maintenance_interval_ms: u64,
    /// Replay a call once on another host after a transport failure
    ///
    /// Default: true
    pub retry_on_transport_failure: bool,
    /// Longest wait for the host table before `acquire` gives up
    ///
    /// Default: 5000ms
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connections_per_host: 1,
            max_consecutive_failures: 5,
            reconnect_base_delay_ms: 100,
            reconnect_max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            maintenance_interval_ms: 1000,
            retry_on_transport_failure: true,
            acquire_timeout_ms: 5000,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connections_per_host(mut self, n: usize) -> Self {
        self.connections_per_host = n;
        self
    }

    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n;
        self
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay_ms = base.as_millis() as u64;
        self.reconnect_max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_retry_on_transport_failure(mut self, enabled: bool) -> Self {
        self.retry_on_transport_failure = enabled;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Delay before the next reconnect attempt after `consecutive_failures`
    /// failures in a row.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(63) as i32;
        let multiplier = self.backoff_multiplier.max(1.0).powi(exponent);
        let backoff_ms = (self.reconnect_base_delay_ms as f64 * multiplier)
            .min(self.reconnect_max_delay_ms as f64) as u64;
        Duration::from_millis(backoff_ms.min(self.reconnect_max_delay_ms))
    }

    pub fn maintenance_interval(&self) -> Option<Duration> {
        match self.maintenance_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}
