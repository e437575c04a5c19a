use crate::address::HostAddress;
use crate::config::{ConnectionOptions, PoolConfig};
use crate::connection::{Connection, Connector};
use crate::host::{dedupe, HostState, HostStatus, HostTable, ReconnectOutcome};
use crate::stats::{PoolMetrics, PoolStats};
use futures::future::join_all;
use scamandrios_common::{Request, Response, Result, RpcArgs, RpcResult, ScamandriosError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A connection handed out by [`ConnectionPool::acquire`].
///
/// Calls made through it report transport failures back to the pool, which
/// takes the host out of rotation straight away.
pub struct PooledConnection {
    connection: Arc<Connection>,
    pool: Weak<PoolInner>,
}

impl PooledConnection {
    pub fn addr(&self) -> &HostAddress {
        self.connection.addr()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub async fn call(&self, request: Request) -> Result<Response> {
        let result = self.connection.call(request).await;

        let error = match result {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let pool = match self.pool.upgrade() {
            Some(pool) if !pool.is_closed() => pool,
            _ => return Err(ScamandriosError::PoolClosed),
        };

        if error.is_transport_failure() {
            pool.report_failure(&self.connection, &error).await;
            if pool.is_closed() {
                return Err(ScamandriosError::PoolClosed);
            }
        }
        Err(error)
    }

    /// Takes this connection's host out of rotation, as if a call had failed.
    pub async fn mark_unhealthy(&self, reason: &str) {
        if let Some(pool) = self.pool.upgrade() {
            let error = ScamandriosError::Connection(reason.to_string());
            pool.report_failure(&self.connection, &error).await;
        }
    }
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    config: PoolConfig,
    table: Mutex<HostTable>,
    closed: AtomicBool,
    metrics: PoolMetrics,
    maintenance: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PoolInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ScamandriosError::PoolClosed)
        } else {
            Ok(())
        }
    }

    async fn close_connections(&self, connections: Vec<Arc<Connection>>) {
        if connections.is_empty() {
            return;
        }
        PoolMetrics::add(&self.metrics.connections_closed, connections.len());
        join_all(connections.iter().map(|c| c.close())).await;
    }

    /// Opens `connections_per_host` sessions to one host. Succeeds if at
    /// least one opens.
    async fn open_host(&self, addr: &HostAddress) -> std::result::Result<Vec<Arc<Connection>>, String> {
        let wanted = self.config.connections_per_host.max(1);
        let attempts = join_all(
            (0..wanted).map(|_| Connection::open(self.connector.as_ref(), addr.clone(), &self.options)),
        )
        .await;

        let mut opened = Vec::with_capacity(wanted);
        let mut last_error = None;
        for attempt in attempts {
            match attempt {
                Ok(connection) => opened.push(connection),
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        PoolMetrics::add(&self.metrics.connections_created, opened.len());

        match (opened.is_empty(), last_error) {
            (true, error) => Err(error.unwrap_or_else(|| "no connection attempted".to_string())),
            (false, Some(error)) => {
                debug!(%addr, opened = opened.len(), wanted, %error, "host partially connected");
                Ok(opened)
            }
            (false, None) => Ok(opened),
        }
    }

    /// Runs one claimed connect attempt and installs its result. Returns true
    /// if the host ended up connected.
    async fn reconnect(&self, addr: HostAddress, generation: u64) -> bool {
        PoolMetrics::incr(&self.metrics.reconnect_attempts);
        let result = self.open_host(&addr).await;
        let error = result.as_ref().err().cloned();

        let (outcome, stale) = {
            let mut table = self.table.lock().await;
            if self.is_closed() {
                (None, result.unwrap_or_default())
            } else {
                match table.finish_reconnect(&addr, generation, result, &self.config, Instant::now()) {
                    ReconnectOutcome::Stale(connections) => (None, connections),
                    outcome => (Some(outcome), Vec::new()),
                }
            }
        };

        if !stale.is_empty() {
            debug!(%addr, "discarding connections from a superseded attempt");
        }
        self.close_connections(stale).await;

        match outcome {
            Some(ReconnectOutcome::Recovered) => {
                PoolMetrics::incr(&self.metrics.reconnect_successes);
                info!(%addr, "host connected");
                true
            }
            Some(ReconnectOutcome::Failed { retry_in }) => {
                warn!(
                    %addr,
                    error = error.as_deref().unwrap_or_default(),
                    retry_in_ms = retry_in.as_millis() as u64,
                    "host connect failed"
                );
                false
            }
            Some(ReconnectOutcome::Quarantined) => {
                PoolMetrics::incr(&self.metrics.quarantines);
                warn!(
                    %addr,
                    error = error.as_deref().unwrap_or_default(),
                    "host quarantined"
                );
                false
            }
            Some(ReconnectOutcome::Stale(_)) | None => false,
        }
    }

    async fn tick(&self) -> usize {
        if self.is_closed() {
            return 0;
        }

        let tickets = self.table.lock().await.claim_due(Instant::now());
        if tickets.is_empty() {
            return 0;
        }

        let results = join_all(
            tickets
                .into_iter()
                .map(|(addr, generation)| self.reconnect(addr, generation)),
        )
        .await;
        results.into_iter().filter(|connected| *connected).count()
    }

    async fn acquire(self: &Arc<Self>) -> Result<PooledConnection> {
        self.ensure_open()?;
        PoolMetrics::incr(&self.metrics.acquire_attempts);

        let limit = self.config.acquire_timeout();
        let mut table = tokio::time::timeout(limit, self.table.lock())
            .await
            .map_err(|_| ScamandriosError::Timeout(limit.as_millis() as u64))?;

        // close may have drained the table while we waited
        self.ensure_open()?;

        let selection = table.select(&self.config, Instant::now());
        drop(table);

        for (addr, state) in &selection.failed_hosts {
            PoolMetrics::incr(&self.metrics.transport_failures);
            if *state == HostState::Quarantined {
                PoolMetrics::incr(&self.metrics.quarantines);
            }
            warn!(%addr, %state, "found failed connection, host taken out of rotation");
        }
        self.close_connections(selection.discarded).await;

        match selection.connection {
            Some(connection) => Ok(PooledConnection {
                connection,
                pool: Arc::downgrade(self),
            }),
            None => {
                PoolMetrics::incr(&self.metrics.acquire_failures);
                Err(ScamandriosError::PoolExhausted)
            }
        }
    }

    async fn report_failure(&self, connection: &Arc<Connection>, error: &ScamandriosError) {
        connection.mark_failed();

        let outcome = {
            let mut table = self.table.lock().await;
            if self.is_closed() {
                return;
            }
            table.fail_connection(connection, error.to_string(), &self.config, Instant::now())
        };

        let Some(outcome) = outcome else {
            return;
        };

        PoolMetrics::incr(&self.metrics.transport_failures);
        let addr = connection.addr();
        if outcome.quarantined {
            PoolMetrics::incr(&self.metrics.quarantines);
            warn!(%addr, %error, "host quarantined");
        } else {
            warn!(
                %addr,
                %error,
                retry_in_ms = outcome.retry_in.map(|d| d.as_millis() as u64),
                "host marked unhealthy"
            );
        }
        self.close_connections(outcome.discarded).await;
    }

    async fn host_state(&self, addr: &HostAddress) -> Option<HostState> {
        self.table.lock().await.get(addr).map(|slot| slot.state())
    }
}

/// Live connections to every configured host, with failover.
///
/// Hosts are used round-robin in configured order. A host whose connection
/// fails drops out of rotation at once and is reconnected after an
/// exponential backoff; after [`PoolConfig::max_consecutive_failures`] failed
/// attempts in a row it is quarantined. A background task drives the
/// reconnects; [`tick`](Self::tick) does the same on demand.
///
/// Cloning is cheap and every clone shares the same pool.
///
/// # Example
///
/// ```no_run
/// use scamandrios_client::{ConnectionOptions, ConnectionPool, PoolConfig, TcpConnector};
/// use scamandrios_common::Request;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let hosts = vec!["10.0.0.1:9160".parse()?, "10.0.0.2:9160".parse()?];
/// let pool = ConnectionPool::connect(
///     hosts,
///     ConnectionOptions::new().with_keyspace("metrics"),
///     PoolConfig::default(),
///     Arc::new(TcpConnector),
/// )
/// .await?;
///
/// let response = pool.submit(Request::new("describe_ring", json!({}))).await?;
/// pool.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Builds a pool over `hosts` and connects to all of them concurrently.
    ///
    /// Duplicate hosts are dropped. Hosts that do not answer stay configured
    /// and are retried in the background.
    ///
    /// # Errors
    ///
    /// [`ScamandriosError::PoolInit`] if `hosts` is empty or no host could be
    /// connected.
    pub async fn connect(
        hosts: Vec<HostAddress>,
        options: ConnectionOptions,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let hosts = dedupe(hosts);
        if hosts.is_empty() {
            return Err(ScamandriosError::PoolInit("no hosts to connect to".to_string()));
        }
        let host_count = hosts.len();

        let pool = Self {
            inner: Arc::new(PoolInner {
                connector,
                options,
                config,
                table: Mutex::new(HostTable::new(hosts)),
                closed: AtomicBool::new(false),
                metrics: PoolMetrics::new(),
                maintenance: std::sync::Mutex::new(None),
            }),
        };

        let connected = pool.inner.tick().await;
        if connected == 0 {
            let errors: Vec<String> = pool
                .host_states()
                .await
                .into_iter()
                .map(|s| format!("{}: {}", s.addr, s.last_error.unwrap_or_default()))
                .collect();
            pool.close().await;
            return Err(ScamandriosError::PoolInit(format!(
                "none of {} hosts reachable ({})",
                host_count,
                errors.join("; ")
            )));
        }

        pool.start_maintenance();
        info!(hosts = host_count, connected, "connection pool ready");
        Ok(pool)
    }

    fn start_maintenance(&self) {
        let Some(period) = self.inner.config.maintenance_interval() else {
            return;
        };

        let pool = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                if inner.is_closed() {
                    break;
                }
                let restored = inner.tick().await;
                if restored > 0 {
                    debug!(restored, "maintenance reconnected hosts");
                }
            }
        });

        if let Ok(mut slot) = self.inner.maintenance.lock() {
            *slot = Some(handle);
        }
    }

    /// The configured hosts, in order, whatever their state.
    pub async fn hosts(&self) -> Vec<HostAddress> {
        self.inner.table.lock().await.hosts()
    }

    /// Returns a ready connection from the next connected host.
    ///
    /// # Errors
    ///
    /// - [`ScamandriosError::PoolClosed`] after [`close`](Self::close)
    /// - [`ScamandriosError::PoolExhausted`] if no host is connected
    /// - [`ScamandriosError::Timeout`] if the host table stayed locked for
    ///   longer than `acquire_timeout_ms`
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.inner.acquire().await
    }

    /// Sends one call through the pool.
    ///
    /// On a transport failure the host is taken out of rotation and, if
    /// `retry_on_transport_failure` is set, the call is replayed once on the
    /// next connected host. Timeouts and server-reported errors are returned
    /// as they are.
    pub async fn submit(&self, request: Request) -> Result<Response> {
        let connection = self.acquire().await?;
        let replay = self
            .inner
            .config
            .retry_on_transport_failure
            .then(|| request.reissue());

        let error = match connection.call(request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        let replay = match replay {
            Some(replay) if error.is_transport_failure() => replay,
            _ => return Err(error),
        };

        let fallback = match self.acquire().await {
            Ok(fallback) => fallback,
            Err(ScamandriosError::PoolExhausted) => return Err(error),
            Err(e) => return Err(e),
        };

        PoolMetrics::incr(&self.inner.metrics.retries);
        warn!(
            failed = %connection.addr(),
            retry = %fallback.addr(),
            %error,
            method = %replay.method,
            "retrying call on another host"
        );
        fallback.call(replay).await
    }

    /// Calls `method` and returns its result, turning server-reported
    /// failures into [`ScamandriosError::Application`].
    pub async fn execute(&self, method: &str, args: RpcArgs) -> Result<RpcResult> {
        self.submit(Request::new(method, args)).await?.into_result()
    }

    /// Adds a host and connects to it right away.
    ///
    /// Adding a host that is already configured but unhealthy or quarantined
    /// clears its failure history and reconnects it. Returns the host's state
    /// after the attempt; a host that could not be reached stays configured
    /// and is retried with backoff.
    pub async fn add_host(&self, addr: HostAddress) -> Result<HostState> {
        self.inner.ensure_open()?;

        let (ticket, discarded) = {
            let mut table = self.inner.table.lock().await;
            match table.get(&addr).map(|slot| slot.state()) {
                Some(HostState::Connected) => return Ok(HostState::Connected),
                Some(_) => {
                    let discarded = table.reset(&addr).unwrap_or_default();
                    (table.claim(&addr), discarded)
                }
                None => {
                    table.insert(addr.clone());
                    (table.claim(&addr), Vec::new())
                }
            }
        };
        self.inner.close_connections(discarded).await;

        info!(%addr, "host added");
        if let Some(generation) = ticket {
            self.inner.reconnect(addr.clone(), generation).await;
        }
        Ok(self.inner.host_state(&addr).await.unwrap_or(HostState::Pending))
    }

    /// Removes a host from the configured list and closes its connections.
    /// Returns false if the host was not configured.
    pub async fn remove_host(&self, addr: &HostAddress) -> Result<bool> {
        self.inner.ensure_open()?;

        let removed = self.inner.table.lock().await.remove(addr);
        match removed {
            Some(mut slot) => {
                self.inner.close_connections(slot.take_connections()).await;
                info!(addr = %slot.addr(), "host removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Clears a host's failure history, drops its connections and reconnects
    /// it now. The way out of quarantine.
    pub async fn reset_host(&self, addr: &HostAddress) -> Result<HostState> {
        self.inner.ensure_open()?;

        let (ticket, discarded) = {
            let mut table = self.inner.table.lock().await;
            let discarded = table.reset(addr).ok_or_else(|| {
                ScamandriosError::InvalidArgument(format!("unknown host {}", addr))
            })?;
            (table.claim(addr), discarded)
        };
        self.inner.close_connections(discarded).await;

        info!(%addr, "host reset");
        if let Some(generation) = ticket {
            self.inner.reconnect(addr.clone(), generation).await;
        }
        Ok(self.inner.host_state(addr).await.unwrap_or(HostState::Pending))
    }

    /// Tries to reconnect an unhealthy or quarantined host now, ignoring its
    /// backoff. Success clears the failure history; failure counts like any
    /// other failed attempt. Connected hosts are left alone.
    pub async fn probe_host(&self, addr: &HostAddress) -> Result<HostState> {
        self.inner.ensure_open()?;

        let ticket = {
            let mut table = self.inner.table.lock().await;
            match table.get(addr).map(|slot| slot.state()) {
                None => {
                    return Err(ScamandriosError::InvalidArgument(format!(
                        "unknown host {}",
                        addr
                    )))
                }
                Some(HostState::Connected) => return Ok(HostState::Connected),
                Some(_) => table.claim(addr),
            }
        };

        match ticket {
            Some(generation) => {
                debug!(%addr, "probing host");
                self.inner.reconnect(addr.clone(), generation).await;
            }
            None => debug!(%addr, "probe skipped, attempt already in flight"),
        }
        Ok(self.inner.host_state(addr).await.unwrap_or(HostState::Pending))
    }

    pub async fn host_states(&self) -> Vec<HostStatus> {
        self.inner.table.lock().await.statuses(Instant::now())
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.metrics.snapshot()
    }

    /// Runs every reconnect whose backoff has elapsed. Returns how many hosts
    /// came back.
    pub async fn tick(&self) -> usize {
        self.inner.tick().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes every connection and stops the maintenance task. Calls in
    /// flight fail with [`ScamandriosError::PoolClosed`]; so does every later
    /// call. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut slot) = self.inner.maintenance.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }

        let connections = self.inner.table.lock().await.drain();
        let count = connections.len();
        self.inner.close_connections(connections).await;
        info!(connections = count, "connection pool closed");
    }
}
