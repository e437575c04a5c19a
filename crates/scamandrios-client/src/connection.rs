//! Connections to single nodes.
//!
//! The pool never talks to sockets directly. It opens sessions through a
//! [`Connector`], gets back a [`Transport`], and wraps each one in a
//! [`Connection`] that tracks liveness and enforces the request timeout.
//!
//! [`TcpConnector`] is the production connector: it dials the node, then runs
//! the session handshake (`login`, `set_cql_version`, `set_keyspace`, in that order) that the
//! connection options ask for.

use crate::address::HostAddress;
use crate::config::ConnectionOptions;
use async_trait::async_trait;
use scamandrios_common::transport::TcpTransport;
use scamandrios_common::{Request, Response, Result, ScamandriosError};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// An established session to one node.
///
/// Implementations serialize their own calls. `call` must return a transport
/// class error (see [`ScamandriosError::is_transport_failure`]) once the
/// session is unusable, and must fail promptly after `close`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn call(&self, request: Request) -> Result<Response>;

    async fn close(&self);
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        addr: &HostAddress,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn Transport>>;
}

/// Dials nodes over the length-prefixed JSON protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: &HostAddress,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn Transport>> {
        let transport = TcpTransport::with_connect_timeout(options.connect_timeout());
        let stream = transport.connect(&addr.to_string()).await?;
        let session = Arc::new(TcpSession::new(transport, stream));

        if let Err(e) = handshake(session.as_ref(), options).await {
            debug!(%addr, error = %e, "handshake failed");
            session.close().await;
            return Err(e);
        }

        Ok(session)
    }
}

async fn handshake(session: &TcpSession, options: &ConnectionOptions) -> Result<()> {
    let mut steps = Vec::new();
    if let Some(user) = &options.user {
        steps.push(Request::new(
            "login",
            json!({ "user": user, "password": options.password.clone().unwrap_or_default() }),
        ));
    }
    if let Some(version) = &options.cql_version {
        steps.push(Request::new("set_cql_version", json!({ "version": version })));
    }
    if let Some(keyspace) = &options.keyspace {
        steps.push(Request::new("set_keyspace", json!({ "keyspace": keyspace })));
    }

    for request in steps {
        let timeout_ms = options.request_timeout_ms;
        let call = session.call(request);
        let response = match options.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ScamandriosError::Timeout(timeout_ms))??,
            None => call.await?,
        };
        response.into_result()?;
    }
    Ok(())
}

/// A TCP session carrying one call at a time.
pub struct TcpSession {
    transport: TcpTransport,
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl TcpSession {
    pub fn new(transport: TcpTransport, stream: TcpStream) -> Self {
        Self {
            transport,
            stream: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    async fn wait_closed(&self) {
        loop {
            let notified = self.close_notify.notified();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    fn closed_error() -> ScamandriosError {
        ScamandriosError::Connection("session closed".to_string())
    }
}

#[async_trait]
impl Transport for TcpSession {
    async fn call(&self, request: Request) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Self::closed_error());
        }

        let mut guard = tokio::select! {
            guard = self.stream.lock() => guard,
            _ = self.wait_closed() => return Err(Self::closed_error()),
        };

        let stream = match guard.as_mut() {
            Some(stream) => stream,
            None => {
                return Err(ScamandriosError::Connection(
                    "session is broken".to_string(),
                ))
            }
        };

        let outcome = tokio::select! {
            result = self.transport.send_request(stream, &request) => Some(result),
            _ = self.wait_closed() => None,
        };

        match outcome {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => {
                if e.is_transport_failure() {
                    // a half-read frame leaves the stream unusable
                    *guard = None;
                }
                Err(e)
            }
            None => {
                *guard = None;
                Err(Self::closed_error())
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_notify.notify_waiters();

        // an in-flight call drops the stream itself once it sees the flag
        if let Ok(mut guard) = self.stream.try_lock() {
            if let Some(mut stream) = guard.take() {
                let _ = stream.shutdown().await;
            }
        }
    }
}

/// Lifecycle of a [`Connection`].
///
/// A `Connection` value only exists once its session is established, so the
/// connecting phase is the pending [`Connection::open`] future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    Failed,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Ready,
            1 => ConnectionState::Failed,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

static CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One live session to one node.
///
/// `Ready` connections accept calls. A transport error moves the connection
/// to `Failed`; `close` moves it to `Closed` from anywhere. Neither of those
/// states is ever left again.
pub struct Connection {
    id: u64,
    addr: HostAddress,
    transport: Arc<dyn Transport>,
    state: AtomicU8,
    request_timeout: Option<Duration>,
    opened_at: Instant,
    close_notify: Notify,
}

impl Connection {
    const READY: u8 = 0;
    const FAILED: u8 = 1;
    const CLOSED: u8 = 2;

    pub fn new(
        addr: HostAddress,
        transport: Arc<dyn Transport>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            addr,
            transport,
            state: AtomicU8::new(Self::READY),
            request_timeout,
            opened_at: Instant::now(),
            close_notify: Notify::new(),
        }
    }

    /// Opens a session to `addr` through `connector`.
    pub async fn open(
        connector: &dyn Connector,
        addr: HostAddress,
        options: &ConnectionOptions,
    ) -> Result<Arc<Connection>> {
        debug!(%addr, "opening connection");
        let transport = connector.connect(&addr, options).await?;
        let connection = Arc::new(Connection::new(addr, transport, options.request_timeout()));
        debug!(addr = %connection.addr, id = connection.id, "connection ready");
        Ok(connection)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &HostAddress {
        &self.addr
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Moves a ready connection to `Failed`. Returns false if it was not ready.
    pub fn mark_failed(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(Self::READY, Self::FAILED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            warn!(addr = %self.addr, id = self.id, "connection failed");
        }
        changed
    }

    /// Sends one call and waits for its response.
    ///
    /// The transport call runs in its own task. If the request timeout (the
    /// request's own `timeout_ms`, else the connection default) passes first
    /// the caller gets [`ScamandriosError::Timeout`] while the call keeps
    /// running; the connection is only marked failed if the transport itself
    /// later reports an error.
    ///
    /// A server-reported failure comes back as an `Ok` response with
    /// `success == false`; use [`Response::into_result`] to turn it into an
    /// error.
    pub async fn call(self: &Arc<Self>, request: Request) -> Result<Response> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(ScamandriosError::Connection(format!(
                "connection to {} is {}",
                self.addr, state
            )));
        }

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.request_timeout);
        let method = request.method.clone();

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = this.transport.call(request).await;
            if let Err(e) = &result {
                if e.is_transport_failure() {
                    this.mark_failed();
                }
            }
            result
        });

        let joined = async {
            task.await.map_err(|e| {
                ScamandriosError::Connection(format!("call task aborted: {}", e))
            })?
        };

        let bounded = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, joined)
                    .await
                    .map_err(|_| ScamandriosError::Timeout(limit.as_millis() as u64))?,
                None => joined.await,
            }
        };

        let closed = async {
            loop {
                let notified = self.close_notify.notified();
                if self.state() == ConnectionState::Closed {
                    return;
                }
                notified.await;
            }
        };

        let result = tokio::select! {
            result = bounded => result,
            _ = closed => Err(ScamandriosError::Connection(format!(
                "connection to {} closed", self.addr
            ))),
        };

        if let Err(ScamandriosError::Timeout(ms)) = &result {
            debug!(addr = %self.addr, %method, timeout_ms = ms, "call timed out");
        }
        result
    }

    /// Closes the connection. Later and in-flight calls fail.
    pub async fn close(&self) {
        let previous = self.state.swap(Self::CLOSED, Ordering::SeqCst);
        if previous == Self::CLOSED {
            return;
        }
        self.close_notify.notify_waiters();
        self.transport.close().await;
        debug!(addr = %self.addr, id = self.id, "connection closed");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scamandrios_common::transport::TcpServer;
    use std::sync::atomic::AtomicUsize;

    /// Answers after an optional delay, or fails on demand.
    struct ScriptedTransport {
        delay: Duration,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                fail: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn call(&self, request: Request) -> Result<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ScamandriosError::Connection("reset by peer".to_string()));
            }
            Ok(Response::success(request.id, request.args))
        }

        async fn close(&self) {}
    }

    fn connection(transport: Arc<ScriptedTransport>, timeout_ms: u64) -> Arc<Connection> {
        Arc::new(Connection::new(
            HostAddress::new("10.0.0.1", 9160),
            transport,
            Some(Duration::from_millis(timeout_ms)),
        ))
    }

    #[tokio::test]
    async fn test_call_returns_response() {
        let conn = connection(ScriptedTransport::new(Duration::ZERO), 1000);
        let response = conn.call(Request::new("echo", json!({"n": 1}))).await.unwrap();
        assert_eq!(response.into_result().unwrap(), json!({"n": 1}));
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn test_transport_error_fails_connection() {
        let transport = ScriptedTransport::new(Duration::ZERO);
        transport.fail.store(true, Ordering::SeqCst);
        let conn = connection(transport.clone(), 1000);

        let err = conn.call(Request::new("echo", json!(null))).await.unwrap_err();
        assert!(err.is_transport_failure());
        assert_eq!(conn.state(), ConnectionState::Failed);

        // failed connections refuse further calls without touching the transport
        let err = conn.call(Request::new("echo", json!(null))).await.unwrap_err();
        assert!(matches!(err, ScamandriosError::Connection(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_leaves_connection_ready() {
        let conn = connection(ScriptedTransport::new(Duration::from_millis(200)), 20);

        let err = conn.call(Request::new("slow", json!(null))).await.unwrap_err();
        assert!(matches!(err, ScamandriosError::Timeout(20)));
        assert!(conn.is_ready());
    }

    #[tokio::test]
    async fn test_detached_call_failure_marks_connection_failed() {
        let transport = ScriptedTransport::new(Duration::from_millis(100));
        transport.fail.store(true, Ordering::SeqCst);
        let conn = connection(transport, 10);

        let err = conn.call(Request::new("slow", json!(null))).await.unwrap_err();
        assert!(matches!(err, ScamandriosError::Timeout(_)));
        assert!(conn.is_ready());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_request_timeout_overrides_default() {
        let conn = connection(ScriptedTransport::new(Duration::from_millis(50)), 10);
        let response = conn
            .call(Request::new("slow", json!(1)).with_timeout(1000))
            .await
            .unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_close_interrupts_in_flight_call() {
        let conn = connection(ScriptedTransport::new(Duration::from_secs(5)), 10_000);

        let caller = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call(Request::new("slow", json!(null))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close().await;

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, ScamandriosError::Connection(_)));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_closed_is_terminal() {
        let conn = connection(ScriptedTransport::new(Duration::ZERO), 1000);
        conn.close().await;
        assert!(!conn.mark_failed());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.call(Request::new("echo", json!(null))).await.is_err());
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let a = connection(ScriptedTransport::new(Duration::ZERO), 1000);
        let b = connection(ScriptedTransport::new(Duration::ZERO), 1000);
        assert_ne!(a.id(), b.id());
    }

    async fn spawn_node() -> scamandrios_common::transport::ServerHandle {
        let server = TcpServer::new("127.0.0.1:0").await.unwrap();
        server
            .spawn(|request: Request| async move {
                let response = match request.method.as_str() {
                    "login" if request.args["password"] != "secret" => {
                        Response::error(request.id, "bad credentials")
                    }
                    "set_keyspace" if request.args["keyspace"] == "missing" => {
                        Response::error(request.id, "Keyspace 'missing' does not exist")
                    }
                    _ => Response::success(request.id, request.args),
                };
                Ok(response)
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_tcp_connector_round_trip() {
        let node = spawn_node().await;
        let addr = HostAddress::from(node.local_addr());
        let options = ConnectionOptions::new()
            .with_credentials("cassandra", "secret")
            .with_keyspace("metrics");

        let conn = Connection::open(&TcpConnector, addr.clone(), &options).await.unwrap();
        assert_eq!(conn.addr(), &addr);

        let response = conn.call(Request::new("echo", json!([1, 2]))).await.unwrap();
        assert_eq!(response.into_result().unwrap(), json!([1, 2]));

        conn.close().await;
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_tcp_connector_rejected_login() {
        let node = spawn_node().await;
        let addr = HostAddress::from(node.local_addr());
        let options = ConnectionOptions::new().with_credentials("cassandra", "wrong");

        let err = Connection::open(&TcpConnector, addr, &options).await.unwrap_err();
        assert!(matches!(err, ScamandriosError::Application(ref m) if m == "bad credentials"));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_tcp_connector_unknown_keyspace() {
        let node = spawn_node().await;
        let addr = HostAddress::from(node.local_addr());
        let options = ConnectionOptions::new().with_keyspace("missing");

        let err = Connection::open(&TcpConnector, addr, &options).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_tcp_session_breaks_when_node_stops() {
        let node = spawn_node().await;
        let addr = HostAddress::from(node.local_addr());
        let conn = Connection::open(&TcpConnector, addr, &ConnectionOptions::default())
            .await
            .unwrap();

        node.shutdown().await;

        let err = conn.call(Request::new("echo", json!(null))).await.unwrap_err();
        assert!(err.is_transport_failure());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = HostAddress::from(listener.local_addr().unwrap());
        drop(listener);

        let err = Connection::open(&TcpConnector, addr, &ConnectionOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transport_failure() || matches!(err, ScamandriosError::Timeout(_)));
    }
}
