//! Stand-in clusters for tests and local tooling.
//!
//! - [`MockCluster`] is an in-memory [`Connector`]: nodes can be stopped,
//!   started and slowed down at will, which makes failover deterministic.
//! - [`TestRing`] runs real [`TcpServer`] nodes on loopback, for exercising the
//!   TCP path end to end.
//!
//! Both answer the same small method set:
//!
//! | method            | answer                                  |
//! |-------------------|-----------------------------------------|
//! | `describe_ring`   | the ring, as `"host:port"` strings      |
//! | `login`, `set_keyspace`, `set_cql_version` | `null`         |
//! | `echo`            | the call's args                         |
//! | `whoami`          | the answering node's `"host:port"`      |
//! | `fail`            | server error carrying `args.message`    |

use crate::address::HostAddress;
use crate::config::ConnectionOptions;
use crate::connection::{Connector, Transport};
use async_trait::async_trait;
use scamandrios_common::transport::{ServerHandle, TcpServer};
use scamandrios_common::{Request, Response, Result, ScamandriosError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Answers one call the way a healthy node would.
pub fn answer(node: &HostAddress, ring: &Value, request: &Request) -> Response {
    match request.method.as_str() {
        "describe_ring" => Response::success(request.id, ring.clone()),
        "login" | "set_keyspace" | "set_cql_version" => Response::success(request.id, Value::Null),
        "echo" => Response::success(request.id, request.args.clone()),
        "whoami" => Response::success(request.id, json!(node.to_string())),
        "fail" => Response::error(
            request.id,
            request.args["message"].as_str().unwrap_or("failed").to_string(),
        ),
        other => Response::error(request.id, format!("Invalid method name: '{}'", other)),
    }
}

#[derive(Debug, Default)]
struct NodeState {
    up: bool,
    incarnation: u64,
    latency: Duration,
    connects: usize,
    calls: usize,
}

#[derive(Debug, Default)]
struct ClusterState {
    order: Vec<HostAddress>,
    nodes: HashMap<HostAddress, NodeState>,
    ring_override: Option<Value>,
}

impl ClusterState {
    fn ring(&self) -> Value {
        match &self.ring_override {
            Some(ring) => ring.clone(),
            None => Value::Array(self.order.iter().map(|a| json!(a.to_string())).collect()),
        }
    }
}

/// In-memory cluster.
///
/// ```
/// use scamandrios_client::testing::MockCluster;
///
/// let cluster = MockCluster::with_nodes(&["10.0.0.1:9160", "10.0.0.2:9160"]).unwrap();
/// cluster.stop(&"10.0.0.2:9160".parse().unwrap());
/// assert!(!cluster.is_up(&"10.0.0.2:9160".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cluster of running nodes, in ring order.
    pub fn with_nodes(addrs: &[&str]) -> Result<Self> {
        let cluster = Self::new();
        for addr in addrs {
            cluster.add_node(addr.parse()?);
        }
        Ok(cluster)
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_node(&self, addr: HostAddress) {
        let mut state = self.lock();
        if !state.nodes.contains_key(&addr) {
            state.order.push(addr.clone());
        }
        let node = state.nodes.entry(addr).or_default();
        node.up = true;
    }

    /// Replaces the `describe_ring` answer with an arbitrary value.
    pub fn set_ring(&self, ring: Value) {
        self.lock().ring_override = Some(ring);
    }

    /// Takes a node down. Its open sessions break and stay broken.
    pub fn stop(&self, addr: &HostAddress) {
        if let Some(node) = self.lock().nodes.get_mut(addr) {
            node.up = false;
            node.incarnation += 1;
        }
    }

    pub fn start(&self, addr: &HostAddress) {
        if let Some(node) = self.lock().nodes.get_mut(addr) {
            node.up = true;
        }
    }

    pub fn is_up(&self, addr: &HostAddress) -> bool {
        self.lock().nodes.get(addr).map_or(false, |n| n.up)
    }

    /// Delays every call answered by `addr`.
    pub fn set_latency(&self, addr: &HostAddress, latency: Duration) {
        if let Some(node) = self.lock().nodes.get_mut(addr) {
            node.latency = latency;
        }
    }

    pub fn connect_count(&self, addr: &HostAddress) -> usize {
        self.lock().nodes.get(addr).map_or(0, |n| n.connects)
    }

    pub fn call_count(&self, addr: &HostAddress) -> usize {
        self.lock().nodes.get(addr).map_or(0, |n| n.calls)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Connector for MockCluster {
    async fn connect(
        &self,
        addr: &HostAddress,
        _options: &ConnectionOptions,
    ) -> Result<Arc<dyn Transport>> {
        let incarnation = {
            let mut state = self.lock();
            match state.nodes.get_mut(addr) {
                Some(node) if node.up => {
                    node.connects += 1;
                    node.incarnation
                }
                _ => {
                    return Err(ScamandriosError::Connection(format!(
                        "Failed to connect to {}: connection refused",
                        addr
                    )))
                }
            }
        };

        Ok(Arc::new(MockSession {
            cluster: self.clone(),
            addr: addr.clone(),
            incarnation,
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockSession {
    cluster: MockCluster,
    addr: HostAddress,
    incarnation: u64,
    closed: AtomicBool,
}

impl MockSession {
    fn check_alive(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScamandriosError::Connection("session closed".to_string()));
        }
        let state = self.cluster.lock();
        match state.nodes.get(&self.addr) {
            Some(node) if node.up && node.incarnation == self.incarnation => Ok(()),
            _ => Err(ScamandriosError::Connection(format!(
                "connection to {} reset by peer",
                self.addr
            ))),
        }
    }
}

#[async_trait]
impl Transport for MockSession {
    async fn call(&self, request: Request) -> Result<Response> {
        self.check_alive()?;

        let latency = {
            let mut state = self.cluster.lock();
            match state.nodes.get_mut(&self.addr) {
                Some(node) => {
                    node.calls += 1;
                    node.latency
                }
                None => Duration::ZERO,
            }
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
            self.check_alive()?;
        }

        let ring = self.cluster.lock().ring();
        Ok(answer(&self.addr, &ring, &request))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A ring of real TCP nodes on loopback. Every node reports the full ring.
pub struct TestRing {
    addrs: Vec<HostAddress>,
    nodes: Vec<Option<ServerHandle>>,
}

impl TestRing {
    pub async fn start(size: usize) -> Result<Self> {
        let mut servers = Vec::with_capacity(size);
        for _ in 0..size {
            servers.push(TcpServer::new("127.0.0.1:0").await?);
        }

        let mut addrs = Vec::with_capacity(size);
        for server in &servers {
            addrs.push(HostAddress::from(server.local_addr()?));
        }

        let ring = Value::Array(addrs.iter().map(|a| json!(a.to_string())).collect());

        let mut nodes = Vec::with_capacity(size);
        for (server, addr) in servers.into_iter().zip(addrs.iter().cloned()) {
            let ring = ring.clone();
            let handle = server.spawn(move |request: Request| {
                let response = answer(&addr, &ring, &request);
                async move { Ok(response) }
            })?;
            nodes.push(Some(handle));
        }

        Ok(Self { addrs, nodes })
    }

    pub fn addrs(&self) -> &[HostAddress] {
        &self.addrs
    }

    /// `"host:port"` of the first node.
    pub fn seed(&self) -> String {
        self.addrs
            .first()
            .map(|a| a.to_string())
            .unwrap_or_default()
    }

    /// Shuts one node down and drops its sessions.
    pub async fn stop(&mut self, index: usize) {
        if let Some(handle) = self.nodes.get_mut(index).and_then(Option::take) {
            handle.shutdown().await;
        }
    }

    pub async fn shutdown(mut self) {
        for index in 0..self.nodes.len() {
            self.stop(index).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> HostAddress {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_mock_cluster_default_ring() {
        let cluster = MockCluster::with_nodes(&["10.0.0.1:9160", "10.0.0.2:9160"]).unwrap();
        let session = cluster
            .connect(&addr("10.0.0.1:9160"), &ConnectionOptions::default())
            .await
            .unwrap();

        let response = session
            .call(Request::new("describe_ring", json!({})))
            .await
            .unwrap();
        assert_eq!(
            response.into_result().unwrap(),
            json!(["10.0.0.1:9160", "10.0.0.2:9160"])
        );
        assert_eq!(cluster.connect_count(&addr("10.0.0.1:9160")), 1);
        assert_eq!(cluster.call_count(&addr("10.0.0.1:9160")), 1);
    }

    #[tokio::test]
    async fn test_mock_cluster_stop_breaks_sessions() {
        let cluster = MockCluster::with_nodes(&["10.0.0.1:9160"]).unwrap();
        let node = addr("10.0.0.1:9160");
        let session = cluster
            .connect(&node, &ConnectionOptions::default())
            .await
            .unwrap();

        cluster.stop(&node);
        assert!(cluster
            .connect(&node, &ConnectionOptions::default())
            .await
            .is_err());

        // restarting does not heal sessions opened before the stop
        cluster.start(&node);
        let err = session
            .call(Request::new("echo", json!(null)))
            .await
            .unwrap_err();
        assert!(err.is_transport_failure());

        let fresh = cluster
            .connect(&node, &ConnectionOptions::default())
            .await
            .unwrap();
        assert!(fresh.call(Request::new("echo", json!(1))).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_cluster_unknown_node_refuses() {
        let cluster = MockCluster::new();
        let err = cluster
            .connect(&addr("10.9.9.9:9160"), &ConnectionOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ScamandriosError::Connection(_)));
    }

    #[test]
    fn test_answer_methods() {
        let node = addr("10.0.0.1:9160");
        let ring = json!(["10.0.0.1:9160"]);

        let whoami = answer(&node, &ring, &Request::new("whoami", json!(null)));
        assert_eq!(whoami.into_result().unwrap(), json!("10.0.0.1:9160"));

        let failed = answer(&node, &ring, &Request::new("fail", json!({"message": "boom"})));
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let unknown = answer(&node, &ring, &Request::new("nope", json!(null)));
        assert!(!unknown.success);
    }

    #[tokio::test]
    async fn test_ring_nodes_report_full_ring() {
        let ring = TestRing::start(3).await.unwrap();
        assert_eq!(ring.addrs().len(), 3);

        let transport = scamandrios_common::transport::TcpTransport::new();
        let mut stream = transport.connect(&ring.seed()).await.unwrap();
        let response = transport
            .send_request(&mut stream, &Request::new("describe_ring", json!({})))
            .await
            .unwrap();

        let members = response.into_result().unwrap();
        assert_eq!(members.as_array().unwrap().len(), 3);
        assert_eq!(members[0], json!(ring.seed()));

        ring.shutdown().await;
    }
}
