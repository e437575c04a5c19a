//! Pool failover through a caller-supplied connector.

use async_trait::async_trait;
use scamandrios::client::{Connector, Transport};
use scamandrios::{
    ConnectionOptions, ConnectionPool, HostAddress, HostState, PoolConfig, Request, Response,
    Result, ScamandriosError,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Hosts in `broken` refuse connections and reset every open session.
#[derive(Clone, Default)]
struct FlakyConnector {
    broken: Arc<Mutex<HashSet<HostAddress>>>,
}

impl FlakyConnector {
    fn is_broken(&self, addr: &HostAddress) -> bool {
        self.broken.lock().unwrap().contains(addr)
    }

    fn break_host(&self, addr: &HostAddress) {
        self.broken.lock().unwrap().insert(addr.clone());
    }

    fn heal_host(&self, addr: &HostAddress) {
        self.broken.lock().unwrap().remove(addr);
    }
}

struct FlakySession {
    connector: FlakyConnector,
    addr: HostAddress,
}

#[async_trait]
impl Connector for FlakyConnector {
    async fn connect(&self, addr: &HostAddress, _options: &ConnectionOptions) -> Result<Arc<dyn Transport>> {
        if self.is_broken(addr) {
            return Err(ScamandriosError::Connection(format!("{} refused", addr)));
        }
        Ok(Arc::new(FlakySession {
            connector: self.clone(),
            addr: addr.clone(),
        }))
    }
}

#[async_trait]
impl Transport for FlakySession {
    async fn call(&self, request: Request) -> Result<Response> {
        if self.connector.is_broken(&self.addr) {
            return Err(ScamandriosError::Connection(format!("{} reset", self.addr)));
        }
        Ok(Response::success(request.id, json!(self.addr.to_string())))
    }

    async fn close(&self) {}
}

fn hosts() -> Vec<HostAddress> {
    ["10.1.0.1:9160", "10.1.0.2:9160", "10.1.0.3:9160"]
        .iter()
        .map(|h| h.parse().unwrap())
        .collect()
}

async fn who(pool: &ConnectionPool) -> String {
    let answer = pool.execute("whoami", json!(null)).await.unwrap();
    answer.as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_broken_host_recovers_in_background() {
    let connector = FlakyConnector::default();
    let config = PoolConfig::default()
        .with_max_consecutive_failures(100)
        .with_reconnect_delays(Duration::from_millis(20), Duration::from_millis(40))
        .with_maintenance_interval(Duration::from_millis(10));
    let pool = ConnectionPool::connect(
        hosts(),
        ConnectionOptions::default(),
        config,
        Arc::new(connector.clone()),
    )
    .await
    .unwrap();

    let broken = hosts()[1].clone();
    connector.break_host(&broken);

    for _ in 0..6 {
        assert_ne!(who(&pool).await, broken.to_string());
    }
    assert_eq!(pool.stats().retries, 1);

    connector.heal_host(&broken);
    let mut recovered = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let states = pool.host_states().await;
        if states.iter().all(|s| s.state == HostState::Connected) {
            recovered = true;
            break;
        }
    }
    assert!(recovered, "{:?}", pool.host_states().await);

    let mut answered = HashSet::new();
    for _ in 0..3 {
        answered.insert(who(&pool).await);
    }
    assert!(answered.contains(&broken.to_string()));

    pool.close().await;
}

#[tokio::test]
async fn test_quarantined_host_needs_reset() {
    let connector = FlakyConnector::default();
    let config = PoolConfig::default()
        .with_max_consecutive_failures(1)
        .with_maintenance_interval(Duration::ZERO);
    let pool = ConnectionPool::connect(
        hosts(),
        ConnectionOptions::default(),
        config,
        Arc::new(connector.clone()),
    )
    .await
    .unwrap();

    let broken = hosts()[0].clone();
    connector.break_host(&broken);
    assert_ne!(who(&pool).await, broken.to_string());

    let status = pool
        .host_states()
        .await
        .into_iter()
        .find(|s| s.addr == broken)
        .unwrap();
    assert_eq!(status.state, HostState::Quarantined);
    assert_eq!(status.retry_in_ms, None);
    assert_eq!(pool.stats().quarantines, 1);

    connector.heal_host(&broken);
    assert_eq!(pool.tick().await, 0);

    assert_eq!(pool.reset_host(&broken).await.unwrap(), HostState::Connected);

    pool.close().await;
}

#[tokio::test]
async fn test_every_host_broken() {
    let connector = FlakyConnector::default();
    for host in hosts() {
        connector.break_host(&host);
    }

    let err = ConnectionPool::connect(
        hosts(),
        ConnectionOptions::default(),
        PoolConfig::default().with_maintenance_interval(Duration::ZERO),
        Arc::new(connector),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, ScamandriosError::PoolInit(ref m) if m.contains("none of 3")), "{:?}", err);
}
