//! One-call entry points: seed in, ring or pool out.

use crate::address::SeedDescriptor;
use crate::config::{ConnectionOptions, PoolConfig};
use crate::connection::{Connector, TcpConnector};
use crate::discovery::RingDiscovery;
use crate::pool::ConnectionPool;
use crate::resolver::{LookupService, SystemLookup};
use scamandrios_common::{Result, ScamandriosError};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Discovers the ring behind `seed` with default options over TCP.
pub async fn discover(seed: impl Into<SeedDescriptor>) -> Result<Vec<String>> {
    let seed = seed.into();
    RingDiscovery::new(ConnectionOptions::default())
        .discover(Some(&seed))
        .await
}

/// Discovers the ring behind `seed` and builds a pool over every member.
///
/// Missing arguments are rejected before anything is started, so the
/// returned future only ever fails for resolution, discovery or connection
/// reasons.
///
/// ```no_run
/// use scamandrios_client::{discover_pool, ConnectionOptions, SeedDescriptor};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let seed = SeedDescriptor::from("10.0.0.1:9160");
/// let options = ConnectionOptions::new().with_keyspace("events");
/// let pool = discover_pool(Some(seed), Some(options))?.await?;
/// let answer = pool.execute("get_slice", serde_json::json!({"key": "k1"})).await?;
/// # let _ = answer;
/// # Ok(())
/// # }
/// ```
pub fn discover_pool(
    seed: Option<SeedDescriptor>,
    options: Option<ConnectionOptions>,
) -> Result<impl Future<Output = Result<ConnectionPool>> + Send + 'static> {
    PoolFactory::new().discover_pool(seed, options)
}

/// [`discover_pool`] with its collaborators swapped out.
#[derive(Clone)]
pub struct PoolFactory {
    connector: Arc<dyn Connector>,
    lookup: Arc<dyn LookupService>,
    config: PoolConfig,
}

impl Default for PoolFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolFactory {
    pub fn new() -> Self {
        Self {
            connector: Arc::new(TcpConnector),
            lookup: Arc::new(SystemLookup),
            config: PoolConfig::default(),
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn LookupService>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn discover_pool(
        &self,
        seed: Option<SeedDescriptor>,
        options: Option<ConnectionOptions>,
    ) -> Result<impl Future<Output = Result<ConnectionPool>> + Send + 'static> {
        let seed = seed.ok_or_else(|| {
            ScamandriosError::InvalidArgument("seed host required".to_string())
        })?;
        let options = options.ok_or_else(|| {
            ScamandriosError::InvalidArgument("connection options required".to_string())
        })?;

        let discovery = RingDiscovery::new(options.clone())
            .with_connector(self.connector.clone())
            .with_lookup(self.lookup.clone());
        let connector = self.connector.clone();
        let config = self.config.clone();

        Ok(async move {
            let members = discovery.discover_hosts(Some(&seed)).await?;
            info!(%seed, members = members.len(), "building pool from ring");
            ConnectionPool::connect(members, options, config, connector).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::HostAddress;
    use crate::resolver::StaticLookup;
    use crate::testing::MockCluster;
    use std::time::Duration;

    const NODES: [&str; 3] = ["10.0.0.1:9160", "10.0.0.2:9160", "10.0.0.3:9160"];

    fn factory(cluster: &MockCluster) -> PoolFactory {
        PoolFactory::new()
            .with_connector(cluster.connector())
            .with_lookup(Arc::new(StaticLookup::new()))
            .with_config(PoolConfig::default().with_maintenance_interval(Duration::ZERO))
    }

    #[test]
    fn test_missing_seed_rejected_synchronously() {
        let cluster = MockCluster::new();
        let err = factory(&cluster)
            .discover_pool(None, Some(ConnectionOptions::default()))
            .err()
            .unwrap();
        assert!(matches!(err, ScamandriosError::InvalidArgument(_)));
        assert!(err.to_string().contains("seed host"));
    }

    #[test]
    fn test_missing_options_rejected_synchronously() {
        let cluster = MockCluster::new();
        let err = factory(&cluster)
            .discover_pool(Some(SeedDescriptor::from(NODES[0])), None)
            .err()
            .unwrap();
        assert!(matches!(err, ScamandriosError::InvalidArgument(_)));
        assert!(err.to_string().contains("connection options"));
    }

    #[tokio::test]
    async fn test_discover_pool_covers_ring() {
        let cluster = MockCluster::with_nodes(&NODES).unwrap();
        let pool = factory(&cluster)
            .discover_pool(
                Some(SeedDescriptor::from(NODES[0])),
                Some(ConnectionOptions::default()),
            )
            .unwrap()
            .await
            .unwrap();

        let hosts = pool.hosts().await;
        assert_eq!(hosts.len(), NODES.len());
        for node in NODES {
            assert!(hosts.contains(&node.parse::<HostAddress>().unwrap()));
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn test_discover_pool_skips_dead_members() {
        let cluster = MockCluster::with_nodes(&NODES).unwrap();
        cluster.stop(&NODES[2].parse().unwrap());

        let pool = factory(&cluster)
            .discover_pool(
                Some(SeedDescriptor::from(NODES[0])),
                Some(ConnectionOptions::default()),
            )
            .unwrap()
            .await
            .unwrap();

        // the ring still lists the dead node, the pool keeps it configured
        assert_eq!(pool.hosts().await.len(), 3);
        for _ in 0..4 {
            let who = pool.execute("whoami", serde_json::Value::Null).await.unwrap();
            assert_ne!(who, serde_json::json!(NODES[2]));
        }
        pool.close().await;
    }

    #[tokio::test]
    async fn test_discover_pool_seed_down() {
        let cluster = MockCluster::with_nodes(&NODES).unwrap();
        cluster.stop(&NODES[0].parse().unwrap());

        let err = factory(&cluster)
            .discover_pool(
                Some(SeedDescriptor::from(NODES[0])),
                Some(ConnectionOptions::default()),
            )
            .unwrap()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ScamandriosError::Connection(_)));
    }

    #[tokio::test]
    async fn test_discover_pool_every_member_down() {
        let cluster = MockCluster::new();
        cluster.add_node("10.0.0.1:9160".parse().unwrap());
        cluster.set_ring(serde_json::json!(["10.0.0.8:9160", "10.0.0.9:9160"]));

        let err = factory(&cluster)
            .discover_pool(
                Some(SeedDescriptor::from("10.0.0.1:9160")),
                Some(ConnectionOptions::default()),
            )
            .unwrap()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ScamandriosError::PoolInit(_)));
    }
}
