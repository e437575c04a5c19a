//! Client side of a scamandrios cluster.
//!
//! A seed address is resolved ([`Resolver`]), asked for the ring
//! ([`RingDiscovery`]) and every member ends up in a [`ConnectionPool`] that
//! spreads calls round-robin and routes around failed hosts. [`discover_pool`]
//! runs the whole pipeline:
//!
//! ```no_run
//! use scamandrios_client::{discover_pool, ConnectionOptions, SeedDescriptor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = discover_pool(
//!     Some(SeedDescriptor::from("cassandra-1.internal:9160")),
//!     Some(ConnectionOptions::new().with_keyspace("events")),
//! )?
//! .await?;
//!
//! for host in pool.host_states().await {
//!     println!("{} {}", host.addr, host.state);
//! }
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod factory;
pub mod host;
pub mod pool;
pub mod resolver;
pub mod stats;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use address::{HostAddress, SeedDescriptor, SeedNode};
pub use config::{ConnectionOptions, PoolConfig};
pub use connection::{Connection, ConnectionState, Connector, TcpConnector, TcpSession, Transport};
pub use discovery::{parse_ring, RingDiscovery, DESCRIBE_RING};
pub use factory::{discover, discover_pool, PoolFactory};
pub use host::{HostState, HostStatus};
pub use pool::{ConnectionPool, PooledConnection};
pub use resolver::{LookupService, Resolver, StaticLookup, SystemLookup};
pub use stats::PoolStats;
