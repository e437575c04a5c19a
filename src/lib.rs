//! # Scamandrios
//!
//! Ring discovery and a failover connection pool for a column-store cluster.
//!
//! This crate re-exports the two library crates of the workspace:
//!
//! - [`common`]: wire types, the error enum, framing and the TCP transport
//! - [`client`]: seed resolution, ring discovery and the connection pool
//!
//! The most used items are also available at the root:
//!
//! ```no_run
//! use scamandrios::{discover, discover_pool, ConnectionOptions, SeedDescriptor};
//!
//! # #[tokio::main]
//! # async fn main() -> scamandrios::Result<()> {
//! let ring = discover("10.0.0.1:9160").await?;
//! println!("ring: {:?}", ring);
//!
//! let pool = discover_pool(
//!     Some(SeedDescriptor::from("10.0.0.1:9160")),
//!     Some(ConnectionOptions::default()),
//! )?
//! .await?;
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub use scamandrios_client as client;
pub use scamandrios_common as common;

pub use scamandrios_client::{
    discover, discover_pool, ConnectionOptions, ConnectionPool, HostAddress, HostState, HostStatus,
    PoolConfig, PoolFactory, PoolStats, PooledConnection, RingDiscovery, SeedDescriptor, SeedNode,
};
pub use scamandrios_common::{Request, Response, Result, ScamandriosError};
