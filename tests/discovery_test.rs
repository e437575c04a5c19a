//! Ring discovery end to end.
//!
//! Every test runs against a loopback ring of real TCP nodes; DNS seeds go
//! through a static lookup table pointing at loopback.

use scamandrios::client::testing::TestRing;
use scamandrios::client::StaticLookup;
use scamandrios::{
    discover, discover_pool, ConnectionOptions, PoolFactory, RingDiscovery, ScamandriosError,
    SeedDescriptor, SeedNode,
};
use serde_json::json;
use std::sync::Arc;

const RING_SIZE: usize = 3;

fn ring_strings(ring: &TestRing) -> Vec<String> {
    ring.addrs().iter().map(|a| a.to_string()).collect()
}

#[tokio::test]
async fn test_discover_returns_every_member() {
    let ring = TestRing::start(RING_SIZE).await.unwrap();
    let full_ring = ring_strings(&ring);

    let list = discover(ring.seed().as_str()).await.unwrap();
    assert_eq!(list.len(), full_ring.len());
    for item in &list {
        assert!(full_ring.contains(item), "{} not in {:?}", item, full_ring);
    }

    ring.shutdown().await;
}

#[tokio::test]
async fn test_discover_takes_object_input() {
    let ring = TestRing::start(RING_SIZE).await.unwrap();
    let seed_addr = ring.addrs()[0].clone();

    let record: SeedDescriptor = serde_json::from_value(json!({
        "host": seed_addr.host(),
        "port": seed_addr.port().to_string(),
    }))
    .unwrap();
    let list = discover(record).await.unwrap();
    assert_eq!(list.len(), RING_SIZE);

    ring.shutdown().await;
}

#[tokio::test]
async fn test_discover_respects_lookup_seed() {
    let ring = TestRing::start(RING_SIZE).await.unwrap();
    let port = ring.addrs()[0].port();

    let lookup = StaticLookup::new().with_entry("ring.test", vec!["127.0.0.1".parse().unwrap()]);
    let record: SeedDescriptor = serde_json::from_value(json!({
        "host": "ring.test",
        "port": port.to_string(),
        "lookupSeed": true,
    }))
    .unwrap();
    assert!(record.resolves_via_dns());

    let list = RingDiscovery::new(ConnectionOptions::default())
        .with_lookup(Arc::new(lookup))
        .discover(Some(&record))
        .await
        .unwrap();
    assert_eq!(list.len(), RING_SIZE);

    ring.shutdown().await;
}

#[tokio::test]
async fn test_unresolvable_seed() {
    let record = SeedDescriptor::from(SeedNode::new("nowhere.test", 9160).with_resolve_seed(true));
    let err = RingDiscovery::new(ConnectionOptions::default())
        .with_lookup(Arc::new(StaticLookup::new()))
        .discover(Some(&record))
        .await
        .unwrap_err();
    assert!(matches!(err, ScamandriosError::Resolution(_)), "{:?}", err);
}

#[test]
fn test_discover_pool_demands_seed_host() {
    let err = discover_pool(None, Some(ConnectionOptions::default())).err().unwrap();
    assert!(err.to_string().contains("seed host"));
}

#[test]
fn test_discover_pool_demands_options() {
    let err = discover_pool(Some(SeedDescriptor::from("10.0.0.1:9160")), None)
        .err()
        .unwrap();
    assert!(err.to_string().contains("connection options"));
}

#[tokio::test]
async fn test_discover_pool_returns_pool() {
    let ring = TestRing::start(RING_SIZE).await.unwrap();

    let pool = discover_pool(
        Some(SeedDescriptor::from(ring.seed())),
        Some(ConnectionOptions::default()),
    )
    .unwrap()
    .await
    .unwrap();
    assert_eq!(pool.hosts().await.len(), RING_SIZE);
    assert!(!pool.is_closed());

    pool.close().await;
    assert!(matches!(pool.acquire().await, Err(ScamandriosError::PoolClosed)));

    ring.shutdown().await;
}

#[tokio::test]
async fn test_discover_pool_through_dns_seed() {
    let ring = TestRing::start(RING_SIZE).await.unwrap();
    let port = ring.addrs()[0].port();

    let factory = PoolFactory::new().with_lookup(Arc::new(
        StaticLookup::new().with_entry("ring.test", vec!["127.0.0.1".parse().unwrap()]),
    ));
    let seed = SeedDescriptor::from(SeedNode::new("ring.test", port).with_resolve_seed(true));

    let pool = factory
        .discover_pool(Some(seed), Some(ConnectionOptions::default()))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(pool.hosts().await.len(), RING_SIZE);
    assert_eq!(pool.stats().connections_created, RING_SIZE as u64);

    pool.close().await;
    ring.shutdown().await;
}
