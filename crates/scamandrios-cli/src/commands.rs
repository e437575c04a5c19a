// Copyright 2025 Scamandrios Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use scamandrios_client::{
    ConnectionOptions, ConnectionPool, HostAddress, PoolConfig, PoolFactory, RingDiscovery,
    SeedDescriptor, SeedNode,
};
use scamandrios_common::DEFAULT_PORT;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Reads a seed given on the command line.
///
/// Accepts `host`, `host:port` or a JSON seed record such as
/// `{"host": "seeds.internal", "port": 9160, "resolve_seed": true}`.
/// `resolve_seed` forces DNS resolution of the host either way.
pub fn parse_seed(input: &str, resolve_seed: bool) -> Result<SeedDescriptor> {
    let trimmed = input.trim();
    if trimmed.starts_with('{') {
        let mut node: SeedNode = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid seed record: {}", trimmed))?;
        node.resolve_seed |= resolve_seed;
        return Ok(SeedDescriptor::Node(node));
    }

    if !resolve_seed {
        return Ok(SeedDescriptor::from(trimmed));
    }

    let addr = HostAddress::parse(trimmed, DEFAULT_PORT)?;
    Ok(SeedNode::new(addr.host(), addr.port())
        .with_resolve_seed(true)
        .into())
}

/// Connection options from an optional JSON file, with `keyspace` layered on
/// top.
pub fn load_options(path: Option<&Path>, keyspace: Option<String>) -> Result<ConnectionOptions> {
    let mut options = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read options file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid options file {}", path.display()))?
        }
        None => ConnectionOptions::default(),
    };

    if let Some(keyspace) = keyspace {
        options = options.with_keyspace(keyspace);
    }
    Ok(options)
}

/// Parses the `args` argument of a call.
pub fn parse_args(args: &str) -> Result<Value> {
    serde_json::from_str(args).map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))
}

pub async fn discover(seed: SeedDescriptor, options: ConnectionOptions) -> Result<Vec<String>> {
    debug!(%seed, "discovering ring");
    let members = RingDiscovery::new(options).discover(Some(&seed)).await?;
    Ok(members)
}

async fn open_pool(factory: &PoolFactory, seed: SeedDescriptor, options: ConnectionOptions) -> Result<ConnectionPool> {
    let pool = factory.discover_pool(Some(seed), Some(options))?.await?;
    Ok(pool)
}

fn one_shot_factory() -> PoolFactory {
    // the pool lives for a single command, no background reconnects
    PoolFactory::new().with_config(PoolConfig::default().with_maintenance_interval(Duration::ZERO))
}

/// Builds a pool from `seed`, makes one call and returns its result.
pub async fn call(
    seed: SeedDescriptor,
    options: ConnectionOptions,
    method: &str,
    args: Value,
) -> Result<Value> {
    call_with(&one_shot_factory(), seed, options, method, args).await
}

pub async fn call_with(
    factory: &PoolFactory,
    seed: SeedDescriptor,
    options: ConnectionOptions,
    method: &str,
    args: Value,
) -> Result<Value> {
    let pool = open_pool(factory, seed, options).await?;
    debug!(method, hosts = pool.hosts().await.len(), "submitting call");
    let result = pool.execute(method, args).await;
    pool.close().await;
    Ok(result?)
}

/// Builds a pool from `seed` and reports every host's state plus the pool's
/// counters.
pub async fn ring_status(seed: SeedDescriptor, options: ConnectionOptions) -> Result<Value> {
    ring_status_with(&one_shot_factory(), seed, options).await
}

pub async fn ring_status_with(
    factory: &PoolFactory,
    seed: SeedDescriptor,
    options: ConnectionOptions,
) -> Result<Value> {
    let pool = open_pool(factory, seed, options).await?;
    let report = json!({
        "hosts": pool.host_states().await,
        "stats": pool.stats(),
    });
    pool.close().await;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_seed_plain() {
        let seed = parse_seed("10.0.0.1:9161", false).unwrap();
        assert!(!seed.resolves_via_dns());
        assert_eq!(seed.to_host_address().unwrap(), HostAddress::new("10.0.0.1", 9161));
    }

    #[test]
    fn test_parse_seed_resolve_flag() {
        let seed = parse_seed("seeds.internal", true).unwrap();
        assert!(seed.resolves_via_dns());
        assert_eq!(seed.to_host_address().unwrap().port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_seed_record() {
        let seed = parse_seed(r#"{"host": "seeds.internal", "port": "7000", "lookupSeed": true}"#, false).unwrap();
        assert!(seed.resolves_via_dns());
        assert_eq!(seed.to_host_address().unwrap().port(), 7000);

        assert!(parse_seed("{not json", false).is_err());
    }

    #[test]
    fn test_load_options_file_and_keyspace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"request_timeout_ms": 1500, "user": "ops", "keyspace": "a"}}"#).unwrap();

        let options = load_options(Some(file.path()), Some("b".to_string())).unwrap();
        assert_eq!(options.request_timeout_ms, 1500);
        assert_eq!(options.user.as_deref(), Some("ops"));
        assert_eq!(options.keyspace.as_deref(), Some("b"));
        assert_eq!(options.connect_timeout_ms, ConnectionOptions::default().connect_timeout_ms);
    }

    #[test]
    fn test_load_options_missing_file() {
        let err = load_options(Some(Path::new("/nonexistent/options.json")), None).unwrap_err();
        assert!(err.to_string().contains("Failed to read options file"));
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(parse_args(r#"{"key": 1}"#).unwrap(), json!({"key": 1}));
        assert!(parse_args("{").unwrap_err().to_string().contains("Invalid JSON"));
    }
}
