//! Ring discovery.
//!
//! Connects to a seed, asks it for the ring with `describe_ring` and turns the
//! answer into an ordered, duplicate-free list of member addresses. The seed
//! connection only lives for the duration of the query.

use crate::address::{HostAddress, SeedDescriptor};
use crate::config::ConnectionOptions;
use crate::connection::{Connection, Connector, TcpConnector};
use crate::resolver::{LookupService, Resolver};
use scamandrios_common::{Request, Result, ScamandriosError};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Topology query every node answers.
pub const DESCRIBE_RING: &str = "describe_ring";

/// Finds the members of a ring through a seed node.
///
/// ```no_run
/// use scamandrios_client::{ConnectionOptions, RingDiscovery, SeedDescriptor};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let discovery = RingDiscovery::new(ConnectionOptions::default());
/// let seed = SeedDescriptor::from("10.0.0.1:9160");
/// let members = discovery.discover(Some(&seed)).await?;
/// println!("{:?}", members);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RingDiscovery {
    resolver: Resolver,
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
}

impl RingDiscovery {
    /// Discovery over TCP with the system resolver.
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            resolver: Resolver::system(),
            connector: Arc::new(TcpConnector),
            options,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn LookupService>) -> Self {
        self.resolver = Resolver::new(lookup);
        self
    }

    /// Returns the ring as `"host:port"` strings, in server order.
    pub async fn discover(&self, seed: Option<&SeedDescriptor>) -> Result<Vec<String>> {
        let members = self.discover_hosts(seed).await?;
        Ok(members.iter().map(HostAddress::to_string).collect())
    }

    /// Like [`discover`](Self::discover), returning typed addresses.
    ///
    /// # Errors
    ///
    /// - [`ScamandriosError::InvalidArgument`] / [`ScamandriosError::Resolution`]
    ///   from resolving the seed
    /// - [`ScamandriosError::Connection`] if no seed candidate accepts a
    ///   connection
    /// - [`ScamandriosError::Protocol`] if the topology query fails or its
    ///   answer cannot be read
    /// - [`ScamandriosError::Timeout`] if the topology query outlives the
    ///   request timeout
    pub async fn discover_hosts(&self, seed: Option<&SeedDescriptor>) -> Result<Vec<HostAddress>> {
        let candidates = self.resolver.resolve(seed).await?;
        let fallback_port = candidates
            .first()
            .map(HostAddress::port)
            .unwrap_or(scamandrios_common::DEFAULT_PORT);

        let seed_connection = self.connect_first(&candidates).await?;
        let members = self.query_ring(&seed_connection, fallback_port).await;
        seed_connection.close().await;

        let members = members?;
        info!(
            seed = %seed_connection.addr(),
            members = members.len(),
            "ring discovered"
        );
        Ok(members)
    }

    async fn connect_first(&self, candidates: &[HostAddress]) -> Result<Arc<Connection>> {
        let mut last_error = None;
        for candidate in candidates {
            match Connection::open(self.connector.as_ref(), candidate.clone(), &self.options).await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    warn!(%candidate, error = %e, "seed candidate unreachable");
                    last_error = Some(e);
                }
            }
        }

        Err(ScamandriosError::Connection(format!(
            "no seed candidate reachable ({} tried): {}",
            candidates.len(),
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidates".to_string())
        )))
    }

    async fn query_ring(&self, connection: &Arc<Connection>, fallback_port: u16) -> Result<Vec<HostAddress>> {
        let args = match &self.options.keyspace {
            Some(keyspace) => json!({ "keyspace": keyspace }),
            None => json!({}),
        };

        let response = connection
            .call(Request::new(DESCRIBE_RING, args))
            .await
            .map_err(|e| match e {
                ScamandriosError::Timeout(_) => e,
                other => ScamandriosError::Protocol(format!("{} failed: {}", DESCRIBE_RING, other)),
            })?;

        let ring = response.into_result().map_err(|e| {
            ScamandriosError::Protocol(format!("{} rejected: {}", DESCRIBE_RING, e))
        })?;

        debug!(addr = %connection.addr(), "ring answer received");
        parse_ring(&ring, fallback_port)
    }
}

/// Reads a `describe_ring` answer.
///
/// The answer is a JSON array whose elements are any mix of:
///
/// - `"host"` or `"host:port"` strings
/// - `{"host": .., "port": ..}` objects, `port` optional and numeric or string
/// - token ranges, `{"endpoints": [..], "rpc_endpoints": [..]}`; every
///   endpoint is a member, and an `rpc_endpoints` entry replaces the
///   endpoint at the same index unless it is the wildcard `0.0.0.0`
///
/// Members without a port get `fallback_port`. The first occurrence of each
/// member wins.
pub fn parse_ring(ring: &Value, fallback_port: u16) -> Result<Vec<HostAddress>> {
    let entries = ring.as_array().ok_or_else(|| {
        ScamandriosError::Protocol(format!("{} answer is not a list: {}", DESCRIBE_RING, ring))
    })?;

    let mut seen = HashSet::new();
    let mut members = Vec::new();
    for entry in entries {
        for member in parse_entry(entry, fallback_port)? {
            if seen.insert(member.clone()) {
                members.push(member);
            }
        }
    }

    if members.is_empty() {
        return Err(ScamandriosError::Protocol(format!(
            "{} returned no members",
            DESCRIBE_RING
        )));
    }
    Ok(members)
}

fn parse_entry(entry: &Value, fallback_port: u16) -> Result<Vec<HostAddress>> {
    match entry {
        Value::String(text) => Ok(vec![parse_member(text, fallback_port)?]),
        Value::Object(fields) if fields.contains_key("endpoints") => {
            parse_token_range(fields, fallback_port)
        }
        Value::Object(fields) if fields.contains_key("host") => {
            Ok(vec![parse_host_record(fields, fallback_port)?])
        }
        other => Err(unrecognized(other)),
    }
}

fn parse_member(text: &str, fallback_port: u16) -> Result<HostAddress> {
    HostAddress::parse(text, fallback_port)
        .map_err(|e| ScamandriosError::Protocol(format!("bad ring member {:?}: {}", text, e)))
}

fn parse_host_record(fields: &Map<String, Value>, fallback_port: u16) -> Result<HostAddress> {
    let host = fields
        .get("host")
        .and_then(Value::as_str)
        .ok_or_else(|| unrecognized(&Value::Object(fields.clone())))?;

    let port = match fields.get("port") {
        None | Some(Value::Null) => fallback_port,
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| ScamandriosError::Protocol(format!("bad port {} for {}", n, host)))?,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| ScamandriosError::Protocol(format!("bad port {:?} for {}", s, host)))?,
        Some(other) => {
            return Err(ScamandriosError::Protocol(format!(
                "bad port {} for {}",
                other, host
            )))
        }
    };

    if host.trim().is_empty() {
        return Err(ScamandriosError::Protocol("ring member with empty host".to_string()));
    }
    Ok(HostAddress::new(host.trim(), port))
}

fn parse_token_range(fields: &Map<String, Value>, fallback_port: u16) -> Result<Vec<HostAddress>> {
    let endpoints = string_list(fields, "endpoints")?;
    let rpc_endpoints = match fields.get("rpc_endpoints") {
        Some(Value::Null) | None => Vec::new(),
        Some(_) => string_list(fields, "rpc_endpoints")?,
    };

    endpoints
        .iter()
        .enumerate()
        .map(|(i, endpoint)| {
            let preferred = rpc_endpoints
                .get(i)
                .filter(|rpc| !rpc.is_empty() && **rpc != "0.0.0.0")
                .unwrap_or(endpoint);
            parse_member(preferred, fallback_port)
        })
        .collect()
}

fn string_list<'a>(fields: &'a Map<String, Value>, key: &str) -> Result<Vec<&'a str>> {
    let list = fields
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ScamandriosError::Protocol(format!("token range {} is not a list", key)))?;

    list.iter()
        .map(|v| {
            v.as_str().ok_or_else(|| {
                ScamandriosError::Protocol(format!("token range {} entry is not a string: {}", key, v))
            })
        })
        .collect()
}

fn unrecognized(entry: &Value) -> ScamandriosError {
    ScamandriosError::Protocol(format!("unrecognized ring member: {}", entry))
}
