//! Seed resolution.
//!
//! Turns a [`SeedDescriptor`] into the concrete addresses discovery should
//! try, in order. Only record seeds flagged `resolve_seed` touch the network;
//! the lookup itself sits behind [`LookupService`] so tests can substitute a
//! fixed table.

use crate::address::{HostAddress, SeedDescriptor};
use async_trait::async_trait;
use scamandrios_common::{Result, ScamandriosError, DEFAULT_PORT};
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

/// Name lookup used for `resolve_seed` seeds.
#[async_trait]
pub trait LookupService: Send + Sync + 'static {
    /// Returns every socket address `host` resolves to, using `port`.
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// The operating system resolver, via [`tokio::net::lookup_host`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

#[async_trait]
impl LookupService for SystemLookup {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// A fixed name table. Unknown names fail with [`io::ErrorKind::NotFound`].
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, host: impl Into<String>, ips: Vec<IpAddr>) -> Self {
        self.entries.insert(host.into(), ips);
        self
    }
}

#[async_trait]
impl LookupService for StaticLookup {
    async fn lookup(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        match self.entries.get(host) {
            Some(ips) => Ok(ips.iter().map(|ip| SocketAddr::new(*ip, port)).collect()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such host: {}", host),
            )),
        }
    }
}

/// Resolves seeds into candidate addresses.
#[derive(Clone)]
pub struct Resolver {
    lookup: Arc<dyn LookupService>,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn LookupService>) -> Self {
        Self { lookup }
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemLookup))
    }

    /// Resolves a seed into one or more addresses.
    ///
    /// # Errors
    ///
    /// - [`ScamandriosError::InvalidArgument`] if no seed is given, or its
    ///   host is empty or its port unparsable
    /// - [`ScamandriosError::Resolution`] if a `resolve_seed` lookup fails or
    ///   yields nothing
    pub async fn resolve(&self, seed: Option<&SeedDescriptor>) -> Result<Vec<HostAddress>> {
        let seed = seed.ok_or_else(|| {
            ScamandriosError::InvalidArgument("seed host required".to_string())
        })?;

        let node = match seed {
            SeedDescriptor::Node(node) if node.resolve_seed => node,
            _ => return Ok(vec![seed.to_host_address()?]),
        };

        let host = node.host.trim();
        if host.is_empty() {
            return Err(ScamandriosError::InvalidArgument(
                "seed host required".to_string(),
            ));
        }
        let port = node.port.unwrap_or(DEFAULT_PORT);

        let answers = self.lookup.lookup(host, port).await.map_err(|e| {
            ScamandriosError::Resolution(format!("lookup of {} failed: {}", host, e))
        })?;

        let mut seen = HashSet::new();
        let addresses: Vec<HostAddress> = answers
            .into_iter()
            .filter(|answer| seen.insert(answer.ip()))
            .map(|answer| HostAddress::new(answer.ip().to_string(), port))
            .collect();

        if addresses.is_empty() {
            return Err(ScamandriosError::Resolution(format!(
                "{} resolved to no addresses",
                host
            )));
        }

        debug!(seed = host, candidates = addresses.len(), "seed resolved");
        Ok(addresses)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::system()
    }
}
