//! Host addresses and seed descriptors.
//!
//! A [`HostAddress`] is the immutable `(host, port)` pair every other part of
//! the client keys on. A [`SeedDescriptor`] is what a caller hands in to
//! bootstrap discovery: either a literal `"host:port"` string or a record that
//! may ask for a DNS lookup first.

use scamandrios_common::{Result, ScamandriosError, DEFAULT_PORT};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// One cluster member, identified by host and port.
///
/// Serializes as its `"host:port"` display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct HostAddress {
    host: String,
    port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        Self { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parses `host`, `host:port`, `[v6]`, `[v6]:port` or a bare IPv6
    /// literal, using `default_port` when the text carries none.
    ///
    /// Text with more than one colon and no brackets is taken whole as an
    /// IPv6 host: `fe80::1:9160` is host `fe80::1:9160` on `default_port`.
    /// Bracket the host to give an IPv6 address a port.
    pub fn parse(input: &str, default_port: u16) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ScamandriosError::InvalidArgument(
                "host must not be empty".to_string(),
            ));
        }

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                ScamandriosError::InvalidArgument(format!("unterminated IPv6 literal: {}", input))
            })?;
            match tail {
                "" => (host, None),
                tail => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(ScamandriosError::InvalidArgument(format!(
                            "unexpected text after IPv6 literal: {}",
                            input
                        )))
                    }
                },
            }
        } else if input.matches(':').count() > 1 {
            // unbracketed IPv6 literal, nothing to split
            (input, None)
        } else {
            match input.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (input, None),
            }
        };

        if host.is_empty() {
            return Err(ScamandriosError::InvalidArgument(format!(
                "missing host in address: {}",
                input
            )));
        }

        let port = match port {
            Some(port) => parse_port(port)?,
            None => default_port,
        };

        Ok(Self::new(host, port))
    }
}

fn parse_port(text: &str) -> Result<u16> {
    text.trim()
        .parse::<u16>()
        .map_err(|_| ScamandriosError::InvalidArgument(format!("invalid port: {:?}", text)))
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for HostAddress {
    type Err = ScamandriosError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, DEFAULT_PORT)
    }
}

impl From<HostAddress> for String {
    fn from(addr: HostAddress) -> Self {
        addr.to_string()
    }
}

impl TryFrom<String> for HostAddress {
    type Error = ScamandriosError;

    fn try_from(text: String) -> Result<Self> {
        text.parse()
    }
}

impl From<SocketAddr> for HostAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Record form of a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedNode {
    pub host: String,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    /// Treat `host` as a DNS name and try every address it resolves to.
    #[serde(default, alias = "resolveSeed", alias = "lookupSeed", alias = "lookup_seed")]
    pub resolve_seed: bool,
}

impl SeedNode {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            resolve_seed: false,
        }
    }

    pub fn with_resolve_seed(mut self, resolve: bool) -> Self {
        self.resolve_seed = resolve;
        self
    }
}

/// Ports arrive as numbers or as numeric strings (`"9160"`).
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match Option::<PortRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortRepr::Number(port)) => Ok(Some(port)),
        Some(PortRepr::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(PortRepr::Text(text)) => text
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {:?}", text))),
    }
}

/// The address used to bootstrap discovery.
///
/// ```
/// use scamandrios_client::SeedDescriptor;
///
/// let literal: SeedDescriptor = "10.0.0.1:9160".into();
/// let record: SeedDescriptor =
///     serde_json::from_str(r#"{"host": "ring.local", "port": "9160", "lookupSeed": true}"#).unwrap();
///
/// assert!(!literal.resolves_via_dns());
/// assert!(record.resolves_via_dns());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedDescriptor {
    Address(String),
    Node(SeedNode),
}

impl SeedDescriptor {
    pub fn resolves_via_dns(&self) -> bool {
        matches!(self, SeedDescriptor::Node(node) if node.resolve_seed)
    }

    /// The seed as a single address, without any name lookup.
    pub fn to_host_address(&self) -> Result<HostAddress> {
        match self {
            SeedDescriptor::Address(text) => HostAddress::parse(text, DEFAULT_PORT),
            SeedDescriptor::Node(node) => {
                let host = node.host.trim();
                if host.is_empty() {
                    return Err(ScamandriosError::InvalidArgument(
                        "seed host required".to_string(),
                    ));
                }
                Ok(HostAddress::new(host, node.port.unwrap_or(DEFAULT_PORT)))
            }
        }
    }
}

impl From<&str> for SeedDescriptor {
    fn from(s: &str) -> Self {
        SeedDescriptor::Address(s.to_string())
    }
}

impl From<String> for SeedDescriptor {
    fn from(s: String) -> Self {
        SeedDescriptor::Address(s)
    }
}

impl From<HostAddress> for SeedDescriptor {
    fn from(addr: HostAddress) -> Self {
        SeedDescriptor::Node(SeedNode::new(addr.host, addr.port))
    }
}

impl From<SocketAddr> for SeedDescriptor {
    fn from(addr: SocketAddr) -> Self {
        HostAddress::from(addr).into()
    }
}

impl From<SeedNode> for SeedDescriptor {
    fn from(node: SeedNode) -> Self {
        SeedDescriptor::Node(node)
    }
}

impl fmt::Display for SeedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedDescriptor::Address(text) => f.write_str(text),
            SeedDescriptor::Node(node) => match node.port {
                Some(port) => write!(f, "{}", HostAddress::new(node.host.clone(), port)),
                None => f.write_str(&node.host),
            },
        }
    }
}
