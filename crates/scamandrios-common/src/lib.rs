//! Scamandrios Common Types and Transport
//!
//! This crate provides the protocol definitions and TCP transport shared by the
//! scamandrios client crates.
//!
//! # Overview
//!
//! - **Protocol Layer**: Request/Response types and the error taxonomy
//! - **Transport Layer**: TCP framing with JSON serialization
//!
//! # Architecture
//!
//! The wire protocol is deliberately small:
//! - **Transport**: TCP, one session per connection, calls serialized per session
//! - **Serialization**: JSON
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Max Message Size**: 100 MB
//!
//! # Example
//!
//! ```no_run
//! use scamandrios_common::{Request, Response};
//! use serde_json::json;
//!
//! let request = Request::new("describe_ring", json!({"keyspace": "metrics"}))
//!     .with_timeout(5000);
//!
//! let response = Response::success(request.id, json!(["10.0.0.1:9160"]));
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;

/// Port the cluster's RPC interface listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 9160;
