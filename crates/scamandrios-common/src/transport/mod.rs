//! Transport Layer
//!
//! TCP transport and codec for sending and receiving RPC messages.
//!
//! # Components
//!
//! - **[`JsonCodec`]**: Encode/decode protocol messages to JSON
//! - **[`TcpTransport`]**: Async client side framing
//! - **[`TcpServer`]**: Async server side framing, used by node stand-ins
//!
//! # Message Size Limits
//!
//! Both sides enforce a maximum message size of 100 MB.
//!
//! # Example
//!
//! ```no_run
//! use scamandrios_common::transport::TcpTransport;
//! use scamandrios_common::protocol::Request;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TcpTransport::new();
//! let mut stream = transport.connect("127.0.0.1:9160").await?;
//!
//! let request = Request::new("describe_ring", json!({}));
//! let response = transport.send_request(&mut stream, &request).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod tcp;
pub mod tcp_server;

pub use codec::JsonCodec;
pub use tcp::{TcpTransport, MAX_MESSAGE_SIZE};
pub use tcp_server::{ServerHandle, TcpServer};
