use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::error::{Result, ScamandriosError};
use crate::protocol::{Request, Response};
use crate::transport::codec::JsonCodec;

/// Default timeout for establishing a TCP session (5 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest frame either side accepts (100 MB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Async TCP transport.
///
/// Messages are sent with a 4-byte length prefix (big-endian u32) followed
/// by the JSON-encoded data:
///
/// ```text
/// [4-byte length] [JSON data]
/// ```
///
/// A stream carries one call at a time. Responses whose id does not match the
/// outstanding request belong to calls the caller already gave up on and are
/// skipped.
///
/// # Example
///
/// ```no_run
/// use scamandrios_common::transport::TcpTransport;
/// use scamandrios_common::protocol::Request;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::new();
/// let mut stream = transport.connect("127.0.0.1:9160").await?;
///
/// let request = Request::new("describe_ring", json!({}));
/// let response = transport.send_request(&mut stream, &request).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Connects to a remote endpoint.
    ///
    /// The address may resolve to several socket addresses; each is tried in
    /// turn until one accepts. The whole attempt, name lookup included, is
    /// bounded by the connect timeout.
    ///
    /// # Errors
    ///
    /// - [`ScamandriosError::Timeout`] if the deadline passes
    /// - [`ScamandriosError::Connection`] if the name does not resolve or
    ///   every resolved address refuses
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let timeout_ms = self.connect_timeout.as_millis() as u64;
        tokio::time::timeout(self.connect_timeout, self.connect_inner(addr))
            .await
            .map_err(|_| ScamandriosError::Timeout(timeout_ms))?
    }

    async fn connect_inner(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| ScamandriosError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect(socket_addr).await {
                Ok(stream) => {
                    // best effort, small request frames
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(%socket_addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(ScamandriosError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Sends a request and waits for the response carrying the same id.
    pub async fn send_request(&self, stream: &mut TcpStream, request: &Request) -> Result<Response> {
        let encoded = JsonCodec::encode_request(request)?;
        Self::send_message(stream, &encoded).await?;

        loop {
            let response_data = Self::receive_message(stream).await?;
            let response = JsonCodec::decode_response(&response_data)?;

            if response.id == request.id {
                return Ok(response);
            }

            debug!(
                expected = request.id,
                received = response.id,
                "discarding response for an abandoned request"
            );
        }
    }

    /// Writes one frame.
    pub async fn send_message<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ScamandriosError::InvalidArgument(format!(
                "Message too large: {} bytes (max {} bytes)",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        let len = data.len() as u32;

        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Reads one frame.
    ///
    /// # Errors
    ///
    /// - [`ScamandriosError::Connection`] if the peer closed or reset the session
    /// - [`ScamandriosError::Protocol`] if the announced length exceeds
    ///   [`MAX_MESSAGE_SIZE`]
    pub async fn receive_message<R>(stream: &mut R) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| map_io_error(e, "reading length prefix"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(ScamandriosError::Protocol(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading data"))?;

        Ok(buf)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Lost sessions become `Connection`, everything else stays `Io`.
fn map_io_error(err: std::io::Error, context: &str) -> ScamandriosError {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => {
            ScamandriosError::Connection(format!("{}: connection lost", context))
        }
        _ => ScamandriosError::Io(err),
    }
}
