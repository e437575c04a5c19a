use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::error::{Result, ScamandriosError};
use crate::protocol::{Request, Response};
use crate::transport::codec::JsonCodec;
use crate::transport::tcp::TcpTransport;

/// Async TCP server speaking the framed JSON protocol.
///
/// Each accepted connection gets its own task and processes requests one
/// after another until the peer hangs up. Used by node stand-ins in tests and
/// local tooling.
pub struct TcpServer {
    listener: TcpListener,
}

/// Handle to a server started with [`TcpServer::spawn`].
///
/// Dropping the handle leaves the server running; call
/// [`shutdown`](Self::shutdown) to stop accepting and drop every open session.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops the accept loop and closes all sessions.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    pub async fn new(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            ScamandriosError::Connection(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        Ok(Self { listener })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| ScamandriosError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Runs the accept loop on the current task until an accept fails.
    pub async fn run_with_handler<F, Fut>(&self, handler: F) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let (_tx, rx) = watch::channel(false);
        self.accept_loop(Arc::new(handler), rx).await
    }

    /// Runs the accept loop on a background task.
    pub fn spawn<F, Fut>(self, handler: F) -> Result<ServerHandle>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handler = Arc::new(handler);

        let task = tokio::spawn(async move {
            if let Err(e) = self.accept_loop(handler, shutdown_rx).await {
                warn!(%addr, error = %e, "server stopped");
            }
        });

        Ok(ServerHandle {
            addr,
            shutdown_tx,
            task,
        })
    }

    async fn accept_loop<F, Fut>(
        &self,
        handler: Arc<F>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        loop {
            let (stream, peer_addr) = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => return Ok(()),
                accepted = self.listener.accept() => accepted.map_err(|e| {
                    ScamandriosError::Connection(format!("Failed to accept connection: {}", e))
                })?,
            };

            debug!(%peer_addr, "session opened");

            let handler = handler.clone();
            let mut session_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = session_shutdown.changed() => {
                        debug!(%peer_addr, "session dropped by shutdown");
                    }
                    result = handle_connection(stream, handler) => {
                        if let Err(e) = result {
                            debug!(%peer_addr, error = %e, "session ended with error");
                        }
                    }
                }
            });
        }
    }
}

/// Processes requests on one session until the peer closes it.
async fn handle_connection<F, Fut>(mut stream: TcpStream, handler: Arc<F>) -> Result<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    loop {
        let frame = match TcpTransport::receive_message(&mut stream).await {
            Ok(frame) => frame,
            // peer went away between requests
            Err(ScamandriosError::Connection(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let request = match JsonCodec::decode_request(&frame) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to decode request");
                send_response(&mut stream, &Response::error(0, e.to_string())).await?;
                continue;
            }
        };

        let request_id = request.id;
        let response = match handler(request).await {
            Ok(resp) => resp,
            Err(e) => Response::error(request_id, e.to_string()),
        };

        send_response(&mut stream, &response).await?;
    }
}

async fn send_response(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let encoded = JsonCodec::encode_response(response)?;
    TcpTransport::send_message(stream, &encoded).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tcp_server_local_addr() {
        let server = TcpServer::new("127.0.0.1:0").await.unwrap();
        assert!(server.local_addr().is_ok());
    }

    #[tokio::test]
    async fn test_spawned_server_answers_and_shuts_down() {
        let server = TcpServer::new("127.0.0.1:0").await.unwrap();
        let handle = server
            .spawn(|req: Request| async move { Ok(Response::success(req.id, req.args)) })
            .unwrap();
        let addr = handle.local_addr().to_string();

        let transport = TcpTransport::new();
        let mut stream = transport.connect(&addr).await.unwrap();
        let request = Request::new("echo", json!({"k": "v"}));
        let response = transport.send_request(&mut stream, &request).await.unwrap();
        assert_eq!(response.result, Some(json!({"k": "v"})));

        handle.shutdown().await;

        // open session was dropped along with the listener
        let request = Request::new("echo", json!({}));
        let err = transport.send_request(&mut stream, &request).await.unwrap_err();
        assert!(err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_response() {
        let server = TcpServer::new("127.0.0.1:0").await.unwrap();
        let handle = server
            .spawn(|_req: Request| async move {
                Err(ScamandriosError::Application("no such column family".into()))
            })
            .unwrap();

        let transport = TcpTransport::new();
        let mut stream = transport.connect(&handle.local_addr().to_string()).await.unwrap();
        let request = Request::new("get", json!({}));
        let response = transport.send_request(&mut stream, &request).await.unwrap();

        assert!(!response.success);
        assert_eq!(response.id, request.id);
        assert!(response.error.unwrap().contains("no such column family"));

        handle.shutdown().await;
    }
}
