//! Coordination HTTP server
//!
//! Runs in the coordinator process only. The listener is bound before
//! [`CoordinationServer::start`] returns, so any client (including the
//! coordinator's own) can start polling the readiness probe right away.

pub mod http;
pub mod routes;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CoordError;
use crate::registry::Registries;

pub use http::{HttpError, Method, Request, Response};
pub use routes::API_PREFIX;

/// Time a client gets to send a complete request
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running coordination server
#[derive(Debug)]
pub struct CoordinationServer {
    local_addr: SocketAddr,
    registries: Registries,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CoordinationServer {
    /// Bind `bind_addr` and start serving `registries`
    ///
    /// Pass port 0 to let the OS pick a free port; [`local_addr`](Self::local_addr)
    /// reports the one actually bound.
    pub async fn start(bind_addr: &str, registries: Registries) -> Result<Self, CoordError> {
        Self::start_with_read_timeout(bind_addr, registries, DEFAULT_READ_TIMEOUT).await
    }

    /// Like [`start`](Self::start), dropping connections that take longer than
    /// `read_timeout` to deliver a request
    pub async fn start_with_read_timeout(
        bind_addr: &str,
        registries: Registries,
        read_timeout: Duration,
    ) -> Result<Self, CoordError> {
        debug!(%bind_addr, ?read_timeout, "CoordinationServer::start_with_read_timeout: called");
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, registries.clone(), read_timeout, shutdown_rx));

        info!(%local_addr, expected_agents = registries.membership.expected(), "Coordination server listening");
        Ok(Self {
            local_addr,
            registries,
            shutdown_tx,
            task,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL clients should use to reach this server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// The state this server is serving
    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Stop accepting connections and wait for the accept loop to exit
    pub async fn shutdown(self) {
        debug!("CoordinationServer::shutdown: called");
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Coordination server task ended abnormally");
        }
        info!(local_addr = %self.local_addr, "Coordination server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    registries: Registries,
    read_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accept_loop: connection accepted");
                        let registries = registries.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, &registries, read_timeout).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                debug!("accept_loop: shutdown requested");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, registries: &Registries, read_timeout: Duration) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let read = match tokio::time::timeout(read_timeout, http::read_request(&mut reader)).await {
        Ok(read) => read,
        Err(_) => {
            debug!(?read_timeout, "handle_connection: request not received in time, dropping connection");
            return;
        }
    };

    let response = match read {
        Ok(request) => routes::dispatch(registries, &request),
        Err(e) => {
            debug!(error = %e, "handle_connection: failed to read request");
            match http::error_response(&e) {
                Some(response) => response,
                None => return,
            }
        }
    };

    if let Err(e) = http::write_response(&mut write_half, &response).await {
        debug!(error = %e, "handle_connection: failed to write response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn raw_exchange(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_server_answers_readiness_probe() {
        let server = CoordinationServer::start("127.0.0.1:0", Registries::new(0)).await.unwrap();

        let out = raw_exchange(
            server.local_addr(),
            "GET /api/Data/ReadinessProbe HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_rejects_garbage() {
        let server = CoordinationServer::start("127.0.0.1:0", Registries::new(0)).await.unwrap();

        let out = raw_exchange(server.local_addr(), "NONSENSE\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_connection_is_dropped() {
        let server = CoordinationServer::start_with_read_timeout(
            "127.0.0.1:0",
            Registries::new(0),
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        // Half a request head, then silence
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream.write_all(b"GET /api/Data/ReadinessProbe HTTP/1.1\r\n").await.unwrap();

        let mut out = String::new();
        let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut out)).await;
        assert!(closed.is_ok(), "Server should close an idle connection");
        assert!(out.is_empty());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_chunked_request_is_not_acknowledged() {
        let server = CoordinationServer::start("127.0.0.1:0", Registries::new(0)).await.unwrap();

        let out = raw_exchange(
            server.local_addr(),
            concat!(
                "POST /api/Data/SetCacheByName?name=k HTTP/1.1\r\n",
                "Transfer-Encoding: chunked\r\n\r\n",
                "5\r\nhello\r\n0\r\n\r\n",
            ),
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 501 Not Implemented\r\n"));
        assert_eq!(server.registries().store.get("k"), None);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_leading_crlf_still_answered() {
        let server = CoordinationServer::start("127.0.0.1:0", Registries::new(0)).await.unwrap();

        let out = raw_exchange(
            server.local_addr(),
            "\r\nGET /api/Data/ReadinessProbe HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_io_error() {
        let first = CoordinationServer::start("127.0.0.1:0", Registries::new(0)).await.unwrap();
        let taken = first.local_addr().to_string();

        let err = CoordinationServer::start(&taken, Registries::new(0)).await.unwrap_err();
        assert!(matches!(err, CoordError::Io(_)));

        first.shutdown().await;
    }
}
