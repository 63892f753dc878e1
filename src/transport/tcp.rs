//! TCP transport: dialing and the server accept loop.
//!
//! The connection actor itself is transport-agnostic (any `AsyncRead +
//! AsyncWrite` works); this module supplies the production collaborator.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionOptions};
use crate::error::{Result, RpcError};
use crate::executor::{Executor, ExecutorFactory};

/// Dial a remote endpoint.
///
/// Resolves `host:port` and tries each candidate address until one
/// connects.
pub async fn dial(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");

    let mut last_err = None;
    for candidate in lookup_host(&addr).await? {
        match TcpStream::connect(candidate).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }

    Err(match last_err {
        Some(err) => RpcError::Io(err),
        None => RpcError::Resolve(format!("no addresses for {addr}")),
    })
}

/// Dial and wrap the socket in a connection actor.
pub async fn connect(
    host: &str,
    port: u16,
    executor: Arc<dyn Executor>,
    options: ConnectionOptions,
) -> Result<Arc<Connection>> {
    let stream = dial(host, port).await?;
    Ok(Connection::spawn(stream, executor, options))
}

/// A listening RPC server.
///
/// Every accepted socket becomes its own connection actor executing
/// requests with an executor from the factory. Connections are symmetric:
/// server-side code can call back to clients through the execution context.
pub struct RpcServer {
    local_addr: SocketAddr,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    /// Bind `addr` (e.g. `"127.0.0.1:4231"`, port 0 for ephemeral) and
    /// start accepting.
    pub async fn bind(addr: &str, executors: ExecutorFactory) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let accept_task = tokio::spawn(accept_loop(listener, executors));

        Ok(Self {
            local_addr,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// The bound address, useful with ephemeral ports.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections.
    ///
    /// Already-established connections keep running until their peers
    /// disconnect.
    pub fn shutdown(&self) {
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(listener: TcpListener, executors: ExecutorFactory) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(err) = stream.set_nodelay(true) {
                    tracing::warn!(%peer, %err, "failed to set nodelay");
                }
                tracing::debug!(%peer, "accepted connection");
                // The read task keeps the actor alive; the handle itself is
                // not tracked here.
                Connection::spawn(stream, executors(), ConnectionOptions::default());
            }
            Err(err) => {
                tracing::warn!(%err, "accept failed");
            }
        }
    }
}
