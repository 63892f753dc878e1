//! The connection actor.
//!
//! One [`Connection`] owns one physical byte stream and acts as RPC client
//! and RPC server at the same time: local callers multiplex concurrent
//! outbound calls over it with [`call`](Connection::call), while inbound
//! requests are decoded, executed against the injected [`Executor`] and
//! answered over the same stream.
//!
//! # Lifecycle
//!
//! [`Connection::spawn`] splits the stream and starts two tasks: a read
//! loop feeding the framer, and a dedicated writer task serializing all
//! outbound packets. Each ingested batch of decoded bodies is dispatched on
//! its own task, so a slow request handler never stalls the read path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::codec::{Command, EXECUTION_ERRNO, REQUEST_CTYPE, RESPONSE_CTYPE};
use crate::correlation::CorrelationTable;
use crate::error::{Result, RpcError};
use crate::executor::{ExecContext, Executor};
use crate::protocol::{encode_packet, PacketFramer};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Default bound on concurrently executing inbound requests.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Called exactly once when the connection stops: EOF or read error from the
/// peer, or a local [`close`](Connection::close). The error is `None` for a
/// clean EOF or local close.
pub type CloseHook = Box<dyn FnOnce(Option<std::io::Error>) + Send>;

/// Configuration for a connection actor.
pub struct ConnectionOptions {
    max_in_flight: usize,
    on_close: Option<CloseHook>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            on_close: None,
        }
    }

    /// Bound the number of concurrently executing inbound requests.
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// Register a hook fired once when the connection stops.
    pub fn on_close(mut self, hook: CloseHook) -> Self {
        self.on_close = Some(hook);
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A running connection actor.
pub struct Connection {
    // Handle to ourselves for spawning dispatch tasks and building
    // execution contexts; upgrading fails only during teardown.
    self_ref: Weak<Connection>,
    framer: PacketFramer,
    table: CorrelationTable,
    writer: WriterHandle,
    executor: Arc<dyn Executor>,
    in_flight: Semaphore,
    closed: AtomicBool,
    close_hook: Mutex<Option<CloseHook>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Connection {
    /// Split `stream` and start the actor.
    ///
    /// The stream is any async byte pipe: a TCP socket in production, an
    /// in-memory duplex in tests.
    pub fn spawn<S>(stream: S, executor: Arc<dyn Executor>, options: ConnectionOptions) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half);

        let conn = Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            framer: PacketFramer::new(),
            table: CorrelationTable::new(),
            writer,
            executor,
            in_flight: Semaphore::new(options.max_in_flight),
            closed: AtomicBool::new(false),
            close_hook: Mutex::new(options.on_close),
            read_task: Mutex::new(None),
            writer_task: Mutex::new(Some(writer_task)),
        });

        let reader_conn = Arc::clone(&conn);
        let task = tokio::spawn(async move {
            let err = read_loop(read_half, &reader_conn).await;
            reader_conn.finish_close(err);
        });
        *lock(&conn.read_task) = Some(task);

        conn
    }

    /// Issue a call over this connection and await its result.
    ///
    /// Generates a fresh correlation id, registers a pending call, sends the
    /// request and blocks until the matching response arrives or `timeout`
    /// elapses, whichever is first. On timeout the pending entry is evicted,
    /// so a response arriving later is dropped by the dispatch path.
    pub async fn call(&self, command: &str, timeout: Duration) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let request = Command::request(&id, command);

        let rx = self.table.register(&id);
        if let Err(err) = self.send_command(&request).await {
            self.table.evict(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Result slot dropped without a reply: the actor is being torn
            // down underneath us.
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                self.table.evict(&id);
                Err(RpcError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Feed raw inbound bytes from the transport.
    ///
    /// Complete packet bodies are dispatched on a separate task per batch;
    /// the transport's read path never blocks on command execution.
    pub fn on_bytes(&self, chunk: &[u8]) {
        let batch = self.framer.ingest(chunk);
        if batch.is_empty() {
            return;
        }
        let Some(conn) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            conn.dispatch_batch(batch).await;
        });
    }

    /// Close the connection.
    ///
    /// Stops the read loop and the writer task and fires the close hook.
    /// Pending calls are not proactively failed; they resolve through their
    /// own timeouts.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = lock(&self.read_task).take() {
            task.abort();
        }
        if let Some(task) = lock(&self.writer_task).take() {
            task.abort();
        }
        self.finish_close(None);
    }

    /// Whether [`close`](Connection::close) has been requested.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of outbound calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.table.pending_calls()
    }

    async fn dispatch_batch(self: Arc<Self>, batch: Vec<Bytes>) {
        for body in batch {
            let cmd = match Command::decode(&body) {
                Ok(cmd) => cmd,
                Err(err) => {
                    // The rest of this stream position cannot be trusted;
                    // drop everything buffered and start clean.
                    tracing::warn!(%err, "undecodable packet body, resetting framer");
                    self.framer.reset();
                    break;
                }
            };

            if cmd.ctype == REQUEST_CTYPE {
                self.handle_request(cmd).await;
            } else if cmd.ctype == RESPONSE_CTYPE {
                self.handle_response(cmd);
            } else {
                tracing::warn!(ctype = %cmd.ctype, id = %cmd.id, "unknown command type, dropping");
            }
        }
    }

    /// Execute an inbound request and answer it over the same connection.
    async fn handle_request(&self, cmd: Command) {
        let _permit = match self.in_flight.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let outcome = match cmd.data.value.as_str() {
            Some(text) => match self.self_ref.upgrade() {
                Some(conn) => self.executor.execute(text, ExecContext::new(conn)).await,
                None => return,
            },
            None => Err(RpcError::Execution(
                "expected string command text in request".to_string(),
            )),
        };

        let response = match outcome {
            Ok(value) => Command::ok_response(&cmd.id, value),
            Err(err) => Command::err_response(&cmd.id, EXECUTION_ERRNO, err.to_string()),
        };

        if let Err(err) = self.send_command(&response).await {
            tracing::error!(%err, id = %cmd.id, "failed to send response");
        }
    }

    /// Resolve an inbound response against the correlation table.
    fn handle_response(&self, cmd: Command) {
        let reply = if cmd.data.errno == 0 {
            Ok(cmd.data.value)
        } else {
            Err(RpcError::Remote {
                errno: cmd.data.errno,
                message: cmd.data.err_msg,
            })
        };

        if !self.table.complete(&cmd.id, reply) {
            // Expected under timeout races and for foreign ids; never fatal.
            tracing::warn!(id = %cmd.id, "response for unknown call id, dropping");
        }
    }

    async fn send_command(&self, cmd: &Command) -> Result<()> {
        // The writer task is aborted asynchronously; refuse new sends as
        // soon as close is requested rather than racing the abort.
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ConnectionClosed);
        }
        let text = cmd.encode()?;
        self.writer.send(encode_packet(text.as_bytes())).await
    }

    /// Fire the close hook exactly once.
    fn finish_close(&self, err: Option<std::io::Error>) {
        // Take the hook before invoking it: the hook may re-enter close()
        // (pool break handling does), and the lock must not be held then.
        let hook = lock(&self.close_hook).take();
        if let Some(hook) = hook {
            hook(err);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Pump the read half into the framer until EOF or error.
async fn read_loop<R>(mut reader: R, conn: &Connection) -> Option<std::io::Error>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return None,
            Ok(n) => conn.on_bytes(&buf[..n]),
            Err(err) => return Some(err),
        }
    }
}
