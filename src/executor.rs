//! The injected command-execution capability.
//!
//! The connection actor never depends on how commands are evaluated; it is
//! handed an [`Executor`] and calls its single `execute` operation for every
//! inbound request.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::connection::Connection;
use crate::error::Result;

/// Boxed future returned by executors and sandbox functions.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Produces one executor per connection.
///
/// Servers and pools spawn many connections; each gets its own executor
/// instance from this factory.
pub type ExecutorFactory = Arc<dyn Fn() -> Arc<dyn Executor> + Send + Sync>;

/// Context handed to the executor for each inbound request.
///
/// Carries the connection the request arrived on, so a handler can issue
/// nested calls back over the same connection while the original request is
/// still being served.
#[derive(Clone)]
pub struct ExecContext {
    connection: Arc<Connection>,
}

impl ExecContext {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// The connection the request being executed arrived on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

/// Interprets a request's command text and produces a value or a failure.
///
/// A failure here is surfaced to the remote caller as an error response; it
/// never tears down the connection.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, command: &str, ctx: ExecContext) -> BoxFuture<'static, Result<Value>>;
}
