//! Named-function sandbox, the stock [`Executor`] implementation.
//!
//! Command text is a JSON array whose first element names a registered
//! function and whose remaining elements are its arguments:
//! `["add", 1, 2]`. Functions are async and receive the execution context,
//! so they can call back over the connection that issued the request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, RpcError};
use crate::executor::{BoxFuture, ExecContext, Executor};

/// A registered sandbox function.
pub type BoxFunc =
    Arc<dyn Fn(Vec<Value>, ExecContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Registry of named async functions.
///
/// An empty sandbox rejects every command, which is the right executor for
/// pure-client connections.
pub struct Sandbox {
    funcs: HashMap<String, BoxFunc>,
}

impl Sandbox {
    /// Create an empty sandbox.
    pub fn new() -> Self {
        Self {
            funcs: HashMap::new(),
        }
    }

    /// Register a named function, consuming and returning the sandbox for
    /// chained definitions.
    pub fn define<F, Fut>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>, ExecContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.funcs
            .insert(name.to_string(), Arc::new(move |args, ctx| Box::pin(f(args, ctx))));
        self
    }

    /// Look up the function and arguments named by a command text.
    fn resolve(&self, command: &str) -> Result<(BoxFunc, Vec<Value>)> {
        let parsed: Vec<Value> = serde_json::from_str(command)
            .map_err(|e| RpcError::Execution(format!("invalid command text: {e}")))?;

        let mut items = parsed.into_iter();
        let name = match items.next() {
            Some(Value::String(name)) => name,
            _ => {
                return Err(RpcError::Execution(
                    "command must start with a function name".to_string(),
                ))
            }
        };

        let func = self
            .funcs
            .get(&name)
            .cloned()
            .ok_or_else(|| RpcError::Execution(format!("undefined command: {name}")))?;

        Ok((func, items.collect()))
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for Sandbox {
    fn execute(&self, command: &str, ctx: ExecContext) -> BoxFuture<'static, Result<Value>> {
        match self.resolve(command) {
            Ok((func, args)) => func(args, ctx),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}
