//! # purecall
//!
//! Symmetric RPC transport: every connection acts as an RPC client and an
//! RPC server at the same time. Either side may issue a call and have the
//! matching reply correlated back to it, or time the call out.
//!
//! ## Architecture
//!
//! - **Protocol** (`protocol`): length-delimited packet framing over a raw
//!   byte stream.
//! - **Codec** (`codec`): the JSON command envelope carried in each packet.
//! - **Connection actor** (`Connection`): multiplexes concurrent outbound
//!   calls and concurrent inbound requests over one physical connection.
//! - **Pool** (`pool`): fixed-size pool of connection actors with
//!   event-driven replacement, for client fan-out.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use purecall::{transport, ConnectionOptions, Sandbox};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> purecall::Result<()> {
//!     let server = transport::RpcServer::bind(
//!         "127.0.0.1:4231",
//!         Arc::new(|| {
//!             Arc::new(Sandbox::new().define("add", |args, _ctx| async move {
//!                 let sum = args.iter().filter_map(|v| v.as_i64()).sum::<i64>();
//!                 Ok(json!(sum))
//!             }))
//!         }),
//!     )
//!     .await?;
//!
//!     let client = transport::connect(
//!         "127.0.0.1",
//!         4231,
//!         Arc::new(Sandbox::new()),
//!         ConnectionOptions::default(),
//!     )
//!     .await?;
//!
//!     let sum = client.call("[\"add\", 1, 2]", Duration::from_secs(1)).await?;
//!     assert_eq!(sum, json!(3));
//!
//!     client.close();
//!     server.shutdown();
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod correlation;
pub mod error;
pub mod executor;
pub mod pool;
pub mod protocol;
pub mod sandbox;
pub mod transport;

mod connection;
mod writer;

pub use connection::{CloseHook, Connection, ConnectionOptions, DEFAULT_MAX_IN_FLIGHT};
pub use error::{Result, RpcError};
pub use executor::{ExecContext, Executor, ExecutorFactory};
pub use sandbox::Sandbox;
