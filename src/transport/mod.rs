//! Transport module - the concrete socket collaborator.

mod tcp;

pub use tcp::{connect, dial, RpcServer};
