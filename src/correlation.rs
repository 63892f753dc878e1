//! Pending-call bookkeeping for one connection.
//!
//! Maps each in-flight correlation id to a single-delivery result slot. The
//! table is scoped to one connection, never process-wide, which avoids
//! cross-connection id collisions and simplifies teardown.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::RpcError;

/// Outcome delivered to a pending call: the response value, or the remote
/// (or local) failure.
pub type CallReply = Result<Value, RpcError>;

/// Concurrent map from correlation id to a single-delivery result slot.
///
/// Entries are added by the call-issuing path and removed by exactly one of
/// the response path or the timeout path. Removal happens under the lock, so
/// the loser of that race observes the id already gone and does nothing: no
/// double delivery, and a late completion into a dropped receiver is a
/// no-op rather than a blocked writer.
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, oneshot::Sender<CallReply>>>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh id and return the receiving end of its result slot.
    ///
    /// Ids are caller-generated unique tokens; the table never holds two
    /// entries with the same id concurrently.
    pub fn register(&self, id: &str) -> oneshot::Receiver<CallReply> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id.to_string(), tx);
        rx
    }

    /// Deliver a reply to the pending call with this id.
    ///
    /// Returns `false` when the id is unknown: already evicted by a timeout,
    /// or never issued here. The caller logs and drops such replies.
    pub fn complete(&self, id: &str, reply: CallReply) -> bool {
        let Some(tx) = self.lock().remove(id) else {
            return false;
        };
        // The receiver may already be gone if its timeout elapsed between
        // our remove and this send; a late send is simply discarded.
        let _ = tx.send(reply);
        true
    }

    /// Drop the pending entry without delivering (timeout path).
    ///
    /// Returns `false` when the response path already won the race.
    pub fn evict(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<CallReply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_complete_delivers_reply() {
        let table = CorrelationTable::new();
        let rx = table.register("a");

        assert!(table.complete("a", Ok(json!(42))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(42));
        assert_eq!(table.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_complete_unknown_id_returns_false() {
        let table = CorrelationTable::new();
        assert!(!table.complete("never-issued", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_second_complete_loses_the_race() {
        let table = CorrelationTable::new();
        let _rx = table.register("a");

        assert!(table.complete("a", Ok(json!(1))));
        assert!(!table.complete("a", Ok(json!(2))));
    }

    #[tokio::test]
    async fn test_evict_then_complete_is_dropped() {
        let table = CorrelationTable::new();
        let _rx = table.register("a");

        assert!(table.evict("a"));
        assert!(!table.evict("a"));
        assert!(!table.complete("a", Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_late_completion_after_receiver_dropped() {
        let table = CorrelationTable::new();
        let rx = table.register("a");
        drop(rx);

        // The entry is still present; delivering must not panic or block.
        assert!(table.complete("a", Ok(Value::Null)));
        assert_eq!(table.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_independent() {
        let table = CorrelationTable::new();
        let rx_a = table.register("a");
        let rx_b = table.register("b");

        assert!(table.complete("b", Ok(json!("b-result"))));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!("b-result"));

        assert_eq!(table.pending_calls(), 1);
        assert!(table.evict("a"));
        drop(rx_a);
    }
}
