//! Pooled-connection lifecycle management for client fan-out.
//!
//! A [`Pool`] keeps a fixed number of slots filled with items built by a
//! pluggable async constructor. Each slot is a small state machine: vacant
//! (waiting to be constructed, possibly delayed by a failed attempt),
//! constructing, or healthy. A transport break reported through the broken
//! hook immediately vacates the slot and triggers asynchronous replacement;
//! a failed construction is retried no sooner than the configured delay.
//!
//! [`connect_pool`] wires the pieces together for the common case: resolve
//! an address, dial, wrap the socket in a connection actor and feed the
//! actor's close notification back into the pool as the broken hook.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionOptions};
use crate::error::{Result, RpcError};
use crate::executor::{BoxFuture, ExecutorFactory};
use crate::transport;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Target number of pooled items.
    pub size: usize,
    /// Spacing between maintenance passes that refill vacant slots.
    pub recheck_interval: Duration,
    /// Minimum delay before retrying a failed construction.
    pub retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 8,
            recheck_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Hook handed to the constructor; the item invokes it once when its
/// underlying transport breaks.
pub type BrokenHook = Box<dyn FnOnce() + Send>;

/// Async constructor for one pool item.
pub type Constructor<T> =
    Arc<dyn Fn(BrokenHook) -> BoxFuture<'static, Result<PoolItem<T>>> + Send + Sync>;

/// One managed item plus its release action.
pub struct PoolItem<T> {
    item: T,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> PoolItem<T> {
    /// Wrap an item with the action that tears it down on discard.
    pub fn new(item: T, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            item,
            release: Some(Box::new(release)),
        }
    }

    fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

enum Slot<T> {
    /// Nothing constructed; refill no sooner than `not_before`.
    Vacant { not_before: Instant },
    /// A construction attempt is in flight.
    Constructing,
    /// A usable item. `generation` ties late broken notifications to the
    /// construction that installed the item.
    Healthy { item: PoolItem<T>, generation: u64 },
}

struct PoolInner<T> {
    slots: Vec<Slot<T>>,
    cursor: usize,
    next_generation: u64,
    shut: bool,
}

struct PoolShared<T> {
    inner: Mutex<PoolInner<T>>,
    constructor: Constructor<T>,
    config: PoolConfig,
}

/// Fixed-size pool of reusable items with event-driven replacement.
pub struct Pool<T: Clone> {
    shared: Arc<PoolShared<T>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> Pool<T> {
    /// Create a pool and start filling it in the background.
    pub fn new(constructor: Constructor<T>, config: PoolConfig) -> Self {
        let now = Instant::now();
        let shared = Arc::new(PoolShared {
            inner: Mutex::new(PoolInner {
                slots: (0..config.size)
                    .map(|_| Slot::Vacant { not_before: now })
                    .collect(),
                cursor: 0,
                next_generation: 0,
                shut: false,
            }),
            constructor,
            config,
        });

        let maintenance_shared = Arc::clone(&shared);
        let maintenance = tokio::spawn(async move {
            loop {
                fill_vacant_slots(&maintenance_shared).await;
                tokio::time::sleep(maintenance_shared.config.recheck_interval).await;
            }
        });

        Self {
            shared,
            maintenance: Mutex::new(Some(maintenance)),
        }
    }

    /// Hand out any currently healthy item.
    ///
    /// Round-robins across healthy slots; never blocks and never returns a
    /// broken item. Fails with [`RpcError::PoolExhausted`] when nothing is
    /// healthy right now (or the pool is shut down).
    pub fn get(&self) -> Result<T> {
        let mut inner = lock(&self.shared.inner);
        if inner.shut {
            return Err(RpcError::PoolExhausted);
        }

        let len = inner.slots.len();
        for offset in 0..len {
            let idx = (inner.cursor + offset) % len;
            if let Slot::Healthy { item, .. } = &inner.slots[idx] {
                let handle = item.item.clone();
                inner.cursor = (idx + 1) % len;
                return Ok(handle);
            }
        }
        Err(RpcError::PoolExhausted)
    }

    /// Number of currently healthy items.
    pub fn healthy(&self) -> usize {
        lock(&self.shared.inner)
            .slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Healthy { .. }))
            .count()
    }

    /// Release every item and halt replacement attempts.
    pub fn shutdown(&self) {
        if let Some(task) = lock(&self.maintenance).take() {
            task.abort();
        }

        let drained: Vec<Slot<T>> = {
            let mut inner = lock(&self.shared.inner);
            inner.shut = true;
            inner.slots.drain(..).collect()
        };
        for slot in drained {
            if let Slot::Healthy { item, .. } = slot {
                item.release();
            }
        }
    }
}

impl<T: Clone> Drop for Pool<T> {
    fn drop(&mut self) {
        // Items are only released by an explicit shutdown; the maintenance
        // task must not outlive the pool handle.
        if let Some(task) = lock(&self.maintenance).take() {
            task.abort();
        }
    }
}

/// Construct items for every vacant slot whose retry delay has passed.
async fn fill_vacant_slots<T: Clone + Send + 'static>(shared: &Arc<PoolShared<T>>) {
    let now = Instant::now();
    let due: Vec<(usize, u64)> = {
        let mut guard = lock(&shared.inner);
        if guard.shut {
            return;
        }
        let inner = &mut *guard;
        let mut due = Vec::new();
        for (idx, slot) in inner.slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Vacant { not_before } if *not_before <= now) {
                *slot = Slot::Constructing;
                due.push((idx, inner.next_generation));
                inner.next_generation += 1;
            }
        }
        due
    };

    for (idx, generation) in due {
        construct_into_slot(shared, idx, generation).await;
    }
}

/// Run one construction attempt for a slot already marked `Constructing`.
async fn construct_into_slot<T: Clone + Send + 'static>(
    shared: &Arc<PoolShared<T>>,
    idx: usize,
    generation: u64,
) {
    let hook_shared = Arc::downgrade(shared);
    let broken: BrokenHook = Box::new(move || {
        if let Some(shared) = hook_shared.upgrade() {
            mark_broken(&shared, idx, generation);
        }
    });

    match (shared.constructor)(broken).await {
        Ok(item) => {
            let mut inner = lock(&shared.inner);
            if inner.shut {
                drop(inner);
                item.release();
                return;
            }
            inner.slots[idx] = Slot::Healthy { item, generation };
        }
        Err(err) => {
            tracing::warn!(slot = idx, %err, "pool item construction failed");
            let mut inner = lock(&shared.inner);
            if !inner.shut {
                inner.slots[idx] = Slot::Vacant {
                    not_before: Instant::now() + shared.config.retry_delay,
                };
            }
        }
    }
}

/// Transport-break notification: vacate the slot and replace asynchronously.
fn mark_broken<T: Clone + Send + 'static>(shared: &Arc<PoolShared<T>>, idx: usize, generation: u64) {
    let stale = {
        let mut inner = lock(&shared.inner);
        if inner.shut {
            return;
        }
        match &inner.slots[idx] {
            // Only the construction that installed this item may vacate it;
            // a late notification for a replaced item is ignored.
            Slot::Healthy { generation: current, .. } if *current == generation => {
                let old = std::mem::replace(
                    &mut inner.slots[idx],
                    Slot::Vacant {
                        not_before: Instant::now(),
                    },
                );
                Some(old)
            }
            _ => None,
        }
    };

    let Some(Slot::Healthy { item, .. }) = stale else {
        return;
    };
    tracing::info!(slot = idx, "pool item broken, scheduling replacement");
    item.release();

    let refill = Arc::clone(shared);
    tokio::spawn(async move {
        fill_vacant_slots(&refill).await;
    });
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Resolves the address for the next connection attempt; may be dynamic per
/// call (service discovery, failover lists).
pub type AddressResolver = Arc<dyn Fn() -> BoxFuture<'static, Result<(String, u16)>> + Send + Sync>;

/// Build a pool of connection actors against `resolver`.
///
/// Every constructed connection logs its lifecycle and reports transport
/// breaks back into the pool, which discards the item and lazily replaces
/// it.
pub fn connect_pool(
    resolver: AddressResolver,
    executors: ExecutorFactory,
    config: PoolConfig,
) -> Pool<Arc<Connection>> {
    let constructor: Constructor<Arc<Connection>> = Arc::new(move |broken| {
        let resolver = Arc::clone(&resolver);
        let executors = Arc::clone(&executors);
        Box::pin(async move {
            let (host, port) = resolver().await?;

            let stream = match transport::dial(&host, port).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%host, port, %err, "connect failed");
                    return Err(err);
                }
            };

            let peer = format!("{host}:{port}");
            let options = ConnectionOptions::default().on_close(Box::new(move |err| {
                match err {
                    Some(err) => tracing::warn!(%peer, %err, "pooled connection closed"),
                    None => tracing::info!(%peer, "pooled connection closed"),
                }
                broken();
            }));

            let conn = Connection::spawn(stream, executors(), options);
            tracing::info!(%host, port, "connected");

            let release_conn = Arc::clone(&conn);
            Ok(PoolItem::new(conn, move || release_conn.close()))
        })
    });

    Pool::new(constructor, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Constructor whose attempts alternate failure and success.
    fn flaky_constructor(
        attempts: Arc<AtomicUsize>,
        hooks: Arc<Mutex<Vec<BrokenHook>>>,
    ) -> Constructor<usize> {
        Arc::new(move |broken| {
            let attempts = Arc::clone(&attempts);
            let hooks = Arc::clone(&hooks);
            Box::pin(async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    return Err(RpcError::Resolve("flaky".to_string()));
                }
                hooks.lock().unwrap().push(broken);
                Ok(PoolItem::new(n, || {}))
            })
        })
    }

    fn quick_config(size: usize) -> PoolConfig {
        PoolConfig {
            size,
            recheck_interval: Duration::from_millis(20),
            retry_delay: Duration::from_millis(10),
        }
    }

    async fn wait_for_healthy<T: Clone + Send + 'static>(pool: &Pool<T>, n: usize) {
        for _ in 0..100 {
            if pool.healthy() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool never reached {n} healthy items");
    }

    #[tokio::test]
    async fn test_empty_pool_is_exhausted() {
        let always_fail: Constructor<usize> = Arc::new(move |_broken| {
            Box::pin(async { Err(RpcError::Resolve("down".to_string())) })
        });
        let pool = Pool::new(always_fail, quick_config(2));

        assert!(matches!(pool.get(), Err(RpcError::PoolExhausted)));
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_pool_converges_despite_flaky_constructor() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let pool = Pool::new(flaky_constructor(attempts, Arc::clone(&hooks)), quick_config(3));

        wait_for_healthy(&pool, 3).await;
        assert!(pool.get().is_ok());
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_broken_item_is_never_handed_out_again() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let pool = Pool::new(
            flaky_constructor(attempts, Arc::clone(&hooks)),
            quick_config(1),
        );

        wait_for_healthy(&pool, 1).await;
        let healthy_value = pool.get().unwrap();

        // Break the only item; get() now fails or, after replacement,
        // returns a different item, never the broken one.
        let hook = hooks.lock().unwrap().pop().unwrap();
        hook();

        match pool.get() {
            Err(RpcError::PoolExhausted) => {}
            Ok(v) => assert_ne!(v, healthy_value),
            Err(other) => panic!("unexpected error: {other}"),
        }

        // The pool converges back to a healthy item.
        wait_for_healthy(&pool, 1).await;
        assert_ne!(pool.get().unwrap(), healthy_value);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_broken_notification_after_shutdown_is_ignored() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let pool = Pool::new(
            flaky_constructor(attempts, Arc::clone(&hooks)),
            quick_config(1),
        );

        wait_for_healthy(&pool, 1).await;
        pool.shutdown();

        // An item whose transport breaks during teardown must not trigger
        // replacement churn.
        let hook = hooks.lock().unwrap().pop().unwrap();
        hook();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pool.healthy(), 0);
    }

    #[tokio::test]
    async fn test_get_round_robins_over_items() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seq: Constructor<usize> = {
            let counter = Arc::clone(&counter);
            Arc::new(move |_broken| {
                let counter = Arc::clone(&counter);
                Box::pin(async move {
                    Ok(PoolItem::new(counter.fetch_add(1, Ordering::SeqCst), || {}))
                })
            })
        };
        let pool = Pool::new(seq, quick_config(2));

        wait_for_healthy(&pool, 2).await;
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert_ne!(a, b);
        pool.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_releases_items_and_stops_refill() {
        let released = Arc::new(AtomicUsize::new(0));
        let constructor: Constructor<&'static str> = {
            let released = Arc::clone(&released);
            Arc::new(move |_broken| {
                let released = Arc::clone(&released);
                Box::pin(async move {
                    Ok(PoolItem::new("item", move || {
                        released.fetch_add(1, Ordering::SeqCst);
                    }))
                })
            })
        };
        let pool = Pool::new(constructor, quick_config(2));

        wait_for_healthy(&pool, 2).await;
        pool.shutdown();

        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.get(), Err(RpcError::PoolExhausted)));

        // No replacement churn after shutdown.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(pool.healthy(), 0);
    }
}
