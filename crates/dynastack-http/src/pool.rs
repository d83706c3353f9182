//! Per-endpoint connection pools.
//!
//! [`PoolManager`] owns one [`EndpointPool`] per [`Endpoint`], created on
//! first use. Each pool keeps idle transports in a LIFO stack and bounds the
//! number of handles on loan with a semaphore. A background sweep evicts
//! transports that stayed idle longer than the configured threshold; handles
//! on loan are not in the idle stack, so the sweep cannot touch them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::Full;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::connector::{Connector, Transport, TransportBody};
use crate::endpoint::Endpoint;
use crate::error::{PoolError, TransportError};

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum handles on loan per endpoint.
    pub max_active: usize,
    /// Maximum idle handles kept per endpoint.
    pub max_idle: usize,
    /// Time between eviction sweeps. Zero disables the background sweeper.
    pub eviction_interval: Duration,
    /// Idle time after which a handle may be evicted.
    pub min_idle_time: Duration,
    /// Maximum idle handles inspected per endpoint per sweep.
    pub tests_per_eviction: usize,
    /// How long `acquire` waits when `max_active` handles are on loan.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 100,
            max_idle: 100,
            eviction_interval: Duration::from_millis(5000),
            min_idle_time: Duration::from_millis(20_000),
            tests_per_eviction: 100,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for one endpoint's pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles waiting in the idle stack.
    pub idle: usize,
    /// Handles currently on loan.
    pub active: usize,
    /// Transports created since the pool was built.
    pub created: u64,
    /// Transports destroyed (invalidated, evicted, or over `max_idle`).
    pub destroyed: u64,
}

/// Identity of a pooled transport, unique within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// The numeric id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct IdleEntry {
    id: HandleId,
    transport: Box<dyn Transport>,
    since: Instant,
}

/// The pool for one endpoint.
#[derive(Debug)]
pub struct EndpointPool {
    endpoint: Endpoint,
    idle: Mutex<VecDeque<IdleEntry>>,
    permits: Arc<Semaphore>,
    max_active: usize,
    max_idle: usize,
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    closed: AtomicBool,
}

impl EndpointPool {
    fn new(endpoint: Endpoint, config: &PoolConfig) -> Self {
        Self {
            endpoint,
            idle: Mutex::new(VecDeque::new()),
            permits: Arc::new(Semaphore::new(config.max_active)),
            max_active: config.max_active,
            max_idle: config.max_idle,
            next_id: AtomicU64::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.idle.lock().len(),
            active: self.max_active - self.permits.available_permits(),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
        }
    }

    fn checkin(&self, id: HandleId, transport: Box<dyn Transport>) {
        let mut idle = self.idle.lock();
        if self.closed.load(Ordering::Acquire) || idle.len() >= self.max_idle {
            drop(idle);
            self.destroy(id, transport);
            return;
        }
        idle.push_back(IdleEntry {
            id,
            transport,
            since: Instant::now(),
        });
    }

    fn destroy(&self, id: HandleId, transport: Box<dyn Transport>) {
        drop(transport);
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        trace!(endpoint = %self.endpoint, handle = id.0, "destroyed handle");
    }

    /// Evict up to `limit` of the oldest idle handles idle for at least
    /// `min_idle`.
    fn evict(&self, min_idle: Duration, limit: usize) -> usize {
        let evicted: Vec<IdleEntry> = {
            let mut idle = self.idle.lock();
            let mut evicted = Vec::new();
            let mut index = 0;
            let mut examined = 0;
            // Oldest entries sit at the front.
            while index < idle.len() && examined < limit {
                examined += 1;
                if idle[index].since.elapsed() >= min_idle {
                    if let Some(entry) = idle.remove(index) {
                        evicted.push(entry);
                    }
                } else {
                    index += 1;
                }
            }
            evicted
        };
        let count = evicted.len();
        for entry in evicted {
            self.destroy(entry.id, entry.transport);
        }
        count
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let drained: Vec<IdleEntry> = self.idle.lock().drain(..).collect();
        for entry in drained {
            self.destroy(entry.id, entry.transport);
        }
    }
}

/// Registry of endpoint pools.
///
/// Constructed once by the composition root and shared by every pipeline.
#[derive(Debug)]
pub struct PoolManager {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    pools: DashMap<Endpoint, Arc<EndpointPool>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl PoolManager {
    /// Create a manager that opens transports with `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            connector,
            config,
            pools: DashMap::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Borrow a handle for `endpoint`.
    ///
    /// Reuses the most recently returned idle handle if there is one,
    /// otherwise opens a new transport. Waits up to `acquire_timeout` when
    /// `max_active` handles are already on loan.
    pub async fn acquire(self: &Arc<Self>, endpoint: &Endpoint) -> Result<PooledHandle, PoolError> {
        self.ensure_sweeper();
        let pool = self.pool_for(endpoint);

        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&pool.permits).acquire_owned(),
        )
        .await
        .map_err(|_| PoolError::AcquireTimeout {
            endpoint: endpoint.to_string(),
            waited: self.config.acquire_timeout,
        })?
        .map_err(|_| PoolError::Closed(endpoint.to_string()))?;

        let reused = pool.idle.lock().pop_back();
        let (id, transport) = match reused {
            Some(entry) => {
                trace!(endpoint = %endpoint, handle = entry.id.0, "reusing idle handle");
                (entry.id, entry.transport)
            }
            None => {
                let id = HandleId(pool.next_id.fetch_add(1, Ordering::Relaxed));
                pool.created.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %endpoint, handle = id.0, "opening new handle");
                (id, self.connector.open(endpoint))
            }
        };

        Ok(PooledHandle {
            id,
            transport: Some(transport),
            pool,
            _permit: permit,
        })
    }

    fn pool_for(&self, endpoint: &Endpoint) -> Arc<EndpointPool> {
        let entry = self
            .pools
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(EndpointPool::new(endpoint.clone(), &self.config)));
        Arc::clone(entry.value())
    }

    /// Counters for `endpoint`, if a pool exists for it.
    #[must_use]
    pub fn stats(&self, endpoint: &Endpoint) -> Option<PoolStats> {
        self.pools.get(endpoint).map(|pool| pool.stats())
    }

    /// Run one eviction pass over every pool. Returns the number of handles
    /// evicted.
    pub fn sweep(&self) -> usize {
        let pools: Vec<Arc<EndpointPool>> =
            self.pools.iter().map(|p| Arc::clone(p.value())).collect();
        let evicted = pools
            .iter()
            .map(|pool| pool.evict(self.config.min_idle_time, self.config.tests_per_eviction))
            .sum();
        if evicted > 0 {
            debug!(evicted, "evicted idle handles");
        }
        evicted
    }

    /// Destroy every pool and clear the registry.
    ///
    /// Handles still on loan are destroyed when they come back. The next
    /// `acquire` builds a fresh pool.
    pub fn close_all(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        let pools: Vec<Arc<EndpointPool>> =
            self.pools.iter().map(|p| Arc::clone(p.value())).collect();
        self.pools.clear();
        for pool in &pools {
            pool.close();
        }
        debug!(pools = pools.len(), "closed all pools");
    }

    fn ensure_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let interval = self.config.eviction_interval;
        if interval.is_zero() {
            return;
        }
        let manager: Weak<Self> = Arc::downgrade(self);
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.sweep();
            }
        }));
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

/// A transport on loan from a pool.
///
/// Exactly one of [`release`](Self::release) or
/// [`invalidate`](Self::invalidate) should end the loan. Dropping the handle
/// without either invalidates it.
#[derive(Debug)]
pub struct PooledHandle {
    id: HandleId,
    transport: Option<Box<dyn Transport>>,
    pool: Arc<EndpointPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledHandle {
    /// Identity of the underlying transport.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// The endpoint this handle is bound to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.pool.endpoint
    }

    /// Perform one exchange on the underlying transport.
    pub async fn send(
        &mut self,
        request: http::Request<Full<Bytes>>,
    ) -> Result<http::Response<TransportBody>, TransportError> {
        match self.transport.as_mut() {
            Some(transport) => transport.send(request).await,
            None => Err(TransportError::Detached),
        }
    }

    /// Return the handle to its pool for reuse.
    pub fn release(mut self) {
        if let Some(transport) = self.transport.take() {
            self.pool.checkin(self.id, transport);
        }
    }

    /// Destroy the handle; it is never handed out again.
    pub fn invalidate(mut self) {
        if let Some(transport) = self.transport.take() {
            debug!(endpoint = %self.pool.endpoint, handle = self.id.0, "invalidating handle");
            self.pool.destroy(self.id, transport);
        }
    }
}

impl Drop for PooledHandle {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            self.pool.destroy(self.id, transport);
        }
    }
}
