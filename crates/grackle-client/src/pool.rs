//! Connection pooling for the graph client.
//!
//! The pool lends out a bounded set of connections to one server endpoint.
//! A connection may be held by several callers at once, up to
//! `max_times_acquired`, so a saturated pool shares busy connections before
//! making anyone wait.
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! await. Opening and closing connections happen outside the lock; an
//! opening connection holds a reservation that counts toward capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;

use grackle_proto::{Response, Script};

use crate::config::{AcquireOptions, ConnectParams, PoolConfig};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::Error;
use crate::transport::NngConnector;

/// A connection lent out by a [`ConnectionPool`].
///
/// Callers sharing a multiplexed connection hold clones of the same `Arc`.
/// Each holder must call [`release`](Self::release) exactly once.
pub struct PooledConnection<F: ConnectionFactory> {
    id: u64,
    conn: F::Connection,
    times_acquired: AtomicUsize,
    pool: Mutex<Option<Weak<PoolInner<F>>>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(id: u64, conn: F::Connection, pool: &Arc<PoolInner<F>>) -> Self {
        Self {
            id,
            conn,
            times_acquired: AtomicUsize::new(0),
            pool: Mutex::new(Some(Arc::downgrade(pool))),
        }
    }

    /// Pool-unique identifier of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of callers currently holding this connection.
    pub fn times_acquired(&self) -> usize {
        self.times_acquired.load(Ordering::Acquire)
    }

    // Only called with the pool state locked.
    fn increment_acquired(&self) {
        self.times_acquired.fetch_add(1, Ordering::AcqRel);
    }

    // Only called with the pool state locked.
    fn decrement_acquired(&self) {
        self.times_acquired.fetch_sub(1, Ordering::AcqRel);
    }

    /// Submit a script on the underlying connection.
    pub async fn submit(&self, script: impl Into<Script>) -> Result<Response, Error> {
        self.conn.submit(script.into()).await
    }

    /// Hand this connection back to its pool.
    pub fn release(&self) {
        let pool = self.pool.lock().as_ref().and_then(Weak::upgrade);
        match pool {
            Some(pool) => pool.release(self),
            None => tracing::debug!(conn_id = self.id, "released connection has no pool"),
        }
    }

    /// Close the underlying connection and detach from the pool.
    ///
    /// Only the pool calls this, once, while shutting down.
    async fn close(&self) -> Result<(), Error> {
        let result = self.conn.close().await;
        self.pool.lock().take();
        result
    }

    /// Whether the underlying connection is closed.
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Get the underlying connection.
    pub fn connection(&self) -> &F::Connection {
        &self.conn
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("times_acquired", &self.times_acquired())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Snapshot of one tracked connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub times_acquired: usize,
    pub closed: bool,
}

/// Snapshot of the pool's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Idle connections, oldest first.
    pub available: Vec<ConnectionInfo>,
    /// Connections with at least one holder.
    pub acquired: Vec<ConnectionInfo>,
    /// Connections being opened right now.
    pub opening: usize,
    /// Capacity of the pool.
    pub max_conns: usize,
    /// Whether the pool has been closed.
    pub closed: bool,
}

impl PoolStatus {
    /// Tracked connections plus reservations.
    pub fn total(&self) -> usize {
        self.available.len() + self.acquired.len() + self.opening
    }
}

type Pooled<F> = Arc<PooledConnection<F>>;

struct PoolState<F: ConnectionFactory> {
    available: VecDeque<Pooled<F>>,
    acquired: VecDeque<Pooled<F>>,
    opening: usize,
    closed: bool,
}

impl<F: ConnectionFactory> PoolState<F> {
    fn total(&self) -> usize {
        self.available.len() + self.acquired.len() + self.opening
    }
}

/// Outcome of one pass over the pool state.
enum Attempt<F: ConnectionFactory> {
    Ready(Pooled<F>),
    Open,
    Wait,
}

/// Internal pool state.
struct PoolInner<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    state: Mutex<PoolState<F>>,
    notify: Notify,
    next_conn_id: AtomicU64,
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// Reuse an idle connection, reserve a slot for a new one, or share a
    /// busy one, in that order.
    fn try_acquire(&self) -> Result<Attempt<F>, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }

        loop {
            while let Some(conn) = state.available.pop_front() {
                if conn.is_closed() {
                    tracing::debug!(conn_id = conn.id, "discarding closed idle connection");
                    continue;
                }
                conn.increment_acquired();
                state.acquired.push_back(conn.clone());
                tracing::trace!(conn_id = conn.id, "reusing idle connection");
                self.pass_on(&state);
                return Ok(Attempt::Ready(conn));
            }

            if state.total() < self.config.max_conns {
                state.opening += 1;
                return Ok(Attempt::Open);
            }

            // One rotating pass; unsuitable entries move to the back.
            let mut discarded = false;
            for _ in 0..state.acquired.len() {
                let Some(conn) = state.acquired.pop_front() else {
                    break;
                };
                if conn.is_closed() {
                    tracing::debug!(conn_id = conn.id, "discarding closed busy connection");
                    discarded = true;
                    continue;
                }
                state.acquired.push_back(conn.clone());
                if conn.times_acquired() < self.config.max_times_acquired {
                    conn.increment_acquired();
                    tracing::trace!(
                        conn_id = conn.id,
                        times_acquired = conn.times_acquired(),
                        "sharing busy connection"
                    );
                    self.pass_on(&state);
                    return Ok(Attempt::Ready(conn));
                }
            }

            if !discarded {
                return Ok(Attempt::Wait);
            }
        }
    }

    /// Wake the next waiter if another acquire could still succeed, so one
    /// release can serve several waiters in turn.
    fn pass_on(&self, state: &PoolState<F>) {
        let headroom = !state.available.is_empty()
            || state.total() < self.config.max_conns
            || state
                .acquired
                .iter()
                .any(|c| c.times_acquired() < self.config.max_times_acquired);
        if headroom {
            self.notify.notify_one();
        }
    }

    /// Open a connection through the factory. The caller holds a reservation.
    async fn get_connection(self: &Arc<Self>, params: &ConnectParams) -> Result<Pooled<F>, Error> {
        let conn = self
            .factory
            .open(&self.config.url, params)
            .await
            .map_err(|e| {
                tracing::warn!(url = %self.config.url, error = %e, "failed to open connection");
                e
            })?;

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn_id = id, url = %self.config.url, "opened connection");
        Ok(Arc::new(PooledConnection::new(id, conn, self)))
    }

    /// Open a connection into a held reservation and check it out.
    async fn open_acquired(self: &Arc<Self>, params: &ConnectParams) -> Result<Pooled<F>, Error> {
        let mut slot = Reservation::new(self);
        let conn = self.get_connection(params).await?;

        {
            let mut state = self.state.lock();
            slot.fulfill(&mut state);
            if !state.closed {
                conn.increment_acquired();
                state.acquired.push_back(conn.clone());
                drop(state);
                // The new connection has share budget left for a waiter.
                self.notify.notify_one();
                return Ok(conn);
            }
        }

        // Pool closed while the connection was opening.
        if let Err(e) = conn.close().await {
            tracing::warn!(conn_id = conn.id, error = %e, "failed to close late connection");
        }
        Err(Error::PoolClosed)
    }

    fn release(&self, conn: &PooledConnection<F>) {
        {
            let mut state = self.state.lock();
            let position = state
                .acquired
                .iter()
                .position(|c| std::ptr::eq(Arc::as_ptr(c), conn));

            match position {
                Some(index) if conn.is_closed() => {
                    state.acquired.remove(index);
                    tracing::debug!(conn_id = conn.id, "dropping closed connection on release");
                }
                Some(index) => {
                    conn.decrement_acquired();
                    if conn.times_acquired() == 0 {
                        if let Some(idle) = state.acquired.remove(index) {
                            state.available.push_back(idle);
                        }
                    }
                }
                None if conn.is_closed() => {
                    tracing::debug!(conn_id = conn.id, "closed connection already dropped");
                }
                None => {
                    tracing::warn!(conn_id = conn.id, "released connection is not checked out");
                }
            }
        }

        // Waiters sharing busy connections need a wakeup on every decrement.
        self.notify.notify_one();
    }

    fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let info = |c: &Pooled<F>| ConnectionInfo {
            id: c.id,
            times_acquired: c.times_acquired(),
            closed: c.is_closed(),
        };
        PoolStatus {
            available: state.available.iter().map(info).collect(),
            acquired: state.acquired.iter().map(info).collect(),
            opening: state.opening,
            max_conns: self.config.max_conns,
            closed: state.closed,
        }
    }
}

/// A capacity slot held while a connection opens. Dropping it unfulfilled
/// (failure or cancellation) gives the slot back and wakes a waiter.
struct Reservation<'a, F: ConnectionFactory> {
    pool: &'a PoolInner<F>,
    pending: bool,
}

impl<'a, F: ConnectionFactory> Reservation<'a, F> {
    fn new(pool: &'a PoolInner<F>) -> Self {
        Self {
            pool,
            pending: true,
        }
    }

    fn fulfill(&mut self, state: &mut PoolState<F>) {
        state.opening -= 1;
        self.pending = false;
    }
}

impl<F: ConnectionFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if self.pending {
            self.pool.state.lock().opening -= 1;
            self.pool.notify.notify_one();
        }
    }
}

/// Releases a connection when dropped.
struct ReleaseGuard<F: ConnectionFactory>(Pooled<F>);

impl<F: ConnectionFactory> Drop for ReleaseGuard<F> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A pool of connections to a graph server endpoint.
///
/// # Example
///
/// ```ignore
/// use grackle_client::{ConnectionPool, PoolConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = ConnectionPool::connect(PoolConfig::default()).await?;
///
///     let conn = pool.acquire().await?;
///     let response = conn.submit("g.V().count()").await;
///     conn.release();
///     println!("{:?}", response?.into_data());
///
///     pool.close().await?;
///     Ok(())
/// }
/// ```
pub struct ConnectionPool<F: ConnectionFactory = NngConnector> {
    inner: Arc<PoolInner<F>>,
}

impl ConnectionPool<NngConnector> {
    /// Create a pool over the NNG transport and open its minimum connections.
    pub async fn connect(config: PoolConfig) -> Result<Self, Error> {
        Self::open(config, NngConnector).await
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create an empty pool. No connection is opened until
    /// [`init_pool`](Self::init_pool) or the first acquire.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState {
                    available: VecDeque::new(),
                    acquired: VecDeque::new(),
                    opening: 0,
                    closed: false,
                }),
                notify: Notify::new(),
                next_conn_id: AtomicU64::new(1),
            }),
        })
    }

    /// Create a pool and open its minimum connections.
    pub async fn open(config: PoolConfig, factory: F) -> Result<Self, Error> {
        let pool = Self::new(config, factory)?;
        pool.init_pool().await?;
        Ok(pool)
    }

    /// Open `min_conns` connections, one after another, into the idle set.
    ///
    /// On failure the connections opened so far stay in the pool.
    pub async fn init_pool(&self) -> Result<(), Error> {
        let params = self.inner.config.connect_params(&AcquireOptions::default());

        for _ in 0..self.inner.config.min_conns {
            let mut slot = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(Error::PoolClosed);
                }
                if state.total() >= self.inner.config.max_conns {
                    break;
                }
                state.opening += 1;
                Reservation::new(&self.inner)
            };

            let conn = self.inner.get_connection(&params).await?;

            let accepted = {
                let mut state = self.inner.state.lock();
                slot.fulfill(&mut state);
                if !state.closed {
                    state.available.push_back(conn.clone());
                }
                !state.closed
            };
            if !accepted {
                if let Err(e) = conn.close().await {
                    tracing::warn!(conn_id = conn.id, error = %e, "failed to close late connection");
                }
                return Err(Error::PoolClosed);
            }
            self.inner.notify.notify_one();
        }

        tracing::info!(
            url = %self.inner.config.url,
            min_conns = self.inner.config.min_conns,
            max_conns = self.inner.config.max_conns,
            "connection pool initialized"
        );
        Ok(())
    }

    /// Acquire a connection using the pool defaults.
    pub async fn acquire(&self) -> Result<Arc<PooledConnection<F>>, Error> {
        self.acquire_with(&AcquireOptions::default()).await
    }

    /// Acquire a connection, applying `overrides` to any connection opened
    /// by this call.
    ///
    /// Waits without a deadline while every connection is at its share
    /// budget; wrap the call in a timeout to bound it.
    pub async fn acquire_with(
        &self,
        overrides: &AcquireOptions,
    ) -> Result<Arc<PooledConnection<F>>, Error> {
        let params = self.inner.config.connect_params(overrides);

        loop {
            // Register before inspecting state so a release in between is seen.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.try_acquire()? {
                Attempt::Ready(conn) => return Ok(conn),
                Attempt::Open => break,
                Attempt::Wait => {
                    tracing::trace!("pool saturated, waiting for a release");
                    notified.await;
                }
            }
        }

        self.inner.open_acquired(&params).await
    }

    /// Acquire a connection, submit `script`, and release the connection.
    pub async fn submit(&self, script: impl Into<Script>) -> Result<Response, Error> {
        let guard = ReleaseGuard(self.acquire().await?);
        guard.0.submit(script).await
    }

    /// Hand a connection back. Same as [`PooledConnection::release`].
    pub fn release(&self, conn: &PooledConnection<F>) {
        self.inner.release(conn);
    }

    /// Close every tracked connection.
    ///
    /// All closes run concurrently and every one is attempted; the first
    /// failure is returned once they have all finished. Acquires fail with
    /// [`Error::PoolClosed`] from the moment this is called.
    pub async fn close(&self) -> Result<(), Error> {
        let conns: Vec<Pooled<F>> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let mut conns: Vec<_> = state.available.drain(..).collect();
            conns.extend(state.acquired.drain(..));
            conns
        };
        self.inner.notify.notify_waiters();

        tracing::info!(url = %self.inner.config.url, connections = conns.len(), "closing connection pool");

        let results = join_all(conns.iter().map(|conn| conn.close())).await;

        let mut first_error = None;
        for (conn, result) in conns.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(conn_id = conn.id, error = %e, "failed to close connection");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Snapshot the pool's bookkeeping.
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// Get the server endpoint.
    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("ConnectionPool")
            .field("url", &self.inner.config.url)
            .field("max_conns", &self.inner.config.max_conns)
            .field("available", &status.available.len())
            .field("acquired", &status.acquired.len())
            .field("opening", &status.opening)
            .field("closed", &status.closed)
            .finish()
    }
}
