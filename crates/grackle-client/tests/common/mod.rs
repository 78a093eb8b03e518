//! In-memory connection factory for pool tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use grackle_client::{ConnectParams, Connection, ConnectionFactory, Error, Response, Script};

/// Shared view of one opened mock connection.
#[derive(Debug)]
pub struct MockState {
    pub serial: usize,
    pub params: ConnectParams,
    closed: AtomicBool,
    fail_close: bool,
    submits: AtomicUsize,
}

impl MockState {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }
}

pub struct MockConnection(Arc<MockState>);

impl MockConnection {
    /// Simulate the server dropping the connection.
    pub fn kill(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    pub fn serial(&self) -> usize {
        self.0.serial
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn submit(&self, script: Script) -> Result<Response, Error> {
        if self.is_closed() {
            return Err(Error::Connection("connection is closed".to_string()));
        }
        self.0.submits.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(Response::ok(
            0,
            json!({ "conn": self.0.serial, "gremlin": script.gremlin }),
        ))
    }

    async fn close(&self) -> Result<(), Error> {
        tokio::task::yield_now().await;
        self.0.closed.store(true, Ordering::SeqCst);
        if self.0.fail_close {
            return Err(Error::Connection(format!(
                "close failed for {}",
                self.0.serial
            )));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[derive(Default)]
struct FactoryState {
    opened: Mutex<Vec<Arc<MockState>>>,
    failures: AtomicUsize,
    successes_left: Mutex<Option<usize>>,
    fail_close: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
}

/// Factory whose connections never touch the network.
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<FactoryState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail.
    pub fn fail_next(&self, count: usize) {
        self.state.failures.store(count, Ordering::SeqCst);
    }

    /// Let `count` more opens succeed, then fail every open after them.
    pub fn fail_after(&self, count: usize) {
        *self.state.successes_left.lock() = Some(count);
    }

    /// Make connections opened from now on fail to close.
    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Delay every open by `delay`.
    pub fn open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = Some(delay);
    }

    /// Every connection opened so far, in order.
    pub fn opened(&self) -> Vec<Arc<MockState>> {
        self.state.opened.lock().clone()
    }

    pub fn opened_count(&self) -> usize {
        self.state.opened.lock().len()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn open(&self, _url: &str, params: &ConnectParams) -> Result<MockConnection, Error> {
        let delay = *self.state.open_delay.lock();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let failed = self
            .state
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let exhausted = match self.state.successes_left.lock().as_mut() {
            Some(0) => true,
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        if failed || exhausted {
            return Err(Error::Connection("connection refused".to_string()));
        }

        let mut opened = self.state.opened.lock();
        let state = Arc::new(MockState {
            serial: opened.len(),
            params: params.clone(),
            closed: AtomicBool::new(false),
            fail_close: self.state.fail_close.load(Ordering::SeqCst),
            submits: AtomicUsize::new(0),
        });
        opened.push(state.clone());
        Ok(MockConnection(state))
    }
}
