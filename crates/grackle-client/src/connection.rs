//! The connection abstraction the pool manages.
//!
//! A [`Connection`] is an already-open transport session to the server. The
//! pool never builds one itself; it asks a [`ConnectionFactory`] to open one
//! and later closes it.

use async_trait::async_trait;

use grackle_proto::{Response, Script};

use crate::config::ConnectParams;
use crate::error::Error;

/// An open session to a graph server.
///
/// Implementations must tolerate concurrent `submit` calls; the pool lends a
/// single connection to several callers at once.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Submit a script and wait for its response.
    async fn submit(&self, script: Script) -> Result<Response, Error>;

    /// Close the session.
    async fn close(&self) -> Result<(), Error>;

    /// Whether the session is closed. Once true, stays true.
    fn is_closed(&self) -> bool;
}

/// Opens connections to a server endpoint.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a new connection to `url`.
    async fn open(&self, url: &str, params: &ConnectParams) -> Result<Self::Connection, Error>;
}
