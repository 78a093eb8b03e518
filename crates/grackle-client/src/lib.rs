//! Grackle Client - pooled async driver for graph query servers.
//!
//! The core of this crate is [`ConnectionPool`], which shares a bounded set
//! of persistent connections to one server endpoint among any number of
//! concurrent callers. Connections come from a [`ConnectionFactory`]; the
//! bundled [`NngConnector`] speaks the JSON request/reply protocol from
//! [`grackle_proto`] over an NNG socket.
//!
//! # Quick Start
//!
//! ```ignore
//! use grackle_client::{ConnectionPool, PoolConfig, Script};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PoolConfig::new("tcp://127.0.0.1:8182")
//!         .with_max_conns(8)
//!         .with_max_times_acquired(4);
//!     let pool = ConnectionPool::connect(config).await?;
//!
//!     // Acquire, submit, release
//!     let script = Script::new("g.V(x).out()").with_binding("x", 1);
//!     let response = pool.submit(script).await?;
//!     println!("{}", response.into_data());
//!
//!     pool.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod transport;

pub use config::{AcquireOptions, ConnectParams, PoolConfig, TlsConfig};
pub use connection::{Connection, ConnectionFactory};
pub use error::Error;
pub use pool::{ConnectionInfo, ConnectionPool, PoolStatus, PooledConnection};
pub use transport::{NngConnection, NngConnector};

/// Re-export protocol types.
pub use grackle_proto as proto;
pub use grackle_proto::{Response, Script};
