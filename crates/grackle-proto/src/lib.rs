//! Grackle protocol types and framing.
//!
//! This crate defines the messages exchanged with a graph query server and
//! the framing that carries them over a transport. Messages are JSON,
//! serialized with serde.
//!
//! # Modules
//!
//! - [`script`] - The caller-facing script, bindings and aliases
//! - [`message`] - Request/response envelopes and status codes
//! - [`framing`] - Mime-prefixed framing of serialized messages
//! - [`error`] - Protocol error types
//!
//! # Example
//!
//! ```ignore
//! use grackle_proto::{framing, Request, Script};
//!
//! let script = Script::new("g.V(x).out()").with_binding("x", 1);
//! let request = Request::eval(1, script, "gremlin-groovy", None);
//! let frame = framing::encode_request(&request)?;
//! ```

pub mod error;
pub mod framing;
pub mod message;
pub mod script;

pub use error::Error;

pub use message::{status_codes, Operation, Request, RequestArgs, Response, ResponseStatus};
pub use script::{Aliases, Bindings, Script};

/// Default script language.
pub const DEFAULT_LANGUAGE: &str = "gremlin-groovy";
