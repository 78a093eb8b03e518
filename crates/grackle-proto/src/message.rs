//! Request and response message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::script::{Aliases, Bindings, Script};

/// SASL mechanism used for username/password authentication.
pub const SASL_PLAIN: &str = "PLAIN";

/// Processor handling requests outside a session.
pub const STANDARD_PROCESSOR: &str = "";

/// Processor handling session-bound requests.
pub const SESSION_PROCESSOR: &str = "session";

/// A request from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Unique request identifier for correlation.
    pub request_id: u64,
    /// The operation to perform.
    pub op: Operation,
    /// Server-side processor that handles the operation.
    pub processor: String,
    /// Operation arguments.
    pub args: RequestArgs,
}

/// Operations that can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Evaluate a script.
    Eval,
    /// Answer an authentication challenge.
    Authentication,
    /// Close a server-side session.
    Close,
}

/// Arguments carried by a request, shaped by its operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestArgs {
    /// Script evaluation.
    Eval(EvalArgs),
    /// SASL credentials.
    Authentication(AuthArgs),
    /// Session shutdown.
    Close(CloseArgs),
}

/// Arguments of an `eval` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalArgs {
    pub gremlin: String,
    #[serde(default)]
    pub bindings: Bindings,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Aliases>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

/// Arguments of an `authentication` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthArgs {
    pub sasl_mechanism: String,
    pub sasl: String,
}

/// Arguments of a session `close` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseArgs {
    pub session: String,
}

impl Request {
    /// Create an eval request, filling the language and aliases from the
    /// given defaults when the script leaves them unset.
    pub fn eval(
        request_id: u64,
        script: Script,
        default_language: &str,
        default_aliases: Option<&Aliases>,
    ) -> Self {
        let processor = if script.session.is_some() {
            SESSION_PROCESSOR
        } else {
            STANDARD_PROCESSOR
        };

        Self {
            request_id,
            op: Operation::Eval,
            processor: processor.to_string(),
            args: RequestArgs::Eval(EvalArgs {
                gremlin: script.gremlin,
                bindings: script.bindings,
                language: script
                    .language
                    .unwrap_or_else(|| default_language.to_string()),
                aliases: script.aliases.or_else(|| default_aliases.cloned()),
                session: script.session,
            }),
        }
    }

    /// Create a SASL PLAIN authentication request.
    pub fn authentication(request_id: u64, username: &str, password: &str) -> Self {
        Self {
            request_id,
            op: Operation::Authentication,
            processor: STANDARD_PROCESSOR.to_string(),
            args: RequestArgs::Authentication(AuthArgs {
                sasl_mechanism: SASL_PLAIN.to_string(),
                sasl: format!("\0{}\0{}", username, password),
            }),
        }
    }

    /// Create a request closing a server-side session.
    pub fn close_session(request_id: u64, session: impl Into<String>) -> Self {
        Self {
            request_id,
            op: Operation::Close,
            processor: SESSION_PROCESSOR.to_string(),
            args: RequestArgs::Close(CloseArgs {
                session: session.into(),
            }),
        }
    }
}

/// A response from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Request ID this response corresponds to.
    pub request_id: u64,
    /// Response status.
    pub status: ResponseStatus,
    /// Result payload.
    #[serde(default)]
    pub result: ResponseResult,
}

/// Status block of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, Value>,
}

/// Result block of a response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseResult {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub meta: serde_json::Map<String, Value>,
}

impl Response {
    /// Create a successful response carrying `data`.
    pub fn ok(request_id: u64, data: Value) -> Self {
        let code = if data.is_null() {
            status_codes::NO_CONTENT
        } else {
            status_codes::SUCCESS
        };
        Self {
            request_id,
            status: ResponseStatus {
                code,
                message: String::new(),
                attributes: serde_json::Map::new(),
            },
            result: ResponseResult {
                data,
                meta: serde_json::Map::new(),
            },
        }
    }

    /// Create an error response.
    pub fn error(request_id: u64, code: u16, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: ResponseStatus {
                code,
                message: message.into(),
                attributes: serde_json::Map::new(),
            },
            result: ResponseResult::default(),
        }
    }

    /// Check if the status code denotes success.
    pub fn is_success(&self) -> bool {
        status_codes::is_success(self.status.code)
    }

    /// Consume the response, returning its data.
    pub fn into_data(self) -> Value {
        self.result.data
    }
}

/// Standard status codes.
pub mod status_codes {
    /// Request succeeded with data.
    pub const SUCCESS: u16 = 200;
    /// Request succeeded without data.
    pub const NO_CONTENT: u16 = 204;
    /// Partial result; more messages follow.
    pub const PARTIAL_CONTENT: u16 = 206;
    /// Credentials were rejected.
    pub const UNAUTHORIZED: u16 = 401;
    /// Server demands authentication.
    pub const AUTHENTICATE: u16 = 407;
    /// Request could not be parsed.
    pub const MALFORMED_REQUEST: u16 = 498;
    /// Request arguments were invalid.
    pub const INVALID_REQUEST_ARGUMENTS: u16 = 499;
    /// Generic server failure.
    pub const SERVER_ERROR: u16 = 500;
    /// Script failed to evaluate.
    pub const SCRIPT_EVALUATION_ERROR: u16 = 597;
    /// Evaluation exceeded the server timeout.
    pub const SERVER_TIMEOUT: u16 = 598;
    /// Result could not be serialized.
    pub const SERVER_SERIALIZATION_ERROR: u16 = 599;

    /// Check if `code` denotes success.
    pub fn is_success(code: u16) -> bool {
        matches!(code, SUCCESS | NO_CONTENT | PARTIAL_CONTENT)
    }
}
