//! NNG request/reply transport.
//!
//! Each request runs on its own async context, so concurrent submits share
//! one socket without waiting on each other.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_nng::AsyncContext;
use async_trait::async_trait;
use nng::options::Options;
use nng::{Message, Protocol, Socket};
use tokio::sync::Semaphore;

use grackle_proto::framing::{self, MAX_MESSAGE_SIZE};
use grackle_proto::{status_codes, Request, Response, Script};

use crate::config::{ConnectParams, TlsConfig};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::Error;

/// Opens [`NngConnection`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NngConnector;

#[async_trait]
impl ConnectionFactory for NngConnector {
    type Connection = NngConnection;

    async fn open(&self, url: &str, params: &ConnectParams) -> Result<NngConnection, Error> {
        NngConnection::establish(url, params.clone()).await
    }
}

/// A connection to a graph server over an NNG REQ socket.
pub struct NngConnection {
    socket: Socket,
    address: String,
    params: ConnectParams,
    inflight: Semaphore,
    closed: AtomicBool,
    next_request_id: AtomicU64,
}

impl NngConnection {
    /// Dial the server and, when credentials are configured, authenticate.
    pub async fn establish(url: &str, params: ConnectParams) -> Result<Self, Error> {
        let address = dial_address(url, params.tls.is_some());

        let socket = Socket::new(Protocol::Req0)
            .map_err(|e| Error::Connection(format!("failed to create socket: {}", e)))?;

        socket
            .set_opt::<nng::options::RecvMaxSize>(MAX_MESSAGE_SIZE + framing::HEADER_SIZE)
            .map_err(|e| Error::Connection(format!("failed to set max message size: {}", e)))?;

        if let Some(timeout) = params.response_timeout {
            socket
                .set_opt::<nng::options::SendTimeout>(Some(timeout))
                .map_err(|e| Error::Connection(format!("failed to set send timeout: {}", e)))?;
            socket
                .set_opt::<nng::options::RecvTimeout>(Some(timeout))
                .map_err(|e| Error::Connection(format!("failed to set recv timeout: {}", e)))?;
        }

        if let Some(tls) = &params.tls {
            configure_tls(&socket, tls)?;
        }

        socket
            .dial(&address)
            .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", address, e)))?;

        tracing::debug!(%address, tls = params.tls.is_some(), "dialed server");

        let conn = Self {
            socket,
            address,
            inflight: Semaphore::new(params.max_inflight),
            params,
            closed: AtomicBool::new(false),
            next_request_id: AtomicU64::new(1),
        };

        if conn.params.has_credentials() {
            if let Err(e) = conn.authenticate().await {
                conn.shutdown();
                return Err(e);
            }
        }

        Ok(conn)
    }

    /// Present the configured credentials to the server.
    async fn authenticate(&self) -> Result<(), Error> {
        let request = Request::authentication(
            self.next_request_id(),
            &self.params.username,
            &self.params.password,
        );
        let response = self.round_trip(&request).await?;

        if response.is_success() {
            tracing::debug!(address = %self.address, username = %self.params.username, "authenticated");
            return Ok(());
        }

        tracing::warn!(
            address = %self.address,
            code = response.status.code,
            "authentication rejected"
        );
        Err(Error::Authentication(response.status.message))
    }

    /// Close a server-side session opened by session-bound scripts.
    pub async fn close_session(&self, session: impl Into<String>) -> Result<(), Error> {
        let request = Request::close_session(self.next_request_id(), session);
        let response = self.round_trip(&request).await?;
        check_status(response).map(|_| ())
    }

    /// Send one request and wait for its reply.
    async fn round_trip(&self, request: &Request) -> Result<Response, Error> {
        if self.is_closed() {
            return Err(Error::Connection("connection is closed".to_string()));
        }

        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|_| Error::Connection("connection is closed".to_string()))?;

        let mut ctx = self.create_context()?;
        let framed = framing::encode_request(request)?;
        let timeout = self.params.response_timeout;

        let msg = Message::from(framed.as_slice());
        ctx.send(msg, timeout)
            .await
            .map_err(|(_, e)| self.transport_error("send request", e))?;

        let response_msg = ctx
            .receive(timeout)
            .await
            .map_err(|e| self.transport_error("receive response", e))?;

        let response = framing::decode_response(response_msg.as_slice())?;

        if response.request_id != request.request_id {
            return Err(Error::Protocol(grackle_proto::Error::InvalidMessage(format!(
                "response ID mismatch: expected {}, got {}",
                request.request_id, response.request_id
            ))));
        }

        Ok(response)
    }

    /// Create an async context for this connection.
    fn create_context(&self) -> Result<AsyncContext<'_>, Error> {
        AsyncContext::try_from(&self.socket)
            .map_err(|e| Error::Connection(format!("failed to create async context: {}", e)))
    }

    /// Map a socket error, marking the connection closed when the transport
    /// itself is gone.
    fn transport_error(&self, action: &str, e: nng::Error) -> Error {
        match e {
            nng::Error::TimedOut => Error::Timeout,
            nng::Error::Closed
            | nng::Error::ConnectionRefused
            | nng::Error::ConnectionReset
            | nng::Error::ConnectionAborted
            | nng::Error::ConnectionShutdown => {
                tracing::warn!(address = %self.address, error = %e, "transport failed, marking connection closed");
                self.shutdown();
                Error::Connection(format!("failed to {}: {}", action, e))
            }
            _ => Error::Connection(format!("failed to {}: {}", action, e)),
        }
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.inflight.close();
            self.socket.close();
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the dialed address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the settings this connection was opened with.
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }
}

#[async_trait]
impl Connection for NngConnection {
    async fn submit(&self, script: Script) -> Result<Response, Error> {
        let request = Request::eval(
            self.next_request_id(),
            script,
            &self.params.lang,
            self.params.traversal_source.as_ref(),
        );
        let response = self.round_trip(&request).await?;
        check_status(response)
    }

    async fn close(&self) -> Result<(), Error> {
        self.shutdown();
        tracing::debug!(address = %self.address, "connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for NngConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NngConnection")
            .field("address", &self.address)
            .field("params", &self.params)
            .field("closed", &self.is_closed())
            .field("available_permits", &self.inflight.available_permits())
            .finish()
    }
}

/// Turn a non-success status into an error.
fn check_status(response: Response) -> Result<Response, Error> {
    match response.status.code {
        code if status_codes::is_success(code) => Ok(response),
        status_codes::UNAUTHORIZED | status_codes::AUTHENTICATE => {
            Err(Error::Authentication(response.status.message))
        }
        status_codes::SERVER_TIMEOUT => Err(Error::Timeout),
        code => Err(Error::Server {
            code,
            message: response.status.message,
        }),
    }
}

/// Load the TLS material into the socket; dialers inherit it.
#[cfg(feature = "tls")]
fn configure_tls(socket: &Socket, tls: &TlsConfig) -> Result<(), Error> {
    use nng::options::transport::tls::{CaFile, CertKeyFile};

    if let Some(path) = &tls.ca_file {
        socket
            .set_opt::<CaFile>(tls_path(path)?)
            .map_err(|e| Error::Connection(format!("failed to load CA file: {}", e)))?;
    }
    if let Some(path) = &tls.cert_key_file {
        socket
            .set_opt::<CertKeyFile>(tls_path(path)?)
            .map_err(|e| Error::Connection(format!("failed to load certificate: {}", e)))?;
    }
    Ok(())
}

#[cfg(not(feature = "tls"))]
fn configure_tls(_socket: &Socket, _tls: &TlsConfig) -> Result<(), Error> {
    Err(Error::Config(
        "TLS requested but grackle-client was built without the `tls` feature".to_string(),
    ))
}

#[cfg(feature = "tls")]
fn tls_path(path: &std::path::Path) -> Result<String, Error> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Config(format!("TLS path is not valid UTF-8: {}", path.display())))
}

/// Rewrite a `tcp://` endpoint to its TLS form when TLS is enabled.
fn dial_address(url: &str, tls: bool) -> String {
    match url.strip_prefix("tcp://") {
        Some(rest) if tls => format!("tls+tcp://{}", rest),
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use serde_json::json;

    use grackle_proto::message::RequestArgs;
    use grackle_proto::Operation;

    use super::*;
    use crate::config::{AcquireOptions, PoolConfig, TlsConfig};

    static NEXT_ADDRESS: AtomicUsize = AtomicUsize::new(0);

    /// A REP socket answering on an inproc address from a worker thread.
    struct ReplyServer {
        socket: Socket,
        address: String,
        requests: Arc<AtomicUsize>,
        worker: Option<thread::JoinHandle<()>>,
    }

    impl ReplyServer {
        fn start<H>(handler: H) -> Self
        where
            H: Fn(Request) -> Response + Send + 'static,
        {
            let address = format!(
                "inproc://grackle-transport-{}",
                NEXT_ADDRESS.fetch_add(1, Ordering::SeqCst)
            );
            let socket = Socket::new(Protocol::Rep0).unwrap();
            socket.listen(&address).unwrap();

            let requests = Arc::new(AtomicUsize::new(0));
            let worker = {
                let socket = socket.clone();
                let requests = requests.clone();
                thread::spawn(move || {
                    while let Ok(msg) = socket.recv() {
                        let Ok(request) = framing::decode_request(msg.as_slice()) else {
                            break;
                        };
                        requests.fetch_add(1, Ordering::SeqCst);
                        let frame = framing::encode_response(&handler(request)).unwrap();
                        if socket.send(Message::from(frame.as_slice())).is_err() {
                            break;
                        }
                    }
                })
            };

            Self {
                socket,
                address,
                requests,
                worker: Some(worker),
            }
        }

        fn requests(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }

        fn params(&self) -> ConnectParams {
            PoolConfig::new(&self.address).connect_params(&AcquireOptions::default())
        }
    }

    impl Drop for ReplyServer {
        fn drop(&mut self) {
            self.socket.close();
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }

    fn echo(request: Request) -> Response {
        match request.args {
            RequestArgs::Eval(args) => Response::ok(
                request.request_id,
                json!({ "gremlin": args.gremlin, "language": args.language }),
            ),
            _ => Response::ok(request.request_id, serde_json::Value::Null),
        }
    }

    fn slow_echo(delay: Duration) -> impl Fn(Request) -> Response + Send + 'static {
        move |request| {
            thread::sleep(delay);
            echo(request)
        }
    }

    fn check_credentials(request: Request) -> Response {
        match request.args {
            RequestArgs::Authentication(args) if args.sasl == "\0stephen\0secret" => {
                Response::ok(request.request_id, serde_json::Value::Null)
            }
            RequestArgs::Authentication(_) => Response::error(
                request.request_id,
                status_codes::UNAUTHORIZED,
                "invalid credentials",
            ),
            _ => echo(request),
        }
    }

    #[test]
    fn test_dial_address() {
        assert_eq!(dial_address("tcp://db:8182", false), "tcp://db:8182");
        assert_eq!(dial_address("tcp://db:8182", true), "tls+tcp://db:8182");
        assert_eq!(dial_address("tls+tcp://db:8182", true), "tls+tcp://db:8182");
        assert_eq!(dial_address("ipc:///tmp/g.sock", true), "ipc:///tmp/g.sock");
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(Response::ok(1, serde_json::json!([1]))).is_ok());
        assert!(matches!(
            check_status(Response::error(1, status_codes::AUTHENTICATE, "who")),
            Err(Error::Authentication(_))
        ));
        assert!(matches!(
            check_status(Response::error(1, status_codes::SERVER_TIMEOUT, "slow")),
            Err(Error::Timeout)
        ));
        assert!(matches!(
            check_status(Response::error(1, status_codes::SCRIPT_EVALUATION_ERROR, "oops")),
            Err(Error::Server { code: 597, .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_round_trip() {
        let server = ReplyServer::start(echo);
        let conn = NngConnection::establish(&server.address, server.params())
            .await
            .unwrap();

        let response = conn.submit(Script::new("g.V().count()")).await.unwrap();
        assert_eq!(
            response.into_data(),
            json!({ "gremlin": "g.V().count()", "language": "gremlin-groovy" })
        );
        assert_eq!(server.requests(), 1);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_open_authenticates_with_credentials() {
        let server = ReplyServer::start(check_credentials);
        let mut params = server.params();
        params.username = "stephen".into();
        params.password = "secret".into();

        let conn = NngConnection::establish(&server.address, params).await.unwrap();
        assert_eq!(server.requests(), 1);

        assert!(conn.submit(Script::new("1+1")).await.is_ok());
        assert_eq!(server.requests(), 2);
    }

    #[tokio::test]
    async fn test_rejected_authentication_fails_open() {
        let server = ReplyServer::start(check_credentials);
        let mut params = server.params();
        params.username = "stephen".into();
        params.password = "wrong".into();

        let result = NngConnection::establish(&server.address, params).await;
        assert!(matches!(
            result,
            Err(Error::Authentication(message)) if message == "invalid credentials"
        ));
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_response_id_mismatch_rejected() {
        let server = ReplyServer::start(|request: Request| {
            Response::ok(request.request_id + 100, json!(1))
        });
        let conn = NngConnection::establish(&server.address, server.params())
            .await
            .unwrap();

        assert!(matches!(
            conn.submit(Script::new("g.V()")).await,
            Err(Error::Protocol(grackle_proto::Error::InvalidMessage(_)))
        ));
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection_open() {
        let server = ReplyServer::start(|request: Request| {
            Response::error(
                request.request_id,
                status_codes::SCRIPT_EVALUATION_ERROR,
                "no such property",
            )
        });
        let conn = NngConnection::establish(&server.address, server.params())
            .await
            .unwrap();

        assert!(matches!(
            conn.submit(Script::new("g.V().foo()")).await,
            Err(Error::Server { code: 597, message }) if message == "no such property"
        ));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_response_timeout() {
        let server = ReplyServer::start(slow_echo(Duration::from_millis(300)));
        let mut params = server.params();
        params.response_timeout = Some(Duration::from_millis(50));
        let conn = NngConnection::establish(&server.address, params).await.unwrap();

        assert!(matches!(
            conn.submit(Script::new("g.V()")).await,
            Err(Error::Timeout)
        ));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_max_inflight_enforced() {
        let server = ReplyServer::start(slow_echo(Duration::from_millis(150)));
        let mut params = server.params();
        params.max_inflight = 1;
        let conn = NngConnection::establish(&server.address, params).await.unwrap();

        let (first, second, permits) = tokio::join!(
            conn.submit(Script::new("first")),
            tokio::time::timeout(Duration::from_millis(50), conn.submit(Script::new("second"))),
            async {
                tokio::time::sleep(Duration::from_millis(25)).await;
                conn.inflight.available_permits()
            }
        );

        assert!(first.is_ok());
        assert!(second.is_err(), "second submit ran past the inflight budget");
        assert_eq!(permits, 0);
        assert_eq!(conn.inflight.available_permits(), 1);
        assert_eq!(server.requests(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_marks_closed() {
        let server = ReplyServer::start(echo);
        let conn = NngConnection::establish(&server.address, server.params())
            .await
            .unwrap();

        assert!(matches!(
            conn.transport_error("receive response", nng::Error::TimedOut),
            Error::Timeout
        ));
        assert!(!conn.is_closed());

        assert!(matches!(
            conn.transport_error("receive response", nng::Error::ConnectionReset),
            Error::Connection(_)
        ));
        assert!(conn.is_closed());

        // A closed connection fails fast without reaching the server.
        assert!(matches!(
            conn.submit(Script::new("g.V()")).await,
            Err(Error::Connection(_))
        ));
        assert_eq!(server.requests(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_inflight_request() {
        let server = ReplyServer::start(slow_echo(Duration::from_millis(300)));
        let conn = NngConnection::establish(&server.address, server.params())
            .await
            .unwrap();

        let (result, closed) = tokio::join!(conn.submit(Script::new("g.V()")), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            conn.close().await
        });

        assert!(closed.is_ok());
        assert!(matches!(result, Err(Error::Connection(_))));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_session() {
        let server = ReplyServer::start(|request: Request| match request.args {
            RequestArgs::Close(args) if request.op == Operation::Close && args.session == "s-1" => {
                Response::ok(request.request_id, serde_json::Value::Null)
            }
            _ => Response::error(request.request_id, status_codes::SERVER_ERROR, "unexpected"),
        });
        let conn = NngConnection::establish(&server.address, server.params())
            .await
            .unwrap();

        assert!(conn.close_session("s-1").await.is_ok());
        assert!(conn.close_session("s-2").await.is_err());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_configure_tls_without_files() {
        let socket = Socket::new(Protocol::Req0).unwrap();
        assert!(configure_tls(&socket, &TlsConfig::default()).is_ok());
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_tls_requires_feature() {
        let socket = Socket::new(Protocol::Req0).unwrap();
        assert!(matches!(
            configure_tls(&socket, &TlsConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_tls_with_missing_ca_file_fails_open() {
        let mut params = PoolConfig::new("tcp://127.0.0.1:1")
            .with_tls(TlsConfig {
                ca_file: Some("/nonexistent/grackle-ca.pem".into()),
                cert_key_file: None,
            })
            .connect_params(&AcquireOptions::default());
        params.response_timeout = Some(Duration::from_millis(100));

        assert!(NngConnection::establish("tcp://127.0.0.1:1", params).await.is_err());
    }
}
