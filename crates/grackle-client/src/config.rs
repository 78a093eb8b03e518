//! Pool and connection configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use grackle_proto::{Aliases, DEFAULT_LANGUAGE};

use crate::error::Error;

/// Default server endpoint.
pub const DEFAULT_URL: &str = "tcp://127.0.0.1:8182";

/// Default maximum number of connections to the endpoint.
pub const DEFAULT_MAX_CONNS: usize = 4;

/// Default number of connections opened by pool initialization.
pub const DEFAULT_MIN_CONNS: usize = 1;

/// Default number of callers that may share one connection.
pub const DEFAULT_MAX_TIMES_ACQUIRED: usize = 16;

/// Default number of outstanding requests per connection.
pub const DEFAULT_MAX_INFLIGHT: usize = 64;

/// TLS settings. Present means the transport is encrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// CA bundle used to verify the server certificate.
    pub ca_file: Option<PathBuf>,
    /// Client certificate and unencrypted private key, in one PEM file.
    pub cert_key_file: Option<PathBuf>,
}

/// Configuration for a connection pool.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Server endpoint (e.g. "tcp://127.0.0.1:8182").
    pub url: String,
    /// Enables an encrypted transport when set.
    pub tls: Option<TlsConfig>,
    /// Username for server authentication; empty disables authentication.
    pub username: String,
    /// Password for server authentication.
    pub password: String,
    /// Default script language.
    pub lang: String,
    /// Default traversal-source aliases.
    pub traversal_source: Option<Aliases>,
    /// Per-request timeout, in seconds on the wire. `None` waits forever.
    #[serde(with = "duration_secs")]
    pub response_timeout: Option<Duration>,
    /// Maximum number of connections to the endpoint.
    pub max_conns: usize,
    /// Number of connections opened when the pool is initialized.
    pub min_conns: usize,
    /// Maximum number of callers sharing one connection.
    pub max_times_acquired: usize,
    /// Maximum outstanding requests on one connection.
    pub max_inflight: usize,
}

impl PoolConfig {
    /// Create a new pool configuration for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: None,
            username: String::new(),
            password: String::new(),
            lang: DEFAULT_LANGUAGE.to_string(),
            traversal_source: None,
            response_timeout: None,
            max_conns: DEFAULT_MAX_CONNS,
            min_conns: DEFAULT_MIN_CONNS,
            max_times_acquired: DEFAULT_MAX_TIMES_ACQUIRED,
            max_inflight: DEFAULT_MAX_INFLIGHT,
        }
    }

    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Load a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Enable TLS.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the authentication credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the default script language.
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Set the default traversal-source aliases.
    pub fn with_traversal_source(mut self, aliases: Aliases) -> Self {
        self.traversal_source = Some(aliases);
        self
    }

    /// Set the per-request timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Set the maximum connections.
    pub fn with_max_conns(mut self, max: usize) -> Self {
        self.max_conns = max;
        self
    }

    /// Set the minimum connections.
    pub fn with_min_conns(mut self, min: usize) -> Self {
        self.min_conns = min;
        self
    }

    /// Set how many callers may share one connection.
    pub fn with_max_times_acquired(mut self, max: usize) -> Self {
        self.max_times_acquired = max;
        self
    }

    /// Set the per-connection outstanding-request budget.
    pub fn with_max_inflight(mut self, max: usize) -> Self {
        self.max_inflight = max;
        self
    }

    /// Check the capacity bounds and timeout.
    pub fn validate(&self) -> Result<(), Error> {
        if self.url.is_empty() {
            return Err(Error::Config("url must not be empty".to_string()));
        }
        if self.max_conns == 0 {
            return Err(Error::Config("max_conns must be at least 1".to_string()));
        }
        if self.min_conns > self.max_conns {
            return Err(Error::Config(format!(
                "min_conns ({}) exceeds max_conns ({})",
                self.min_conns, self.max_conns
            )));
        }
        if self.max_times_acquired == 0 {
            return Err(Error::Config(
                "max_times_acquired must be at least 1".to_string(),
            ));
        }
        if self.max_inflight == 0 {
            return Err(Error::Config("max_inflight must be at least 1".to_string()));
        }
        if self.response_timeout.is_some_and(|d| d.is_zero()) {
            return Err(Error::Config(
                "response_timeout must be positive; omit it to wait forever".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the settings for a new connection, applying per-call overrides.
    ///
    /// Empty strings, a zero inflight budget and a zero timeout count as
    /// unset and fall back to the pool defaults.
    pub fn connect_params(&self, overrides: &AcquireOptions) -> ConnectParams {
        let text = |value: &Option<String>, default: &String| {
            value
                .as_ref()
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .clone()
        };

        ConnectParams {
            username: text(&overrides.username, &self.username),
            password: text(&overrides.password, &self.password),
            lang: text(&overrides.lang, &self.lang),
            traversal_source: overrides
                .traversal_source
                .clone()
                .filter(|aliases| !aliases.is_empty())
                .or_else(|| self.traversal_source.clone()),
            max_inflight: overrides
                .max_inflight
                .filter(|n| *n > 0)
                .unwrap_or(self.max_inflight),
            response_timeout: overrides
                .response_timeout
                .filter(|d| !d.is_zero())
                .or(self.response_timeout),
            tls: self.tls.clone(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_URL)
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("url", &self.url)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("lang", &self.lang)
            .field("traversal_source", &self.traversal_source)
            .field("response_timeout", &self.response_timeout)
            .field("max_conns", &self.max_conns)
            .field("min_conns", &self.min_conns)
            .field("max_times_acquired", &self.max_times_acquired)
            .field("max_inflight", &self.max_inflight)
            .finish()
    }
}

/// Per-call overrides for [`ConnectionPool::acquire_with`].
///
/// Overrides shape connections opened during that call; reused and shared
/// connections keep the settings they were opened with.
///
/// [`ConnectionPool::acquire_with`]: crate::pool::ConnectionPool::acquire_with
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub lang: Option<String>,
    pub traversal_source: Option<Aliases>,
    pub max_inflight: Option<usize>,
    pub response_timeout: Option<Duration>,
}

/// Settings handed to a [`ConnectionFactory`] when opening a connection.
///
/// [`ConnectionFactory`]: crate::connection::ConnectionFactory
#[derive(Clone, PartialEq)]
pub struct ConnectParams {
    pub username: String,
    pub password: String,
    pub lang: String,
    pub traversal_source: Option<Aliases>,
    pub max_inflight: usize,
    pub response_timeout: Option<Duration>,
    pub tls: Option<TlsConfig>,
}

impl ConnectParams {
    /// Check if credentials should be presented to the server.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("username", &self.username)
            .field("lang", &self.lang)
            .field("traversal_source", &self.traversal_source)
            .field("max_inflight", &self.max_inflight)
            .field("response_timeout", &self.response_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Serde adapter storing an optional duration as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(d)? {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                Ok(Some(Duration::from_secs_f64(secs)))
            }
            Some(secs) => Err(D::Error::custom(format!("invalid timeout: {}", secs))),
        }
    }
}
