//! Grackle Command-Line Client
//!
//! Opens a connection pool to a graph server, submits a script, and prints
//! the response data.

mod formatter;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use serde_json::Value;

use formatter::OutputFormat;
use grackle_client::{ConnectionPool, PoolConfig, Script};
use grackle_proto::Bindings;

/// Grackle Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "grackle")]
#[command(version, about = "Submit scripts to a graph server through a connection pool")]
pub struct Args {
    /// Script to evaluate
    pub script: String,

    /// JSON pool configuration file; flags override its values
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Server endpoint (tcp://, tls+tcp:// or ipc://)
    #[arg(short = 'H', long)]
    pub url: Option<String>,

    /// Username for server authentication
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password for server authentication
    #[arg(short = 'p', long, env = "GRACKLE_PASSWORD")]
    pub password: Option<String>,

    /// Script language
    #[arg(long)]
    pub lang: Option<String>,

    /// Maximum connections in the pool
    #[arg(long)]
    pub max_conns: Option<usize>,

    /// Connections opened at startup
    #[arg(long)]
    pub min_conns: Option<usize>,

    /// Callers that may share one connection
    #[arg(long)]
    pub max_times_acquired: Option<usize>,

    /// Outstanding requests per connection
    #[arg(long)]
    pub max_inflight: Option<usize>,

    /// Per-request timeout in seconds; must be positive
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Script binding as name=value; value is parsed as JSON, else taken as a string
    #[arg(short = 'b', long = "binding", value_parser = parse_binding)]
    pub bindings: Vec<(String, Value)>,

    /// Run the script in this server-side session
    #[arg(long)]
    pub session: Option<String>,

    /// Submit the script this many times concurrently
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// Output format
    #[arg(long, default_value = "pretty", value_enum)]
    pub format: OutputFormat,
}

impl Args {
    /// Build the pool configuration from the config file and flags.
    pub fn pool_config(&self) -> Result<PoolConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => PoolConfig::from_file(path)?,
            None => PoolConfig::default(),
        };

        if let Some(url) = &self.url {
            config.url = url.clone();
        }
        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(lang) = &self.lang {
            config.lang = lang.clone();
        }
        if let Some(max) = self.max_conns {
            config.max_conns = max;
        }
        if let Some(min) = self.min_conns {
            config.min_conns = min;
        }
        if let Some(max) = self.max_times_acquired {
            config.max_times_acquired = max;
        }
        if let Some(max) = self.max_inflight {
            config.max_inflight = max;
        }
        if let Some(secs) = self.timeout {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(format!("invalid timeout: {}", secs).into());
            }
            config.response_timeout = Some(Duration::from_secs_f64(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// Build the script to submit.
    pub fn script(&self) -> Script {
        let bindings: Bindings = self.bindings.iter().cloned().collect();
        let mut script = Script::new(&self.script).with_bindings(bindings);
        if let Some(session) = &self.session {
            script = script.with_session(session);
        }
        script
    }
}

/// Parse a `name=value` binding.
fn parse_binding(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("binding must be name=value, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("binding name is empty in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grackle=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.pool_config()?;
    tracing::info!(url = %config.url, max_conns = config.max_conns, "connecting");

    let pool = ConnectionPool::connect(config).await?;
    let script = args.script();

    let results = join_all((0..args.repeat.max(1)).map(|_| pool.submit(script.clone()))).await;

    let mut failures = 0;
    for result in results {
        match result {
            Ok(response) => println!("{}", formatter::format_data(&response.into_data(), args.format)),
            Err(e) => {
                failures += 1;
                eprintln!("{}", e);
            }
        }
    }

    let status = pool.status();
    tracing::info!(
        connections = status.available.len() + status.acquired.len(),
        failures,
        "done"
    );

    pool.close().await?;

    if failures > 0 {
        return Err(format!("{} of {} submissions failed", failures, args.repeat.max(1)).into());
    }
    Ok(())
}
