//! Configuration management for the Vitrine server
//!
//! Values come from, in increasing precedence: built-in defaults,
//! `conf/application.yml` (optional), `VITRINE_`-prefixed environment
//! variables, and command line overrides.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use config::{Config, Environment, File};
use vitrine_common::parse_duration;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";

pub const SERVER_ADDRESS: &str = "server.address";
pub const SERVER_PORT: &str = "server.port";
pub const HOSTNAME: &str = "vitrine.hostname";
pub const PUBLIC_PORT: &str = "vitrine.public_port";
pub const STORE_BASE_KEY: &str = "store.base_key";
pub const STORE_SESSION_TTL: &str = "store.session_ttl";
pub const DOCKER_HOST: &str = "runtime.docker_host";
pub const RESOLVER_CACHE_CAPACITY: &str = "resolver.cache_capacity";
pub const CLEANUP_INTERVAL: &str = "cleanup.interval";
pub const LIVECHECK_TIMEOUT: &str = "livecheck.timeout";
pub const LIVECHECK_REQUEST_TIMEOUT: &str = "livecheck.request_timeout";
pub const PROXY_TIMEOUT: &str = "proxy.timeout";
pub const LOGGING_LEVEL: &str = "logging.level";
pub const LOGGING_FILE_ENABLED: &str = "logging.file_enabled";
pub const LOGGING_DIR: &str = "logging.dir";

const DEFAULT_SERVER_PORT: u16 = 8080;

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(name = "vitrine-server", about = "On-demand, lease-limited exhibit server")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// HTTP listen port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
    /// Externally visible host name
    #[arg(long = "hostname")]
    pub hostname: Option<String>,
    /// Docker Engine endpoint, e.g. tcp://127.0.0.1:2375
    #[arg(long = "docker-host", env = "DOCKER_HOST")]
    pub docker_host: Option<String>,
    /// Key prefix in the coordination store
    #[arg(long = "base-key")]
    pub base_key: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load from the process arguments
    pub fn new() -> anyhow::Result<Self> {
        Self::load(Cli::parse())
    }

    pub fn load(args: Cli) -> anyhow::Result<Self> {
        let file = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut builder = Config::builder()
            .set_default(SERVER_ADDRESS, "0.0.0.0")?
            .set_default(SERVER_PORT, i64::from(DEFAULT_SERVER_PORT))?
            .set_default(HOSTNAME, "localhost")?
            .set_default(STORE_BASE_KEY, "vitrine")?
            .set_default(STORE_SESSION_TTL, "10s")?
            .set_default(DOCKER_HOST, "tcp://127.0.0.1:2375")?
            .set_default(RESOLVER_CACHE_CAPACITY, 100)?
            .set_default(CLEANUP_INTERVAL, "10s")?
            .set_default(LIVECHECK_TIMEOUT, "2m")?
            .set_default(LIVECHECK_REQUEST_TIMEOUT, "2s")?
            .set_default(PROXY_TIMEOUT, "5s")?
            .set_default(LOGGING_LEVEL, "info")?
            .set_default(LOGGING_FILE_ENABLED, false)?
            .set_default(LOGGING_DIR, "logs")?
            .add_source(File::from(file).required(args.config.is_some()))
            .add_source(
                Environment::with_prefix("VITRINE")
                    .separator(".")
                    .try_parsing(true),
            );

        if let Some(port) = args.port {
            builder = builder.set_override(SERVER_PORT, i64::from(port))?;
        }
        if let Some(hostname) = args.hostname {
            builder = builder.set_override(HOSTNAME, hostname)?;
        }
        if let Some(docker_host) = args.docker_host {
            builder = builder.set_override(DOCKER_HOST, docker_host)?;
        }
        if let Some(base_key) = args.base_key {
            builder = builder.set_override(STORE_BASE_KEY, base_key)?;
        }

        let config = builder
            .build()
            .context("failed to build configuration")?;
        Ok(Configuration { config })
    }

    fn duration(&self, key: &str) -> anyhow::Result<Duration> {
        let raw = self
            .config
            .get_string(key)
            .with_context(|| format!("missing '{}'", key))?;
        parse_duration(&raw).map_err(|e| anyhow::anyhow!("invalid '{}': {}", key, e))
    }

    // ========================================================================
    // Server
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string(SERVER_ADDRESS)
            .unwrap_or("0.0.0.0".to_string())
    }

    pub fn server_port(&self) -> anyhow::Result<u16> {
        let port = self.config.get_int(SERVER_PORT)?;
        u16::try_from(port).with_context(|| format!("'{}' out of range: {}", SERVER_PORT, port))
    }

    pub fn hostname(&self) -> String {
        self.config
            .get_string(HOSTNAME)
            .unwrap_or("localhost".to_string())
    }

    /// Port clients use to reach this server; defaults to the listen port
    pub fn public_port(&self) -> anyhow::Result<u16> {
        match self.config.get_int(PUBLIC_PORT) {
            Ok(port) => u16::try_from(port)
                .with_context(|| format!("'{}' out of range: {}", PUBLIC_PORT, port)),
            Err(_) => self.server_port(),
        }
    }

    // ========================================================================
    // Coordination store
    // ========================================================================

    pub fn base_key(&self) -> String {
        self.config
            .get_string(STORE_BASE_KEY)
            .unwrap_or("vitrine".to_string())
    }

    pub fn session_ttl(&self) -> anyhow::Result<Duration> {
        self.duration(STORE_SESSION_TTL)
    }

    // ========================================================================
    // Runtime and lifecycle
    // ========================================================================

    pub fn docker_host(&self) -> String {
        self.config
            .get_string(DOCKER_HOST)
            .unwrap_or("tcp://127.0.0.1:2375".to_string())
    }

    pub fn resolver_cache_capacity(&self) -> u64 {
        self.config
            .get_int(RESOLVER_CACHE_CAPACITY)
            .ok()
            .and_then(|c| u64::try_from(c).ok())
            .unwrap_or(100)
    }

    pub fn cleanup_interval(&self) -> anyhow::Result<Duration> {
        self.duration(CLEANUP_INTERVAL)
    }

    pub fn livecheck_timeout(&self) -> anyhow::Result<Duration> {
        self.duration(LIVECHECK_TIMEOUT)
    }

    pub fn livecheck_request_timeout(&self) -> anyhow::Result<Duration> {
        self.duration(LIVECHECK_REQUEST_TIMEOUT)
    }

    pub fn proxy_timeout(&self) -> anyhow::Result<Duration> {
        self.duration(PROXY_TIMEOUT)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string(LOGGING_DIR).ok(),
            self.config.get_bool(LOGGING_FILE_ENABLED).unwrap_or(false),
            self.config
                .get_string(LOGGING_LEVEL)
                .unwrap_or("info".to_string()),
        )
    }
}
