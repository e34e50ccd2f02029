//! Broker configuration: TOML file on disk, with environment-variable
//! overrides, mirroring the teacher's `Config`/`Default`/`config_dir()`
//! layering.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URI scheme used for every endpoint address this broker serves
    /// (spec.md §3's `<scheme>`).
    pub scheme: String,
    pub bind_addr: String,
    pub ssl_cert: Option<PathBuf>,
    pub ssl_key: Option<PathBuf>,
    /// CA bundle used to verify client certificates during the TLS
    /// handshake; the verified leaf certificate's CN becomes a session's
    /// `common_name`.
    pub client_ca_cert: Option<PathBuf>,
    /// Directory the durable queue backend may use for spool files. The
    /// in-memory backend ignores this; it exists so a future durable
    /// backend has a configured home.
    pub broker_spool: PathBuf,
    pub accept_consumers: usize,
    pub delivery_consumers: usize,
    /// Floor, in seconds, below which a redelivery backoff is never
    /// shrunk further (spec.md §4.5).
    pub message_ttl_floor_secs: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheme: "cth".to_string(),
            bind_addr: "0.0.0.0:8142".to_string(),
            ssl_cert: None,
            ssl_key: None,
            client_ca_cert: None,
            broker_spool: Config::default_spool_dir(),
            accept_consumers: 4,
            delivery_consumers: 16,
            message_ttl_floor_secs: 1,
        }
    }
}

impl Config {
    fn default_spool_dir() -> PathBuf {
        if cfg!(test) || std::env::var("BROKER_ENV").as_deref() == Ok("test") {
            return std::env::temp_dir().join("cthulhu-broker-test-spool");
        }
        std::env::var("BROKER_SPOOL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/cthulhu-broker/spool"))
    }

    /// Load config from `path` (if it exists) layered under defaults,
    /// then apply `BROKER_*` environment variable overrides. Missing file
    /// is not an error — callers run on defaults plus env overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Config::default()
        };

        if let Ok(scheme) = std::env::var("BROKER_SCHEME") {
            config.scheme = scheme;
        }
        if let Ok(bind_addr) = std::env::var("BROKER_BIND_ADDR") {
            config.bind_addr = bind_addr;
        }
        if let Ok(cert) = std::env::var("BROKER_SSL_CERT") {
            config.ssl_cert = Some(PathBuf::from(cert));
        }
        if let Ok(key) = std::env::var("BROKER_SSL_KEY") {
            config.ssl_key = Some(PathBuf::from(key));
        }
        if let Ok(ca) = std::env::var("BROKER_CLIENT_CA_CERT") {
            config.client_ca_cert = Some(PathBuf::from(ca));
        }

        Ok(config)
    }
}
