use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration loaded from environment variables or TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// DuckDB database file. If not set, events live in an in-memory database
    /// and are lost on restart.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_flush_count")]
    pub flush_event_count: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Dashboard origin for CORS restrictions on the read routes.
    /// If not set, any origin may read.
    #[serde(default)]
    pub dashboard_origin: Option<String>,
    /// Graceful shutdown timeout in seconds (default: 30).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Length of ranked lists when a request gives no `limit` (default: 10).
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Secret for the daily visitor-id salt. A random one is generated at
    /// startup when unset, so derived visitor ids change across restarts.
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8000
}

const fn default_flush_count() -> usize {
    1000
}

const fn default_flush_interval_secs() -> u64 {
    60
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_limit() -> usize {
    crate::aggregate::metrics::DEFAULT_LIMIT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_path: None,
            flush_event_count: default_flush_count(),
            flush_interval_secs: default_flush_interval_secs(),
            dashboard_origin: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            default_limit: default_limit(),
            secret: None,
        }
    }
}

/// Parse an environment variable into `target`, leaving it untouched when
/// the variable is unset or malformed.
fn override_parsed<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(var = name, value = %raw, "Ignoring malformed environment override"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Environment variables override file values:
    /// - `SITEPULSE_HOST` → host
    /// - `SITEPULSE_PORT` → port
    /// - `SITEPULSE_DATABASE_PATH` → database_path
    /// - `SITEPULSE_FLUSH_COUNT` → flush_event_count
    /// - `SITEPULSE_FLUSH_INTERVAL` → flush_interval_secs
    /// - `SITEPULSE_DASHBOARD_ORIGIN` → dashboard_origin
    /// - `SITEPULSE_SHUTDOWN_TIMEOUT` → shutdown_timeout_secs
    /// - `SITEPULSE_DEFAULT_LIMIT` → default_limit
    /// - `SITEPULSE_SECRET` → secret
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config =
            config_path.map_or_else(Self::default, |path| match std::fs::read_to_string(path) {
                Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                    tracing::warn!("Failed to parse config file: {e}, using defaults");
                    Self::default()
                }),
                Err(e) => {
                    tracing::warn!("Failed to read config file: {e}, using defaults");
                    Self::default()
                }
            });

        // Environment variable overrides
        if let Ok(host) = std::env::var("SITEPULSE_HOST") {
            config.host = host;
        }
        override_parsed("SITEPULSE_PORT", &mut config.port);
        if let Ok(path) = std::env::var("SITEPULSE_DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }
        override_parsed("SITEPULSE_FLUSH_COUNT", &mut config.flush_event_count);
        override_parsed("SITEPULSE_FLUSH_INTERVAL", &mut config.flush_interval_secs);
        if let Ok(origin) = std::env::var("SITEPULSE_DASHBOARD_ORIGIN") {
            config.dashboard_origin = Some(origin);
        }
        override_parsed(
            "SITEPULSE_SHUTDOWN_TIMEOUT",
            &mut config.shutdown_timeout_secs,
        );
        override_parsed("SITEPULSE_DEFAULT_LIMIT", &mut config.default_limit);
        if let Ok(secret) = std::env::var("SITEPULSE_SECRET") {
            config.secret = Some(secret);
        }

        // Zero interval panics in tokio::time::interval; zero count behaves as one
        config.flush_event_count = config.flush_event_count.max(1);
        config.flush_interval_secs = config.flush_interval_secs.max(1);

        config
    }
}
