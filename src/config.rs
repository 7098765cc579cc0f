use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Server settings, read once from `MEFTAHI_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// WAL appends between background compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5480,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("{key}={raw:?} is not valid ({e}), using default");
            default
        }),
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take defaults; unparsable values
    /// take defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let metrics_port = lookup("MEFTAHI_METRICS_PORT").and_then(|raw| match raw.trim().parse() {
            Ok(port) => Some(port),
            Err(e) => {
                warn!("MEFTAHI_METRICS_PORT={raw:?} is not valid ({e}), metrics disabled");
                None
            }
        });
        Self {
            bind: lookup("MEFTAHI_BIND").unwrap_or(defaults.bind),
            port: parse_or(&lookup, "MEFTAHI_PORT", defaults.port),
            data_dir: lookup("MEFTAHI_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_connections: parse_or(&lookup, "MEFTAHI_MAX_CONNECTIONS", defaults.max_connections).max(1),
            compact_threshold: parse_or(&lookup, "MEFTAHI_COMPACT_THRESHOLD", defaults.compact_threshold),
            metrics_port,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("meftahi.wal")
    }
}
