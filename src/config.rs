//! Server configuration loaded from environment variables.
//!
//! Every setting has a default, so the server starts with zero
//! configuration. Invalid values are logged and the default is kept.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::protocol::DEFAULT_CAPACITY;

/// Prefix shared by every environment variable read here.
pub const ENV_PREFIX: &str = "CHAT_RELAY_";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `CHAT_RELAY_ADDR`. Default: `0.0.0.0:8040`
    pub addr: SocketAddr,

    /// Pending-connection queue length passed to `listen`.
    /// Env: `CHAT_RELAY_BACKLOG`. Default: `20`
    pub backlog: u32,

    /// Per-connection receive ring size; frames larger than this are
    /// discarded. Env: `CHAT_RELAY_BUFFER_CAPACITY`. Default: `8192`
    pub buffer_capacity: usize,

    /// Largest chunk returned by one download request.
    /// Env: `CHAT_RELAY_BLOCK_SIZE`. Default: `4096`
    pub block_size: usize,

    /// Env: `CHAT_RELAY_SNAPSHOT_INTERVAL` (seconds). Default: `60`
    pub snapshot_interval: Duration,

    /// Env: `CHAT_RELAY_SNAPSHOT_PATH`. Default: `user.db`
    pub snapshot_path: PathBuf,

    /// Directory holding one file per transfer.
    /// Env: `CHAT_RELAY_BLOB_DIR`. Default: `./blobs`
    pub blob_dir: PathBuf,

    /// Frames that may queue towards one slow connection.
    /// Env: `CHAT_RELAY_OUTBOUND_CAPACITY`. Default: `1024`
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 8040).into(),
            backlog: 20,
            buffer_capacity: DEFAULT_CAPACITY,
            block_size: 4096,
            snapshot_interval: Duration::from_secs(60),
            snapshot_path: PathBuf::from("user.db"),
            blob_dir: PathBuf::from("./blobs"),
            outbound_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

        if let Some(value) = var("ADDR") {
            set_parsed("ADDR", &value, &mut config.addr);
        }
        if let Some(value) = var("BACKLOG") {
            set_parsed("BACKLOG", &value, &mut config.backlog);
        }
        if let Some(value) = var("BUFFER_CAPACITY") {
            set_positive("BUFFER_CAPACITY", &value, &mut config.buffer_capacity);
        }
        if let Some(value) = var("BLOCK_SIZE") {
            set_positive("BLOCK_SIZE", &value, &mut config.block_size);
        }
        if let Some(value) = var("SNAPSHOT_INTERVAL") {
            let mut secs = config.snapshot_interval.as_secs();
            set_positive("SNAPSHOT_INTERVAL", &value, &mut secs);
            config.snapshot_interval = Duration::from_secs(secs);
        }
        if let Some(value) = var("SNAPSHOT_PATH") {
            config.snapshot_path = PathBuf::from(value);
        }
        if let Some(value) = var("BLOB_DIR") {
            config.blob_dir = PathBuf::from(value);
        }
        if let Some(value) = var("OUTBOUND_CAPACITY") {
            set_positive("OUTBOUND_CAPACITY", &value, &mut config.outbound_capacity);
        }

        config
    }
}

fn set_parsed<T>(key: &str, value: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: Display,
{
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(e) => warn!(
            var = %format!("{}{}", ENV_PREFIX, key),
            value = %value,
            error = %e,
            "Invalid configuration value, using default"
        ),
    }
}

fn set_positive<T>(key: &str, value: &str, slot: &mut T)
where
    T: FromStr + Default + PartialEq + Copy,
    T::Err: Display,
{
    let mut parsed = *slot;
    set_parsed(key, value, &mut parsed);
    if parsed == T::default() {
        warn!(var = %format!("{}{}", ENV_PREFIX, key), "Value must be positive, using default");
    } else {
        *slot = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.addr.port(), 8040);
        assert_eq!(config.backlog, 20);
        assert_eq!(config.buffer_capacity, 8192);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.snapshot_path, PathBuf::from("user.db"));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("ADDR", "127.0.0.1:9000"),
            ("BLOCK_SIZE", "512"),
            ("SNAPSHOT_INTERVAL", "5"),
            ("BLOB_DIR", "/var/lib/relay"),
        ]);
        assert_eq!(config.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.block_size, 512);
        assert_eq!(config.snapshot_interval, Duration::from_secs(5));
        assert_eq!(config.blob_dir, PathBuf::from("/var/lib/relay"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("ADDR", "not-an-addr"),
            ("BACKLOG", "-3"),
            ("BUFFER_CAPACITY", "0"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.addr, defaults.addr);
        assert_eq!(config.backlog, defaults.backlog);
        assert_eq!(config.buffer_capacity, defaults.buffer_capacity);
    }
}
