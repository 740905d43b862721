//! Server configuration.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerConfig::default()`]
//! 2. If a JSON config file is given and exists, deep-merge its values over defaults
//! 3. Apply `FANOUT_*` environment variable overrides
//!
//! The relay binary applies its CLI flags on top of the loaded value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the config file.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A config value was invalid.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// What the pending-broadcast queue does when it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The producing session waits for space.
    #[default]
    Block,
    /// The new envelope is discarded and counted.
    DropNewest,
}

/// Configuration for the fanout server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// HTTP path that upgrades to a WebSocket.
    pub ws_path: String,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound frame buffer.
    pub outbound_buffer: usize,
    /// How long a single delivery may wait on a full outbound buffer.
    pub write_timeout_ms: u64,
    /// Bound on the pending-broadcast queue; `None` is unbounded.
    pub queue_capacity: Option<usize>,
    /// Behavior of a bounded queue when full.
    pub overflow_policy: OverflowPolicy,
    /// Replace client-supplied `sender` with the connection id.
    pub stamp_sender: bool,
    /// Directory served for non-WebSocket GET requests.
    pub static_dir: Option<PathBuf>,
    /// Grace period for draining tasks on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            ws_path: "/ws".into(),
            max_message_size: 16 * 1024 * 1024, // 16 MB
            outbound_buffer: 1024,
            write_timeout_ms: 5_000,
            queue_capacity: None,
            overflow_policy: OverflowPolicy::Block,
            stamp_sender: true,
            static_dir: None,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Delivery write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "ws_path must start with '/': {:?}",
                self.ws_path
            )));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "outbound_buffer must be at least 1".into(),
            ));
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidValue(
                "queue_capacity must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from an optional file with env var overrides.
    ///
    /// A missing file yields defaults. Invalid JSON is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = serde_json::to_value(Self::default())?;

        let merged = match path {
            Some(path) if path.exists() => {
                debug!(?path, "loading config from file");
                let content = std::fs::read_to_string(path)?;
                let user: Value = serde_json::from_str(&content)?;
                deep_merge(defaults, user)
            }
            Some(path) => {
                debug!(?path, "config file not found, using defaults");
                defaults
            }
            None => defaults,
        };

        let mut config: Self = serde_json::from_value(merged)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FANOUT_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FANOUT_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("FANOUT_PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("FANOUT_PORT={port}")))?;
        }
        if let Some(path) = lookup("FANOUT_WS_PATH") {
            self.ws_path = path;
        }
        if let Some(cap) = lookup("FANOUT_QUEUE_CAPACITY") {
            let cap: usize = cap
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("FANOUT_QUEUE_CAPACITY={cap}")))?;
            self.queue_capacity = Some(cap);
        }
        if let Some(dir) = lookup("FANOUT_STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.ws_path, "/ws");
        assert!(cfg.queue_capacity.is_none());
        assert_eq!(cfg.overflow_policy, OverflowPolicy::Block);
        assert!(cfg.stamp_sender);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(cfg.ws_path, "/ws");
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fanout.json");
        std::fs::write(
            &path,
            r#"{"port": 9100, "queue_capacity": 64, "overflow_policy": "drop_newest", "host": null}"#,
        )
        .unwrap();
        let cfg = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.queue_capacity, Some(64));
        assert_eq!(cfg.overflow_policy, OverflowPolicy::DropNewest);
        // null skipped, default kept
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.outbound_buffer, 1024);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(ServerConfig::load(Some(&path)), Err(ConfigError::Json(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = ServerConfig::default();
        cfg.apply_env_overrides(env(&[
            ("FANOUT_HOST", "127.0.0.1"),
            ("FANOUT_PORT", "7000"),
            ("FANOUT_WS_PATH", "/chat"),
            ("FANOUT_QUEUE_CAPACITY", "10"),
            ("FANOUT_STATIC_DIR", "static"),
        ]))
        .unwrap();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.ws_path, "/chat");
        assert_eq!(cfg.queue_capacity, Some(10));
        assert_eq!(cfg.static_dir, Some(PathBuf::from("static")));
    }

    #[test]
    fn bad_env_port_is_error() {
        let mut cfg = ServerConfig::default();
        let result = cfg.apply_env_overrides(env(&[("FANOUT_PORT", "eighty")]));
        assert_matches!(result, Err(ConfigError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad_path = ServerConfig {
            ws_path: "ws".into(),
            ..ServerConfig::default()
        };
        assert!(bad_path.validate().is_err());

        let zero_buffer = ServerConfig {
            outbound_buffer: 0,
            ..ServerConfig::default()
        };
        assert!(zero_buffer.validate().is_err());

        let zero_queue = ServerConfig {
            queue_capacity: Some(0),
            ..ServerConfig::default()
        };
        assert!(zero_queue.validate().is_err());
    }

    #[test]
    fn deep_merge_nested_objects() {
        let target = serde_json::json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        let source = serde_json::json!({"a": {"c": 3}, "d": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged, serde_json::json!({"a": {"b": 1, "c": 3}, "d": [9]}));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.write_timeout_ms, cfg.write_timeout_ms);
    }
}
