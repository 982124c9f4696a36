// crates/hailgate-daemon/src/config.rs
//
// Runtime configuration for the Hailgate daemon.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;

use hailgate_core::DEFAULT_CALL_THRESHOLD;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Host address for the RPC server.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the RPC server.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Calls admitted per connection before rejection.
    #[serde(default = "default_call_threshold")]
    pub call_threshold: u64,

    /// Grace period in seconds for in-flight calls during shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    50051
}

fn default_call_threshold() -> u64 {
    DEFAULT_CALL_THRESHOLD
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            call_threshold: default_call_threshold(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 50051);
        assert_eq!(config.call_threshold, 5);
        assert_eq!(config.shutdown_timeout_secs, 30);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: DaemonConfig = toml::from_str(
            r#"
            port = 6000
            call_threshold = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.call_threshold, 3);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        assert!(DaemonConfig::load("/nonexistent/hailgate.toml").is_err());
    }
}
