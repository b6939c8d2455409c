//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Wire protocol client settings
    #[serde(default)]
    pub wire: WireConfig,

    /// VM monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Test runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Wire protocol client settings
#[derive(Debug, Deserialize, Clone)]
pub struct WireConfig {
    /// Path to the JSON protocol descriptor
    #[serde(default = "default_descriptor")]
    pub descriptor: PathBuf,

    /// Explicit compositor socket; defaults to `$XDG_RUNTIME_DIR/$WAYLAND_DISPLAY`
    #[serde(default)]
    pub socket: Option<PathBuf>,

    /// How long a call waits for its acknowledgement
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            descriptor: default_descriptor(),
            socket: None,
            call_timeout_ms: default_call_timeout(),
        }
    }
}

impl WireConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_descriptor() -> PathBuf {
    PathBuf::from("wayland-protocols/protocols.json")
}
fn default_call_timeout() -> u64 {
    5_000
}

/// VM monitor settings
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Host the monitor (or its proxy) listens on
    #[serde(default = "default_monitor_host")]
    pub host: String,

    /// TCP port of the monitor
    #[serde(default = "default_monitor_port")]
    pub port: u16,

    /// Per-command response timeout
    #[serde(default = "default_monitor_timeout")]
    pub timeout_ms: u64,

    /// Marker that ends every response
    #[serde(default = "default_terminator")]
    pub terminator: String,

    /// Wait for the banner and first prompt after connecting
    #[serde(default)]
    pub await_greeting: bool,

    /// Reply lines starting with one of these are error replies
    #[serde(default = "default_error_prefixes")]
    pub error_prefixes: Vec<String>,

    /// Open a connection per command and treat the peer's close as the
    /// end of the reply, as the VM runner's monitor proxy expects
    #[serde(default = "default_one_shot")]
    pub one_shot: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: default_monitor_host(),
            port: default_monitor_port(),
            timeout_ms: default_monitor_timeout(),
            terminator: default_terminator(),
            await_greeting: false,
            error_prefixes: default_error_prefixes(),
            one_shot: default_one_shot(),
        }
    }
}

impl MonitorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_monitor_host() -> String {
    "127.0.0.1".to_string()
}
fn default_monitor_port() -> u16 {
    2134
}
fn default_monitor_timeout() -> u64 {
    2_000
}
fn default_terminator() -> String {
    "(qemu) ".to_string()
}
fn default_one_shot() -> bool {
    true
}
fn default_error_prefixes() -> Vec<String> {
    vec![
        "unknown command".to_string(),
        "Error".to_string(),
        "Could not".to_string(),
    ]
}

/// Test runner settings
#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// Test registry definitions (TOML or YAML)
    #[serde(default = "default_registry")]
    pub registry: PathBuf,

    /// Per-test timeout in seconds; 0 disables it
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            test_timeout_secs: default_test_timeout(),
        }
    }
}

impl RunnerConfig {
    pub fn test_timeout(&self) -> Option<Duration> {
        (self.test_timeout_secs > 0).then(|| Duration::from_secs(self.test_timeout_secs))
    }
}

fn default_registry() -> PathBuf {
    PathBuf::from("capability_tests.toml")
}
fn default_test_timeout() -> u64 {
    60
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.monitor.port, 2134);
        assert_eq!(config.monitor.terminator, "(qemu) ");
        assert_eq!(config.monitor.timeout(), Duration::from_secs(2));
        assert!(config.monitor.one_shot);
        assert_eq!(config.runner.test_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [monitor]
            port = 4444
            one_shot = false

            [runner]
            test_timeout_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.monitor.port, 4444);
        assert_eq!(config.monitor.host, "127.0.0.1");
        assert!(!config.monitor.one_shot);
        assert_eq!(config.runner.test_timeout(), None);
        assert_eq!(config.wire.call_timeout_ms, 5_000);
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[monitor]\nport = \"nope\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
