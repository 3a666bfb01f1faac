//! Configuration management for motorelay.
//!
//! Configuration is layered with figment: built-in defaults, then a TOML
//! file, then `MOTORELAY_` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::client::StreamClientConfig;
use crate::error::{Error, Result};
use crate::geospatial::Viewport;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "motorelay";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "samples.db";

/// Prefix of configuration environment variables.
const ENV_PREFIX: &str = "MOTORELAY_";

/// Application configuration.
///
/// Loaded from (highest precedence first):
/// 1. Environment variables, e.g. `MOTORELAY_CLIENT__URL`
/// 2. TOML config file at `~/.config/motorelay/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay server settings.
    pub relay: RelayConfig,
    /// Stream client settings.
    pub client: ClientConfig,
    /// Tracker settings.
    pub tracker: TrackerConfig,
    /// Route reconstruction settings.
    pub route: RouteConfig,
    /// Sample store settings.
    pub storage: StorageConfig,
}

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listening address.
    pub bind: SocketAddr,
    /// Frames buffered per peer before copies are dropped.
    pub peer_buffer: usize,
    /// Largest accepted message, in bytes.
    pub max_message_bytes: usize,
}

/// Stream client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay URL.
    pub url: String,
    /// Backoff unit in milliseconds; attempt `n` waits `n` units.
    pub base_delay_ms: u64,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Timeout of a single connect attempt in milliseconds.
    pub connect_timeout_ms: u64,
    /// Outbound queue capacity.
    pub send_buffer: usize,
}

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Interval between replayed samples in milliseconds.
    pub sample_interval_ms: u64,
    /// Capacity of the tracker event channel.
    pub event_buffer: usize,
    /// Times a failed sample write is retried before giving up.
    pub persist_retries: u32,
}

/// Route reconstruction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Map viewport width in pixels.
    pub viewport_width: u32,
    /// Map viewport height in pixels.
    pub viewport_height: u32,
}

/// Sample store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/motorelay/samples.db`
    pub database_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3001)),
            peer_buffer: 64,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".to_string(),
            base_delay_ms: 1000,
            max_attempts: 5,
            connect_timeout_ms: 10_000,
            send_buffer: 256,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            event_buffer: 64,
            persist_retries: 3,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        let viewport = Viewport::default();
        Self {
            viewport_width: viewport.width,
            viewport_height: viewport.height,
        }
    }
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation
    /// fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation
    /// fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let url = &self.client.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(invalid(format!(
                "client.url must start with ws:// or wss://, got '{url}'"
            )));
        }

        let positive = [
            ("client.base_delay_ms", self.client.base_delay_ms),
            ("client.connect_timeout_ms", self.client.connect_timeout_ms),
            ("tracker.sample_interval_ms", self.tracker.sample_interval_ms),
            ("client.max_attempts", u64::from(self.client.max_attempts)),
            ("client.send_buffer", self.client.send_buffer as u64),
            ("tracker.event_buffer", self.tracker.event_buffer as u64),
            ("relay.peer_buffer", self.relay.peer_buffer as u64),
            ("relay.max_message_bytes", self.relay.max_message_bytes as u64),
            ("route.viewport_width", u64::from(self.route.viewport_width)),
            ("route.viewport_height", u64::from(self.route.viewport_height)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(invalid(format!("{name} must be greater than 0")));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Runtime settings for the stream client.
    #[must_use]
    pub fn stream_client(&self) -> StreamClientConfig {
        StreamClientConfig {
            url: self.client.url.clone(),
            base_delay: Duration::from_millis(self.client.base_delay_ms),
            max_attempts: self.client.max_attempts,
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
            send_buffer: self.client.send_buffer,
        }
    }

    /// Map viewport for route summaries.
    #[must_use]
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.route.viewport_width, self.route.viewport_height)
    }

    /// Interval between replayed samples.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.tracker.sample_interval_ms)
    }
}

fn invalid(message: String) -> Error {
    Error::ConfigValidation { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.relay.bind, SocketAddr::from(([0, 0, 0, 0], 3001)));
        assert_eq!(config.client.url, "ws://localhost:3001");
        assert_eq!(config.client.max_attempts, 5);
        assert_eq!(config.client.base_delay_ms, 1000);
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_url() {
        let mut config = Config::default();
        config.client.url = "http://localhost:3001".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("client.url"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.client.max_attempts = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("client.max_attempts"));

        let mut config = Config::default();
        config.tracker.sample_interval_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("tracker.sample_interval_ms"));
    }

    #[test]
    fn test_database_path_default() {
        let path = Config::default().database_path();
        assert!(path.to_string_lossy().contains("samples.db"));
        assert!(path.to_string_lossy().contains("motorelay"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_stream_client_conversion() {
        let mut config = Config::default();
        config.client.base_delay_ms = 250;
        config.client.connect_timeout_ms = 3_000;

        let client = config.stream_client();
        assert_eq!(client.url, "ws://localhost:3001");
        assert_eq!(client.base_delay, Duration::from_millis(250));
        assert_eq!(client.connect_timeout, Duration::from_secs(3));
        assert_eq!(client.max_attempts, 5);
    }

    #[test]
    fn test_viewport_and_interval() {
        let config = Config::default();
        assert_eq!(config.viewport(), Viewport::new(800, 400));
        assert_eq!(config.sample_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("motorelay"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[relay]
bind = "127.0.0.1:4000"

[client]
url = "wss://relay.example.com"
max_attempts = 8

[route]
viewport_width = 1024
"#
        )
        .unwrap();

        let config = Config::load_from(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.relay.bind, SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(config.client.url, "wss://relay.example.com");
        assert_eq!(config.client.max_attempts, 8);
        assert_eq!(config.client.base_delay_ms, 1000);
        assert_eq!(config.viewport(), Viewport::new(1024, 400));
    }

    #[test]
    fn test_load_invalid_toml_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\nurl = \"ftp://nope\"").unwrap();

        let err = Config::load_from(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_config_serializes_to_toml_sections() {
        let json = serde_json::to_value(Config::default()).unwrap();
        for section in ["relay", "client", "tracker", "route", "storage"] {
            assert!(json.get(section).is_some(), "missing section {section}");
        }
    }
}
