use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::mock::MockSettings;
use crate::sync::RetryPolicy;

pub const ENV_API_URL: &str = "FAMSYNC_API_URL";
pub const ENV_USE_MOCK: &str = "FAMSYNC_USE_MOCK";
pub const ENV_TEST_MODE: &str = "FAMSYNC_TEST_MODE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub api: ApiConfig,
    pub mock: MockConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub use_mock: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockConfig {
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub failure_rate: f64,
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    pub stale_time_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub path: PathBuf,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn load_or_create() -> Result<Self, ConfigError> {
        let mut config = Self::load_or_create_at(&Self::config_path())?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_or_create_at(config_path: &Path) -> Result<Self, ConfigError> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Self::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("famsync")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Overrides from environment-style variables, read through `lookup`.
    /// Unparseable flags are ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api.base_url = url.trim().to_string();
        }
        if let Some(use_mock) = lookup(ENV_USE_MOCK).as_deref().and_then(parse_flag) {
            self.api.use_mock = use_mock;
        }
        if let Some(test_mode) = lookup(ENV_TEST_MODE).as_deref().and_then(parse_flag) {
            self.mock.test_mode = test_mode;
        }
    }

    /// The mock backend serves requests when asked to, or when there is no
    /// server to talk to.
    pub fn mock_enabled(&self) -> bool {
        self.api.use_mock || self.api.base_url.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.cache.stale_time_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.cache.retry_attempts,
            Duration::from_millis(self.cache.retry_base_delay_ms),
        )
    }

    pub fn mock_settings(&self) -> MockSettings {
        MockSettings {
            min_latency: Duration::from_millis(self.mock.min_latency_ms),
            max_latency: Duration::from_millis(self.mock.max_latency_ms),
            failure_rate: self.mock.failure_rate,
            test_mode: self.mock.test_mode,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("famsync");

        Self {
            api: ApiConfig {
                base_url: "http://localhost:3000/api".to_string(),
                use_mock: true,
                timeout_ms: 30_000,
            },
            mock: MockConfig {
                min_latency_ms: 200,
                max_latency_ms: 800,
                failure_rate: 0.05,
                test_mode: false,
            },
            cache: CacheConfig {
                stale_time_secs: 300,
                retry_attempts: 3,
                retry_base_delay_ms: 1000,
            },
            storage: StorageConfig {
                path: data_dir.join("state.db"),
            },
        }
    }
}
