use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default = "default_cache_folder")]
    pub cache_folder: String,

    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// User id sent with script requests and used for the podcast list.
    #[serde(default = "default_uid")]
    pub uid: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StreamConfig {
    /// Longest silence tolerated between two chunks of the script stream.
    /// `null` waits forever.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: Option<u64>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache_folder: default_cache_folder(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            uid: default_uid(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8090".to_string()
}
fn default_uid() -> String {
    "1".to_string()
}
fn default_cache_folder() -> String {
    ".mynews_cache".to_string()
}
fn default_idle_timeout() -> Option<u64> {
    Some(300)
}
fn default_request_timeout() -> u64 {
    30
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_seconds.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!(
                "{} not found. Please create one (an empty file uses the defaults).",
                path.display()
            );
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_folder)?;
        Ok(())
    }
}
