use crate::core::io::Storage;
use crate::core::state::{PodcastConfig, ScriptDocument, WizardStep};
use anyhow::{Context, Result};
use log::warn;
use std::sync::Arc;

pub const KEY_CURRENT_STEP: &str = "mynews_current_step";
pub const KEY_PODCAST_TYPE: &str = "mynews_podcast_type";
pub const KEY_PODCAST_CONFIG: &str = "mynews_podcast_config";
pub const KEY_SCRIPT_CONTENT: &str = "mynews_script_content";

/// Everything found in the cache at startup. Slots that are absent or
/// unreadable come back as `None`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub step: Option<u8>,
    pub podcast_type: Option<u32>,
    pub config: Option<PodcastConfig>,
    pub script: Option<ScriptDocument>,
}

/// Typed access to the four wizard slots. Every write replaces a whole slot.
#[derive(Clone)]
pub struct WizardCache {
    storage: Arc<dyn Storage>,
}

impl WizardCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn save_step(&self, step: WizardStep) -> Result<()> {
        self.storage
            .set(KEY_CURRENT_STEP, &step.number().to_string())
            .await
    }

    pub async fn save_podcast_type(&self, podcast_type: u32) -> Result<()> {
        self.storage
            .set(KEY_PODCAST_TYPE, &podcast_type.to_string())
            .await
    }

    pub async fn save_config(&self, config: &PodcastConfig) -> Result<()> {
        let content = serde_json::to_string(config).context("Failed to encode podcast config")?;
        self.storage.set(KEY_PODCAST_CONFIG, &content).await
    }

    pub async fn save_script(&self, script: &ScriptDocument) -> Result<()> {
        let content = serde_json::to_string(script).context("Failed to encode script")?;
        self.storage.set(KEY_SCRIPT_CONTENT, &content).await
    }

    pub async fn clear_script(&self) -> Result<()> {
        self.storage.remove(KEY_SCRIPT_CONTENT).await
    }

    pub async fn clear_config(&self) -> Result<()> {
        self.storage.remove(KEY_PODCAST_CONFIG).await
    }

    pub async fn load(&self) -> Result<CacheSnapshot> {
        let step = self
            .storage
            .get(KEY_CURRENT_STEP)
            .await?
            .and_then(|raw| parse_number::<u8>(KEY_CURRENT_STEP, &raw));
        let podcast_type = self
            .storage
            .get(KEY_PODCAST_TYPE)
            .await?
            .and_then(|raw| parse_number::<u32>(KEY_PODCAST_TYPE, &raw));

        let config = match self.storage.get(KEY_PODCAST_CONFIG).await? {
            Some(raw) => match PodcastConfig::from_cached_json(&raw) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to restore cached configuration: {}", e);
                    None
                }
            },
            None => None,
        };

        let script = match self.storage.get(KEY_SCRIPT_CONTENT).await? {
            Some(raw) => match serde_json::from_str::<ScriptDocument>(&raw) {
                Ok(script) => Some(script),
                Err(e) => {
                    warn!("Failed to restore script content: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(CacheSnapshot {
            step,
            podcast_type,
            config,
            script,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring unreadable cache entry {}: {:?}", key, raw);
            None
        }
    }
}
