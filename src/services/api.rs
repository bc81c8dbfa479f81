use crate::core::config::Config;
use crate::core::state::{
    Host, NftDetail, NftListItem, Page, PodcastEntry, PodcastId, PodcastStatus, ScriptDocument,
    VoiceOption, PODCAST_TYPE_NEWS_TALK,
};
use crate::services::stream::ByteStream;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Body of `POST /api/v1/generate-script-stream`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    pub podcast_name: String,
    pub episode_name: String,
    pub podcast_type: u32,
    pub hosts: Vec<Host>,
    pub duration: u32,
    pub uid: String,
}

/// Body of `POST /api/v1/generate-audio`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioRequest {
    pub podcast_name: String,
    pub episode_name: String,
    pub hosts: Vec<Host>,
    /// The script document, JSON-encoded into a string.
    pub script: String,
    pub show_note: String,
    pub nft_supply: u64,
    pub nft_price: f64,
}

impl AudioRequest {
    pub fn script_document(&self) -> Result<ScriptDocument> {
        serde_json::from_str(&self.script).context("audio request carries an invalid script")
    }
}

#[async_trait]
pub trait PodcastApi: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<VoiceOption>>;
    async fn list_podcasts(&self, uid: &str) -> Result<Vec<PodcastEntry>>;
    /// Opens the script stream. Non-2xx responses are errors.
    async fn open_script_stream(&self, request: &ScriptRequest) -> Result<ByteStream>;
    async fn generate_audio(&self, request: &AudioRequest) -> Result<()>;
    async fn fetch_marketplace(&self, page: u32, page_size: u32) -> Result<Page<NftListItem>>;
    async fn fetch_nft_detail(&self, id: i64) -> Result<NftDetail>;
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct VoiceScene {
    scene: String,
    #[serde(default)]
    voices: Vec<SceneVoice>,
}

#[derive(Debug, Deserialize)]
struct SceneVoice {
    name: String,
    voice_type: String,
}

#[derive(Debug, Deserialize)]
struct RemotePodcast {
    id: PodcastId,
    #[serde(default)]
    podcast_name: String,
    #[serde(default)]
    episode_name: String,
    /// Raw status code; see [`remote_status`].
    status: i64,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    script: Option<ScriptDocument>,
    #[serde(default)]
    audio_url: Option<String>,
}

impl From<RemotePodcast> for PodcastEntry {
    fn from(remote: RemotePodcast) -> Self {
        PodcastEntry {
            id: remote.id,
            podcast_name: remote.podcast_name,
            episode_name: remote.episode_name,
            podcast_type: PODCAST_TYPE_NEWS_TALK,
            status: remote_status(remote.status),
            created_at: remote.created_at,
            hosts: Vec::new(),
            script: remote.script.map(|s| s.joined("\n")).unwrap_or_default(),
            audio_url: remote.audio_url,
            show_note: String::new(),
            nft_supply: 0,
            nft_price: String::new(),
        }
    }
}

/// Anything that is neither generating nor completed is shown as failed.
fn remote_status(code: i64) -> PodcastStatus {
    match u8::try_from(code).ok().and_then(|c| PodcastStatus::try_from(c).ok()) {
        Some(status) => status,
        None => {
            warn!("Unknown podcast status {}, treating it as failed", code);
            PodcastStatus::Failed
        }
    }
}

fn flatten_voices(scenes: Vec<VoiceScene>) -> Vec<VoiceOption> {
    scenes
        .into_iter()
        .flat_map(|group| {
            let scene = group.scene;
            group.voices.into_iter().map(move |v| VoiceOption {
                name: format!("{} - {}", scene, v.name),
                voice_type: v.voice_type,
            })
        })
        .collect()
}

fn unwrap_envelope<T>(envelope: Envelope<T>, what: &str) -> Result<T> {
    if !envelope.success {
        return Err(anyhow!(
            "{}",
            envelope
                .message
                .unwrap_or_else(|| format!("Failed to fetch {}", what))
        ));
    }
    envelope
        .data
        .ok_or_else(|| anyhow!("{} response has no data", what))
}

// --- HTTP client ---

pub struct HttpPodcastApi {
    base_url: Url,
    client: Client,
    request_timeout: Duration,
}

impl HttpPodcastApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid API base url: {}", base_url))?;
        Ok(Self {
            base_url,
            client: Client::new(),
            request_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.api.base_url, config.stream.request_timeout())
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {}", path))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;
        if !resp.status().is_success() {
            return Err(anyhow!("GET {} failed: HTTP {}", url.path(), resp.status()));
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url.path()))
    }
}

#[async_trait]
impl PodcastApi for HttpPodcastApi {
    async fn list_voices(&self) -> Result<Vec<VoiceOption>> {
        let url = self.endpoint("/api/v1/volcengine-voices")?;
        let envelope: Envelope<Vec<VoiceScene>> = self.get_json(url).await?;
        Ok(flatten_voices(envelope.data.unwrap_or_default()))
    }

    async fn list_podcasts(&self, uid: &str) -> Result<Vec<PodcastEntry>> {
        let mut url = self.endpoint("/api/v1/user-podcasts")?;
        url.query_pairs_mut().append_pair("uid", uid);
        let envelope: Envelope<Vec<RemotePodcast>> = self.get_json(url).await?;
        let podcasts = unwrap_envelope(envelope, "podcast list")?;
        Ok(podcasts.into_iter().map(PodcastEntry::from).collect())
    }

    async fn open_script_stream(&self, request: &ScriptRequest) -> Result<ByteStream> {
        let url = self.endpoint("/api/v1/generate-script-stream")?;
        info!("Requesting script stream for {:?} / {:?}", request.podcast_name, request.episode_name);
        let resp = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .context("Failed to send script request")?;

        if !resp.status().is_success() {
            return Err(anyhow!("HTTP error! status: {}", resp.status()));
        }

        let stream = resp
            .bytes_stream()
            .map(|item| item.map(|bytes| bytes.to_vec()).context("Script stream error"));
        Ok(Box::pin(stream))
    }

    async fn generate_audio(&self, request: &AudioRequest) -> Result<()> {
        let url = self.endpoint("/api/v1/generate-audio")?;
        let resp = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .context("Failed to send audio request")?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Audio generation request rejected: {}", body));
        }
        Ok(())
    }

    async fn fetch_marketplace(&self, page: u32, page_size: u32) -> Result<Page<NftListItem>> {
        let mut url = self.endpoint("/api/v1/nft-marketplace")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("pageSize", &page_size.to_string());
        let envelope: Envelope<Page<NftListItem>> = self.get_json(url).await?;
        unwrap_envelope(envelope, "NFT marketplace data")
    }

    async fn fetch_nft_detail(&self, id: i64) -> Result<NftDetail> {
        let url = self.endpoint(&format!("/api/v1/nft-detail/{}", id))?;
        let envelope: Envelope<NftDetail> = self.get_json(url).await?;
        unwrap_envelope(envelope, "NFT detail")
    }
}
