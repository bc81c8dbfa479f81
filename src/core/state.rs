use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// "News & Talk", the only podcast template the backend currently serves.
pub const PODCAST_TYPE_NEWS_TALK: u32 = 2;
pub const CUSTOM_TEXT_MAX_CHARS: usize = 10_000;
pub const SCRIPT_LINE_MAX_CHARS: usize = 200;

pub const DEFAULT_HOST1_NAME: &str = "Host 1";
pub const DEFAULT_HOST2_NAME: &str = "Host 2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    SelectType,
    Configure,
    ReviewAndGenerate,
}

impl WizardStep {
    pub fn number(self) -> u8 {
        match self {
            WizardStep::SelectType => 1,
            WizardStep::Configure => 2,
            WizardStep::ReviewAndGenerate => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(WizardStep::SelectType),
            2 => Some(WizardStep::Configure),
            3 => Some(WizardStep::ReviewAndGenerate),
            _ => None,
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::from_number(self.number() + 1)
    }

    pub fn previous(self) -> Option<Self> {
        Self::from_number(self.number().saturating_sub(1))
    }
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step {}/3", self.number())
    }
}

pub fn is_podcast_type_enabled(podcast_type: u32) -> bool {
    podcast_type == PODCAST_TYPE_NEWS_TALK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum EpisodeLength {
    #[default]
    Short,
    Medium,
    Long,
}

impl EpisodeLength {
    pub const ALL: [EpisodeLength; 3] = [EpisodeLength::Short, EpisodeLength::Medium, EpisodeLength::Long];

    pub fn minutes(self) -> u32 {
        match self {
            EpisodeLength::Short => 5,
            EpisodeLength::Medium => 15,
            EpisodeLength::Long => 25,
        }
    }
}

impl TryFrom<u32> for EpisodeLength {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        match minutes {
            5 => Ok(EpisodeLength::Short),
            15 => Ok(EpisodeLength::Medium),
            25 => Ok(EpisodeLength::Long),
            other => Err(format!("unsupported episode length: {} minutes", other)),
        }
    }
}

impl From<EpisodeLength> for u32 {
    fn from(length: EpisodeLength) -> Self {
        length.minutes()
    }
}

impl fmt::Display for EpisodeLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} min", self.minutes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HostCount {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for HostCount {
    type Error = String;

    fn try_from(count: u8) -> Result<Self, Self::Error> {
        match count {
            1 => Ok(HostCount::One),
            2 => Ok(HostCount::Two),
            other => Err(format!("unsupported host count: {}", other)),
        }
    }
}

impl From<HostCount> for u8 {
    fn from(count: HostCount) -> Self {
        match count {
            HostCount::One => 1,
            HostCount::Two => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub voice: String,
}

/// Step-2 form, persisted as one JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodcastConfig {
    pub podcast_name: String,
    pub episode_name: String,
    pub duration: EpisodeLength,
    pub host_count: HostCount,
    pub host1_name: String,
    pub host2_name: String,
    pub host1_voice: String,
    pub host2_voice: String,
    pub web_link: String,
    pub custom_text: String,
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            podcast_name: String::new(),
            episode_name: String::new(),
            duration: EpisodeLength::default(),
            host_count: HostCount::default(),
            host1_name: DEFAULT_HOST1_NAME.to_string(),
            host2_name: DEFAULT_HOST2_NAME.to_string(),
            host1_voice: String::new(),
            host2_voice: String::new(),
            web_link: String::new(),
            custom_text: String::new(),
        }
    }
}

/// Lenient mirror of [`PodcastConfig`] used when reading the cache back.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CachedPodcastConfig {
    podcast_name: Option<String>,
    episode_name: Option<String>,
    duration: Option<u32>,
    host_count: Option<u8>,
    host1_name: Option<String>,
    host2_name: Option<String>,
    host1_voice: Option<String>,
    host2_voice: Option<String>,
    web_link: Option<String>,
    custom_text: Option<String>,
}

fn or_default(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

impl PodcastConfig {
    /// Parses a cached blob, falling back field by field for anything absent,
    /// empty or out of range.
    pub fn from_cached_json(json: &str) -> serde_json::Result<Self> {
        let cached: CachedPodcastConfig = serde_json::from_str(json)?;
        let defaults = PodcastConfig::default();
        Ok(Self {
            podcast_name: or_default(cached.podcast_name, &defaults.podcast_name),
            episode_name: or_default(cached.episode_name, &defaults.episode_name),
            duration: cached
                .duration
                .and_then(|d| EpisodeLength::try_from(d).ok())
                .unwrap_or(defaults.duration),
            host_count: cached
                .host_count
                .and_then(|c| HostCount::try_from(c).ok())
                .unwrap_or(defaults.host_count),
            host1_name: or_default(cached.host1_name, &defaults.host1_name),
            host2_name: or_default(cached.host2_name, &defaults.host2_name),
            host1_voice: or_default(cached.host1_voice, &defaults.host1_voice),
            host2_voice: or_default(cached.host2_voice, &defaults.host2_voice),
            web_link: or_default(cached.web_link, &defaults.web_link),
            custom_text: or_default(cached.custom_text, &defaults.custom_text),
        })
    }

    /// Hosts as sent to the backend; blank names fall back to the defaults.
    pub fn hosts(&self) -> Vec<Host> {
        let host1 = Host {
            name: or_default(Some(self.host1_name.trim().to_string()), DEFAULT_HOST1_NAME),
            voice: self.host1_voice.clone(),
        };
        match self.host_count {
            HostCount::One => vec![host1],
            HostCount::Two => vec![
                host1,
                Host {
                    name: or_default(Some(self.host2_name.trim().to_string()), DEFAULT_HOST2_NAME),
                    voice: self.host2_voice.clone(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NftConfig {
    pub supply: u64,
    pub price_sol: f64,
    pub show_note: String,
}

impl NftConfig {
    /// Applies a price typed by the user. Returns false when the input is
    /// rejected and the previous price kept.
    pub fn set_price_input(&mut self, input: &str) -> bool {
        let input = input.trim();
        if input.is_empty() {
            self.price_sol = 0.0;
            return true;
        }
        match input.parse::<f64>() {
            Ok(price) if price.is_finite() && price >= 0.0 => {
                self.price_sol = round_to_lamports(price);
                true
            }
            _ => false,
        }
    }
}

/// Rounds to 9 fractional digits.
pub fn round_to_lamports(price: f64) -> f64 {
    (price * 1e9).round() / 1e9
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLine {
    pub speaker_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub contents: Vec<ScriptLine>,
}

impl ScriptDocument {
    /// `speaker: content` per line, separated by a blank line.
    pub fn to_editable_text(&self) -> String {
        self.joined("\n\n")
    }

    pub fn joined(&self, separator: &str) -> String {
        self.contents
            .iter()
            .map(|line| format!("{}: {}", line.speaker_name, line.content))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PodcastStatus {
    Generating,
    Completed,
    Failed,
}

impl TryFrom<u8> for PodcastStatus {
    type Error = String;

    fn try_from(status: u8) -> Result<Self, Self::Error> {
        match status {
            0 => Ok(PodcastStatus::Generating),
            1 => Ok(PodcastStatus::Completed),
            2 => Ok(PodcastStatus::Failed),
            other => Err(format!("unknown podcast status: {}", other)),
        }
    }
}

impl From<PodcastStatus> for u8 {
    fn from(status: PodcastStatus) -> Self {
        match status {
            PodcastStatus::Generating => 0,
            PodcastStatus::Completed => 1,
            PodcastStatus::Failed => 2,
        }
    }
}

/// Podcast ids come back as numbers, optimistic entries use a timestamp string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PodcastId {
    Number(i64),
    Text(String),
}

impl fmt::Display for PodcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodcastId::Number(n) => write!(f, "{}", n),
            PodcastId::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodcastEntry {
    pub id: PodcastId,
    pub podcast_name: String,
    pub episode_name: String,
    pub podcast_type: u32,
    pub status: PodcastStatus,
    pub created_at: String,
    pub hosts: Vec<Host>,
    pub script: String,
    pub audio_url: Option<String>,
    pub show_note: String,
    pub nft_supply: u64,
    pub nft_price: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOption {
    /// `<scene> - <voice name>`
    pub name: String,
    pub voice_type: String,
}

impl VoiceOption {
    pub fn scene(&self) -> &str {
        self.name.split(" - ").next().unwrap_or(&self.name)
    }

    pub fn short_name(&self) -> &str {
        self.name.split(" - ").nth(1).unwrap_or(&self.name)
    }
}

pub fn group_voices_by_scene(voices: &[VoiceOption]) -> BTreeMap<String, Vec<VoiceOption>> {
    let mut groups: BTreeMap<String, Vec<VoiceOption>> = BTreeMap::new();
    for voice in voices {
        groups
            .entry(voice.scene().to_string())
            .or_default()
            .push(voice.clone());
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftListItem {
    pub id: i64,
    pub podcast_name: String,
    pub episode_name: String,
    pub nft_price: String,
    pub nft_supply: u64,
    pub nft_sold: u64,
    pub created_at: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftDetail {
    pub id: i64,
    pub podcast_name: String,
    pub episode_name: String,
    pub audio_url: String,
    #[serde(default)]
    pub script: Option<serde_json::Value>,
    pub created_at: String,
    #[serde(default)]
    pub show_note: String,
    pub nft_supply: u64,
    pub nft_price: String,
    pub nft_sold: u64,
}

impl NftDetail {
    pub fn remaining(&self) -> u64 {
        self.nft_supply.saturating_sub(self.nft_sold)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page<T> {
    pub list: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
}
