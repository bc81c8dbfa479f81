use crate::core::cache::WizardCache;
use crate::core::config::Config;
use crate::core::state::{
    is_podcast_type_enabled, EpisodeLength, HostCount, NftConfig, PodcastConfig, PodcastEntry,
    PodcastId, PodcastStatus, ScriptDocument, VoiceOption, WizardStep, CUSTOM_TEXT_MAX_CHARS,
    DEFAULT_HOST1_NAME, DEFAULT_HOST2_NAME, PODCAST_TYPE_NEWS_TALK, SCRIPT_LINE_MAX_CHARS,
};
use crate::core::validation::{
    validate_podcast_config, validate_podcast_type, validate_script_for_audio, ValidationError,
};
use crate::services::api::{AudioRequest, PodcastApi, ScriptRequest};
use crate::services::sse::FrameDecoder;
use crate::services::stream::{next_chunk, ReadStep, ScriptSession, StreamSignal};
use anyhow::Result;
use chrono::Utc;
use log::{debug, info, warn};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MSG_SCRIPT_PARSE_FAILED: &str = "Script JSON parsing failed";
pub const MSG_SCRIPT_FAILED: &str = "Script generation failed, please try again later";
pub const MSG_AUDIO_FAILED: &str = "Audio generation failed, please try again later";

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Moved(WizardStep),
    Blocked(ValidationError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// A script document arrived and was cached.
    Completed,
    /// The step-2 form did not validate; nothing was sent.
    Rejected(ValidationError),
    /// The server reported an error; the wizard is back at step 2.
    ServerError(String),
    /// `complete` carried something that is not a script.
    MalformedScript,
    /// Transport failure, idle timeout, or a stream that ended without
    /// `complete` or `error`.
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted,
    Rejected(ValidationError),
    Failed,
}

/// The three-step podcast wizard: type, configuration, script review.
pub struct Wizard {
    cache: WizardCache,
    uid: String,
    idle_timeout: Option<Duration>,

    step: WizardStep,
    podcast_type: u32,
    config: PodcastConfig,
    nft: NftConfig,
    script: Option<ScriptDocument>,
    editable_script: String,
    error: Option<String>,

    session: ScriptSession,
    active_generation: Option<CancellationToken>,

    voices: Vec<VoiceOption>,
    podcasts: Vec<PodcastEntry>,
}

impl Wizard {
    pub fn new(cache: WizardCache, uid: impl Into<String>, idle_timeout: Option<Duration>) -> Self {
        Self {
            cache,
            uid: uid.into(),
            idle_timeout,
            step: WizardStep::SelectType,
            podcast_type: PODCAST_TYPE_NEWS_TALK,
            config: PodcastConfig::default(),
            nft: NftConfig::default(),
            script: None,
            editable_script: String::new(),
            error: None,
            session: ScriptSession::new(),
            active_generation: None,
            voices: Vec::new(),
            podcasts: Vec::new(),
        }
    }

    pub fn from_config(config: &Config, cache: WizardCache) -> Self {
        Self::new(cache, config.api.uid.clone(), config.stream.idle_timeout())
    }

    // --- Accessors ---

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn podcast_type(&self) -> u32 {
        self.podcast_type
    }

    pub fn config(&self) -> &PodcastConfig {
        &self.config
    }

    pub fn nft(&self) -> &NftConfig {
        &self.nft
    }

    pub fn script(&self) -> Option<&ScriptDocument> {
        self.script.as_ref()
    }

    pub fn editable_script(&self) -> &str {
        &self.editable_script
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn session(&self) -> &ScriptSession {
        &self.session
    }

    pub fn is_generating_script(&self) -> bool {
        self.session.in_progress()
    }

    pub fn voices(&self) -> &[VoiceOption] {
        &self.voices
    }

    pub fn podcasts(&self) -> &[PodcastEntry] {
        &self.podcasts
    }

    // --- Form input ---

    /// Only enabled templates can be picked; returns whether the selection took.
    pub fn select_podcast_type(&mut self, podcast_type: u32) -> bool {
        if !is_podcast_type_enabled(podcast_type) {
            return false;
        }
        self.podcast_type = podcast_type;
        self.error = None;
        true
    }

    pub fn set_podcast_name(&mut self, name: impl Into<String>) {
        self.config.podcast_name = name.into();
    }

    pub fn set_episode_name(&mut self, name: impl Into<String>) {
        self.config.episode_name = name.into();
    }

    pub fn set_duration(&mut self, duration: EpisodeLength) {
        self.config.duration = duration;
    }

    pub fn set_host_count(&mut self, count: HostCount) {
        self.config.host_count = count;
    }

    pub fn set_host(&mut self, index: usize, name: impl Into<String>, voice: impl Into<String>) {
        match index {
            0 => {
                self.config.host1_name = name.into();
                self.config.host1_voice = voice.into();
            }
            1 => {
                self.config.host2_name = name.into();
                self.config.host2_voice = voice.into();
            }
            _ => warn!("Ignoring host index {}", index),
        }
    }

    pub fn set_web_link(&mut self, link: impl Into<String>) {
        self.config.web_link = link.into();
    }

    /// Rejects text over the character limit and keeps the previous text.
    pub fn set_custom_text(&mut self, text: impl Into<String>) -> Result<(), ValidationError> {
        let text = text.into();
        if text.chars().count() > CUSTOM_TEXT_MAX_CHARS {
            return Err(ValidationError::CustomTextTooLong);
        }
        self.config.custom_text = text;
        Ok(())
    }

    pub fn set_nft_supply(&mut self, supply: u64) {
        self.nft.supply = supply;
    }

    pub fn set_nft_price_input(&mut self, input: &str) -> bool {
        self.nft.set_price_input(input)
    }

    pub fn set_show_note(&mut self, note: impl Into<String>) {
        self.nft.show_note = note.into();
    }

    // --- Transitions ---

    pub async fn hydrate(&mut self) -> Result<()> {
        let snapshot = self.cache.load().await?;

        if let Some(step) = snapshot.step.and_then(WizardStep::from_number) {
            self.step = step;
        }
        if let Some(podcast_type) = snapshot.podcast_type {
            self.podcast_type = podcast_type;
        }
        if let Some(config) = snapshot.config {
            self.config = config;
        }
        // A script only comes back with the step that produced it.
        if snapshot.step == Some(WizardStep::ReviewAndGenerate.number()) {
            if let Some(script) = snapshot.script {
                self.editable_script = script.to_editable_text();
                self.script = Some(script);
            }
        }
        debug!("Hydrated wizard at {}", self.step);
        Ok(())
    }

    pub async fn advance(&mut self) -> Result<Advance> {
        let check = match self.step {
            WizardStep::SelectType => validate_podcast_type(self.podcast_type),
            WizardStep::Configure => validate_podcast_config(&self.config),
            WizardStep::ReviewAndGenerate => return Ok(Advance::Moved(self.step)),
        };
        if let Err(e) = check {
            self.error = Some(e.to_string());
            return Ok(Advance::Blocked(e));
        }

        match self.step {
            WizardStep::SelectType => self.cache.save_podcast_type(self.podcast_type).await?,
            _ => self.cache.save_config(&self.config).await?,
        }

        if let Some(next) = self.step.next() {
            self.step = next;
            self.cache.save_step(next).await?;
        }
        self.error = None;
        Ok(Advance::Moved(self.step))
    }

    /// Goes back to an earlier step. Config and script slots are left alone.
    pub async fn retreat(&mut self, target: WizardStep) -> Result<WizardStep> {
        if target.number() >= self.step.number() {
            return Ok(self.step);
        }
        self.cancel_generation();
        self.step = target;
        self.cache.save_step(target).await?;
        Ok(self.step)
    }

    pub fn cancel_generation(&mut self) {
        if let Some(token) = self.active_generation.take() {
            info!("Cancelling script generation");
            token.cancel();
        }
        self.session.stop();
    }

    /// Generates a script from the step-2 form over the streaming endpoint.
    ///
    /// `cancel` stops the read loop before its next read and drops the
    /// connection. `on_update` sees the session after every processed chunk.
    pub async fn generate_script(
        &mut self,
        api: &dyn PodcastApi,
        cancel: CancellationToken,
        on_update: &mut dyn FnMut(&ScriptSession),
    ) -> Result<GenerationOutcome> {
        if let Err(e) = validate_podcast_config(&self.config) {
            self.error = Some(e.to_string());
            return Ok(GenerationOutcome::Rejected(e));
        }

        self.cancel_generation();
        self.active_generation = Some(cancel.clone());
        self.error = None;
        self.session.start();
        self.script = None;
        self.editable_script.clear();

        // Shown as step 3 right away; the cached step only follows once a
        // script arrives. The previous script must not outlive this attempt.
        self.step = WizardStep::ReviewAndGenerate;
        let prepared = match self.cache.save_config(&self.config).await {
            Ok(()) => self.cache.clear_script().await,
            Err(e) => Err(e),
        };

        let streamed = match prepared {
            Ok(()) => self.run_script_stream(api, &cancel, on_update).await,
            Err(e) => Err(e),
        };
        self.active_generation = None;
        self.session.stop();
        if streamed.is_err() {
            self.step = WizardStep::Configure;
        }
        let outcome = streamed?;

        match &outcome {
            GenerationOutcome::Completed | GenerationOutcome::Cancelled => {}
            GenerationOutcome::ServerError(_) | GenerationOutcome::MalformedScript => {
                self.rewind_after_failure().await?;
            }
            GenerationOutcome::Failed => {
                self.error = Some(MSG_SCRIPT_FAILED.to_string());
                self.rewind_after_failure().await?;
            }
            GenerationOutcome::Rejected(_) => {}
        }
        on_update(&self.session);
        info!("Script generation finished: {:?}", outcome);
        Ok(outcome)
    }

    async fn run_script_stream(
        &mut self,
        api: &dyn PodcastApi,
        cancel: &CancellationToken,
        on_update: &mut dyn FnMut(&ScriptSession),
    ) -> Result<GenerationOutcome> {
        let request = self.script_request();
        let mut stream = match api.open_script_stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Script generation failed: {:#}", e);
                return Ok(GenerationOutcome::Failed);
            }
        };

        let mut decoder = FrameDecoder::new();
        let mut server_error: Option<String> = None;
        let mut completed = false;

        loop {
            let chunk = match next_chunk(&mut stream, cancel, self.idle_timeout).await {
                ReadStep::Chunk(bytes) => bytes,
                ReadStep::Done => break,
                ReadStep::Cancelled => {
                    info!("Script stream cancelled after {} frames", self.session.frames_seen());
                    return Ok(GenerationOutcome::Cancelled);
                }
                ReadStep::TimedOut => {
                    warn!("Script stream idle for {:?}, giving up", self.idle_timeout);
                    return Ok(GenerationOutcome::Failed);
                }
                ReadStep::Failed(e) => {
                    warn!("Script stream failed: {:#}", e);
                    return Ok(GenerationOutcome::Failed);
                }
            };

            for frame in decoder.feed(&chunk) {
                match self.session.apply(&frame) {
                    Some(StreamSignal::Script(script)) => {
                        self.accept_script(script).await?;
                        completed = true;
                    }
                    Some(StreamSignal::MalformedScript(_)) => {
                        self.error = Some(MSG_SCRIPT_PARSE_FAILED.to_string());
                        return Ok(GenerationOutcome::MalformedScript);
                    }
                    Some(StreamSignal::ServerError(message)) => {
                        self.error = Some(message.clone());
                        server_error = Some(message);
                    }
                    Some(StreamSignal::Finished) | None => {}
                }
            }
            on_update(&self.session);
        }

        if decoder.has_partial_input() {
            debug!("Discarding unterminated stream tail: {:?}", decoder.remainder());
        }

        Ok(if completed {
            GenerationOutcome::Completed
        } else if let Some(message) = server_error {
            GenerationOutcome::ServerError(message)
        } else {
            warn!("Script stream ended without a script or an error");
            GenerationOutcome::Failed
        })
    }

    async fn accept_script(&mut self, script: ScriptDocument) -> Result<()> {
        info!("Script received with {} lines", script.contents.len());
        // Script before step: a cached step 3 always has its script.
        self.cache.save_script(&script).await?;
        self.cache.save_step(WizardStep::ReviewAndGenerate).await?;
        self.editable_script = script.to_editable_text();
        self.script = Some(script);
        Ok(())
    }

    async fn rewind_after_failure(&mut self) -> Result<()> {
        self.step = WizardStep::Configure;
        self.cache.save_step(WizardStep::Configure).await
    }

    fn script_request(&self) -> ScriptRequest {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        ScriptRequest {
            url: non_empty(&self.config.web_link),
            text_content: non_empty(&self.config.custom_text),
            podcast_name: self.config.podcast_name.clone(),
            episode_name: self.config.episode_name.clone(),
            podcast_type: self.podcast_type,
            hosts: self.config.hosts(),
            duration: self.config.duration.minutes(),
            uid: self.uid.clone(),
        }
    }

    // --- Script editing & audio ---

    /// Replaces one line's content. Edits past the length limit, or to a line
    /// that does not exist, are not applied.
    pub async fn edit_line(&mut self, index: usize, content: &str) -> Result<bool> {
        if content.chars().count() > SCRIPT_LINE_MAX_CHARS {
            return Ok(false);
        }
        let Some(script) = self.script.as_mut() else {
            return Ok(false);
        };
        let Some(line) = script.contents.get_mut(index) else {
            return Ok(false);
        };
        line.content = content.to_string();
        self.editable_script = script.to_editable_text();
        self.cache.save_script(script).await?;
        Ok(true)
    }

    pub async fn submit_audio(&mut self, api: &dyn PodcastApi) -> Result<SubmitOutcome> {
        if let Err(e) = validate_script_for_audio(self.script.as_ref()) {
            self.error = Some(e.to_string());
            return Ok(SubmitOutcome::Rejected(e));
        }
        let Some(script) = self.script.as_ref() else {
            return Ok(SubmitOutcome::Rejected(ValidationError::MissingScript));
        };

        let hosts = self.config.hosts();
        let now = Utc::now();
        let placeholder_id = PodcastId::Text(now.timestamp_millis().to_string());

        self.podcasts.insert(
            0,
            PodcastEntry {
                id: placeholder_id.clone(),
                podcast_name: self.config.podcast_name.clone(),
                episode_name: self.config.episode_name.clone(),
                podcast_type: self.podcast_type,
                status: PodcastStatus::Generating,
                created_at: now.to_rfc3339(),
                hosts: hosts.clone(),
                script: script.to_editable_text(),
                audio_url: None,
                show_note: self.nft.show_note.clone(),
                nft_supply: self.nft.supply,
                nft_price: self.nft.price_sol.to_string(),
            },
        );

        let request = AudioRequest {
            podcast_name: self.config.podcast_name.clone(),
            episode_name: self.config.episode_name.clone(),
            hosts,
            script: serde_json::to_string(script)?,
            show_note: self.nft.show_note.clone(),
            nft_supply: self.nft.supply,
            nft_price: self.nft.price_sol,
        };

        let result = api.generate_audio(&request).await;

        match result {
            Ok(()) => {
                info!("Audio generation submitted for {:?}", request.episode_name);
                self.reset_after_submit().await?;
                Ok(SubmitOutcome::Submitted)
            }
            Err(e) => {
                warn!("Audio generation failed: {:#}", e);
                if let Some(entry) = self.podcasts.iter_mut().find(|p| p.id == placeholder_id) {
                    entry.status = PodcastStatus::Failed;
                }
                self.error = Some(MSG_AUDIO_FAILED.to_string());
                Ok(SubmitOutcome::Failed)
            }
        }
    }

    async fn reset_after_submit(&mut self) -> Result<()> {
        self.config.web_link.clear();
        self.config.custom_text.clear();
        self.config.podcast_name.clear();
        self.config.episode_name.clear();
        self.config.duration = EpisodeLength::default();
        self.config.host1_name = DEFAULT_HOST1_NAME.to_string();
        self.config.host2_name = DEFAULT_HOST2_NAME.to_string();
        self.step = WizardStep::SelectType;
        self.script = None;
        self.editable_script.clear();
        self.session = ScriptSession::new();
        self.error = None;

        // Keep a reload from resurrecting the submitted episode.
        self.cache.save_step(WizardStep::SelectType).await?;
        self.cache.clear_script().await?;
        self.cache.clear_config().await?;
        Ok(())
    }

    // --- Remote lists ---

    /// Loads the voice catalogue and fills empty host voices with the first one.
    pub async fn load_voices(&mut self, api: &dyn PodcastApi) -> Result<()> {
        self.voices = api.list_voices().await?;
        self.apply_voice_defaults();
        Ok(())
    }

    pub fn apply_voice_defaults(&mut self) {
        let Some(first) = self.voices.first() else {
            return;
        };
        if self.config.host1_voice.is_empty() {
            self.config.host1_voice = first.voice_type.clone();
        }
        if self.config.host2_voice.is_empty() {
            self.config.host2_voice = first.voice_type.clone();
        }
    }

    /// Replaces the list with the server's view; a failed fetch keeps the old list.
    pub async fn refresh_podcasts(&mut self, api: &dyn PodcastApi) -> bool {
        match api.list_podcasts(&self.uid).await {
            Ok(podcasts) => {
                self.podcasts = podcasts;
                true
            }
            Err(e) => {
                warn!("Failed to fetch podcast list: {:#}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{KEY_CURRENT_STEP, KEY_PODCAST_CONFIG, KEY_PODCAST_TYPE, KEY_SCRIPT_CONTENT};
    use crate::core::io::{MemoryStorage, Storage};
    use crate::core::state::{NftDetail, NftListItem, Page, ScriptLine};
    use crate::services::stream::ByteStream;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::{Arc, Mutex};

    /// Replays canned chunks for the script stream and records requests.
    struct MockApi {
        chunks: Mutex<Vec<Result<Vec<u8>>>>,
        open_fails: bool,
        audio_fails: bool,
        never_ends: bool,
        script_requests: Mutex<Vec<ScriptRequest>>,
        audio_requests: Mutex<Vec<AudioRequest>>,
    }

    impl MockApi {
        fn new(chunks: Vec<&str>) -> Self {
            Self {
                chunks: Mutex::new(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())).collect()),
                open_fails: false,
                audio_fails: false,
                never_ends: false,
                script_requests: Mutex::new(Vec::new()),
                audio_requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PodcastApi for MockApi {
        async fn list_voices(&self) -> Result<Vec<VoiceOption>> {
            Ok(vec![VoiceOption { name: "News - Anna".to_string(), voice_type: "anna".to_string() }])
        }
        async fn list_podcasts(&self, _uid: &str) -> Result<Vec<PodcastEntry>> {
            Err(anyhow::anyhow!("offline"))
        }
        async fn open_script_stream(&self, request: &ScriptRequest) -> Result<ByteStream> {
            self.script_requests.lock().unwrap().push(request.clone());
            if self.open_fails {
                return Err(anyhow::anyhow!("HTTP error! status: 502"));
            }
            let chunks: Vec<Result<Vec<u8>>> = self.chunks.lock().unwrap().drain(..).collect();
            let stream = futures_util::stream::iter(chunks);
            if self.never_ends {
                Ok(Box::pin(stream.chain(futures_util::stream::pending())))
            } else {
                Ok(Box::pin(stream))
            }
        }
        async fn generate_audio(&self, request: &AudioRequest) -> Result<()> {
            self.audio_requests.lock().unwrap().push(request.clone());
            if self.audio_fails {
                Err(anyhow::anyhow!("HTTP error! status: 500"))
            } else {
                Ok(())
            }
        }
        async fn fetch_marketplace(&self, _page: u32, _page_size: u32) -> Result<Page<NftListItem>> {
            Err(anyhow::anyhow!("not used"))
        }
        async fn fetch_nft_detail(&self, _id: i64) -> Result<NftDetail> {
            Err(anyhow::anyhow!("not used"))
        }
    }

    fn wizard_with(storage: Arc<MemoryStorage>) -> Wizard {
        Wizard::new(WizardCache::new(storage), "1", Some(Duration::from_millis(50)))
    }

    fn fill_form(wizard: &mut Wizard) {
        wizard.set_custom_text("Some article text").unwrap();
        wizard.set_podcast_name("X");
        wizard.set_episode_name("Y");
        wizard.set_host(0, "A", "v1");
    }

    async fn generate(wizard: &mut Wizard, api: &MockApi) -> GenerationOutcome {
        wizard
            .generate_script(api, CancellationToken::new(), &mut |_: &ScriptSession| {})
            .await
            .unwrap()
    }

    const HAPPY_STREAM: [&str; 5] = [
        "event: status\ndata: init\n\nevent: status\ndata: start\n\n",
        "event: content\ndata: A: \n\nevent: con",
        "tent\ndata: Hello\n\n",
        "event: complete\ndata: {\"contents\":[{\"speakerName\":\"A\",\"content\":\"Hello\"}]}\n\n",
        "event: status\ndata: end\n\n",
    ];

    #[tokio::test]
    async fn test_validation_blocks_and_reports_first_problem() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());

        assert_eq!(wizard.advance().await?, Advance::Moved(WizardStep::Configure));
        assert_eq!(storage.get(KEY_PODCAST_TYPE).await?.as_deref(), Some("2"));
        assert_eq!(storage.get(KEY_CURRENT_STEP).await?.as_deref(), Some("2"));

        wizard.set_custom_text("only text").unwrap();
        let result = wizard.advance().await?;
        assert_eq!(result, Advance::Blocked(ValidationError::MissingPodcastName));
        assert_eq!(wizard.error(), Some("Please enter a podcast name"));
        assert_eq!(wizard.step(), WizardStep::Configure);
        assert_eq!(storage.get(KEY_PODCAST_CONFIG).await?, None);

        fill_form(&mut wizard);
        assert_eq!(wizard.advance().await?, Advance::Moved(WizardStep::ReviewAndGenerate));
        assert_eq!(wizard.error(), None);
        assert_eq!(storage.get(KEY_CURRENT_STEP).await?.as_deref(), Some("3"));
        assert!(storage.get(KEY_PODCAST_CONFIG).await?.unwrap().contains("\"podcastName\":\"X\""));
        Ok(())
    }

    #[tokio::test]
    async fn test_only_enabled_type_can_be_selected() -> Result<()> {
        let mut wizard = wizard_with(Arc::new(MemoryStorage::new()));
        assert!(!wizard.select_podcast_type(3));
        assert!(wizard.select_podcast_type(2));
        assert_eq!(wizard.podcast_type(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_retreat_keeps_config_and_persists_step() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        wizard.advance().await?;
        fill_form(&mut wizard);
        wizard.advance().await?;

        assert_eq!(wizard.retreat(WizardStep::Configure).await?, WizardStep::Configure);
        assert_eq!(wizard.retreat(WizardStep::ReviewAndGenerate).await?, WizardStep::Configure);
        assert_eq!(storage.get(KEY_CURRENT_STEP).await?.as_deref(), Some("2"));
        assert!(storage.get(KEY_PODCAST_CONFIG).await?.is_some());
        assert_eq!(wizard.config().podcast_name, "X");
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_text_limit() {
        let mut wizard = wizard_with(Arc::new(MemoryStorage::new()));
        wizard.set_custom_text("keep me").unwrap();
        let err = wizard.set_custom_text("x".repeat(CUSTOM_TEXT_MAX_CHARS + 1)).unwrap_err();
        assert_eq!(err, ValidationError::CustomTextTooLong);
        assert_eq!(wizard.config().custom_text, "keep me");
    }

    #[tokio::test]
    async fn test_end_to_end_generation() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);
        wizard.advance().await?;
        wizard.advance().await?;
        assert_eq!(wizard.step(), WizardStep::ReviewAndGenerate);

        let api = MockApi::new(HAPPY_STREAM.to_vec());
        let mut updates = 0;
        let outcome = wizard
            .generate_script(&api, CancellationToken::new(), &mut |_: &ScriptSession| updates += 1)
            .await?;

        assert_eq!(outcome, GenerationOutcome::Completed);
        assert!(updates >= HAPPY_STREAM.len());
        let expected = ScriptDocument {
            contents: vec![ScriptLine { speaker_name: "A".to_string(), content: "Hello".to_string() }],
        };
        assert_eq!(wizard.script(), Some(&expected));
        assert_eq!(wizard.editable_script(), "A: Hello");
        assert_eq!(wizard.step(), WizardStep::ReviewAndGenerate);
        assert!(!wizard.is_generating_script());
        assert_eq!(wizard.session().progress(), 100);
        assert_eq!(wizard.session().raw_content_parts(), &["A: ".to_string(), "Hello".to_string()]);
        assert!(wizard.session().log_lines().contains(&"A: Hello"));

        assert_eq!(storage.get(KEY_CURRENT_STEP).await?.as_deref(), Some("3"));
        let cached: ScriptDocument = serde_json::from_str(&storage.get(KEY_SCRIPT_CONTENT).await?.unwrap())?;
        assert_eq!(cached, expected);

        let requests = api.script_requests.lock().unwrap();
        assert_eq!(requests[0].url, None);
        assert_eq!(requests[0].text_content.as_deref(), Some("Some article text"));
        assert_eq!(requests[0].hosts[0].voice, "v1");
        assert_eq!(requests[0].duration, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_complete_rolls_back() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);

        let api = MockApi::new(vec![
            "event: status\ndata: start\n\n",
            "event: complete\ndata: {not json}\n\n",
        ]);
        let outcome = generate(&mut wizard, &api).await;

        assert_eq!(outcome, GenerationOutcome::MalformedScript);
        assert_eq!(wizard.step(), WizardStep::Configure);
        assert!(!wizard.is_generating_script());
        assert_eq!(wizard.error(), Some(MSG_SCRIPT_PARSE_FAILED));
        assert_eq!(storage.get(KEY_CURRENT_STEP).await?.as_deref(), Some("2"));
        assert_eq!(storage.get(KEY_SCRIPT_CONTENT).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_server_error_is_shown_verbatim() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);

        let api = MockApi::new(vec![
            "event: status\ndata: init\n\n",
            "event: error\ndata: Source page could not be fetched\n\n",
            "event: status\ndata: end\n\n",
        ]);
        let outcome = generate(&mut wizard, &api).await;

        assert_eq!(outcome, GenerationOutcome::ServerError("Source page could not be fetched".to_string()));
        assert_eq!(wizard.error(), Some("Source page could not be fetched"));
        assert_eq!(wizard.step(), WizardStep::Configure);
        // reading continued past the error
        assert_eq!(wizard.session().progress(), 100);
        assert!(wizard
            .session()
            .log_lines()
            .contains(&"Error: Source page could not be fetched\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_failures_rewind() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);

        let mut api = MockApi::new(vec![]);
        api.open_fails = true;
        assert_eq!(generate(&mut wizard, &api).await, GenerationOutcome::Failed);
        assert_eq!(wizard.error(), Some(MSG_SCRIPT_FAILED));
        assert_eq!(wizard.step(), WizardStep::Configure);

        let api = MockApi::new(vec!["event: status\ndata: init\n\n"]);
        api.chunks.lock().unwrap().push(Err(anyhow::anyhow!("connection reset")));
        assert_eq!(generate(&mut wizard, &api).await, GenerationOutcome::Failed);
        assert!(!wizard.is_generating_script());
        assert_eq!(storage.get(KEY_CURRENT_STEP).await?.as_deref(), Some("2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_without_terminal_event_fails() -> Result<()> {
        let mut wizard = wizard_with(Arc::new(MemoryStorage::new()));
        fill_form(&mut wizard);

        let api = MockApi::new(vec!["event: status\ndata: start\n\nevent: content\ndata: A: Hi\n\n"]);
        assert_eq!(generate(&mut wizard, &api).await, GenerationOutcome::Failed);
        assert_eq!(wizard.step(), WizardStep::Configure);
        assert_eq!(wizard.error(), Some(MSG_SCRIPT_FAILED));
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_stream_times_out() -> Result<()> {
        let mut wizard = wizard_with(Arc::new(MemoryStorage::new()));
        fill_form(&mut wizard);

        let mut api = MockApi::new(vec!["event: status\ndata: init\n\n"]);
        api.never_ends = true;
        assert_eq!(generate(&mut wizard, &api).await, GenerationOutcome::Failed);
        assert_eq!(wizard.step(), WizardStep::Configure);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_generation_stops_reading() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);

        let api = MockApi::new(HAPPY_STREAM.to_vec());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let outcome = wizard
            .generate_script(&api, cancel, &mut |session: &ScriptSession| {
                if session.progress() >= 10 {
                    trigger.cancel();
                }
            })
            .await?;

        assert_eq!(outcome, GenerationOutcome::Cancelled);
        assert_eq!(wizard.script(), None);
        assert!(!wizard.is_generating_script());
        assert_eq!(storage.get(KEY_SCRIPT_CONTENT).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_form_sends_nothing() -> Result<()> {
        let mut wizard = wizard_with(Arc::new(MemoryStorage::new()));
        let api = MockApi::new(HAPPY_STREAM.to_vec());
        let outcome = generate(&mut wizard, &api).await;
        assert_eq!(outcome, GenerationOutcome::Rejected(ValidationError::MissingSource));
        assert!(api.script_requests.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_hydrate_restores_script_only_at_step_three() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        {
            let mut wizard = wizard_with(storage.clone());
            fill_form(&mut wizard);
            generate(&mut wizard, &MockApi::new(HAPPY_STREAM.to_vec())).await;
        }

        let mut restored = wizard_with(storage.clone());
        restored.hydrate().await?;
        assert_eq!(restored.step(), WizardStep::ReviewAndGenerate);
        assert_eq!(restored.config().podcast_name, "X");
        assert_eq!(restored.script().map(|s| s.contents.len()), Some(1));
        assert_eq!(restored.editable_script(), "A: Hello");

        storage.set(KEY_CURRENT_STEP, "2").await?;
        let mut stale = wizard_with(storage.clone());
        stale.hydrate().await?;
        assert_eq!(stale.step(), WizardStep::Configure);
        assert_eq!(stale.script(), None);
        assert_eq!(stale.config().host1_voice, "v1");
        Ok(())
    }

    #[tokio::test]
    async fn test_line_edits_respect_limit() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);
        generate(&mut wizard, &MockApi::new(HAPPY_STREAM.to_vec())).await;

        assert!(!wizard.edit_line(0, &"x".repeat(201)).await?);
        assert_eq!(wizard.script().unwrap().contents[0].content, "Hello");
        assert!(!wizard.edit_line(5, "nope").await?);

        assert!(wizard.edit_line(0, &"y".repeat(200)).await?);
        assert_eq!(wizard.script().unwrap().contents[0].content.len(), 200);
        assert!(storage.get(KEY_SCRIPT_CONTENT).await?.unwrap().contains("yyyy"));
        Ok(())
    }

    #[tokio::test]
    async fn test_submit_audio_resets_wizard() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);
        generate(&mut wizard, &MockApi::new(HAPPY_STREAM.to_vec())).await;
        wizard.set_nft_supply(100);
        assert!(wizard.set_nft_price_input("0.25"));
        wizard.set_show_note("notes");

        let api = MockApi::new(vec![]);
        assert_eq!(wizard.submit_audio(&api).await?, SubmitOutcome::Submitted);

        let entry = &wizard.podcasts()[0];
        assert_eq!(entry.status, PodcastStatus::Generating);
        assert_eq!(entry.podcast_name, "X");
        assert_eq!(entry.nft_supply, 100);

        let requests = api.audio_requests.lock().unwrap();
        assert_eq!(requests[0].script_document()?.contents[0].content, "Hello");
        assert_eq!(requests[0].nft_price, 0.25);

        assert_eq!(wizard.step(), WizardStep::SelectType);
        assert_eq!(wizard.script(), None);
        assert_eq!(wizard.config().podcast_name, "");
        assert_eq!(wizard.config().host1_name, "Host 1");
        assert_eq!(storage.get(KEY_CURRENT_STEP).await?.as_deref(), Some("1"));
        assert_eq!(storage.get(KEY_SCRIPT_CONTENT).await?, None);
        assert_eq!(storage.get(KEY_PODCAST_CONFIG).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_submit_audio_checks_lines_and_failures() -> Result<()> {
        let mut wizard = wizard_with(Arc::new(MemoryStorage::new()));
        let mut api = MockApi::new(vec![]);
        assert_eq!(
            wizard.submit_audio(&api).await?,
            SubmitOutcome::Rejected(ValidationError::MissingScript)
        );

        fill_form(&mut wizard);
        generate(&mut wizard, &MockApi::new(HAPPY_STREAM.to_vec())).await;
        wizard.edit_line(0, "   ").await?;
        assert_eq!(
            wizard.submit_audio(&api).await?,
            SubmitOutcome::Rejected(ValidationError::EmptyDialog)
        );
        assert!(wizard.podcasts().is_empty());

        wizard.edit_line(0, "Back again").await?;
        api.audio_fails = true;
        assert_eq!(wizard.submit_audio(&api).await?, SubmitOutcome::Failed);
        assert_eq!(wizard.error(), Some(MSG_AUDIO_FAILED));
        assert_eq!(wizard.podcasts()[0].status, PodcastStatus::Failed);
        assert_eq!(wizard.step(), WizardStep::ReviewAndGenerate);
        assert!(wizard.script().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_voice_defaults_fill_empty_slots() -> Result<()> {
        let mut wizard = wizard_with(Arc::new(MemoryStorage::new()));
        wizard.set_host(1, "B", "kept");
        wizard.load_voices(&MockApi::new(vec![])).await?;
        assert_eq!(wizard.config().host1_voice, "anna");
        assert_eq!(wizard.config().host2_voice, "kept");

        assert!(!wizard.refresh_podcasts(&MockApi::new(vec![])).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_abandoned_regeneration_does_not_restore_old_script() -> Result<()> {
        let storage = Arc::new(MemoryStorage::new());
        let mut wizard = wizard_with(storage.clone());
        fill_form(&mut wizard);
        generate(&mut wizard, &MockApi::new(HAPPY_STREAM.to_vec())).await;

        wizard.retreat(WizardStep::Configure).await?;
        wizard.set_episode_name("Z");
        wizard.advance().await?;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let outcome = wizard
            .generate_script(&MockApi::new(HAPPY_STREAM.to_vec()), cancel, &mut |_: &ScriptSession| {
                trigger.cancel();
            })
            .await?;
        assert_eq!(outcome, GenerationOutcome::Cancelled);

        let mut reloaded = wizard_with(storage.clone());
        reloaded.hydrate().await?;
        assert_eq!(reloaded.config().episode_name, "Z");
        assert_eq!(reloaded.script(), None);
        assert_eq!(storage.get(KEY_SCRIPT_CONTENT).await?, None);
        Ok(())
    }

    /// Storage whose script slot cannot be written.
    struct ScriptWriteFails(MemoryStorage);

    #[async_trait]
    impl Storage for ScriptWriteFails {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if key == KEY_SCRIPT_CONTENT {
                return Err(anyhow::anyhow!("disk full"));
            }
            self.0.set(key, value).await
        }
        async fn remove(&self, key: &str) -> Result<()> {
            self.0.remove(key).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.0.keys().await
        }
    }

    #[tokio::test]
    async fn test_failed_script_write_is_not_partial() -> Result<()> {
        let storage = Arc::new(ScriptWriteFails(MemoryStorage::new()));
        let mut wizard = Wizard::new(WizardCache::new(storage.clone()), "1", None);
        fill_form(&mut wizard);

        let result = wizard
            .generate_script(&MockApi::new(HAPPY_STREAM.to_vec()), CancellationToken::new(), &mut |_: &ScriptSession| {})
            .await;

        assert!(result.is_err());
        assert_eq!(storage.get(KEY_CURRENT_STEP).await?, None);
        assert!(!wizard.is_generating_script());
        assert!(wizard.active_generation.is_none());
        assert_eq!(wizard.script(), None);
        assert_eq!(wizard.step(), WizardStep::Configure);
        Ok(())
    }
}
