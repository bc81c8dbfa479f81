use crate::core::state::{
    HostCount, PodcastConfig, ScriptDocument, CUSTOM_TEXT_MAX_CHARS, SCRIPT_LINE_MAX_CHARS,
};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSlot {
    Only,
    First,
    Second,
}

impl fmt::Display for HostSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostSlot::Only => write!(f, "host"),
            HostSlot::First => write!(f, "Host 1"),
            HostSlot::Second => write!(f, "Host 2"),
        }
    }
}

/// A missing or invalid field. The message is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please select a podcast type")]
    MissingPodcastType,
    #[error("Please add an information source")]
    MissingSource,
    #[error("Please enter a podcast name")]
    MissingPodcastName,
    #[error("Please enter an episode name")]
    MissingEpisodeName,
    #[error("Please enter {0} name")]
    MissingHostName(HostSlot),
    #[error("Please select {0} voice")]
    MissingHostVoice(HostSlot),
    #[error("Custom text cannot exceed 10,000 characters")]
    CustomTextTooLong,
    #[error("Please generate a script first")]
    MissingScript,
    #[error("Dialog content cannot be empty")]
    EmptyDialog,
    #[error("Each dialog content cannot exceed 200 characters")]
    DialogTooLong,
}

pub fn validate_podcast_type(podcast_type: u32) -> Result<(), ValidationError> {
    if podcast_type == 0 {
        return Err(ValidationError::MissingPodcastType);
    }
    Ok(())
}

/// Checks the step-2 form. The first unmet requirement wins, in this order:
/// source, podcast name, episode name, host names, host voices.
pub fn validate_podcast_config(config: &PodcastConfig) -> Result<(), ValidationError> {
    if config.web_link.trim().is_empty() && config.custom_text.trim().is_empty() {
        return Err(ValidationError::MissingSource);
    }
    if config.podcast_name.trim().is_empty() {
        return Err(ValidationError::MissingPodcastName);
    }
    if config.episode_name.trim().is_empty() {
        return Err(ValidationError::MissingEpisodeName);
    }
    if config.custom_text.chars().count() > CUSTOM_TEXT_MAX_CHARS {
        return Err(ValidationError::CustomTextTooLong);
    }

    let hosts: Vec<(HostSlot, &str, &str)> = match config.host_count {
        HostCount::One => vec![(HostSlot::Only, config.host1_name.as_str(), config.host1_voice.as_str())],
        HostCount::Two => vec![
            (HostSlot::First, config.host1_name.as_str(), config.host1_voice.as_str()),
            (HostSlot::Second, config.host2_name.as_str(), config.host2_voice.as_str()),
        ],
    };
    if let Some((slot, _, _)) = hosts.iter().find(|(_, name, _)| name.trim().is_empty()) {
        return Err(ValidationError::MissingHostName(*slot));
    }
    if let Some((slot, _, _)) = hosts.iter().find(|(_, _, voice)| voice.is_empty()) {
        return Err(ValidationError::MissingHostVoice(*slot));
    }
    Ok(())
}

pub fn validate_script_for_audio(script: Option<&ScriptDocument>) -> Result<(), ValidationError> {
    let script = script.ok_or(ValidationError::MissingScript)?;
    if script.contents.iter().any(|line| line.content.trim().is_empty()) {
        return Err(ValidationError::EmptyDialog);
    }
    if script
        .contents
        .iter()
        .any(|line| line.content.chars().count() > SCRIPT_LINE_MAX_CHARS)
    {
        return Err(ValidationError::DialogTooLong);
    }
    Ok(())
}
