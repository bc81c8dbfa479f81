use crate::core::state::ScriptDocument;
use crate::services::sse::Frame;
use anyhow::Result;
use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

pub const MSG_PROCESSING_SOURCE: &str = "Starting to process content source...\n";
pub const MSG_GENERATING_SCRIPT: &str = "Content source processed, generating script...\n";
pub const MSG_GENERATION_DONE: &str = "\nScript generation complete!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Status,
    Error,
    Content,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: EntryKind,
    pub text: String,
}

/// What a frame means for the wizard beyond the session's own projections.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// `status: end`; the script itself still comes with `complete`.
    Finished,
    /// `error` event, payload verbatim.
    ServerError(String),
    Script(ScriptDocument),
    /// `complete` payload that is not a script document.
    MalformedScript(String),
}

/// Projections of one script generation stream.
#[derive(Debug, Default, Clone)]
pub struct ScriptSession {
    progress_log: Vec<LogEntry>,
    raw_content_parts: Vec<String>,
    progress: u8,
    in_progress: bool,
    frames_seen: usize,
}

impl ScriptSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all projections and marks a new generation as running.
    pub fn start(&mut self) {
        *self = Self {
            in_progress: true,
            ..Self::default()
        };
    }

    pub fn progress_log(&self) -> &[LogEntry] {
        &self.progress_log
    }

    pub fn log_lines(&self) -> Vec<&str> {
        self.progress_log.iter().map(|e| e.text.as_str()).collect()
    }

    pub fn raw_content_parts(&self) -> &[String] {
        &self.raw_content_parts
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    pub(crate) fn stop(&mut self) {
        self.in_progress = false;
    }

    pub fn apply(&mut self, frame: &Frame) -> Option<StreamSignal> {
        self.frames_seen += 1;
        match frame.event.as_str() {
            "status" => match frame.data.as_str() {
                "init" => {
                    self.push(EntryKind::Status, MSG_PROCESSING_SOURCE);
                    self.progress = 5;
                    None
                }
                "start" => {
                    self.push(EntryKind::Status, MSG_GENERATING_SCRIPT);
                    self.progress = 10;
                    None
                }
                "end" => {
                    self.push(EntryKind::Status, MSG_GENERATION_DONE);
                    self.progress = 100;
                    self.in_progress = false;
                    Some(StreamSignal::Finished)
                }
                other => {
                    debug!("Ignoring status payload: {}", other);
                    None
                }
            },
            "error" => {
                self.push(EntryKind::Error, &format!("Error: {}\n", frame.data));
                self.in_progress = false;
                Some(StreamSignal::ServerError(frame.data.clone()))
            }
            "content" => {
                self.append_content(&frame.data);
                self.raw_content_parts.push(frame.data.clone());
                None
            }
            "complete" => match serde_json::from_str::<ScriptDocument>(&frame.data) {
                Ok(script) => Some(StreamSignal::Script(script)),
                Err(e) => {
                    warn!("Complete JSON parsing failed: {}", e);
                    Some(StreamSignal::MalformedScript(e.to_string()))
                }
            },
            other => {
                debug!("Unknown event type: {} {}", other, frame.data);
                None
            }
        }
    }

    fn push(&mut self, kind: EntryKind, text: &str) {
        self.progress_log.push(LogEntry {
            kind,
            text: text.to_string(),
        });
    }

    /// Content extends the last entry unless that entry is a status/error
    /// marker or already ends with a newline.
    fn append_content(&mut self, data: &str) {
        match self.progress_log.last_mut() {
            Some(last) if last.kind == EntryKind::Content && !last.text.ends_with('\n') => {
                last.text.push_str(data);
            }
            _ => self.push(EntryKind::Content, data),
        }
    }
}

#[derive(Debug)]
pub enum ReadStep {
    Chunk(Vec<u8>),
    Done,
    Cancelled,
    TimedOut,
    Failed(anyhow::Error),
}

/// Waits for the next chunk. Cancellation is checked before the read and
/// raced against it; `idle_timeout` bounds the wait when set.
pub async fn next_chunk(
    stream: &mut ByteStream,
    cancel: &CancellationToken,
    idle_timeout: Option<Duration>,
) -> ReadStep {
    if cancel.is_cancelled() {
        return ReadStep::Cancelled;
    }

    let read = async {
        match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next()).await.ok(),
            None => Some(stream.next().await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => ReadStep::Cancelled,
        item = read => match item {
            None => ReadStep::TimedOut,
            Some(None) => ReadStep::Done,
            Some(Some(Ok(bytes))) => ReadStep::Chunk(bytes),
            Some(Some(Err(e))) => ReadStep::Failed(e),
        },
    }
}
