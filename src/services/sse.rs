//! Incremental decoding of the `event:` / `data:` frames sent by the script
//! generation endpoint.
//!
//! ```text
//! event: content
//! data: Hello
//!
//! ```
//!
//! A frame is complete once a blank line (`\n\n`) has been seen. Network chunks
//! may end anywhere, including inside a multi-byte UTF-8 sequence.

const FRAME_TERMINATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

/// Appends `input` to `buffer` and cuts every complete frame off the front.
/// Returns the unconsumed remainder and the frames in wire order. Frames
/// without both an `event` and a non-empty `data` line are dropped.
pub fn split_frames(buffer: &str, input: &str) -> (String, Vec<Frame>) {
    let mut rest = String::with_capacity(buffer.len() + input.len());
    rest.push_str(buffer);
    rest.push_str(input);

    let mut frames = Vec::new();
    let mut start = 0;
    while let Some(offset) = rest[start..].find(FRAME_TERMINATOR) {
        let message = &rest[start..start + offset];
        start += offset + FRAME_TERMINATOR.len();
        if let Some(frame) = parse_frame(message) {
            frames.push(frame);
        }
    }
    (rest[start..].to_string(), frames)
}

fn parse_frame(message: &str) -> Option<Frame> {
    let event = field(message, "event: ")?;
    let data = field(message, "data: ")?;
    Some(Frame {
        event: event.to_string(),
        data: data.to_string(),
    })
}

/// First line starting with `prefix` whose value is non-empty.
fn field<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    message
        .lines()
        .filter_map(|line| line.strip_prefix(prefix))
        .map(|value| value.strip_suffix('\r').unwrap_or(value))
        .find(|value| !value.is_empty())
}

/// Stateful front end for [`split_frames`] that accepts raw bytes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending_bytes: Vec<u8>,
    buffer: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let text = self.decode(bytes);
        let (rest, frames) = split_frames(&self.buffer, &text);
        self.buffer = rest;
        frames
    }

    /// Text received after the last complete frame.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    pub fn has_partial_input(&self) -> bool {
        !self.pending_bytes.is_empty() || !self.buffer.is_empty()
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending_bytes.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending_bytes.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + bad);
                        }
                        // Truncated sequence at the end: wait for the next chunk.
                        None => {
                            self.pending_bytes.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }
}
