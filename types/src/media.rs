/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Mime type attached to every capture-side chunk. The agent decides its own
/// output rate and announces it the same way on `audio.delta` events.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;
pub const AGENT_SAMPLE_RATE: u32 = 24000;

/// One wire-ready unit of audio: base64 of little-endian PCM16 samples.
/// Carries no ordering metadata; the channel must preserve send order.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EncodedMediaChunk {
    mime_type: String,
    data: Base64EncodedAudioBytes,
}

impl EncodedMediaChunk {
    pub fn new(mime_type: impl Into<String>, data: Base64EncodedAudioBytes) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }
}

/// Parses the sample rate out of a mime type like "audio/pcm;rate=24000".
pub fn sample_rate_of(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|part| part.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

/// One finalized exchange: the user's utterance and the agent's response,
/// delimited by a `turn.complete` event.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Turn {
    pub user_text: String,
    pub agent_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rate_from_mime_type() {
        assert_eq!(sample_rate_of("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(sample_rate_of(CAPTURE_MIME_TYPE), Some(16000));
        assert_eq!(sample_rate_of("audio/pcm"), None);
    }
}
