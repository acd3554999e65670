use crate::media::EncodedMediaChunk;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "input_audio.append")]
    MediaChunkAppend { chunk: EncodedMediaChunk },
}

/// Events delivered by the agent over the channel. Exactly one case per
/// event; the channel synthesizes `Opened` and `Closed` around the socket
/// lifecycle so consumers observe everything on one ordered stream.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "opened")]
    Opened,
    #[serde(rename = "audio.delta")]
    AudioDelta { mime_type: String, data: String },
    #[serde(rename = "transcript.input.delta")]
    InputTranscriptDelta { text: String },
    #[serde(rename = "transcript.output.delta")]
    OutputTranscriptDelta { text: String },
    #[serde(rename = "turn.complete")]
    TurnComplete,
    #[serde(rename = "interrupted")]
    Interrupted,
    #[serde(rename = "closed")]
    Closed { reason: Option<String> },
    #[serde(rename = "error")]
    Error { detail: String },
}
