use guide_voice_utils::audio::DecodeError;

/// Failures surfaced by the session engine. Chunk-level problems
/// (`Decode`, `SendFailure`) never abort a session; device and channel
/// failures are fatal and drive the state machine to `Error`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("audio device unavailable: {detail}")]
    PermissionDenied { detail: String },
    #[error("channel failure: {detail}")]
    Channel { detail: String },
    #[error("send queue full or connection gone")]
    SendFailure,
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl SessionError {
    pub fn permission_denied(detail: impl ToString) -> Self {
        Self::PermissionDenied {
            detail: detail.to_string(),
        }
    }

    pub fn channel(detail: impl ToString) -> Self {
        Self::Channel {
            detail: detail.to_string(),
        }
    }
}
