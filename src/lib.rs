mod capture;
mod channel;
mod error;
mod playback;
mod session;
mod transcript;

pub use guide_voice_types as types;
pub use guide_voice_utils as utils;

pub use capture::{AudioCapture, AudioFrame, CaptureDriver, CaptureStream, Microphone};
pub use channel::{
    Channel, ChannelConfig, ChannelConfigBuilder, ChannelConnector, EventTx, WsConnector,
};
pub use error::SessionError;
pub use playback::{AudioOut, CpalOutput, HandleId, Scheduler};
pub use session::{
    inbox, SessionController, SessionEvent, SessionHandle, SessionOutcome, SessionState,
};
pub use transcript::TranscriptAggregator;
