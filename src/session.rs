use tokio::sync::{mpsc, watch};

use crate::capture::{AudioFrame, CaptureDriver, CaptureStream};
use crate::channel::{Channel, ChannelConnector};
use crate::error::SessionError;
use crate::playback::{AudioOut, HandleId, Scheduler};
use crate::transcript::TranscriptAggregator;
use crate::types::media::{sample_rate_of, AGENT_SAMPLE_RATE, CAPTURE_MIME_TYPE};
use crate::types::{EncodedMediaChunk, ServerEvent};
use crate::utils::audio;

pub const INBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Error)
    }
}

/// Everything the engine reacts to, serialized onto one ordered inbox.
/// Capture, channel, and playback push here from their own cadences; only
/// within a single source is ordering guaranteed.
#[derive(Debug)]
pub enum SessionEvent {
    CaptureFrame(AudioFrame),
    Server(ServerEvent),
    PlaybackEnded(HandleId),
    Stop,
}

/// Creates the controller inbox. The sender side is shared by the capture
/// worker, the audio-out sink, and the session handle.
pub fn inbox() -> (mpsc::Sender<SessionEvent>, mpsc::Receiver<SessionEvent>) {
    mpsc::channel(INBOX_CAPACITY)
}

/// What a finished session leaves behind.
#[derive(Debug)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub transcript: TranscriptAggregator,
}

/// Caller-facing side of a running session: request a stop, watch the
/// state machine, the mic level meter, and whether the agent is audible.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    level: watch::Receiver<f32>,
    speaking: watch::Receiver<bool>,
}

impl SessionHandle {
    pub async fn stop(&self) {
        let _ = self.events.send(SessionEvent::Stop).await;
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn mic_level(&self) -> watch::Receiver<f32> {
        self.level.clone()
    }

    /// True while scheduled agent audio is playing; flips back to false
    /// when the last handle drains or a barge-in cancels the queue.
    pub fn agent_speaking(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }
}

/// The session orchestrator: owns the microphone stream, the playback
/// scheduler, the channel handle, and the transcript for exactly one
/// session. A new session requires a fresh controller.
pub struct SessionController<O: AudioOut> {
    inbox_tx: mpsc::Sender<SessionEvent>,
    inbox: mpsc::Receiver<SessionEvent>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    level_tx: watch::Sender<f32>,
    speaking_tx: watch::Sender<bool>,
    capture: Option<Box<dyn CaptureStream>>,
    scheduler: Option<Scheduler<O>>,
    channel: Option<Box<dyn Channel>>,
    forwarder: Option<tokio::task::JoinHandle<()>>,
    aggregator: TranscriptAggregator,
}

impl<O: AudioOut> SessionController<O> {
    pub fn new(
        inbox_tx: mpsc::Sender<SessionEvent>,
        inbox: mpsc::Receiver<SessionEvent>,
        output: O,
    ) -> (Self, SessionHandle) {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (level_tx, level_rx) = watch::channel(0.0f32);
        let (speaking_tx, speaking_rx) = watch::channel(false);
        let handle = SessionHandle {
            events: inbox_tx.clone(),
            state: state_rx,
            level: level_rx,
            speaking: speaking_rx,
        };
        let controller = Self {
            inbox_tx,
            inbox,
            state: SessionState::Idle,
            state_tx,
            level_tx,
            speaking_tx,
            capture: None,
            scheduler: Some(Scheduler::new(output)),
            channel: None,
            forwarder: None,
            aggregator: TranscriptAggregator::new(),
        };
        (controller, handle)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::info!("session state: {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    /// Drives one session to completion: acquires the microphone, connects
    /// the channel, then reacts to inbox events until a terminal state or
    /// an explicit stop. Teardown runs on every exit path.
    pub async fn run<C, D>(mut self, connector: C, mut capture: D) -> SessionOutcome
    where
        C: ChannelConnector,
        D: CaptureDriver,
    {
        self.set_state(SessionState::Connecting);

        match capture.start(self.inbox_tx.clone()) {
            Ok(stream) => self.capture = Some(stream),
            Err(e) => {
                tracing::error!("failed to acquire microphone: {}", e);
                return self.finish(SessionState::Error);
            }
        }

        // Channel events are re-tagged onto the inbox so the loop sees a
        // single ordered stream per source.
        let (server_tx, mut server_rx) = mpsc::channel::<ServerEvent>(INBOX_CAPACITY);
        let forward_tx = self.inbox_tx.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = server_rx.recv().await {
                if forward_tx.send(SessionEvent::Server(event)).await.is_err() {
                    break;
                }
            }
        }));

        match connector.connect(server_tx).await {
            Ok(channel) => self.channel = Some(channel),
            Err(e) => {
                tracing::error!("failed to connect channel: {}", e);
                return self.finish(SessionState::Error);
            }
        }

        while let Some(event) = self.inbox.recv().await {
            match event {
                SessionEvent::Stop => break,
                SessionEvent::CaptureFrame(frame) => self.on_capture_frame(frame),
                SessionEvent::PlaybackEnded(id) => self.on_playback_ended(id),
                SessionEvent::Server(server) => {
                    self.on_server_event(server);
                    if self.state.is_terminal() {
                        break;
                    }
                }
            }
        }

        let state = if self.state.is_terminal() {
            self.state
        } else {
            SessionState::Disconnected
        };
        self.finish(state)
    }

    fn on_capture_frame(&mut self, frame: AudioFrame) {
        let _ = self.level_tx.send(frame.level);
        if self.state != SessionState::Connected {
            return;
        }
        let bytes = audio::encode_samples(&frame.samples);
        let chunk = EncodedMediaChunk::new(CAPTURE_MIME_TYPE, audio::to_transport_text(&bytes));
        if let Some(channel) = self.channel.as_mut() {
            // Fire-and-forget: a full send queue drops this frame and the
            // capture cadence is never held up.
            if let Err(e) = channel.send(chunk) {
                tracing::warn!("dropping capture frame: {}", e);
            }
        }
    }

    fn on_playback_ended(&mut self, id: HandleId) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            if scheduler.on_ended(id) {
                tracing::debug!("agent finished speaking");
                let _ = self.speaking_tx.send(false);
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Opened => {
                if self.state == SessionState::Connecting {
                    self.set_state(SessionState::Connected);
                } else {
                    tracing::warn!("unexpected opened event in {:?}", self.state);
                }
            }
            ServerEvent::AudioDelta { mime_type, data } => {
                if self.state != SessionState::Connected {
                    return;
                }
                self.on_audio_delta(&mime_type, &data);
            }
            ServerEvent::InputTranscriptDelta { text } => self.aggregator.append_user(&text),
            ServerEvent::OutputTranscriptDelta { text } => self.aggregator.append_agent(&text),
            ServerEvent::TurnComplete => {
                if let Some(turn) = self.aggregator.finalize_turn() {
                    tracing::debug!(
                        "turn finalized: user={} chars, agent={} chars",
                        turn.user_text.len(),
                        turn.agent_text.len()
                    );
                }
            }
            ServerEvent::Interrupted => {
                tracing::debug!("barge-in, cancelling scheduled playback");
                if let Some(scheduler) = self.scheduler.as_mut() {
                    scheduler.interrupt();
                }
                let _ = self.speaking_tx.send(false);
            }
            ServerEvent::Closed { reason } => {
                tracing::info!("channel closed: {:?}", reason);
                self.set_state(SessionState::Disconnected);
            }
            ServerEvent::Error { detail } => {
                tracing::error!("channel error: {}", detail);
                self.set_state(SessionState::Error);
            }
        }
    }

    /// A chunk that fails to decode is dropped and the session carries on;
    /// the playback cursor is left alone so later chunks still splice onto
    /// the scheduled tail.
    fn on_audio_delta(&mut self, mime_type: &str, data: &str) {
        let sample_rate = sample_rate_of(mime_type).unwrap_or(AGENT_SAMPLE_RATE);
        let decoded = audio::from_transport_text(data)
            .and_then(|bytes| audio::decode_to_playable(&bytes, sample_rate, 1));
        match decoded {
            Ok(buffer) if !buffer.is_empty() => {
                if let Some(scheduler) = self.scheduler.as_mut() {
                    let id = scheduler.enqueue(buffer);
                    tracing::trace!("scheduled playback handle {}", id);
                    let _ = self.speaking_tx.send(true);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("dropping undecodable audio chunk: {}", e),
        }
    }

    /// Releases every acquired resource. Idempotent and callable from any
    /// state; each resource is guarded so a second call is a no-op.
    pub fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.interrupt();
            scheduler.output_mut().stop();
            let _ = self.speaking_tx.send(false);
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    fn finish(mut self, state: SessionState) -> SessionOutcome {
        self.set_state(state);
        self.teardown();
        SessionOutcome {
            state,
            transcript: std::mem::take(&mut self.aggregator),
        }
    }
}

impl<O: AudioOut> Drop for SessionController<O> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullOut;

    impl AudioOut for NullOut {
        fn now(&self) -> f64 {
            0.0
        }
        fn schedule(&mut self, _id: HandleId, _buffer: audio::PcmBuffer, _start: f64) {}
        fn cancel(&mut self, _id: HandleId) {}
    }

    struct CountingChannel {
        closes: Arc<AtomicUsize>,
    }

    impl Channel for CountingChannel {
        fn send(&mut self, _chunk: EncodedMediaChunk) -> Result<(), SessionError> {
            Ok(())
        }
        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingCapture {
        stops: Arc<AtomicUsize>,
    }

    impl CaptureStream for CountingCapture {
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct DeniedMic;

    impl CaptureDriver for DeniedMic {
        fn start(
            &mut self,
            _events: mpsc::Sender<SessionEvent>,
        ) -> Result<Box<dyn CaptureStream>, SessionError> {
            Err(SessionError::permission_denied("no input device"))
        }
    }

    struct NeverConnector;

    #[async_trait]
    impl ChannelConnector for NeverConnector {
        async fn connect(
            &self,
            _events: mpsc::Sender<ServerEvent>,
        ) -> Result<Box<dyn Channel>, SessionError> {
            panic!("connect must not be reached");
        }
    }

    #[tokio::test]
    async fn teardown_is_idempotent_before_and_after_acquisition() {
        let (tx, rx) = inbox();
        let (mut controller, _handle) = SessionController::new(tx, rx, NullOut);

        // Nothing acquired yet: both calls are harmless no-ops.
        controller.teardown();
        controller.teardown();

        let closes = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        controller.channel = Some(Box::new(CountingChannel {
            closes: closes.clone(),
        }));
        controller.capture = Some(Box::new(CountingCapture {
            stops: stops.clone(),
        }));

        controller.teardown();
        controller.teardown();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_microphone_fails_into_error_state() {
        let (tx, rx) = inbox();
        let (controller, handle) = SessionController::new(tx, rx, NullOut);

        let outcome = controller.run(NeverConnector, DeniedMic).await;
        assert_eq!(outcome.state, SessionState::Error);
        assert_eq!(*handle.state().borrow(), SessionState::Error);
        assert!(outcome.transcript.turns().is_empty());
    }
}
