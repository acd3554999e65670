use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::session::SessionEvent;
use crate::utils;
use crate::utils::audio::PcmBuffer;

pub type HandleId = u64;

const OUTPUT_CHUNK_SIZE: usize = 1024;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The "schedule a buffer on a clock, starting at timestamp T" capability.
/// Implementations report end-of-playback by pushing
/// `SessionEvent::PlaybackEnded(id)` onto the session inbox.
pub trait AudioOut: Send {
    /// Current position of the output clock, in seconds.
    fn now(&self) -> f64;

    /// Schedules `buffer` to begin exactly at `start` on this clock.
    fn schedule(&mut self, id: HandleId, buffer: PcmBuffer, start: f64);

    /// Best-effort cancellation; a handle already past its end is a no-op.
    fn cancel(&mut self, id: HandleId);

    /// Releases the underlying output. Idempotent.
    fn stop(&mut self) {}
}

/// Gapless sequential playback over any [`AudioOut`].
///
/// Chunks arrive with network jitter; starting each one at "now" would gap
/// or overlap audibly. The scheduler carries a monotonic cursor forward so
/// each chunk begins exactly where the previous one ends, and re-bases the
/// cursor on interruption so barge-in audio is never queued behind
/// cancelled playback.
pub struct Scheduler<O: AudioOut> {
    out: O,
    cursor: f64,
    next_id: HandleId,
    live: BTreeMap<HandleId, f64>,
}

impl<O: AudioOut> Scheduler<O> {
    pub fn new(out: O) -> Self {
        Self {
            out,
            cursor: 0.0,
            next_id: 0,
            live: BTreeMap::new(),
        }
    }

    /// Schedules `buffer` back-to-back with the previously enqueued chunk,
    /// or at "now" when the queue has drained (or after an interruption).
    pub fn enqueue(&mut self, buffer: PcmBuffer) -> HandleId {
        let start = self.cursor.max(self.out.now());
        let id = self.next_id;
        self.next_id += 1;
        self.cursor = start + buffer.duration();
        self.live.insert(id, start);
        self.out.schedule(id, buffer, start);
        id
    }

    /// Removes a naturally finished handle. Returns true when the live set
    /// just became empty, i.e. the agent finished speaking.
    pub fn on_ended(&mut self, id: HandleId) -> bool {
        self.live.remove(&id).is_some() && self.live.is_empty()
    }

    /// Barge-in: stops every live handle, clears the set, and resets the
    /// cursor so the next enqueue re-bases against the current clock.
    pub fn interrupt(&mut self) {
        for (&id, _) in self.live.iter() {
            self.out.cancel(id);
        }
        self.live.clear();
        self.cursor = 0.0;
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    pub fn live_handles(&self) -> usize {
        self.live.len()
    }

    pub fn output(&self) -> &O {
        &self.out
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.out
    }
}

struct ScheduledBuffer {
    id: HandleId,
    start_frame: u64,
    samples: Vec<f32>,
}

#[derive(Default)]
struct MixState {
    queue: Vec<ScheduledBuffer>,
}

/// Production [`AudioOut`] over a cpal output stream. The clock is frames
/// rendered so far divided by the device rate; the output callback mixes
/// every due buffer and reports exhausted ones to the session inbox.
pub struct CpalOutput {
    state: Arc<Mutex<MixState>>,
    frames_written: Arc<AtomicU64>,
    device_rate: u32,
    stop_flag: Arc<AtomicBool>,
    stream_thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalOutput {
    pub fn start(
        device_name: Option<&str>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let state = Arc::new(Mutex::new(MixState::default()));
        let frames_written = Arc::new(AtomicU64::new(0));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let device_name = device_name.map(|s| s.to_string());
        let thread_state = state.clone();
        let thread_frames = frames_written.clone();
        let stop = stop_flag.clone();
        let stream_thread = std::thread::spawn(move || {
            match build_output_stream(device_name.as_deref(), thread_state, thread_frames, events) {
                Ok((stream, rate)) => {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(SessionError::permission_denied(e)));
                        return;
                    }
                    let _ = ready_tx.send(Ok(rate));
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::park_timeout(STOP_POLL_INTERVAL);
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let device_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => return Err(SessionError::permission_denied("output thread died")),
        };

        Ok(Self {
            state,
            frames_written,
            device_rate,
            stop_flag,
            stream_thread: Some(stream_thread),
        })
    }

    fn to_device_rate(&self, buffer: PcmBuffer) -> Vec<f32> {
        if buffer.sample_rate == self.device_rate {
            return buffer.samples;
        }
        let mut resampler = match utils::audio::create_resampler(
            buffer.sample_rate as f64,
            self.device_rate as f64,
            OUTPUT_CHUNK_SIZE,
        ) {
            Ok(resampler) => resampler,
            Err(e) => {
                tracing::error!("failed to create playback resampler: {}", e);
                return Vec::new();
            }
        };
        let mut out = Vec::with_capacity(
            buffer.samples.len() * self.device_rate as usize / buffer.sample_rate as usize + 1,
        );
        for chunk in utils::audio::split_for_chunks(&buffer.samples, OUTPUT_CHUNK_SIZE) {
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(resampled) => {
                    if let Some(mono) = resampled.first() {
                        out.extend(mono.iter().copied());
                    }
                }
                Err(e) => tracing::warn!("playback resample failed: {}", e),
            }
        }
        out
    }
}

impl AudioOut for CpalOutput {
    fn now(&self) -> f64 {
        self.frames_written.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, id: HandleId, buffer: PcmBuffer, start: f64) {
        // Resampling happens here, on the engine task, never in the
        // output callback.
        let samples = self.to_device_rate(buffer);
        if samples.is_empty() {
            return;
        }
        let start_frame = (start * self.device_rate as f64).round() as u64;
        let mut state = self.state.lock().expect("mixer lock poisoned");
        state.queue.push(ScheduledBuffer {
            id,
            start_frame,
            samples,
        });
    }

    fn cancel(&mut self, id: HandleId) {
        let mut state = self.state.lock().expect("mixer lock poisoned");
        state.queue.retain(|scheduled| scheduled.id != id);
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.stream_thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                tracing::error!("output thread panicked");
            }
        }
        self.state.lock().expect("mixer lock poisoned").queue.clear();
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        AudioOut::stop(self);
    }
}

fn build_output_stream(
    device_name: Option<&str>,
    state: Arc<Mutex<MixState>>,
    frames_written: Arc<AtomicU64>,
    events: mpsc::Sender<SessionEvent>,
) -> Result<(cpal::Stream, u32), SessionError> {
    let device = utils::device::get_or_default_output(device_name)
        .map_err(SessionError::permission_denied)?;
    let default_config = device
        .default_output_config()
        .map_err(SessionError::permission_denied)?;
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
    };
    tracing::debug!("playback: device={:?}, config={:?}", device.name().ok(), config);
    let channel_count = config.channels as usize;
    let sample_rate = config.sample_rate.0;

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let base = frames_written.load(Ordering::Relaxed);
        let frames = data.len() / channel_count;
        let mut state = state.lock().expect("mixer lock poisoned");

        for (frame_idx, frame) in data.chunks_mut(channel_count).enumerate() {
            let absolute = base + frame_idx as u64;
            let mut mixed = 0.0f32;
            for scheduled in state.queue.iter() {
                if absolute >= scheduled.start_frame {
                    let offset = (absolute - scheduled.start_frame) as usize;
                    if offset < scheduled.samples.len() {
                        mixed += scheduled.samples[offset];
                    }
                }
            }
            let mixed = mixed.clamp(-1.0, 1.0);
            // Same mono mix on every channel.
            for sample in frame.iter_mut() {
                *sample = mixed;
            }
        }

        let next_base = base + frames as u64;
        frames_written.store(next_base, Ordering::Relaxed);
        state.queue.retain(|scheduled| {
            let finished = scheduled.start_frame + scheduled.samples.len() as u64 <= next_base;
            if finished {
                if events
                    .try_send(SessionEvent::PlaybackEnded(scheduled.id))
                    .is_err()
                {
                    tracing::warn!("session inbox full, playback-ended signal lost");
                }
            }
            !finished
        });
    };

    let stream = device
        .build_output_stream(
            &config,
            output_data_fn,
            move |err| tracing::error!("output stream error: {}", err),
            None,
        )
        .map_err(SessionError::permission_denied)?;
    Ok((stream, sample_rate))
}
