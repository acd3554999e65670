use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::session::SessionEvent;
use crate::utils;
use crate::utils::audio::PCM16_CAPTURE_SAMPLE_RATE;

/// Samples per emitted frame at the 16 kHz wire rate (~256 ms cadence).
pub const FRAME_SAMPLES: usize = 4096;

const DEVICE_CHUNK_SIZE: usize = 1024;
const RAW_QUEUE_CAPACITY: usize = 64;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One capture frame: fixed-size mono 16 kHz samples in [-1, 1] plus the
/// RMS level computed for the UI meter.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub level: f32,
}

/// A running microphone stream. `stop` is idempotent and halts the device.
pub trait CaptureStream: Send {
    fn stop(&mut self);
}

pub trait CaptureDriver: Send {
    fn start(
        &mut self,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn CaptureStream>, SessionError>;
}

/// Microphone driver backed by cpal.
pub struct Microphone {
    device_name: Option<String>,
}

impl Microphone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl Default for Microphone {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CaptureDriver for Microphone {
    fn start(
        &mut self,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Box<dyn CaptureStream>, SessionError> {
        let capture = AudioCapture::start(self.device_name.as_deref(), events)?;
        Ok(Box::new(capture))
    }
}

/// Owns the cpal input stream (pinned to a dedicated thread, cpal streams
/// are not `Send`) and the worker task that turns raw device callbacks into
/// fixed 4096-sample 16 kHz frames.
pub struct AudioCapture {
    stop_flag: Arc<AtomicBool>,
    stream_thread: Option<std::thread::JoinHandle<()>>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl AudioCapture {
    pub fn start(
        device_name: Option<&str>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let (raw_tx, raw_rx) = mpsc::channel::<Vec<f32>>(RAW_QUEUE_CAPACITY);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let device_name = device_name.map(|s| s.to_string());
        let stop = stop_flag.clone();
        let stream_thread = std::thread::spawn(move || {
            match build_input_stream(device_name.as_deref(), raw_tx) {
                Ok((stream, config)) => {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(SessionError::permission_denied(e)));
                        return;
                    }
                    let _ = ready_tx.send(Ok(config));
                    while !stop.load(Ordering::Relaxed) {
                        std::thread::park_timeout(STOP_POLL_INTERVAL);
                    }
                    // Halts the device before the thread exits.
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let config = match ready_rx.recv() {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => return Err(SessionError::permission_denied("capture thread died")),
        };

        let worker = tokio::spawn(frame_worker(raw_rx, config, events));

        Ok(Self {
            stop_flag,
            stream_thread: Some(stream_thread),
            worker: Some(worker),
        })
    }

    /// Idempotent; halts all device tracks and the frame worker.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.stream_thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl CaptureStream for AudioCapture {
    fn stop(&mut self) {
        AudioCapture::stop(self);
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    device_name: Option<&str>,
    raw_tx: mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, StreamConfig), SessionError> {
    let device =
        utils::device::get_or_default_input(device_name).map_err(SessionError::permission_denied)?;
    let default_config = device
        .default_input_config()
        .map_err(SessionError::permission_denied)?;
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(DEVICE_CHUNK_SIZE as u32)),
    };
    tracing::debug!("capture: device={:?}, config={:?}", device.name().ok(), config);

    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        // Audio thread: hand off and return, never block.
        if raw_tx.try_send(data.to_vec()).is_err() {
            tracing::warn!("capture queue full, dropping {} samples", data.len());
        }
    };
    let stream = device
        .build_input_stream(
            &config,
            input_data_fn,
            move |err| tracing::error!("input stream error: {}", err),
            None,
        )
        .map_err(SessionError::permission_denied)?;
    Ok((stream, config))
}

/// Buffers raw device callbacks, downmixes to mono, resamples to the
/// 16 kHz wire rate, and emits fixed-size frames to the session inbox.
/// Frames are dropped (with a warning) rather than blocking when the inbox
/// is full.
async fn frame_worker(
    mut raw_rx: mpsc::Receiver<Vec<f32>>,
    config: StreamConfig,
    events: mpsc::Sender<SessionEvent>,
) {
    let channels = config.channels as usize;
    let in_rate = config.sample_rate.0 as f64;
    let mut resampler = if (in_rate - PCM16_CAPTURE_SAMPLE_RATE).abs() > f64::EPSILON {
        match utils::audio::create_resampler(in_rate, PCM16_CAPTURE_SAMPLE_RATE, DEVICE_CHUNK_SIZE)
        {
            Ok(resampler) => Some(resampler),
            Err(e) => {
                tracing::error!("failed to create capture resampler: {}", e);
                return;
            }
        }
    } else {
        None
    };

    let mut pending: VecDeque<f32> = VecDeque::with_capacity(DEVICE_CHUNK_SIZE * 4);
    let mut wire: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);

    while let Some(data) = raw_rx.recv().await {
        if channels <= 1 {
            pending.extend(data);
        } else {
            pending.extend(
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }

        while pending.len() >= DEVICE_CHUNK_SIZE {
            let block: Vec<f32> = pending.drain(..DEVICE_CHUNK_SIZE).collect();
            match &mut resampler {
                None => wire.extend(block),
                Some(resampler) => match resampler.process(&[block.as_slice()], None) {
                    Ok(resampled) => {
                        if let Some(mono) = resampled.first() {
                            wire.extend(mono.iter().copied());
                        }
                    }
                    Err(e) => tracing::warn!("capture resample failed: {}", e),
                },
            }
        }

        while wire.len() >= FRAME_SAMPLES {
            let samples: Vec<f32> = wire.drain(..FRAME_SAMPLES).collect();
            let level = utils::audio::rms_level(&samples);
            match events.try_send(SessionEvent::CaptureFrame(AudioFrame { samples, level })) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("session inbox full, dropping capture frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_rate_config(channels: u16) -> StreamConfig {
        StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(PCM16_CAPTURE_SAMPLE_RATE as u32),
            buffer_size: cpal::BufferSize::Default,
        }
    }

    #[tokio::test]
    async fn worker_emits_fixed_frames_with_level() {
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let worker = tokio::spawn(frame_worker(raw_rx, wire_rate_config(1), events_tx));

        // 5 device blocks of 1024 samples: one full frame plus remainder.
        for _ in 0..5 {
            raw_tx.send(vec![0.5f32; DEVICE_CHUNK_SIZE]).await.unwrap();
        }

        let event = events_rx.recv().await.unwrap();
        let SessionEvent::CaptureFrame(frame) = event else {
            panic!("expected a capture frame");
        };
        assert_eq!(frame.samples.len(), FRAME_SAMPLES);
        assert!(frame.level > 0.0 && frame.level <= 1.0);

        drop(raw_tx);
        worker.await.unwrap();
        // The 1024-sample remainder never formed a second frame.
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn worker_downmixes_interleaved_stereo() {
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let worker = tokio::spawn(frame_worker(raw_rx, wire_rate_config(2), events_tx));

        // L=0.8, R=0.0 throughout: the mono mix is 0.4.
        let block: Vec<f32> = [0.8f32, 0.0]
            .iter()
            .copied()
            .cycle()
            .take(DEVICE_CHUNK_SIZE * 2)
            .collect();
        for _ in 0..4 {
            raw_tx.send(block.clone()).await.unwrap();
        }

        let SessionEvent::CaptureFrame(frame) = events_rx.recv().await.unwrap() else {
            panic!("expected a capture frame");
        };
        assert_eq!(frame.samples.len(), FRAME_SAMPLES);
        assert!(frame.samples.iter().all(|s| (s - 0.4).abs() < 1e-6));

        drop(raw_tx);
        worker.await.unwrap();
    }
}
