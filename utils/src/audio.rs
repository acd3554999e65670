use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Capture-side wire rate. The agent's output rate arrives per-chunk in the
/// mime type and may differ.
pub const PCM16_CAPTURE_SAMPLE_RATE: f64 = 16000.0;

/// Cosmetic gain applied to the level meter so quiet speech still moves it.
const LEVEL_METER_GAIN: f32 = 4.0;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid transport text: {0}")]
    Transport(#[from] base64::DecodeError),
    #[error("{len} bytes do not divide into {channels}-channel pcm16 frames")]
    Truncated { len: usize, channels: usize },
    #[error("channel count must be non-zero")]
    NoChannels,
}

/// Decoded playback-ready audio: normalized mono samples bound to a rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PcmBuffer {
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Maps float samples to little-endian PCM16. Out-of-range inputs are
/// clamped, never rejected.
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            v.to_le_bytes()
        })
        .collect()
}

pub fn to_transport_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_transport_text(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

/// Interprets interleaved little-endian PCM16 bytes as normalized floats,
/// downmixing to mono when the stream carries more than one channel.
pub fn decode_to_playable(
    bytes: &[u8],
    sample_rate: u32,
    channels: usize,
) -> Result<PcmBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::NoChannels);
    }
    if bytes.len() % (2 * channels) != 0 {
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            channels,
        });
    }
    let samples = bytes
        .chunks_exact(2 * channels)
        .map(|frame| {
            let sum: f32 = frame
                .chunks_exact(2)
                .map(|pair| {
                    let v = i16::from_le_bytes([pair[0], pair[1]]);
                    (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
                })
                .sum();
            sum / channels as f32
        })
        .collect();
    Ok(PcmBuffer {
        samples,
        sample_rate,
    })
}

/// Root-mean-square energy of a frame, scaled for a UI level meter and
/// capped to [0, 1].
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    (mean_square.sqrt() * LEVEL_METER_GAIN).min(1.0)
}

pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_text_round_trips() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = to_transport_text(&bytes);
        assert_eq!(from_transport_text(&text).unwrap(), bytes);
    }

    #[test]
    fn from_transport_text_rejects_garbage() {
        assert!(matches!(
            from_transport_text("not!!base64"),
            Err(DecodeError::Transport(_))
        ));
    }

    #[test]
    fn pcm16_round_trip_within_quantization_error() {
        let frame: Vec<f32> = (0..4096).map(|i| ((i as f32) * 0.013).sin() * 0.8).collect();
        let decoded = decode_to_playable(&encode_samples(&frame), 16000, 1).unwrap();
        assert_eq!(decoded.samples.len(), frame.len());
        for (a, b) in frame.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = encode_samples(&[2.0, -3.0]);
        let decoded = decode_to_playable(&bytes, 16000, 1).unwrap();
        assert_eq!(decoded.samples, vec![1.0, -1.0]);
    }

    #[test]
    fn decode_rejects_truncated_frames() {
        assert!(matches!(
            decode_to_playable(&[0, 0, 0], 24000, 1),
            Err(DecodeError::Truncated { len: 3, channels: 1 })
        ));
        // 6 bytes is three mono samples but one and a half stereo frames.
        assert!(decode_to_playable(&[0; 6], 24000, 1).is_ok());
        assert!(decode_to_playable(&[0; 6], 24000, 2).is_err());
        assert!(matches!(
            decode_to_playable(&[0; 4], 24000, 0),
            Err(DecodeError::NoChannels)
        ));
    }

    #[test]
    fn stereo_decode_downmixes_to_mono() {
        let stereo = encode_samples(&[0.5, -0.5, 1.0, 0.0]);
        let decoded = decode_to_playable(&stereo, 24000, 2).unwrap();
        assert_eq!(decoded.samples.len(), 2);
        assert!(decoded.samples[0].abs() < 1.0 / 32768.0);
        assert!((decoded.samples[1] - 0.5).abs() < 1.0 / 32768.0);
    }

    #[test]
    fn buffer_duration_follows_rate() {
        let buffer = PcmBuffer {
            samples: vec![0.0; 24000],
            sample_rate: 24000,
        };
        assert!((buffer.duration() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn level_meter_is_capped_and_silent_on_silence() {
        assert_eq!(rms_level(&[]), 0.0);
        assert_eq!(rms_level(&[0.0; 512]), 0.0);
        assert_eq!(rms_level(&[1.0; 512]), 1.0);
        let quiet = rms_level(&[0.01; 512]);
        assert!(quiet > 0.0 && quiet < 0.1);
    }
}
