//! 16-bit little-endian PCM framing.
//!
//! Captured audio travels upstream as signed 16-bit little-endian samples and
//! the remote model answers in the same format at a different rate, so the
//! decoder takes the sample rate and channel count from the caller.

use crate::error::{LiveBuddyError, Result};

/// Bytes per encoded sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Encode float samples in [-1.0, 1.0] as 16-bit little-endian PCM.
///
/// Samples outside the range are clamped. The output is exactly
/// `2 * samples.len()` bytes.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&quantized.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into a float buffer.
///
/// # Errors
/// Returns `LiveBuddyError::MalformedInput` if `bytes` does not hold a whole
/// number of frames, and `LiveBuddyError::AudioFormatMismatch` for a zero
/// sample rate or channel count.
pub fn decode(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<PcmBuffer> {
    if sample_rate == 0 || channels == 0 {
        return Err(LiveBuddyError::AudioFormatMismatch {
            expected: "non-zero sample rate and channel count".to_string(),
            actual: format!("{}Hz/{}ch", sample_rate, channels),
        });
    }

    let frame_bytes = BYTES_PER_SAMPLE * channels as usize;
    if bytes.len() % frame_bytes != 0 {
        return Err(LiveBuddyError::MalformedInput {
            len: bytes.len(),
            frame_bytes,
        });
    }

    let samples = bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(PcmBuffer::new(samples, sample_rate, channels))
}

/// Decoded audio: interleaved float samples with their format.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl PcmBuffer {
    /// Creates a buffer from interleaved samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// A mono buffer of silence lasting `frames` samples.
    pub fn silence(frames: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; frames], sample_rate, 1)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mix down to a single channel by averaging.
    pub fn into_mono(self) -> Self {
        if self.channels <= 1 {
            return self;
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self::new(samples, self.sample_rate, 1)
    }

    /// Resample a mono buffer to `to_rate` with linear interpolation.
    ///
    /// Multi-channel buffers are mixed down first.
    pub fn resample(self, to_rate: u32) -> Self {
        if self.sample_rate == to_rate || to_rate == 0 {
            return self;
        }
        let mono = self.into_mono();
        let samples = resample_linear(&mono.samples, mono.sample_rate, to_rate);
        Self::new(samples, to_rate, 1)
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Simple linear interpolation resampling.
pub(crate) fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}
