//! WAV file capture source.
//!
//! Stands in for the microphone: the file is converted to 16 kHz mono and
//! handed out either as fast as it is polled or paced to real time.

use crate::audio::pcm::resample_linear;
use crate::audio::recorder::CaptureSource;
use crate::defaults::CAPTURE_SAMPLE_RATE;
use crate::error::{LiveBuddyError, Result};
use std::io::Read;
use std::path::Path;
use std::time::Instant;

/// Capture source that reads from WAV file data.
/// Supports arbitrary sample rates and channels, resampling to 16kHz mono.
pub struct WavCaptureSource {
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
    paced: bool,
    started_at: Option<Instant>,
}

impl WavCaptureSource {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let wav_reader =
            hound::WavReader::new(reader).map_err(|e| LiveBuddyError::AudioCapture {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels.max(1) as usize;

        let raw_samples = read_as_f32(wav_reader)?;

        // Convert to mono by averaging channels
        let mono_samples: Vec<f32> = if source_channels > 1 {
            raw_samples
                .chunks_exact(source_channels)
                .map(|frame| frame.iter().sum::<f32>() / source_channels as f32)
                .collect()
        } else {
            raw_samples
        };

        let samples = resample_linear(&mono_samples, source_rate, CAPTURE_SAMPLE_RATE);

        log::debug!(
            "loaded WAV: {}Hz/{}ch, {} samples after conversion",
            source_rate,
            source_channels,
            samples.len()
        );

        Ok(Self {
            samples,
            position: 0,
            // 100ms chunks at 16kHz
            chunk_size: 1600,
            paced: false,
            started_at: None,
        })
    }

    /// Open a WAV file on disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LiveBuddyError::AudioDeviceNotFound {
                    device: path.display().to_string(),
                }
            } else {
                LiveBuddyError::Io(e)
            }
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)))
    }

    /// Release samples no faster than real time, like a microphone would.
    ///
    /// The pacing clock starts at the first read, not at `start`.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Consume the source and return all samples as a single buffer.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Samples not yet handed out.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }

    fn available_end(&self) -> usize {
        let chunk_end = self.position + self.chunk_size;
        let end = if self.paced {
            let elapsed = self
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0);
            let due = (elapsed * CAPTURE_SAMPLE_RATE as f64) as usize;
            due.max(self.position)
        } else {
            chunk_end
        };
        end.min(self.samples.len())
    }
}

fn read_as_f32<R: Read>(mut reader: hound::WavReader<R>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    let map_err = |e: hound::Error| LiveBuddyError::AudioCapture {
        message: format!("Failed to read WAV samples: {}", e),
    };

    match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_err),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_err)
        }
    }
}

impl CaptureSource for WavCaptureSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.position = self.samples.len();
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.position >= self.samples.len() {
            return Ok(Vec::new());
        }
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }

        let end = self.available_end();
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;

        Ok(chunk)
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }

    fn is_live(&self) -> bool {
        false
    }
}
