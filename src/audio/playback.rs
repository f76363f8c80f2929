//! Speaker output using CPAL.
//!
//! Scheduled buffers are placed on a [`Timeline`] that the device callback
//! renders from. The timeline's frame counter is the playback clock, so
//! `current_time` advances exactly as fast as the device consumes audio.

use crate::audio::capture::{SendableStream, is_preferred_device, with_suppressed_stderr};
use crate::audio::clock::{FrameClock, OutputClock};
use crate::audio::pcm::PcmBuffer;
use crate::audio::sink::AudioOutput;
use crate::audio::timeline::Timeline;
use crate::error::{LiveBuddyError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};

fn find_output_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| LiveBuddyError::AudioPlayback {
                message: format!("Failed to enumerate output devices: {}", e),
            })?;

        match device_name {
            Some(name) => {
                for device in devices {
                    if let Ok(dev_name) = device.name()
                        && dev_name == name
                    {
                        return Ok(device);
                    }
                }
                Err(LiveBuddyError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
            }
            None => {
                for device in devices {
                    if let Ok(name) = device.name()
                        && is_preferred_device(&name)
                    {
                        return Ok(device);
                    }
                }
                host.default_output_device()
                    .ok_or_else(|| LiveBuddyError::AudioDeviceNotFound {
                        device: "default output".to_string(),
                    })
            }
        }
    })
}

/// Audio output on a CPAL device.
///
/// Runs at the device's native rate and channel count; incoming buffers are
/// mixed to mono and resampled before they reach the timeline.
pub struct CpalPlayback {
    stream: Mutex<Option<SendableStream>>,
    timeline: Arc<Mutex<Timeline>>,
    clock: FrameClock,
    device_rate: u32,
}

impl CpalPlayback {
    /// Open the named output device (or the best default) and start the stream.
    ///
    /// # Errors
    /// Returns `LiveBuddyError::AudioDeviceNotFound` if the device is missing,
    /// or `LiveBuddyError::AudioPlayback` if the stream cannot be started.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        use cpal::SampleFormat;

        let device = find_output_device(device_name)?;
        if let Ok(name) = device.name() {
            log::debug!("playback device: {}", name);
        }

        let default_config =
            device
                .default_output_config()
                .map_err(|e| LiveBuddyError::AudioPlayback {
                    message: format!("Failed to query output config: {}", e),
                })?;

        let device_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        let timeline = Arc::new(Mutex::new(Timeline::new(device_rate)));
        let clock = timeline
            .lock()
            .map(|timeline| timeline.clock())
            .map_err(|e| LiveBuddyError::AudioPlayback {
                message: format!("Failed to lock timeline: {}", e),
            })?;

        let err_callback = |err| {
            log::error!("Audio output stream error: {}", err);
        };

        let render_timeline = Arc::clone(&timeline);
        let stream = match default_config.sample_format() {
            SampleFormat::F32 => device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    match render_timeline.lock() {
                        Ok(mut timeline) => timeline.render(data, channels),
                        Err(_) => data.fill(0.0),
                    }
                },
                err_callback,
                None,
            ),
            SampleFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::new();
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.clear();
                        scratch.resize(data.len(), 0.0);
                        if let Ok(mut timeline) = render_timeline.lock() {
                            timeline.render(&mut scratch, channels);
                        }
                        for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                            *out = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                        }
                    },
                    err_callback,
                    None,
                )
            }
            fmt => {
                return Err(LiveBuddyError::AudioFormatMismatch {
                    expected: "f32 or i16 output".to_string(),
                    actual: format!("{:?}", fmt),
                });
            }
        }
        .map_err(|e| LiveBuddyError::AudioPlayback {
            message: format!("Failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| LiveBuddyError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        log::info!(
            "playback started ({}ch/{}Hz/{:?})",
            channels,
            device_rate,
            default_config.sample_format()
        );

        Ok(Self {
            stream: Mutex::new(Some(SendableStream(stream))),
            timeline,
            clock,
            device_rate,
        })
    }

    /// The device's native sample rate.
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl AudioOutput for CpalPlayback {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn play_at(&mut self, buffer: PcmBuffer, start: f64) -> Result<()> {
        let samples = buffer.into_mono().resample(self.device_rate).into_samples();
        let mut timeline = self
            .timeline
            .lock()
            .map_err(|e| LiveBuddyError::AudioPlayback {
                message: format!("Failed to lock timeline: {}", e),
            })?;
        timeline.push(start, samples);
        Ok(())
    }

    fn flush(&mut self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.clear();
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.flush();
        let mut stream_guard = self.stream.lock().map_err(|e| LiveBuddyError::AudioPlayback {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| LiveBuddyError::AudioPlayback {
                    message: format!("Failed to stop output stream: {}", e),
                })?;
            log::debug!("playback stopped");
        }
        Ok(())
    }
}
