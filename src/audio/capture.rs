//! Microphone capture and output device discovery using CPAL.

use crate::audio::pcm::resample_linear;
use crate::audio::recorder::CaptureSource;
use crate::defaults;
use crate::error::{LiveBuddyError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Input device name patterns to filter out (not useful for voice input).
const FILTERED_INPUT_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

/// Output device name patterns to filter out.
const FILTERED_OUTPUT_PATTERNS: &[&str] = &["surround", "rear:", "center:", "side:"];

fn matches_any(name: &str, patterns: &[&str]) -> bool {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// Check if a device is a preferred device.
pub(crate) fn is_preferred_device(name: &str) -> bool {
    matches_any(name, PREFERRED_DEVICES)
}

/// Map a stream-building error, recognising denied device access.
pub(crate) fn classify_stream_error(context: &str, message: String) -> LiveBuddyError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        LiveBuddyError::PermissionDenied {
            message: format!("{}: {}", context, message),
        }
    } else {
        LiveBuddyError::AudioCapture {
            message: format!("{}: {}", context, message),
        }
    }
}

fn describe_devices<I>(devices: I, filtered: &[&str]) -> Vec<String>
where
    I: Iterator<Item = cpal::Device>,
{
    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if matches_any(&name, filtered) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    names
}

/// List usable audio input devices, marking preferred ones "\[recommended\]".
///
/// # Errors
/// Returns `LiveBuddyError::AudioCapture` if device enumeration fails.
pub fn list_input_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices());
    let devices = devices.map_err(|e| LiveBuddyError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;
    Ok(describe_devices(devices, FILTERED_INPUT_PATTERNS))
}

/// List usable audio output devices, marking preferred ones "\[recommended\]".
///
/// # Errors
/// Returns `LiveBuddyError::AudioPlayback` if device enumeration fails.
pub fn list_output_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().output_devices());
    let devices = devices.map_err(|e| LiveBuddyError::AudioPlayback {
        message: format!("Failed to enumerate output devices: {}", e),
    })?;
    Ok(describe_devices(devices, FILTERED_OUTPUT_PATTERNS))
}

/// Find an input device by exact name, or the best default.
///
/// The default prefers PipeWire/PulseAudio so the desktop's device selection
/// is respected, then falls back to the host default.
fn find_input_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| LiveBuddyError::AudioCapture {
                message: format!("Failed to enumerate devices: {}", e),
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
                host.default_input_device()
                    .ok_or_else(|| LiveBuddyError::AudioDeviceNotFound {
                        device: "default input".to_string(),
                    })
            }
        }
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: The stream is only touched through the Mutex in its owner, and its
/// methods are called synchronously from one thread at a time.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture using CPAL.
///
/// Captures mono float audio at 16 kHz. Tries f32/16kHz/mono first, then
/// i16/16kHz/mono, then the device's native config with software down-mix and
/// resampling.
///
/// The stream lives behind `SendableStream` + `Mutex`, which makes the
/// source `Send + Sync` without further unsafe code.
pub struct CpalCaptureSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalCaptureSource {
    /// Create a capture source for the named device (or the best default).
    ///
    /// # Errors
    /// Returns `LiveBuddyError::AudioDeviceNotFound` if the device is missing.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        Self::with_sample_rate(device_name, defaults::CAPTURE_SAMPLE_RATE)
    }

    pub fn with_sample_rate(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_input_device(device_name)?;
        if let Ok(name) = device.name() {
            log::debug!("capture device: {}", name);
        }

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            log::error!("Audio input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let first_error = match self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            Ok(stream) => return Ok(stream),
            Err(e) => e.to_string(),
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| s as f32 / 32768.0));
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let denied = classify_stream_error("Failed to open microphone", first_error);
        if matches!(denied, LiveBuddyError::PermissionDenied { .. }) {
            return Err(denied);
        }

        self.build_stream_native()
    }

    /// Build a stream using the device's default config, mixing to mono and
    /// resampling to the capture rate in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config = self
            .device
            .default_input_config()
            .map_err(|e| classify_stream_error("Failed to query input config", e.to_string()))?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        log::info!(
            "using native input format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| {
            log::error!("Audio input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let converted =
                        convert_to_mono(data, native_channels, native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    let converted =
                        convert_to_mono(&floats, native_channels, native_rate, target_rate);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(&converted);
                    }
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(LiveBuddyError::AudioFormatMismatch {
                    expected: "f32 or i16 input".to_string(),
                    actual: format!("{:?}", fmt),
                });
            }
        };

        stream.map_err(|e| classify_stream_error("Failed to build native input stream", e.to_string()))
    }
}

/// Mix multi-channel audio to mono and resample to the target rate.
fn convert_to_mono(samples: &[f32], channels: usize, source_rate: u32, target_rate: u32) -> Vec<f32> {
    let mono: Vec<f32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    resample_linear(&mono, source_rate, target_rate)
}

impl CaptureSource for CpalCaptureSource {
    fn start(&mut self) -> Result<()> {
        {
            let stream_guard = self.stream.lock().map_err(|e| LiveBuddyError::AudioCapture {
                message: format!("Failed to lock stream: {}", e),
            })?;
            if stream_guard.is_some() {
                return Ok(());
            }
        }

        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| classify_stream_error("Failed to start audio stream", e.to_string()))?;

        // Some PipeWire-ALSA setups accept non-native configs but never
        // deliver data; give the callback a moment to fire.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }

            let native_stream = self.build_stream_native()?;
            native_stream.play().map_err(|e| {
                classify_stream_error("Failed to start native audio stream", e.to_string())
            })?;
            native_stream
        } else {
            stream
        };

        let mut stream_guard = self.stream.lock().map_err(|e| LiveBuddyError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;
        *stream_guard = Some(SendableStream(final_stream));
        log::debug!("microphone capture started at {}Hz", self.sample_rate);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock().map_err(|e| LiveBuddyError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })?;

        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| LiveBuddyError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
            log::debug!("microphone capture stopped");
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let mut buffer = self.buffer.lock().map_err(|e| LiveBuddyError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_source_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CpalCaptureSource>();
    }

    #[test]
    fn test_input_filter_patterns() {
        assert!(matches_any("surround51", FILTERED_INPUT_PATTERNS));
        assert!(matches_any("front:CARD=PCH", FILTERED_INPUT_PATTERNS));
        assert!(matches_any("HDMI Output", FILTERED_INPUT_PATTERNS));
        assert!(!matches_any("pipewire", FILTERED_INPUT_PATTERNS));
        assert!(!matches_any("Built-in Audio", FILTERED_INPUT_PATTERNS));
    }

    #[test]
    fn test_output_filter_keeps_hdmi() {
        assert!(!matches_any("HDMI Output", FILTERED_OUTPUT_PATTERNS));
        assert!(matches_any("surround40", FILTERED_OUTPUT_PATTERNS));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("PulseAudio"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_classify_permission_errors() {
        let error = classify_stream_error("open", "Permission denied (os error 13)".to_string());
        assert!(matches!(error, LiveBuddyError::PermissionDenied { .. }));

        let error = classify_stream_error("open", "device busy".to_string());
        assert!(matches!(error, LiveBuddyError::AudioCapture { .. }));
    }

    #[test]
    fn test_convert_to_mono_downmixes_and_resamples() {
        let stereo = vec![0.5f32, -0.5, 0.25, 0.25, 1.0, 0.0];
        let mono = convert_to_mono(&stereo, 2, 16000, 16000);
        assert_eq!(mono, vec![0.0, 0.25, 0.5]);

        let resampled = convert_to_mono(&vec![0.1f32; 480], 1, 48000, 16000);
        assert_eq!(resampled.len(), 160);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_input_devices_filters() {
        let devices = list_input_devices().expect("Failed to list devices");
        for device in &devices {
            assert!(!device.to_lowercase().contains("surround"));
        }
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        match CpalCaptureSource::new(Some("NonExistentDevice12345")) {
            Err(LiveBuddyError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            // Hosts without any audio backend fail enumeration instead
            Err(LiveBuddyError::AudioCapture { .. }) => {}
            Err(other) => panic!("Expected AudioDeviceNotFound, got {:?}", other),
            Ok(_) => panic!("Expected an error for a nonexistent device"),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_capture_start_read_stop() {
        let mut source = CpalCaptureSource::new(None).expect("Failed to create capture source");
        assert!(source.start().is_ok());
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(source.read_samples().is_ok());
        assert!(source.stop().is_ok());
    }
}
