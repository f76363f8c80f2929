use crate::audio::clock::{ManualClock, OutputClock};
use crate::audio::pcm::PcmBuffer;
use crate::audio::scheduler::ScheduledInterval;
use crate::error::{LiveBuddyError, Result};
use std::sync::{Arc, Mutex};

/// Trait for audio output devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioOutput: Send {
    /// Seconds on the device's monotonic playback clock.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `start` on the playback clock.
    ///
    /// Callers schedule buffers in start order without overlap.
    fn play_at(&mut self, buffer: PcmBuffer, start: f64) -> Result<()>;

    /// Discard everything scheduled but not yet played.
    fn flush(&mut self);

    /// Stop the device and release it.
    fn stop(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
struct MockOutputState {
    scheduled: Vec<ScheduledInterval>,
    flushes: usize,
    stopped: bool,
}

/// Mock audio output for testing.
///
/// Clones share state, so a test can keep one clone to inspect what the
/// code under test scheduled and to move the clock.
#[derive(Debug, Clone, Default)]
pub struct MockAudioOutput {
    clock: ManualClock,
    state: Arc<Mutex<MockOutputState>>,
    should_fail_play: bool,
    should_fail_stop: bool,
}

impl MockAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail every `play_at`.
    pub fn with_play_failure(mut self) -> Self {
        self.should_fail_play = true;
        self
    }

    /// Configure the mock to fail on stop.
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// The clock this output reports.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    /// Intervals passed to `play_at`, in call order.
    pub fn scheduled(&self) -> Vec<ScheduledInterval> {
        self.state
            .lock()
            .map(|state| state.scheduled.clone())
            .unwrap_or_default()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().map(|state| state.flushes).unwrap_or(0)
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().map(|state| state.stopped).unwrap_or(false)
    }
}

impl AudioOutput for MockAudioOutput {
    fn current_time(&self) -> f64 {
        self.clock.now()
    }

    fn play_at(&mut self, buffer: PcmBuffer, start: f64) -> Result<()> {
        if self.should_fail_play {
            return Err(LiveBuddyError::AudioPlayback {
                message: "mock playback error".to_string(),
            });
        }
        let mut state = self
            .state
            .lock()
            .map_err(|e| LiveBuddyError::AudioPlayback {
                message: format!("Failed to lock mock state: {}", e),
            })?;
        state.scheduled.push(ScheduledInterval {
            start,
            end: start + buffer.duration(),
        });
        Ok(())
    }

    fn flush(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.flushes += 1;
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            return Err(LiveBuddyError::AudioPlayback {
                message: "mock stop error".to_string(),
            });
        }
        if let Ok(mut state) = self.state.lock() {
            state.stopped = true;
        }
        Ok(())
    }
}
