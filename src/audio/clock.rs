//! Output clocks for playback scheduling.
//!
//! Times are seconds on the output device's clock, as `f64`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for the playback clock, allowing manual time in tests.
pub trait OutputClock: Send + Sync {
    /// Seconds elapsed on the output clock. Never decreases.
    fn now(&self) -> f64;
}

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to `seconds`. Earlier values are ignored to keep the clock monotonic.
    pub fn set(&self, seconds: f64) {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            if f64::from_bits(current) >= seconds {
                return;
            }
            match self.bits.compare_exchange_weak(
                current,
                seconds.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Clock derived from a count of rendered sample frames.
///
/// The output device bumps the counter from its callback; readers on other
/// threads see the time of the last rendered frame.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    pub fn add_frames(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl OutputClock for FrameClock {
    fn now(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}
