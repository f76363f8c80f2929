//! Audio plumbing for the conversation loop.
//!
//! ```text
//! microphone ─▶ CaptureSource ─▶ FrameAssembler ─▶ activity / pcm::encode ─▶ session
//!
//! session ─▶ pcm::decode ─▶ PlaybackScheduler ─▶ AudioOutput ─▶ Timeline ─▶ speaker
//!                                  ▲                    │
//!                                  └──── OutputClock ◀──┘
//! ```

pub mod activity;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod clock;
pub mod pcm;
#[cfg(feature = "cpal-audio")]
pub mod playback;
pub mod recorder;
pub mod scheduler;
pub mod sink;
pub mod timeline;
pub mod wav;

pub use clock::{FrameClock, ManualClock, OutputClock};
pub use pcm::PcmBuffer;
pub use recorder::{AudioFrame, CaptureSource, FrameAssembler, MockCaptureSource};
pub use scheduler::{PlaybackScheduler, PlaybackStatus, ScheduledInterval};
pub use sink::{AudioOutput, MockAudioOutput};
pub use timeline::Timeline;
pub use wav::WavCaptureSource;
