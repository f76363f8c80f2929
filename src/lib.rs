//! livebuddy - Talk with a remote voice model
//!
//! Streams microphone audio to a realtime voice model and plays its spoken
//! replies back gap-free.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod chat;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod output;
pub mod session;

// Composition root - needs everything
#[cfg(all(feature = "cpal-audio", feature = "websocket", feature = "cli"))]
pub mod app;

// Core seams (capture → session → playback)
pub use audio::recorder::CaptureSource;
pub use audio::sink::AudioOutput;
pub use session::transport::Connector;

// Driver
pub use chat::{ChatConfig, ChatEvent, ChatSummary, FrameSender, VoiceChat};

// Session
pub use session::{SessionBridge, SessionConfig, SessionEvent, SessionHandle, SessionState};

// Error handling
pub use error::{LiveBuddyError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
