//! Error types for livebuddy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LiveBuddyError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio device errors
    #[error("Audio device permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    AudioPlayback { message: String },

    // Wire format errors
    #[error("Malformed PCM payload: {len} bytes is not a multiple of {frame_bytes}")]
    MalformedInput { len: usize, frame_bytes: usize },

    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    // Session errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Session protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl LiveBuddyError {
    /// Whether the session can keep running after this error.
    ///
    /// Malformed payloads are isolated to the frame that carried them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LiveBuddyError::MalformedInput { .. }
                | LiveBuddyError::Base64(_)
                | LiveBuddyError::Protocol { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LiveBuddyError>;
