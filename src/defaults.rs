//! Default configuration constants for livebuddy.
//!
//! Shared by the config file, the CLI and the library types so every entry
//! point agrees on rates, thresholds and the remote model.

/// Microphone capture rate in Hz.
///
/// The remote model accepts 16 kHz mono PCM input.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Rate of the audio the remote model speaks back, in Hz.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame sent upstream.
///
/// 4096 samples is 256 ms at 16 kHz.
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Mean absolute amplitude above which the user counts as speaking.
pub const SPEAKING_THRESHOLD: f32 = 0.01;

/// How often the chat driver polls capture and playback when idle.
pub const POLL_INTERVAL_MS: u64 = 10;

/// Remote voice model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Prebuilt voice used for replies.
pub const DEFAULT_VOICE: &str = "Puck";

/// Persona given to the remote model at session setup.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a magical, friendly forest spirit talking to a 5-6 year old child. \
     Keep sentences short, simple, and encouraging. Be excited about their adventures. \
     Do not give long lectures.";

/// WebSocket endpoint of the bidirectional generate-content service.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Environment variables consulted for the API key, in order.
pub const API_KEY_ENV_VARS: &[&str] = &["LIVEBUDDY_API_KEY", "GEMINI_API_KEY"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_frame_is_a_quarter_second() {
        let ms = CAPTURE_FRAME_SIZE as u64 * 1000 / CAPTURE_SAMPLE_RATE as u64;
        assert_eq!(ms, 256);
    }

    #[test]
    fn playback_rate_differs_from_capture_rate() {
        assert_ne!(CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE);
    }
}
