use crate::chat::ChatConfig;
use crate::defaults;
use crate::error::{LiveBuddyError, Result};
use crate::session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionSettings,
    pub audio: AudioSettings,
}

/// Remote voice session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// Audio device and capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    pub frame_size: usize,
    pub speaking_threshold: f32,
    pub poll_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: defaults::DEFAULT_MODEL.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            system_instruction: defaults::DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: defaults::CAPTURE_FRAME_SIZE,
            speaking_threshold: defaults::SPEAKING_THRESHOLD,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn invalid(key: &str, message: &str) -> LiveBuddyError {
    LiveBuddyError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// `ConfigFileNotFound` if the file is missing, `Config` for invalid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LiveBuddyError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                LiveBuddyError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if it doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(LiveBuddyError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LIVEBUDDY_API_KEY, then GEMINI_API_KEY → session.api_key
    /// - LIVEBUDDY_MODEL → session.model
    /// - LIVEBUDDY_VOICE → session.voice
    /// - LIVEBUDDY_INPUT_DEVICE → audio.input_device
    /// - LIVEBUDDY_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(key) = defaults::API_KEY_ENV_VARS
            .iter()
            .find_map(|name| env_value(name))
        {
            self.session.api_key = Some(key);
        }

        if let Some(model) = env_value("LIVEBUDDY_MODEL") {
            self.session.model = model;
        }

        if let Some(voice) = env_value("LIVEBUDDY_VOICE") {
            self.session.voice = voice;
        }

        if let Some(device) = env_value("LIVEBUDDY_INPUT_DEVICE") {
            self.audio.input_device = Some(device);
        }

        if let Some(device) = env_value("LIVEBUDDY_OUTPUT_DEVICE") {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Check values that would otherwise fail deep inside a session.
    pub fn validate(&self) -> Result<()> {
        if self.session.model.trim().is_empty() {
            return Err(invalid("session.model", "must not be empty"));
        }
        if self.session.voice.trim().is_empty() {
            return Err(invalid("session.voice", "must not be empty"));
        }
        if !(self.session.endpoint.starts_with("wss://") || self.session.endpoint.starts_with("ws://"))
        {
            return Err(invalid("session.endpoint", "must be a ws:// or wss:// URL"));
        }
        if self.audio.frame_size == 0 {
            return Err(invalid("audio.frame_size", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.audio.speaking_threshold) {
            return Err(invalid("audio.speaking_threshold", "must be between 0.0 and 1.0"));
        }
        if self.audio.poll_interval_ms == 0 {
            return Err(invalid("audio.poll_interval_ms", "must be positive"));
        }
        Ok(())
    }

    /// The API key, or an error telling the user how to provide one.
    pub fn api_key(&self) -> Result<&str> {
        self.session
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                invalid(
                    "session.api_key",
                    "not set; export LIVEBUDDY_API_KEY or GEMINI_API_KEY",
                )
            })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.session.model.clone(),
            system_instruction: self.session.system_instruction.clone(),
            voice: self.session.voice.clone(),
            input_sample_rate: defaults::CAPTURE_SAMPLE_RATE,
        }
    }

    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            speaking_threshold: self.audio.speaking_threshold,
            frame_size: self.audio.frame_size,
            poll_interval: Duration::from_millis(self.audio.poll_interval_ms),
        }
    }

    /// Serialize to TOML with the API key masked.
    pub fn to_display_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if let Some(key) = shown.session.api_key.as_mut() {
            let visible: String = key.chars().take(4).collect();
            *key = format!("{}…", visible);
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/livebuddy/config.toml on Linux, or `None` when no
    /// config directory can be determined.
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("livebuddy").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_livebuddy_env() {
        remove_env("LIVEBUDDY_API_KEY");
        remove_env("GEMINI_API_KEY");
        remove_env("LIVEBUDDY_MODEL");
        remove_env("LIVEBUDDY_VOICE");
        remove_env("LIVEBUDDY_INPUT_DEVICE");
        remove_env("LIVEBUDDY_OUTPUT_DEVICE");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.session.model, defaults::DEFAULT_MODEL);
        assert_eq!(config.session.voice, "Puck");
        assert_eq!(config.session.api_key, None);
        assert!(config.session.endpoint.starts_with("wss://"));

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.output_device, None);
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.audio.speaking_threshold, 0.01);
        assert_eq!(config.audio.poll_interval_ms, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [session]
            api_key = "abc123"
            model = "gemini-live-test"
            voice = "Kore"
            system_instruction = "Speak slowly."

            [audio]
            input_device = "pipewire"
            output_device = "pulse"
            frame_size = 2048
            speaking_threshold = 0.02
            poll_interval_ms = 20
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.session.api_key.as_deref(), Some("abc123"));
        assert_eq!(config.session.model, "gemini-live-test");
        assert_eq!(config.session.voice, "Kore");
        assert_eq!(config.session.system_instruction, "Speak slowly.");
        assert_eq!(config.audio.input_device.as_deref(), Some("pipewire"));
        assert_eq!(config.audio.output_device.as_deref(), Some("pulse"));
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.audio.speaking_threshold, 0.02);
        assert_eq!(config.audio.poll_interval_ms, 20);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [session]
            voice = "Charon"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.session.voice, "Charon");
        assert_eq!(config.session.model, defaults::DEFAULT_MODEL);
        assert_eq!(config.audio, AudioSettings::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [session
            voice = "broken
        "#,
        );

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(LiveBuddyError::Config(_))
        ));
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_livebuddy_config_12345.toml");
        assert!(matches!(
            Config::load(missing_path),
            Err(LiveBuddyError::ConfigFileNotFound { .. })
        ));
        assert_eq!(Config::load_or_default(missing_path).unwrap(), Config::default());
    }

    #[test]
    fn test_env_override_api_key_precedence() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_livebuddy_env();

        set_env("GEMINI_API_KEY", "gemini-key");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.api_key().unwrap(), "gemini-key");

        set_env("LIVEBUDDY_API_KEY", "livebuddy-key");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.api_key().unwrap(), "livebuddy-key");

        clear_livebuddy_env();
    }

    #[test]
    fn test_env_override_session_and_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_livebuddy_env();

        set_env("LIVEBUDDY_MODEL", "other-model");
        set_env("LIVEBUDDY_VOICE", "Aoede");
        set_env("LIVEBUDDY_INPUT_DEVICE", "hw:1,0");
        set_env("LIVEBUDDY_OUTPUT_DEVICE", "hw:2,0");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.model, "other-model");
        assert_eq!(config.session.voice, "Aoede");
        assert_eq!(config.audio.input_device.as_deref(), Some("hw:1,0"));
        assert_eq!(config.audio.output_device.as_deref(), Some("hw:2,0"));

        clear_livebuddy_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_livebuddy_env();

        set_env("LIVEBUDDY_MODEL", "");
        set_env("LIVEBUDDY_API_KEY", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.session.model, defaults::DEFAULT_MODEL);
        assert!(config.api_key().is_err());

        clear_livebuddy_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.audio.frame_size = 0;
        assert!(matches!(
            config.validate(),
            Err(LiveBuddyError::ConfigInvalidValue { key, .. }) if key == "audio.frame_size"
        ));

        let mut config = Config::default();
        config.audio.speaking_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.endpoint = "https://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.voice = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_and_chat_config() {
        let mut config = Config::default();
        config.session.voice = "Kore".to_string();
        config.audio.poll_interval_ms = 25;

        let session = config.session_config();
        assert_eq!(session.voice, "Kore");
        assert_eq!(session.input_sample_rate, 16000);

        let chat = config.chat_config();
        assert_eq!(chat.poll_interval, Duration::from_millis(25));
        assert_eq!(chat.frame_size, 4096);
    }

    #[test]
    fn test_display_toml_masks_api_key() {
        let mut config = Config::default();
        config.session.api_key = Some("supersecretkey".to_string());

        let shown = config.to_display_toml().unwrap();
        assert!(!shown.contains("supersecretkey"));
        assert!(shown.contains("supe"));
        assert!(shown.contains("[audio]"));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_default_path_is_xdg_compliant() {
        if let Some(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("livebuddy"));
            assert!(path_str.ends_with("config.toml"));
        }
    }
}
