//! Voice chat application entry point.
//!
//! Wires the real devices and the WebSocket session into a [`VoiceChat`]:
//! microphone → remote model → speaker

use crate::audio::capture::CpalCaptureSource;
use crate::audio::playback::CpalPlayback;
use crate::audio::recorder::CaptureSource;
use crate::audio::wav::WavCaptureSource;
use crate::chat::{ChatEvent, ChatSummary, VoiceChat};
use crate::cli::ChatArgs;
use crate::config::Config;
use crate::error::{LiveBuddyError, Result};
use crate::output;
use crate::session::{
    Connector, SessionBridge, SessionConfig, SessionEvent, SessionHandle, WebSocketConnector,
};
use std::sync::Arc;
use std::thread;

/// Fold command-line chat options over the loaded configuration.
pub fn apply_chat_args(mut config: Config, args: &ChatArgs) -> Config {
    if let Some(model) = &args.model {
        config.session.model = model.clone();
    }
    if let Some(voice) = &args.voice {
        config.session.voice = voice.clone();
    }
    if let Some(device) = &args.input_device {
        config.audio.input_device = Some(device.clone());
    }
    if let Some(device) = &args.output_device {
        config.audio.output_device = Some(device.clone());
    }
    config
}

fn open_capture(config: &Config, args: &ChatArgs) -> Result<Box<dyn CaptureSource>> {
    match &args.input_wav {
        Some(path) => {
            log::info!("reading speech from {}", path.display());
            Ok(Box::new(WavCaptureSource::open(path)?.paced()))
        }
        None => Ok(Box::new(CpalCaptureSource::new(
            config.audio.input_device.as_deref(),
        )?)),
    }
}

/// Start capture, and only once it runs, open the session.
///
/// A capture failure such as a denied microphone permission is returned
/// before any connection is attempted.
pub fn start_session(
    mut capture: Box<dyn CaptureSource>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
) -> Result<(
    Box<dyn CaptureSource>,
    SessionHandle,
    crossbeam_channel::Receiver<SessionEvent>,
)> {
    capture.start()?;
    let (session, events) = match SessionBridge::new(connector).open(config) {
        Ok(opened) => opened,
        Err(e) => {
            if let Err(stop_err) = capture.stop() {
                log::warn!("failed to stop capture: {}", stop_err);
            }
            return Err(e);
        }
    };
    Ok((capture, session, events))
}

/// Print chat events until the driver hangs up.
fn spawn_renderer(
    events: crossbeam_channel::Receiver<ChatEvent>,
    threshold: f32,
    quiet: bool,
    verbosity: u8,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in events {
            let shown = match &event {
                ChatEvent::Error(_) => true,
                ChatEvent::Level(_) => !quiet && verbosity >= 1,
                _ => !quiet,
            };
            if shown {
                output::render_event(&event, threshold);
            }
        }
    })
}

/// Run one conversation: capture → session → playback, until the remote
/// ends it or the user presses Ctrl+C.
///
/// # Arguments
/// * `config` - Configuration with file and environment values applied
/// * `args` - Chat options from the command line
/// * `quiet` - Suppress status lines (errors are still shown)
/// * `verbosity` - 1 adds the input level meter
///
/// # Errors
/// Fails before connecting if the configuration is invalid, no API key is
/// set, or either audio device cannot be opened.
pub async fn run_chat(
    config: Config,
    args: ChatArgs,
    quiet: bool,
    verbosity: u8,
) -> Result<ChatSummary> {
    let config = apply_chat_args(config, &args);
    config.validate()?;
    let api_key = config.api_key()?.to_string();

    let capture = open_capture(&config, &args)?;
    let playback = CpalPlayback::new(config.audio.output_device.as_deref())?;
    log::debug!("playback device runs at {} Hz", playback.device_rate());

    let connector = Arc::new(WebSocketConnector::new(
        config.session.endpoint.clone(),
        api_key,
    ));
    let (capture, session, session_events) =
        start_session(capture, connector, config.session_config())?;

    if !quiet {
        eprintln!(
            "Connecting to {} (voice {})...",
            config.session.model, config.session.voice
        );
    }

    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let renderer = spawn_renderer(
        events_rx,
        config.audio.speaking_threshold,
        quiet,
        verbosity,
    );

    let chat = VoiceChat::new(
        session,
        capture,
        Box::new(playback),
        config.chat_config(),
        events_tx,
    )?;
    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
    let mut driver = tokio::task::spawn_blocking(move || chat.run(session_events, stop_rx));

    let joined = tokio::select! {
        joined = &mut driver => joined,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                log::warn!("failed to listen for Ctrl+C: {}", e);
            }
            log::debug!("interrupted, stopping chat");
            if stop_tx.send(()).is_err() {
                log::debug!("chat already finished");
            }
            driver.await
        }
    };
    let summary =
        joined.map_err(|e| LiveBuddyError::Other(format!("chat driver panicked: {}", e)))?;

    if renderer.join().is_err() {
        log::warn!("event renderer panicked");
    }
    if !quiet {
        output::render_summary(&summary);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::MockCaptureSource;
    use crate::session::{ChannelConnector, ClientMessage, InboundMessage, SessionState};
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_chat_args_override_config() {
        let args = ChatArgs {
            model: Some("other-model".to_string()),
            voice: Some("Kore".to_string()),
            input_device: Some("pipewire".to_string()),
            output_device: None,
            input_wav: None,
        };
        let config = apply_chat_args(Config::default(), &args);

        assert_eq!(config.session.model, "other-model");
        assert_eq!(config.session.voice, "Kore");
        assert_eq!(config.audio.input_device.as_deref(), Some("pipewire"));
        assert!(config.audio.output_device.is_none());
    }

    #[test]
    fn test_empty_chat_args_keep_config() {
        let config = apply_chat_args(Config::default(), &ChatArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_missing_wav_input_is_reported() {
        let args = ChatArgs {
            input_wav: Some(PathBuf::from("/nonexistent/hello.wav")),
            ..Default::default()
        };
        let result = open_capture(&Config::default(), &args);
        assert!(matches!(
            result,
            Err(LiveBuddyError::AudioDeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_chat_requires_api_key() {
        let mut config = Config::default();
        config.session.api_key = None;
        let result = run_chat(config, ChatArgs::default(), true, 0).await;
        assert!(matches!(
            result,
            Err(LiveBuddyError::ConfigInvalidValue { ref key, .. }) if key == "session.api_key"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_denied_microphone_never_connects() {
        let (connector, mut remote) = ChannelConnector::pair();
        let capture = MockCaptureSource::new()
            .with_start_failure()
            .with_permission_denied();

        let result = start_session(
            Box::new(capture),
            Arc::new(connector),
            SessionConfig::default(),
        );

        assert!(matches!(result, Err(LiveBuddyError::PermissionDenied { .. })));
        // No setup message ever leaves, and the transport is released
        let sent = tokio::time::timeout(Duration::from_secs(1), remote.recv()).await;
        assert!(matches!(sent, Err(_) | Ok(None)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_started_capture_opens_session() {
        let (connector, mut remote) = ChannelConnector::pair();

        let (_capture, session, events) = start_session(
            Box::new(MockCaptureSource::new()),
            Arc::new(connector),
            SessionConfig::default(),
        )
        .unwrap();

        let setup = tokio::time::timeout(Duration::from_secs(2), remote.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(setup, ClientMessage::Setup(_)));
        remote.send(InboundMessage::SetupComplete);
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(2)).unwrap(),
            SessionEvent::Opened
        ));
        assert_eq!(session.state(), SessionState::Open);
        session.close();
    }
}
