//! JSON messages of the Gemini Live bidirectional API.
//!
//! Client messages are externally tagged objects (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`). Server messages are a single object whose
//! optional fields say what happened; one message can carry several events,
//! so [`parse`] flattens it into a list of [`InboundMessage`]s.

use crate::defaults;
use crate::error::{LiveBuddyError, Result};
use crate::session::bridge::SessionConfig;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Messages sent to the remote model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupMessage),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Build the opening setup message.
    pub fn setup(config: &SessionConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };

        let system_instruction = if config.system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                parts: vec![Part::text(&config.system_instruction)],
            })
        };

        ClientMessage::Setup(SetupMessage {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction,
        })
    }

    /// Wrap one encoded PCM frame for streaming.
    pub fn audio(pcm: &[u8], sample_rate: u32) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: pcm_mime_type(sample_rate),
                data: STANDARD.encode(pcm),
            }],
        })
    }

    /// Serialize message to JSON string.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize message from JSON string.
    pub fn from_json(s: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Inline binary payload, base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Raw server message; unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// One chunk of response audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAudio {
    /// 16-bit little-endian PCM, mono.
    pub data: Vec<u8>,
    pub sample_rate: u32,
}

/// What the remote said, one event at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    SetupComplete,
    Audio(InboundAudio),
    TurnComplete,
    Interrupted,
    GoAway { time_left: Option<String> },
    /// The transport closed (remote close frame or end of stream).
    Closed { reason: Option<String> },
}

/// MIME type for raw 16-bit PCM at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Sample rate from a `audio/pcm;rate=N` MIME type.
///
/// Returns `None` for non-audio types; audio without a rate parameter is
/// assumed to be at the playback rate.
pub fn parse_pcm_rate(mime_type: &str) -> Option<u32> {
    let mut params = mime_type.split(';').map(str::trim);
    let essence = params.next()?;
    if !essence.to_ascii_lowercase().starts_with("audio/") {
        return None;
    }

    let rate = params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, value)| value.trim().parse::<u32>().ok())
        .filter(|rate| *rate > 0);

    Some(rate.unwrap_or(defaults::PLAYBACK_SAMPLE_RATE))
}

/// Parse one text frame from the server.
///
/// # Errors
/// `Protocol` for invalid JSON, `Base64` for an undecodable audio part.
pub fn parse(text: &str) -> Result<Vec<InboundMessage>> {
    let message: ServerMessage =
        serde_json::from_str(text).map_err(|e| LiveBuddyError::Protocol {
            message: format!("invalid server message: {}", e),
        })?;
    flatten(message)
}

/// Parse one binary frame from the server (the same JSON, as bytes).
pub fn parse_slice(bytes: &[u8]) -> Result<Vec<InboundMessage>> {
    let message: ServerMessage =
        serde_json::from_slice(bytes).map_err(|e| LiveBuddyError::Protocol {
            message: format!("invalid server message: {}", e),
        })?;
    flatten(message)
}

fn flatten(message: ServerMessage) -> Result<Vec<InboundMessage>> {
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(InboundMessage::SetupComplete);
    }

    if let Some(content) = message.server_content {
        if content.interrupted {
            events.push(InboundMessage::Interrupted);
        }

        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for part in parts {
            if let Some(blob) = part.inline_data {
                match parse_pcm_rate(&blob.mime_type) {
                    Some(sample_rate) => {
                        let data = STANDARD.decode(blob.data.as_bytes())?;
                        events.push(InboundMessage::Audio(InboundAudio { data, sample_rate }));
                    }
                    None => log::debug!("ignoring inline {} part", blob.mime_type),
                }
            } else if let Some(text) = part.text {
                log::debug!("model text: {}", text);
            }
        }

        if content.turn_complete {
            events.push(InboundMessage::TurnComplete);
        }
    }

    if let Some(go_away) = message.go_away {
        events.push(InboundMessage::GoAway {
            time_left: go_away.time_left,
        });
    }

    Ok(events)
}
