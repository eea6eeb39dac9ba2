//! Wire protocol for the conversational endpoint
//!
//! Messages are JSON objects carried over a WebSocket. The client opens with a
//! `setup` message describing the model, voice and persona, then streams
//! microphone audio as `realtimeInput` chunks. The server answers with
//! `setupComplete`, audio inside `serverContent`, and control flags for
//! interruption and turn completion.

use serde::{Deserialize, Serialize};

use crate::audio::CAPTURE_SAMPLE_RATE;
use crate::codec::WireFrame;

/// Default model requested in the setup message
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice for synthesized speech
pub const DEFAULT_VOICE_NAME: &str = "Kore";

/// Default persona given to the remote agent
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are \"Dr. Smith\", a senior Laboratory Manager. \
The user is a lab technician who wants to practice Business English.

Your Goal: Engage in a roleplay conversation about laboratory work.

Guidelines:
- Speak clear, standard Business English.
- Speak slightly slower than normal if possible.
- If the user struggles, acknowledge it and simplify your English.
- Topics: QC results, scheduling, safety checks.
- Start by asking: \"Good morning. How are the test results coming along today?\"";

/// Prefix the endpoint expects on model names
const MODEL_PREFIX: &str = "models/";

// =============================================================================
// Channel Configuration
// =============================================================================

/// Kind of response the remote agent should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseModality {
    #[default]
    Audio,
    Text,
}

/// Parameters sent to the endpoint when a channel opens
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice_name: String,
    pub system_instruction: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            response_modality: ResponseModality::Audio,
            voice_name: DEFAULT_VOICE_NAME.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

/// MIME type attached to every outbound audio chunk
pub fn capture_mime_type() -> String {
    format!("audio/pcm;rate={}", CAPTURE_SAMPLE_RATE)
}

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent from the client to the endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// Build the opening setup message for a channel
    pub fn setup(config: &ChannelConfig) -> Self {
        let model = if config.model.starts_with(MODEL_PREFIX) {
            config.model.clone()
        } else {
            format!("{MODEL_PREFIX}{}", config.model)
        };

        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            },
        })
    }

    /// Wrap one encoded capture frame
    pub fn audio(frame: WireFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: capture_mime_type(),
                data: frame.into_string(),
            }],
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// A message received from the endpoint
///
/// Every top-level field is optional; a single message may carry several.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

/// Inbound events delivered to the session
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The endpoint accepted the setup and is ready for audio
    Ready,
    /// One chunk of synthesized 24kHz mono audio
    AudioChunk(WireFrame),
    /// The user barged in; queued playback must be discarded
    Interrupted,
    /// The agent finished its turn
    TurnComplete,
    /// The remote side closed the channel
    Closed,
    /// The transport failed
    Error(String),
}

impl ServerMessage {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn parse_bytes(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    /// Flatten the message into events in delivery order
    ///
    /// Audio is emitted before the interruption flag it arrived with, so a
    /// combined message still leaves playback cancelled.
    pub fn into_events(self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ChannelEvent::Ready);
        }

        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                events.extend(
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.inline_data)
                        .filter(|inline| !inline.data.is_empty())
                        .map(|inline| ChannelEvent::AudioChunk(WireFrame::from_base64(inline.data))),
                );
            }
            if content.interrupted {
                events.push(ChannelEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(ChannelEvent::TurnComplete);
            }
        }

        if self.go_away.is_some() {
            events.push(ChannelEvent::Closed);
        }

        events
    }
}
