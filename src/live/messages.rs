//! JSON messages of the Gemini Live bidirectional session.
//!
//! - **Outgoing**
//!   - [`SetupMessage`]: first frame after the socket opens; model, voice and
//!     system instruction.
//!   - [`RealtimeInputMessage`]: one encoded microphone frame.
//! - **Incoming**
//!   - [`ServerMessage`]: `setupComplete`, `serverContent` (model audio,
//!     `interrupted`, `turnComplete`), `goAway`; anything else is ignored.
//!     A malformed `modelTurn` part is skipped on its own; it never costs the
//!     rest of the message.

use serde::{Deserialize, Serialize};

use crate::audio::codec::EncodedChunk;

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Persona-derived parameters for a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    /// Model id, with or without the `models/` prefix.
    pub model: String,
    /// Prebuilt voice name, e.g. `"Kore"` or `"Puck"`.
    pub voice_name: String,
    pub system_instruction: String,
}

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<&'static str>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    pub fn new(setup: &SessionSetup) -> Self {
        let model = if setup.model.starts_with("models/") {
            setup.model.clone()
        } else {
            format!("models/{}", setup.model)
        };

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO"],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: setup.voice_name.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: setup.system_instruction.clone(),
                    }],
                },
            },
        }
    }
}

/// One chunk of microphone audio.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

impl From<EncodedChunk> for RealtimeInputMessage {
    fn from(chunk: EncodedChunk) -> Self {
        let mime_type = chunk.mime_type();
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![Blob {
                    mime_type,
                    data: chunk.into_data(),
                }],
            },
        }
    }
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// A parsed server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// The setup was accepted; the session is open.
    SetupComplete,
    Content(ServerContent),
    /// The server will disconnect soon.
    GoAway,
    /// Well-formed JSON we have no use for (tool calls, usage metadata, ...).
    Other,
}

/// The parts of `serverContent` a call cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContent {
    /// Inline audio parts of `modelTurn`, in order.
    pub audio: Vec<InlineAudio>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

/// Base64 PCM carried in a `modelTurn` part.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineAudio {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub data: String,
}

impl InlineAudio {
    /// Rate from a `audio/pcm;rate=N` MIME type, or `fallback`.
    pub fn sample_rate_or(&self, fallback: u32) -> u32 {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
            .unwrap_or(fallback)
    }

    fn is_audio(&self) -> bool {
        !self.data.is_empty()
            && (self.mime_type.is_empty() || self.mime_type.starts_with("audio/"))
    }
}

impl ServerMessage {
    /// Parse one text (or UTF-8 binary) frame.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawServerMessage = serde_json::from_str(json)?;

        if raw.setup_complete.is_some() {
            return Ok(ServerMessage::SetupComplete);
        }
        if let Some(content) = raw.server_content {
            let audio = content
                .model_turn
                .map(|turn| turn.parts)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|part| match serde_json::from_value::<RawPart>(part) {
                    Ok(part) => part.inline_data,
                    Err(e) => {
                        log::warn!("live: skipping malformed model part: {e}");
                        None
                    }
                })
                .filter(InlineAudio::is_audio)
                .collect();
            return Ok(ServerMessage::Content(ServerContent {
                audio,
                interrupted: content.interrupted,
                turn_complete: content.turn_complete,
            }));
        }
        if raw.go_away.is_some() {
            return Ok(ServerMessage::GoAway);
        }
        Ok(ServerMessage::Other)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<RawServerContent>,
    #[serde(default)]
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    #[serde(default)]
    model_turn: Option<RawContent>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    /// Decoded one by one so a bad part only loses itself.
    #[serde(default)]
    parts: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    #[serde(default)]
    inline_data: Option<InlineAudio>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode;
    use serde_json::json;

    fn setup() -> SessionSetup {
        SessionSetup {
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice_name: "Puck".into(),
            system_instruction: "You are Luna.".into(),
        }
    }

    #[test]
    fn setup_message_wire_shape() {
        let value = serde_json::to_value(SetupMessage::new(&setup())).unwrap();
        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/gemini-2.5-flash-native-audio-preview-09-2025",
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": {
                                "prebuiltVoiceConfig": { "voiceName": "Puck" }
                            }
                        }
                    },
                    "systemInstruction": { "parts": [{ "text": "You are Luna." }] }
                }
            })
        );
    }

    #[test]
    fn setup_keeps_existing_models_prefix() {
        let mut s = setup();
        s.model = "models/custom".into();
        assert_eq!(SetupMessage::new(&s).setup.model, "models/custom");
    }

    #[test]
    fn realtime_input_wire_shape() {
        let chunk = encode(&[0.0, 0.0], 16_000);
        let value = serde_json::to_value(RealtimeInputMessage::from(chunk)).unwrap();
        assert_eq!(
            value,
            json!({
                "realtimeInput": {
                    "mediaChunks": [{ "mimeType": "audio/pcm;rate=16000", "data": "AAAAAA==" }]
                }
            })
        );
    }

    #[test]
    fn parses_setup_complete() {
        let msg = ServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(msg, ServerMessage::SetupComplete);
    }

    #[test]
    fn parses_model_audio_parts_in_order() {
        let json = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAA=" } },
                        { "text": "ignored" },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "BBB=" } }
                    ]
                }
            }
        })
        .to_string();

        let ServerMessage::Content(content) = ServerMessage::parse(&json).unwrap() else {
            panic!("expected content");
        };
        let data: Vec<&str> = content.audio.iter().map(|a| a.data.as_str()).collect();
        assert_eq!(data, vec!["AAA=", "BBB="]);
        assert!(!content.interrupted);
        assert!(!content.turn_complete);
    }

    #[test]
    fn parses_interrupted_and_turn_complete() {
        let msg = ServerMessage::parse(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        let ServerMessage::Content(content) = msg else {
            panic!("expected content");
        };
        assert!(content.interrupted);
        assert!(content.audio.is_empty());

        let msg = ServerMessage::parse(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        let ServerMessage::Content(content) = msg else {
            panic!("expected content");
        };
        assert!(content.turn_complete);
    }

    #[test]
    fn malformed_part_is_skipped_and_the_rest_survive() {
        let json = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAA=" } },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000" } },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": 42 } },
                        { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "BBB=" } }
                    ]
                },
                "interrupted": true
            }
        })
        .to_string();

        let ServerMessage::Content(content) = ServerMessage::parse(&json).unwrap() else {
            panic!("expected content");
        };
        let data: Vec<&str> = content.audio.iter().map(|a| a.data.as_str()).collect();
        assert_eq!(data, vec!["AAA=", "BBB="]);
        assert!(content.interrupted);
    }

    #[test]
    fn non_audio_inline_data_is_skipped() {
        let json = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"image/png","data":"xyz"}}]}}}"#;
        let ServerMessage::Content(content) = ServerMessage::parse(json).unwrap() else {
            panic!("expected content");
        };
        assert!(content.audio.is_empty());
    }

    #[test]
    fn unknown_and_go_away_messages() {
        assert_eq!(
            ServerMessage::parse(r#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap(),
            ServerMessage::Other
        );
        assert_eq!(
            ServerMessage::parse(r#"{"goAway":{"timeLeft":"5s"}}"#).unwrap(),
            ServerMessage::GoAway
        );
        assert!(ServerMessage::parse("not json").is_err());
    }

    #[test]
    fn inline_audio_sample_rate() {
        let audio = InlineAudio {
            mime_type: "audio/pcm;rate=16000".into(),
            data: String::new(),
        };
        assert_eq!(audio.sample_rate_or(24_000), 16_000);

        let audio = InlineAudio {
            mime_type: "audio/pcm; rate=oops".into(),
            data: String::new(),
        };
        assert_eq!(audio.sample_rate_or(24_000), 24_000);
    }
}
