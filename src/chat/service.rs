//! Chat service: one user message in, one in-character reply out.
//!
//! [`ChatService`] wraps any [`GenerativeClient`] and never surfaces an
//! error to the UI.  When a request fails it answers with an in-character
//! fallback line instead, the same way every time:
//!
//! ```text
//! text generation ── Err ──▶ "signal is bad" line
//!                 ── ""  ──▶ "say that again?" line
//! ModelReply::PhotoRequest ─▶ generate_image ── Err ──▶ text reply
//! ModelReply::VoiceRequest ─▶ generate_speech ─ Err ──▶ text reply, no audio
//! empty final text ─────────▶ silent-glance line
//! ```

use std::sync::Arc;

use crate::chat::client::GenerativeClient;
use crate::chat::history::{lock_conversations, HistoryTurn, MessageKind, Sender, SharedConversations};
use crate::chat::persona::Persona;
use crate::chat::prompt::{chat_instruction, photo_prompt};
use crate::chat::reply::ModelReply;
use crate::config::ChatConfig;

/// Canned text of the "send me a photo" button.
pub const PHOTO_REQUEST_PROMPT: &str = "Send me a photo of you right now?";

// ---------------------------------------------------------------------------
// PersonaReply
// ---------------------------------------------------------------------------

/// What the persona sends back.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaReply {
    pub kind: MessageKind,
    /// Text, or base64 PNG for [`MessageKind::Image`].
    pub content: String,
    /// Base64 24 kHz PCM voice note.
    pub audio: Option<String>,
}

impl PersonaReply {
    fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            audio: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback lines
// ---------------------------------------------------------------------------

fn unclear_line() -> String {
    "My mind wandered for a second. Could you say that again?".to_string()
}

fn bad_signal_line(persona: &Persona) -> String {
    format!(
        "(The signal seems bad; {} frowns slightly) Sorry, I didn't quite catch that...",
        persona.name
    )
}

fn silent_glance_line(persona: &Persona) -> String {
    format!("({} looks at you softly without saying anything)", persona.name)
}

// ---------------------------------------------------------------------------
// ChatService
// ---------------------------------------------------------------------------

pub struct ChatService {
    client: Arc<dyn GenerativeClient>,
    temperature: f32,
    speech_voice: String,
}

impl ChatService {
    pub fn new(client: Arc<dyn GenerativeClient>, config: &ChatConfig) -> Self {
        Self {
            client,
            temperature: config.temperature,
            speech_voice: config.speech_voice.clone(),
        }
    }

    /// Append `text` to `persona`'s conversation, then append the reply.
    ///
    /// Blank input, or a conversation already waiting on a reply, is ignored
    /// and returns `false`.
    pub async fn send(&self, persona: &Persona, chat: &SharedConversations, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let history = {
            let mut all = lock_conversations(chat);
            let conversation = all.entry(persona);
            if conversation.pending {
                log::debug!("chat: {} is still replying, message ignored", persona.id);
                return false;
            }
            conversation.push_user(text);
            conversation.pending = true;
            conversation.to_history()
        };

        let reply = self.respond(persona, &history).await;

        let mut all = lock_conversations(chat);
        let conversation = all.entry(persona);
        conversation.push(Sender::Persona, reply.kind, reply.content, reply.audio);
        conversation.pending = false;
        true
    }

    /// Produce `persona`'s reply to `history`.  Never fails.
    pub async fn respond(&self, persona: &Persona, history: &[HistoryTurn]) -> PersonaReply {
        let instruction = chat_instruction(persona);

        let raw = match self
            .client
            .generate_text(&instruction, history, self.temperature)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                log::warn!("chat: empty reply from model, using fallback");
                unclear_line()
            }
            Err(e) => {
                log::warn!("chat: text generation failed ({e}), using fallback");
                bad_signal_line(persona)
            }
        };

        match ModelReply::parse(&raw) {
            ModelReply::TextOnly(text) => self.finish_text(persona, text, None),

            ModelReply::PhotoRequest { text, description } => {
                let prompt = photo_prompt(persona, &description);
                match self.client.generate_image(&prompt).await {
                    Ok(data) => PersonaReply {
                        kind: MessageKind::Image,
                        content: data,
                        audio: None,
                    },
                    Err(e) => {
                        log::warn!("chat: photo generation failed ({e}), sending text only");
                        self.finish_text(persona, text, None)
                    }
                }
            }

            ModelReply::VoiceRequest { text } => {
                let audio = if text.is_empty() {
                    None
                } else {
                    match self.client.generate_speech(&text, &self.speech_voice).await {
                        Ok(audio) => Some(audio),
                        Err(e) => {
                            log::warn!("chat: speech generation failed ({e}), sending text only");
                            None
                        }
                    }
                };
                self.finish_text(persona, text, audio)
            }
        }
    }

    fn finish_text(&self, persona: &Persona, text: String, audio: Option<String>) -> PersonaReply {
        let content = if text.is_empty() {
            silent_glance_line(persona)
        } else {
            text
        };
        PersonaReply {
            audio,
            ..PersonaReply::text(content)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
