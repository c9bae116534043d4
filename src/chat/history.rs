//! Per-persona conversations and the shared chat state the UI renders.
//!
//! [`Conversations`] holds one [`Conversation`] per built-in persona, each
//! seeded with that persona's greeting.  It lives behind
//! [`SharedConversations`] (`Arc<Mutex<_>>`): the chat service appends to it
//! from async tasks and the egui update loop reads it every frame.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::chat::persona::{Persona, PERSONAS};

/// Text sent to the model in place of an image message.
pub const IMAGE_PLACEHOLDER: &str = "[a selfie]";

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Persona,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    /// `content` is base64 PNG data.
    Image,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: u64,
    pub sender: Sender,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp_ms: u64,
    /// Base64 24 kHz mono PCM of a voice note.
    pub audio: Option<String>,
}

/// One turn of model history: `role` is `"user"` or `"model"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: &'static str,
    pub text: String,
}

impl HistoryTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: "model",
            text: text.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Ordered messages with one persona.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
    next_id: u64,
    /// A reply is being generated.
    pub pending: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation opening with `persona`'s greeting.
    pub fn with_greeting(persona: &Persona) -> Self {
        let mut conversation = Self::new();
        conversation.push(Sender::Persona, MessageKind::Text, persona.greeting, None);
        conversation
    }

    /// Append a message and return it.
    pub fn push(
        &mut self,
        sender: Sender,
        kind: MessageKind,
        content: impl Into<String>,
        audio: Option<String>,
    ) -> &ChatMessage {
        self.next_id += 1;
        self.messages.push(ChatMessage {
            id: self.next_id,
            sender,
            kind,
            content: content.into(),
            timestamp_ms: now_ms(),
            audio,
        });
        &self.messages[self.messages.len() - 1]
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> &ChatMessage {
        self.push(Sender::User, MessageKind::Text, text, None)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Model history for the whole conversation.
    ///
    /// Images are replaced by [`IMAGE_PLACEHOLDER`].
    pub fn to_history(&self) -> Vec<HistoryTurn> {
        self.messages
            .iter()
            .map(|msg| {
                let text = match msg.kind {
                    MessageKind::Image => IMAGE_PLACEHOLDER.to_string(),
                    MessageKind::Text => msg.content.clone(),
                };
                match msg.sender {
                    Sender::User => HistoryTurn::user(text),
                    Sender::Persona => HistoryTurn::model(text),
                }
            })
            .collect()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// One conversation per built-in persona, keyed by persona id.
#[derive(Debug, Clone)]
pub struct Conversations {
    by_persona: HashMap<&'static str, Conversation>,
}

impl Conversations {
    /// Every built-in persona, each greeting the user.
    pub fn seeded() -> Self {
        let by_persona = PERSONAS
            .iter()
            .map(|p| (p.id, Conversation::with_greeting(p)))
            .collect();
        Self { by_persona }
    }

    pub fn get(&self, persona_id: &str) -> Option<&Conversation> {
        self.by_persona.get(persona_id)
    }

    /// The conversation for `persona`, created empty if it is not built in.
    pub fn entry(&mut self, persona: &Persona) -> &mut Conversation {
        self.by_persona.entry(persona.id).or_default()
    }
}

impl Default for Conversations {
    fn default() -> Self {
        Self::seeded()
    }
}

/// Thread-safe handle to [`Conversations`].
///
/// Never hold the lock across `.await`.
pub type SharedConversations = Arc<Mutex<Conversations>>;

pub fn new_shared_conversations() -> SharedConversations {
    Arc::new(Mutex::new(Conversations::seeded()))
}

/// Lock `shared`, recovering the data if a previous holder panicked.
pub fn lock_conversations(shared: &SharedConversations) -> MutexGuard<'_, Conversations> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
