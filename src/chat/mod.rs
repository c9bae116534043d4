//! Text chat with a persona.
//!
//! ```text
//! composer ─▶ ChatService::send ─▶ GenerativeClient::generate_text
//!                                        │
//!                                 ModelReply::parse
//!                 ┌──────────────────────┼──────────────────────┐
//!             TextOnly             PhotoRequest            VoiceRequest
//!                 │               generate_image          generate_speech
//!                 └──────────────▶ Conversation ◀───────────────┘
//! ```

pub mod client;
pub mod history;
pub mod persona;
pub mod prompt;
pub mod reply;
pub mod service;

pub use client::{ChatError, GeminiClient, GenerativeClient};
pub use history::{
    lock_conversations, new_shared_conversations, ChatMessage, Conversation, Conversations,
    HistoryTurn, MessageKind, Sender, SharedConversations, IMAGE_PLACEHOLDER,
};
pub use persona::{Persona, Vibe, PERSONAS};
pub use prompt::{call_instruction, chat_instruction, photo_prompt, PHOTO_MARKER, VOICE_MARKER};
pub use reply::{ModelReply, DEFAULT_PHOTO_DESCRIPTION};
pub use service::{ChatService, PersonaReply, PHOTO_REQUEST_PROMPT};
