//! System instructions for chat replies, live calls, and photo generation.
//!
//! The chat instruction teaches the model two reply markers that
//! [`ModelReply::parse`](crate::chat::ModelReply::parse) later acts on:
//! * [`PHOTO_MARKER`] followed by a description of the picture to send.
//! * [`VOICE_MARKER`] at the end of a reply that should be spoken.

use crate::chat::persona::Persona;

pub const PHOTO_MARKER: &str = "[PHOTO_REQUEST]";
pub const VOICE_MARKER: &str = "[VOICE_REQUEST]";

// ---------------------------------------------------------------------------
// Behaviour rules
// ---------------------------------------------------------------------------

const CHAT_RULES: &str = "\
You and the user are in a close relationship and are talking heart to heart.

Rules:
1. Talk like a real person. No lists, and don't be overly polite.
2. Let emotion show; use sounds like \"mm\", \"haha\" and \"...\" where natural.
3. If the user asks for a photo, your reply MUST contain \"[PHOTO_REQUEST]\" followed by a concrete description of the picture.
4. If you want to send a voice message, your reply MUST end with \"[VOICE_REQUEST]\".
5. Stay in character even when the question is complicated.
6. Never admit to being an AI; you are their soulmate.";

const CALL_RULES: &str = "\
You are on a voice call with the user. Keep it natural and affectionate. \
You may interject at any time and react while the user is still talking.";

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// System instruction for text chat with `persona`.
///
/// ```rust
/// use companion_voice::chat::{chat_instruction, PERSONAS};
///
/// let text = chat_instruction(&PERSONAS[0]);
/// assert!(text.starts_with("You are Aura."));
/// assert!(text.contains("[PHOTO_REQUEST]"));
/// ```
pub fn chat_instruction(persona: &Persona) -> String {
    format!(
        "You are {}.\nPersonality: {}\nInterests: {}.\n\n{}",
        persona.name,
        persona.personality,
        persona.interests.join(", "),
        CHAT_RULES
    )
}

/// System instruction sent when a live call opens.
pub fn call_instruction(persona: &Persona) -> String {
    format!(
        "You are {}. Personality: {} {}",
        persona.name, persona.personality, CALL_RULES
    )
}

/// Prompt for a photo of `persona` matching `description`.
pub fn photo_prompt(persona: &Persona, description: &str) -> String {
    format!(
        "A cinematic and high-quality photo of {}. Description: {}. 8k resolution, photorealistic.",
        persona.name, description
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::persona::PERSONAS;

    #[test]
    fn chat_instruction_names_persona_and_markers() {
        let luna = &PERSONAS[1];
        let text = chat_instruction(luna);
        assert!(text.contains("You are Luna."));
        assert!(text.contains(luna.personality));
        assert!(text.contains("vinyl records, astronomy, minimalism"));
        assert!(text.contains(PHOTO_MARKER));
        assert!(text.contains(VOICE_MARKER));
    }

    #[test]
    fn call_instruction_mentions_the_call() {
        let text = call_instruction(&PERSONAS[2]);
        assert!(text.starts_with("You are Maya."));
        assert!(text.contains("voice call"));
        assert!(!text.contains(PHOTO_MARKER));
    }

    #[test]
    fn photo_prompt_exact_text() {
        assert_eq!(
            photo_prompt(&PERSONAS[0], "a selfie"),
            "A cinematic and high-quality photo of Aura. Description: a selfie. \
             8k resolution, photorealistic."
        );
    }
}
