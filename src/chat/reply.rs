//! Reply-marker parsing.
//!
//! The chat model signals side requests inline with [`PHOTO_MARKER`] and
//! [`VOICE_MARKER`].  [`ModelReply::parse`] turns raw reply text into one of
//! three cases once, at the boundary, so nothing downstream searches strings.

use crate::chat::prompt::{PHOTO_MARKER, VOICE_MARKER};

/// Photo description used when the model gives none.
pub const DEFAULT_PHOTO_DESCRIPTION: &str = "a selfie";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReply {
    TextOnly(String),
    /// Send a photo matching `description`; `text` is the reply without markers.
    PhotoRequest { text: String, description: String },
    /// Speak `text` as a voice note.
    VoiceRequest { text: String },
}

impl ModelReply {
    /// Classify `raw`.  A photo request wins over a voice request.
    ///
    /// ```
    /// use companion_voice::chat::ModelReply;
    ///
    /// assert_eq!(
    ///     ModelReply::parse("miss you [VOICE_REQUEST]"),
    ///     ModelReply::VoiceRequest { text: "miss you".into() }
    /// );
    /// ```
    pub fn parse(raw: &str) -> Self {
        if let Some((_, after)) = raw.split_once(PHOTO_MARKER) {
            let description = after
                .split(PHOTO_MARKER)
                .next()
                .unwrap_or("")
                .replace(VOICE_MARKER, "");
            let description = match description.trim() {
                "" => DEFAULT_PHOTO_DESCRIPTION.to_string(),
                d => d.to_string(),
            };
            return ModelReply::PhotoRequest {
                text: strip_markers(raw),
                description,
            };
        }

        if raw.contains(VOICE_MARKER) {
            return ModelReply::VoiceRequest {
                text: strip_markers(raw),
            };
        }

        ModelReply::TextOnly(raw.trim().to_string())
    }

    /// Reply text with markers removed.
    pub fn text(&self) -> &str {
        match self {
            ModelReply::TextOnly(text)
            | ModelReply::PhotoRequest { text, .. }
            | ModelReply::VoiceRequest { text } => text.as_str(),
        }
    }
}

fn strip_markers(raw: &str) -> String {
    raw.replace(PHOTO_MARKER, "")
        .replace(VOICE_MARKER, "")
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
