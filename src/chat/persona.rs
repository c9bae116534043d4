//! Built-in companion personas.
//!
//! A [`Persona`] is static data: who the companion is, how they sound on a
//! call, and the line they open a fresh conversation with.

// ---------------------------------------------------------------------------
// Vibe
// ---------------------------------------------------------------------------

/// Overall temperament of a persona.  Picks the prebuilt voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vibe {
    Gentle,
    Cool,
    Energetic,
    Sweet,
}

impl Vibe {
    /// Prebuilt voice used for live calls.
    ///
    /// ```
    /// use companion_voice::chat::Vibe;
    ///
    /// assert_eq!(Vibe::Cool.voice_name(), "Puck");
    /// assert_eq!(Vibe::Gentle.voice_name(), "Kore");
    /// ```
    pub fn voice_name(&self) -> &'static str {
        match self {
            Vibe::Cool => "Puck",
            Vibe::Gentle | Vibe::Energetic | Vibe::Sweet => "Kore",
        }
    }
}

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub id: &'static str,
    pub name: &'static str,
    pub personality: &'static str,
    pub interests: &'static [&'static str],
    pub vibe: Vibe,
    pub avatar_url: &'static str,
    /// UI accent colour (sRGB).
    pub accent: [u8; 3],
    /// First message of a new conversation.
    pub greeting: &'static str,
}

impl Persona {
    pub fn voice_name(&self) -> &'static str {
        self.vibe.voice_name()
    }

    /// Look up a built-in persona by id.
    pub fn find(id: &str) -> Option<&'static Persona> {
        PERSONAS.iter().find(|p| p.id == id)
    }

    /// Initial used for the avatar badge.
    pub fn initial(&self) -> char {
        self.name.chars().next().unwrap_or('?')
    }
}

pub const PERSONAS: &[Persona] = &[
    Persona {
        id: "aura",
        name: "Aura",
        personality: "A thoughtful, gentle photographer. Speaks gracefully, deeply \
                      empathetic, always finds the softest part of your heart.",
        interests: &["photography", "documentary literature", "pour-over coffee"],
        vibe: Vibe::Gentle,
        avatar_url: "https://images.unsplash.com/photo-1544005313-94ddf0286df2?auto=format&fit=crop&q=80&w=400&h=400",
        accent: [100, 116, 139],
        greeting: "The weather today reminds me of when we first met. \
                   The sunlight was just as soft back then.",
    },
    Persona {
        id: "luna",
        name: "Luna",
        personality: "An aloof, brilliant music critic. Cold on the surface, but her \
                      eyes light up when she talks about music and the universe.",
        interests: &["vinyl records", "astronomy", "minimalism"],
        vibe: Vibe::Cool,
        avatar_url: "https://images.unsplash.com/photo-1531746020798-e6953c6e8e04?auto=format&fit=crop&q=80&w=400&h=400",
        accent: [99, 102, 241],
        greeting: "I'm listening to Chopin. Some notes only reach the folds of the \
                   soul late at night. What about you, what are you up to?",
    },
    Persona {
        id: "maya",
        name: "Maya",
        personality: "An energetic skateboarder. Loves life, loves adventure, the kind \
                      of girl who makes the air sweeter just by being around.",
        interests: &["skateboarding", "street photography", "travel"],
        vibe: Vibe::Energetic,
        avatar_url: "https://images.unsplash.com/photo-1517841905240-472988babdf9?auto=format&fit=crop&q=80&w=400&h=400",
        accent: [249, 115, 22],
        greeting: "Just saw the coolest skateboard video! Want to try that downhill \
                   road with me later?",
    },
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
