//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every section is `#[serde(default)]`, so a partial `settings.toml` fills
//! the gaps with defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::capture::CaptureSettings;
use crate::live::CallSettings;

/// Environment variables checked, in order, before `api.api_key`.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

// ---------------------------------------------------------------------------
// ApiConfig
// ---------------------------------------------------------------------------

/// Endpoints, models and credentials for the generative API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API key.  `GEMINI_API_KEY` / `API_KEY` in the environment win over it.
    pub api_key: Option<String>,
    /// REST base URL for `generateContent` calls.
    pub base_url: String,
    /// WebSocket URL of the bidirectional live endpoint.
    pub live_url: String,
    pub chat_model: String,
    pub image_model: String,
    pub speech_model: String,
    /// Native-audio model used for live calls.
    pub live_model: String,
    /// Maximum seconds to wait for a REST response.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".into(),
            live_url: "wss://generativelanguage.googleapis.com/ws/\
                       google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent"
                .into(),
            chat_model: "gemini-3-flash-preview".into(),
            image_model: "gemini-2.5-flash-image".into(),
            speech_model: "gemini-2.5-flash-preview-tts".into(),
            live_model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    /// The key to authenticate with, from the environment or this config.
    ///
    /// Empty values are treated as missing.
    pub fn resolved_api_key(&self) -> Option<String> {
        resolve_api_key(self.api_key.as_deref(), |name| std::env::var(name).ok())
    }
}

fn resolve_api_key(
    configured: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| env(name))
        .chain(configured.map(str::to_string))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Audio formats and buffering for live calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of outbound microphone PCM in Hz (the live API expects 16 000).
    pub capture_sample_rate: u32,
    /// Rate assumed for inbound model PCM whose MIME type names none.
    pub playback_sample_rate: u32,
    /// Samples per outbound frame.
    pub frame_size: usize,
    /// Encoded frames buffered for the socket before new ones are dropped.
    pub outbound_queue: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            frame_size: 4096,
            outbound_queue: 32,
        }
    }
}

impl AudioConfig {
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            sample_rate: self.capture_sample_rate,
            frame_size: self.frame_size.max(1),
        }
    }

    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            capture: self.capture_settings(),
            playback_sample_rate: self.playback_sample_rate.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Sampling temperature for chat replies.
    pub temperature: f32,
    /// Prebuilt voice for voice notes.
    pub speech_voice: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            speech_voice: "Kore".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// UiConfig
// ---------------------------------------------------------------------------

/// Window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Initial window size `(width, height)` in logical pixels.
    pub window_size: (f32, f32),
    /// Persona selected on launch.
    pub start_persona: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_size: (1100.0, 760.0),
            start_persona: "aura".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use companion_voice::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub audio: AudioConfig,
    pub chat: ChatConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns `true` when no `settings.toml` file exists yet.
    pub fn is_first_run() -> bool {
        Self::is_first_run_at(&AppPaths::new().settings_file)
    }

    pub fn is_first_run_at(path: &std::path::Path) -> bool {
        !path.exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut original = AppConfig::default();
        original.api.api_key = Some("file-key".into());
        original.audio.outbound_queue = 8;
        original.chat.temperature = 0.7;
        original.ui.start_persona = "luna".into();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        // ApiConfig
        assert_eq!(loaded.api.api_key.as_deref(), Some("file-key"));
        assert_eq!(original.api.base_url, loaded.api.base_url);
        assert_eq!(original.api.live_url, loaded.api.live_url);
        assert_eq!(original.api.live_model, loaded.api.live_model);
        assert_eq!(original.api.timeout_secs, loaded.api.timeout_secs);

        // AudioConfig
        assert_eq!(loaded.audio.outbound_queue, 8);
        assert_eq!(loaded.audio.frame_size, 4096);

        // ChatConfig
        assert_eq!(loaded.chat.temperature, 0.7);
        assert_eq!(loaded.chat.speech_voice, "Kore");

        // UiConfig
        assert_eq!(loaded.ui.start_persona, "luna");
        assert_eq!(original.ui.window_size, loaded.ui.window_size);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");

        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.audio.playback_sample_rate, 24_000);
        assert_eq!(config.chat.temperature, 1.0);
        assert!(config.api.api_key.is_none());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[chat]\nspeech_voice = \"Puck\"\n").unwrap();

        let config = AppConfig::load_from(&path).expect("load");
        assert_eq!(config.chat.speech_voice, "Puck");
        assert_eq!(config.chat.temperature, 1.0);
        assert_eq!(config.api.chat_model, ApiConfig::default().chat_model);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[audio\nframe_size = ").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn environment_key_overrides_file() {
        let env: HashMap<&str, String> = [("API_KEY", "from-env".to_string())].into();
        let key = resolve_api_key(Some("from-file"), |name| env.get(name).cloned());
        assert_eq!(key.as_deref(), Some("from-env"));
    }

    #[test]
    fn gemini_variable_wins_over_generic_one() {
        let env: HashMap<&str, String> = [
            ("GEMINI_API_KEY", "gemini".to_string()),
            ("API_KEY", "generic".to_string()),
        ]
        .into();
        let key = resolve_api_key(None, |name| env.get(name).cloned());
        assert_eq!(key.as_deref(), Some("gemini"));
    }

    #[test]
    fn empty_values_are_missing() {
        let env: HashMap<&str, String> = [("GEMINI_API_KEY", "  ".to_string())].into();
        assert_eq!(
            resolve_api_key(Some("file"), |name| env.get(name).cloned()).as_deref(),
            Some("file")
        );
        assert_eq!(resolve_api_key(Some(""), |_| None), None);
    }

    #[test]
    fn capture_settings_follow_audio_section() {
        let audio = AudioConfig {
            frame_size: 0,
            ..AudioConfig::default()
        };
        let settings = audio.capture_settings();
        assert_eq!(settings.sample_rate, 16_000);
        assert_eq!(settings.frame_size, 1);
    }

    #[test]
    fn call_settings_carry_the_playback_rate() {
        let audio = AudioConfig {
            playback_sample_rate: 22_050,
            ..AudioConfig::default()
        };
        let settings = audio.call_settings();
        assert_eq!(settings.playback_sample_rate, 22_050);
        assert_eq!(settings.capture, audio.capture_settings());
    }

    #[test]
    fn first_run_until_settings_are_saved() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("settings.toml");
        assert!(AppConfig::is_first_run_at(&path));

        AppConfig::default().save_to(&path).expect("save");
        assert!(!AppConfig::is_first_run_at(&path));
    }
}
