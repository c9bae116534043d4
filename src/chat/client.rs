//! Core `GenerativeClient` trait and the Gemini REST implementation.
//!
//! `GeminiClient` calls `POST {base_url}/v1beta/models/{model}:generateContent`
//! for three jobs: chat replies, photo generation, and speech synthesis.
//! All connection details come from [`ApiConfig`]; nothing is hardcoded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chat::history::HistoryTurn;
use crate::config::ApiConfig;

// ---------------------------------------------------------------------------
// ChatError
// ---------------------------------------------------------------------------

/// Errors that can occur during a generation request.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No key in the config file or the environment.
    #[error("no API key configured (set GEMINI_API_KEY)")]
    MissingApiKey,

    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("generation request timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The HTTP response could not be parsed as expected JSON.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The response had no usable content of the requested kind.
    #[error("response contained no {0}")]
    EmptyResponse(&'static str),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// GenerativeClient trait
// ---------------------------------------------------------------------------

/// One-shot generation backend.
///
/// Implementors must be `Send + Sync` so a single client can be shared as
/// `Arc<dyn GenerativeClient>`.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Reply text for `history` under `system_instruction`.
    async fn generate_text(
        &self,
        system_instruction: &str,
        history: &[HistoryTurn],
        temperature: f32,
    ) -> Result<String, ChatError>;

    /// Base64 image data for `prompt`.
    async fn generate_image(&self, prompt: &str) -> Result<String, ChatError>;

    /// Base64 24 kHz mono PCM of `text` spoken by `voice`.
    async fn generate_speech(&self, text: &str, voice: &str) -> Result<String, ChatError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Turn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Instruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct Instruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
            .iter()
    }

    /// All text parts of the first candidate, concatenated.
    fn text(&self) -> String {
        self.parts().filter_map(|p| p.text.as_deref()).collect()
    }

    /// Data of the first inline part of the first candidate.
    fn inline_data(&self) -> Option<&str> {
        self.parts()
            .find_map(|p| p.inline_data.as_ref())
            .map(|d| d.data.as_str())
    }
}

fn chat_request<'a>(
    system_instruction: &'a str,
    history: &'a [HistoryTurn],
    temperature: f32,
) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: history
            .iter()
            .map(|turn| Turn {
                role: Some(turn.role),
                parts: vec![TextPart { text: &turn.text }],
            })
            .collect(),
        system_instruction: Some(Instruction {
            parts: vec![TextPart {
                text: system_instruction,
            }],
        }),
        generation_config: Some(GenerationConfig {
            temperature: Some(temperature),
            ..Default::default()
        }),
    }
}

fn image_request(prompt: &str) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![Turn {
            role: None,
            parts: vec![TextPart { text: prompt }],
        }],
        system_instruction: None,
        generation_config: None,
    }
}

fn speech_request<'a>(text: &'a str, voice: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Turn {
            role: None,
            parts: vec![TextPart { text }],
        }],
        system_instruction: None,
        generation_config: Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO"]),
            speech_config: Some(serde_json::json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            })),
            ..Default::default()
        }),
    }
}

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

/// Calls the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    config: ApiConfig,
    api_key: Option<String>,
}

impl GeminiClient {
    /// Build a client from application config.
    ///
    /// The key is resolved now (environment first).  A missing key is not an
    /// error here; each request then fails with [`ChatError::MissingApiKey`].
    pub fn from_config(config: &ApiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: config.resolved_api_key(),
            config: config.clone(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest<'_>,
    ) -> Result<GenerateResponse, ChatError> {
        let key = self.api_key.as_deref().ok_or(ChatError::MissingApiKey)?;

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))
    }
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate_text(
        &self,
        system_instruction: &str,
        history: &[HistoryTurn],
        temperature: f32,
    ) -> Result<String, ChatError> {
        let request = chat_request(system_instruction, history, temperature);
        let response = self.generate(&self.config.chat_model, &request).await?;
        Ok(response.text())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, ChatError> {
        let response = self
            .generate(&self.config.image_model, &image_request(prompt))
            .await?;
        response
            .inline_data()
            .map(str::to_string)
            .ok_or(ChatError::EmptyResponse("image"))
    }

    async fn generate_speech(&self, text: &str, voice: &str) -> Result<String, ChatError> {
        let response = self
            .generate(&self.config.speech_model, &speech_request(text, voice))
            .await?;
        response
            .inline_data()
            .map(str::to_string)
            .ok_or(ChatError::EmptyResponse("audio"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
