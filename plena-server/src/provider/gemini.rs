//! Google Gemini provider.
//!
//! Talks to the `generateContent` REST endpoint. System turns become the
//! `systemInstruction` field; user and assistant turns map to the
//! `user`/`model` roles of the wire format.

use super::{GenerationConfig, Provider, ProviderError, Role, SafetySetting, Turn};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Gemini provider bound to one model and API key.
pub struct GeminiProvider {
    api_key: String,
    model: String,
    client: Client,
}

// ── wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: &'a GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

impl GeminiProvider {
    /// Create a new Gemini provider for the given key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    fn err(&self, message: impl Into<String>, status_code: Option<u16>) -> ProviderError {
        ProviderError {
            provider: "gemini".into(),
            message: message.into(),
            status_code,
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn ensure_ready(&self) -> Result<(), ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(self.err("Gemini API key not configured", None));
        }
        Ok(())
    }

    async fn generate(
        &self,
        turns: &[Turn],
        config: &GenerationConfig,
        safety: &[SafetySetting],
    ) -> Result<String, ProviderError> {
        self.ensure_ready()?;

        // System turns collapse into the systemInstruction field.
        let system_text: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.text.as_str())
            .collect();
        let system_instruction = (!system_text.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: system_text.join("\n\n"),
            }],
        });

        let contents: Vec<Content> = turns
            .iter()
            .filter(|t| t.role != Role::System)
            .map(|t| Content {
                role: Some(match t.role {
                    Role::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                }),
                parts: vec![Part {
                    text: t.text.clone(),
                }],
            })
            .collect();

        let request = GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: config,
            safety_settings: safety,
        };

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.err(format!("Request failed: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.err(
                format!("API error ({}): {}", status.as_u16(), error_text),
                Some(status.as_u16()),
            ));
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| self.err(format!("Failed to parse response: {e}"), None))?;

        if let Some(err) = result.error {
            return Err(self.err(format!("API error: {}", err.message), None));
        }

        // A blocked prompt comes back with no candidates and a block reason.
        if let Some(feedback) = result.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                return Err(self.err(format!("Prompt blocked by safety filter: {reason}"), None));
            }
        }

        let candidate = result
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| self.err("No response from Gemini", None))?;

        if matches!(candidate.finish_reason.as_deref(), Some("SAFETY")) {
            return Err(self.err("Reply blocked by safety filter", None));
        }

        let reply = candidate
            .content
            .and_then(|c| c.parts)
            .and_then(|parts| parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        if reply.is_empty() {
            return Err(self.err("Empty reply from Gemini", None));
        }

        Ok(reply)
    }
}
